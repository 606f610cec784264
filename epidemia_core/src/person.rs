//! Persons and their epidemiological state machine.
//!
//! ```text
//!  susceptible ──► gestating ──► asymptomatic ──► infected ──► recovered
//!       │                                             │
//!       └──► immune                                   └──► dead
//! ```
//!
//! `vaccinated` is assigned at creation and never left. Initial seeding is
//! the one extra edge, forcing `susceptible ──► infected`.
//!
//! A person's mutable state is only written by the agent that owns the
//! person, so plain atomic loads and stores are enough; the atomics exist
//! so that other agents can read a visitee's memberships and the counters
//! can be aggregated while a phase is running.

use crate::cluster::ClusterRef;
use crate::exposure::Day;
use crate::params::{DrawMode, Interval};
use crate::world::World;

use epidemia_env::RandomSource;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Epidemiological state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PersonState {
    Susceptible = 0,
    Vaccinated = 1,
    Gestating = 2,
    Asymptomatic = 3,
    Infected = 4,
    Recovered = 5,
    Dead = 6,
    Immune = 7,
}

impl PersonState {
    pub const COUNT: usize = 8;

    pub const ALL: [PersonState; PersonState::COUNT] = [
        PersonState::Susceptible,
        PersonState::Vaccinated,
        PersonState::Gestating,
        PersonState::Asymptomatic,
        PersonState::Infected,
        PersonState::Recovered,
        PersonState::Dead,
        PersonState::Immune,
    ];

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(PersonState::Susceptible)
    }

    /// True for states that spread the disease.
    pub fn is_infectious(self) -> bool {
        matches!(self, PersonState::Asymptomatic | PersonState::Infected)
    }

    /// True for states reached by catching the disease.
    pub fn is_infection(self) -> bool {
        matches!(
            self,
            PersonState::Gestating | PersonState::Asymptomatic | PersonState::Infected
        )
    }

    /// True for states with no further daily processing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PersonState::Recovered | PersonState::Dead | PersonState::Immune | PersonState::Vaccinated
        )
    }

    /// Whether a transition from `self` to `to` is an edge of the state machine.
    pub fn can_become(self, to: PersonState) -> bool {
        use PersonState::*;
        matches!(
            (self, to),
            (Susceptible, Gestating)
                | (Susceptible, Immune)
                | (Susceptible, Infected)
                | (Gestating, Asymptomatic)
                | (Asymptomatic, Infected)
                | (Infected, Recovered)
                | (Infected, Dead)
        )
    }

    /// Lower-case display name.
    pub fn name(self) -> &'static str {
        match self {
            PersonState::Susceptible => "susceptible",
            PersonState::Vaccinated => "vaccinated",
            PersonState::Gestating => "gestating",
            PersonState::Asymptomatic => "asymptomatic",
            PersonState::Infected => "infected",
            PersonState::Recovered => "recovered",
            PersonState::Dead => "dead",
            PersonState::Immune => "immune",
        }
    }
}

/// Stable address of a person: home city and index in its population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonRef {
    pub city: u32,
    pub index: u32,
}

impl PersonRef {
    pub fn new(city: u32, index: u32) -> Self {
        Self { city, index }
    }
}

/// A member of the synthetic population.
#[derive(Debug)]
pub struct Person {
    /// Current `PersonState`
    state: AtomicU8,

    /// Day on which the current state ends
    next_transition: AtomicU32,

    /// Day the person caught the disease (meaningless while susceptible)
    infected_day: AtomicU32,

    /// Probability of spending the day in another city
    mobility: f32,

    /// Leaf cluster index in each family, ordered by cluster type
    memberships: Box<[u32]>,
}

impl Person {
    pub fn new(state: PersonState, mobility: f32, memberships: Box<[u32]>) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            next_transition: AtomicU32::new(0),
            infected_day: AtomicU32::new(0),
            mobility,
            memberships,
        }
    }

    pub fn state(&self) -> PersonState {
        PersonState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PersonState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn next_transition(&self) -> Day {
        self.next_transition.load(Ordering::Relaxed)
    }

    pub fn infected_day(&self) -> Day {
        self.infected_day.load(Ordering::Relaxed)
    }

    pub fn mobility(&self) -> f32 {
        self.mobility
    }

    /// Leaf cluster indices, one per cluster type.
    pub fn membership_indices(&self) -> &[u32] {
        &self.memberships
    }

    /// Leaf clusters this person belongs to, given their home city.
    pub fn memberships(&self, city: u32) -> impl Iterator<Item = ClusterRef> + '_ {
        self.memberships
            .iter()
            .enumerate()
            .map(move |(family, &index)| ClusterRef::new(city, family as u16, index))
    }

    fn schedule<R: RandomSource>(&self, day: Day, interval: &Interval, rng: &mut R) {
        let next = day.saturating_add(interval.sample_days(rng));
        self.next_transition.store(next, Ordering::Relaxed);
    }

    /// Expose phase: advance gestating and infectious persons, and let
    /// infectious persons who are not yet due to change deposit exposure.
    pub(crate) fn expose<R: RandomSource>(&self, me: PersonRef, world: &World, day: Day, rng: &mut R) {
        let params = world.params();
        match self.state() {
            PersonState::Gestating => {
                if day >= self.next_transition() {
                    world.transition(me, self, PersonState::Asymptomatic);
                    self.schedule(day, &params.asymptomatic, rng);
                }
            }
            PersonState::Asymptomatic => {
                if day >= self.next_transition() {
                    world.transition(me, self, PersonState::Infected);
                    self.schedule(day, &params.recovery, rng);
                } else {
                    let visitee = world.visitee(me, self, rng);
                    world.deposit(me.city, visitee, day);
                }
            }
            PersonState::Infected => {
                if day >= self.next_transition() {
                    let outcome = if rng.uniform() < params.mortality {
                        PersonState::Dead
                    } else {
                        PersonState::Recovered
                    };
                    world.transition(me, self, outcome);
                } else {
                    let visitee = world.visitee(me, self, rng);
                    world.deposit(me.city, visitee, day);
                }
            }
            _ => {}
        }
    }

    /// Infect phase: a susceptible person rolls once against the day's risk
    /// in the environment of their visitee.
    pub(crate) fn infect<R: RandomSource>(&self, me: PersonRef, world: &World, day: Day, rng: &mut R) {
        if self.state() != PersonState::Susceptible {
            return;
        }
        let params = world.params();
        let visitee = world.visitee(me, self, rng);
        let risk = world.risk(visitee, day);
        let r = rng.uniform();
        if r >= risk {
            return;
        }
        let immune = match params.draw_mode {
            DrawMode::Reuse => r < risk * params.auto_immunity,
            DrawMode::Fresh => rng.uniform() < params.auto_immunity,
        };
        if immune {
            world.transition(me, self, PersonState::Immune);
        } else {
            world.transition(me, self, PersonState::Gestating);
            self.infected_day.store(day, Ordering::Relaxed);
            self.schedule(day, &params.gestating, rng);
        }
    }

    /// Seeding: move a susceptible person straight to infected.
    /// Returns false if the person was not susceptible.
    pub(crate) fn force_infect<R: RandomSource>(
        &self,
        me: PersonRef,
        world: &World,
        day: Day,
        rng: &mut R,
    ) -> bool {
        if self.state() != PersonState::Susceptible {
            return false;
        }
        world.transition(me, self, PersonState::Infected);
        self.infected_day.store(day, Ordering::Relaxed);
        self.schedule(day, &world.params().recovery, rng);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SimParams;
    use crate::world::tests::built_world;
    use rand_chacha::ChaCha8Rng;

    fn home_bound(params: SimParams) -> SimParams {
        SimParams {
            population: 2_000,
            min_mobility: 0.0,
            max_mobility: 0.0,
            thread_count: 1,
            ..params
        }
    }

    /// Fills every cluster of `me` with exposure each day until they roll
    /// a hit. Returns the day their state changed.
    fn expose_until_caught(world: &World, me: PersonRef, rng: &mut ChaCha8Rng) -> Day {
        let person = world.person(me).unwrap();
        for day in 1..=500 {
            for membership in person.memberships(me.city) {
                world.cluster(membership).unwrap().deposit(day, 1.0, false);
            }
            person.infect(me, world, day, rng);
            if person.state() != PersonState::Susceptible {
                return day;
            }
        }
        panic!("{me:?} never caught the disease");
    }

    /// Runs the expose step for `me` until they leave `state`.
    fn advance_from(world: &World, me: PersonRef, state: PersonState, from: Day, rng: &mut ChaCha8Rng) -> Day {
        let person = world.person(me).unwrap();
        for day in from..from + 500 {
            person.expose(me, world, day, rng);
            if person.state() != state {
                return day;
            }
        }
        panic!("{me:?} stuck in {state:?}");
    }

    #[test]
    fn test_auto_immunity_sends_exposed_to_immune() {
        for draw_mode in [DrawMode::Reuse, DrawMode::Fresh] {
            let params = home_bound(SimParams {
                auto_immunity: 1.0,
                draw_mode,
                ..SimParams::default()
            });
            let (world, mut rng) = built_world(params, 17);
            let me = PersonRef::new(0, 0);
            let city = world.city(0).unwrap();
            let before = city.counters().snapshot();

            expose_until_caught(&world, me, &mut rng);

            assert_eq!(world.person(me).unwrap().state(), PersonState::Immune, "{draw_mode:?}");
            let after = city.counters().snapshot();
            assert_eq!(after.immune, before.immune + 1);
            assert_eq!(after.susceptible, before.susceptible - 1);
            assert_eq!(after.total_infected, before.total_infected);
            for membership in world.person(me).unwrap().memberships(0) {
                let counted = world.cluster(membership).unwrap().counters().snapshot();
                assert_eq!(counted.immune, 1);
            }
        }
    }

    #[test]
    fn test_gestating_then_asymptomatic_on_schedule() {
        let (world, mut rng) = built_world(home_bound(SimParams::default()), 19);
        let me = PersonRef::new(0, 0);
        let person = world.person(me).unwrap();

        let caught = expose_until_caught(&world, me, &mut rng);
        assert_eq!(person.state(), PersonState::Gestating);
        assert_eq!(person.infected_day(), caught);
        let due = person.next_transition();
        assert!(due > caught);

        let changed = advance_from(&world, me, PersonState::Gestating, caught + 1, &mut rng);
        assert_eq!(changed, due);
        assert_eq!(person.state(), PersonState::Asymptomatic);
        let infectious_due = person.next_transition();
        assert!(infectious_due > due);

        let symptomatic = advance_from(&world, me, PersonState::Asymptomatic, due + 1, &mut rng);
        assert_eq!(symptomatic, infectious_due);
        assert_eq!(person.state(), PersonState::Infected);
        assert_eq!(world.city(0).unwrap().counters().snapshot().infected, 1);
    }

    #[test]
    fn test_infection_outcome_follows_mortality() {
        for (mortality, outcome) in [(1.0, PersonState::Dead), (0.0, PersonState::Recovered)] {
            let params = home_bound(SimParams {
                mortality,
                ..SimParams::default()
            });
            let (world, mut rng) = built_world(params, 23);
            let me = PersonRef::new(0, 0);
            let person = world.person(me).unwrap();
            assert!(person.force_infect(me, &world, 0, &mut rng));
            let due = person.next_transition();

            let ended = advance_from(&world, me, PersonState::Infected, 1, &mut rng);
            assert_eq!(ended, due.max(1));
            assert_eq!(person.state(), outcome);
            let snap = world.city(0).unwrap().counters().snapshot();
            assert_eq!(snap.infected, 0);
            assert_eq!(snap.dead, u32::from(outcome == PersonState::Dead));
            assert_eq!(snap.recovered, u32::from(outcome == PersonState::Recovered));
        }
    }

    #[test]
    fn test_state_roundtrip_through_u8() {
        for state in PersonState::ALL {
            assert_eq!(PersonState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_legal_edges() {
        use PersonState::*;
        assert!(Susceptible.can_become(Gestating));
        assert!(Susceptible.can_become(Immune));
        assert!(Gestating.can_become(Asymptomatic));
        assert!(Asymptomatic.can_become(Infected));
        assert!(Infected.can_become(Recovered));
        assert!(Infected.can_become(Dead));
    }

    #[test]
    fn test_no_back_edges() {
        for from in PersonState::ALL {
            assert!(!from.can_become(PersonState::Susceptible));
            if from.is_terminal() {
                for to in PersonState::ALL {
                    assert!(!from.can_become(to), "{from:?} -> {to:?}");
                }
            }
        }
        assert!(!PersonState::Gestating.can_become(PersonState::Infected));
        assert!(!PersonState::Recovered.can_become(PersonState::Infected));
    }

    #[test]
    fn test_infectious_states() {
        let infectious: Vec<_> = PersonState::ALL.iter().filter(|s| s.is_infectious()).collect();
        assert_eq!(infectious, vec![&PersonState::Asymptomatic, &PersonState::Infected]);
    }

    #[test]
    fn test_memberships_carry_family_index() {
        let person = Person::new(PersonState::Susceptible, 0.0, vec![4, 9].into_boxed_slice());
        let refs: Vec<ClusterRef> = person.memberships(3).collect();
        assert_eq!(refs, vec![ClusterRef::new(3, 0, 4), ClusterRef::new(3, 1, 9)]);
    }
}
