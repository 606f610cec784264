//! Aggregate infection counters.
//!
//! Kept per city and per cluster and updated on every state transition.
//! The per-state counts always sum to the population.

use crate::person::PersonState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Lock-free running counts of persons by state.
#[derive(Debug, Default)]
pub struct InfectionCounters {
    /// Persons ever added
    population: AtomicU32,

    /// Current count per state, indexed by `PersonState as usize`
    states: [AtomicU32; PersonState::COUNT],

    /// Persons who have ever left susceptible through infection
    total_infected: AtomicU32,
}

impl InfectionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a newly created person in `state`.
    pub fn add_person(&self, state: PersonState) {
        self.population.fetch_add(1, Ordering::Relaxed);
        self.states[state as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Moves one person from `from` to `to`.
    pub fn record_transition(&self, from: PersonState, to: PersonState) {
        let previous = self.states[from as usize].fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "{from:?} count underflow");
        self.states[to as usize].fetch_add(1, Ordering::Relaxed);
        if from == PersonState::Susceptible && to.is_infection() {
            self.total_infected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn population(&self) -> u32 {
        self.population.load(Ordering::Relaxed)
    }

    /// Current number of persons in `state`.
    pub fn count(&self, state: PersonState) -> u32 {
        self.states[state as usize].load(Ordering::Relaxed)
    }

    pub fn total_infected(&self) -> u32 {
        self.total_infected.load(Ordering::Relaxed)
    }

    /// Everyone is still susceptible.
    pub fn is_untouched(&self) -> bool {
        self.count(PersonState::Susceptible) == self.population()
    }

    /// At least one person can still be infected.
    pub fn is_susceptible(&self) -> bool {
        self.count(PersonState::Susceptible) > 0
    }

    /// Copies the counts into a plain value.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            population: self.population(),
            susceptible: self.count(PersonState::Susceptible),
            vaccinated: self.count(PersonState::Vaccinated),
            gestating: self.count(PersonState::Gestating),
            asymptomatic: self.count(PersonState::Asymptomatic),
            infected: self.count(PersonState::Infected),
            recovered: self.count(PersonState::Recovered),
            dead: self.count(PersonState::Dead),
            immune: self.count(PersonState::Immune),
            total_infected: self.total_infected(),
        }
    }
}

/// A point-in-time copy of [`InfectionCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub population: u32,
    pub susceptible: u32,
    pub vaccinated: u32,
    pub gestating: u32,
    pub asymptomatic: u32,
    pub infected: u32,
    pub recovered: u32,
    pub dead: u32,
    pub immune: u32,
    pub total_infected: u32,
}

impl CounterSnapshot {
    /// Sum of the per-state counts; equals `population` when consistent.
    pub fn state_total(&self) -> u32 {
        self.susceptible
            + self.vaccinated
            + self.gestating
            + self.asymptomatic
            + self.infected
            + self.recovered
            + self.dead
            + self.immune
    }

    /// Persons carrying the disease: gestating, asymptomatic or infected.
    pub fn active(&self) -> u32 {
        self.gestating + self.asymptomatic + self.infected
    }

    /// Persons able to spread it today.
    pub fn infectious(&self) -> u32 {
        self.asymptomatic + self.infected
    }

    /// Adds another snapshot into this one.
    pub fn accumulate(&mut self, other: &CounterSnapshot) {
        self.population += other.population;
        self.susceptible += other.susceptible;
        self.vaccinated += other.vaccinated;
        self.gestating += other.gestating;
        self.asymptomatic += other.asymptomatic;
        self.infected += other.infected;
        self.recovered += other.recovered;
        self.dead += other.dead;
        self.immune += other.immune;
        self.total_infected += other.total_infected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_and_transition() {
        let counters = InfectionCounters::new();
        for _ in 0..10 {
            counters.add_person(PersonState::Susceptible);
        }
        counters.add_person(PersonState::Vaccinated);
        counters.record_transition(PersonState::Susceptible, PersonState::Gestating);
        counters.record_transition(PersonState::Susceptible, PersonState::Immune);

        let snap = counters.snapshot();
        assert_eq!(snap.population, 11);
        assert_eq!(snap.susceptible, 8);
        assert_eq!(snap.gestating, 1);
        assert_eq!(snap.immune, 1);
        assert_eq!(snap.total_infected, 1);
        assert_eq!(snap.state_total(), snap.population);
    }

    #[test]
    fn test_untouched_and_susceptible() {
        let counters = InfectionCounters::new();
        counters.add_person(PersonState::Susceptible);
        assert!(counters.is_untouched());
        counters.record_transition(PersonState::Susceptible, PersonState::Infected);
        assert!(!counters.is_untouched());
        assert!(!counters.is_susceptible());
    }

    #[test]
    fn test_concurrent_transitions_keep_invariant() {
        let counters = Arc::new(InfectionCounters::new());
        for _ in 0..4000 {
            counters.add_person(PersonState::Susceptible);
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.record_transition(PersonState::Susceptible, PersonState::Gestating);
                        counters.record_transition(PersonState::Gestating, PersonState::Asymptomatic);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snap = counters.snapshot();
        assert_eq!(snap.asymptomatic, 4000);
        assert_eq!(snap.total_infected, 4000);
        assert_eq!(snap.state_total(), snap.population);
    }
}
