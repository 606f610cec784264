//! Agents: the workers that run each phase over their share of the world.

use crate::city::MiddlePass;
use crate::exposure::Day;
use crate::partition::{partition, Share};
use crate::person::PersonRef;
use crate::scheduler::{Phase, PhaseWorker};
use crate::world::World;

use epidemia_env::RngFactory;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::trace;

/// A worker owning a fixed set of residents.
///
/// City-level work (accumulator resets, middle-phase family passes,
/// statistics) is shared among every agent touching the city and made
/// idempotent by the city's day stamps and family claims. One-off build
/// work for a city is done by the agent whose share starts at the city's
/// first resident.
#[derive(Debug)]
pub struct Agent {
    /// Position among the agents
    id: usize,

    world: Arc<World>,

    /// Residents this agent runs
    shares: Vec<Share>,

    /// Distinct cities touched by `shares`
    cities: Vec<u32>,

    /// Cities this agent builds
    owned: Vec<u32>,

    /// This agent's own random stream
    rng: ChaCha8Rng,
}

impl Agent {
    pub fn new(id: usize, world: Arc<World>, shares: Vec<Share>, rng: ChaCha8Rng) -> Self {
        let mut cities: Vec<u32> = shares.iter().map(|s| s.city).collect();
        cities.dedup();
        let owned = shares.iter().filter(|s| s.owns_city()).map(|s| s.city).collect();
        Self {
            id,
            world,
            shares,
            cities,
            owned,
            rng,
        }
    }

    /// Splits the world among `params.agent_count()` agents, each with its
    /// own random stream. Stream 0 is left for the caller.
    pub fn for_world(world: &Arc<World>, factory: &RngFactory) -> Vec<Agent> {
        let count = world.params().agent_count();
        partition(&world.populations(), count)
            .into_iter()
            .enumerate()
            .map(|(id, shares)| Agent::new(id, Arc::clone(world), shares, factory.stream(id as u64 + 1)))
            .collect()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn shares(&self) -> &[Share] {
        &self.shares
    }

    /// Residents this agent runs.
    pub fn population(&self) -> u32 {
        self.shares.iter().map(Share::len).sum()
    }

    fn for_each_person(&mut self, day: Day, infect: bool) {
        let world = &*self.world;
        for share in &self.shares {
            let Some(city) = world.city(share.city) else {
                continue;
            };
            let Some(people) = city.people().get(share.range.start as usize..share.range.end as usize) else {
                continue;
            };
            for (offset, person) in people.iter().enumerate() {
                let me = PersonRef::new(share.city, share.range.start + offset as u32);
                if infect {
                    person.infect(me, world, day, &mut self.rng);
                } else {
                    person.expose(me, world, day, &mut self.rng);
                }
            }
        }
    }

    fn middle(&self, pass: MiddlePass, day: Day) {
        let world = &*self.world;
        for city in self.cities.iter().filter_map(|&c| world.city(c)) {
            if pass == MiddlePass::Forward {
                city.begin_middle(day);
            }
            for family in 0..city.family_count() {
                if city.claim_family(family, pass, day) {
                    world.middle_pass(city, family, pass, day);
                }
            }
        }
    }
}

impl PhaseWorker for Agent {
    fn run_phase(&mut self, phase: Phase, day: Day) {
        trace!(agent = self.id, ?phase, day, "Phase start");
        let world = Arc::clone(&self.world);
        match phase {
            Phase::BuildClusters => {
                for &city in &self.owned {
                    world.build_clusters(city, &mut self.rng);
                }
            }
            Phase::BuildPopulation => {
                for &city in &self.owned {
                    world.build_population(city, &mut self.rng);
                }
            }
            Phase::LinkCities => {
                for &city in &self.owned {
                    world.link_city(city, &mut self.rng);
                }
            }
            Phase::InitDay => {
                for city in self.cities.iter().filter_map(|&c| world.city(c)) {
                    city.init_day(day);
                }
            }
            Phase::Expose => self.for_each_person(day, false),
            Phase::Middle(pass) => self.middle(pass, day),
            Phase::Infect => self.for_each_person(day, true),
            Phase::FinalizeDay => {
                for city in self.cities.iter().filter_map(|&c| world.city(c)) {
                    city.finalize_day(day);
                }
            }
        }
    }
}
