//! Cities: population, cluster families, city-level exposure and the
//! per-phase bookkeeping that keeps each phase idempotent when a city is
//! split across several agents.

use crate::chooser::Chooser;
use crate::cluster::{ClusterFamily, ClusterTypeRegistry};
use crate::counters::InfectionCounters;
use crate::exposure::{Day, DayExposure, ForeignExposure};
use crate::person::{Person, PersonState};
use crate::probability::combine;

use epidemia_env::RandomSource;
use nalgebra::Point2;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Which half of the middle phase a family claim is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiddlePass {
    /// Redirected leaves deposit into their exposure parents in other cities
    Forward,
    /// Children forward exposure to structural parents
    BubbleUp,
    /// Parents hand exposure down to children
    TrickleDown,
}

impl MiddlePass {
    /// The passes in the order they run, each behind its own barrier.
    pub const ALL: [MiddlePass; 3] = [MiddlePass::Forward, MiddlePass::BubbleUp, MiddlePass::TrickleDown];

    fn claim_stamp(self, day: Day) -> u64 {
        let pass = match self {
            MiddlePass::Forward => 1,
            MiddlePass::BubbleUp => 2,
            MiddlePass::TrickleDown => 3,
        };
        day as u64 * 3 + pass
    }
}

/// Other cities weighted for travel and for cross-city cluster ties.
#[derive(Debug)]
pub struct Neighbors {
    /// Weighted by inverse distance
    pub by_distance: Chooser<u32>,

    /// Weighted by inverse distance and destination size
    pub by_appeal: Chooser<u32>,
}

/// Daily leaf-cluster statistics, written by `finalize_day`.
#[derive(Debug, Default)]
struct ClusterStats {
    untouched: AtomicU32,
    susceptible: AtomicU32,
}

/// A city and everything it owns.
#[derive(Debug)]
pub struct City {
    /// Position in the world's city list
    id: u32,

    /// Display name
    name: String,

    /// Number of residents
    population: u32,

    /// Center
    location: Point2<f64>,

    /// Radius of the populated area
    radius: f64,

    /// Exposure one infectious person adds at city level
    exposure_per_person: f32,

    /// One cluster tree per cluster type, built once
    families: Vec<OnceLock<ClusterFamily>>,

    /// Residents, built once
    people: OnceLock<Vec<Person>>,

    /// Travel and tie destinations, built once
    neighbors: OnceLock<Neighbors>,

    /// Per-state counts of residents
    counters: InfectionCounters,

    /// Deposits from residents
    local: DayExposure,

    /// Deposits from visitors' home agents
    foreign: ForeignExposure,

    /// Local and foreign combined, fixed in the middle phase
    total: DayExposure,

    /// Stamp of the last day `init_day` ran
    init_day_no: AtomicU32,

    /// Stamp of the last day `begin_middle` ran
    middle_day_no: AtomicU32,

    /// Stamp of the last day `finalize_day` ran
    finalize_day_no: AtomicU32,

    /// Last pass stamp claimed per family
    claims: Mutex<Vec<u64>>,

    /// Leaf statistics as of the last finalized day
    stats: ClusterStats,
}

/// Marks `slot` for `day`; true only for the first caller of the day.
fn claim_day(slot: &AtomicU32, day: Day) -> bool {
    let stamp = day.wrapping_add(1);
    slot.swap(stamp, Ordering::AcqRel) != stamp
}

impl City {
    pub fn new(
        id: u32,
        population: u32,
        location: Point2<f64>,
        radius: f64,
        exposure_per_person: f32,
        family_count: usize,
    ) -> Self {
        Self {
            id,
            name: format!("C{id:03}"),
            population,
            location,
            radius,
            exposure_per_person,
            families: (0..family_count).map(|_| OnceLock::new()).collect(),
            people: OnceLock::new(),
            neighbors: OnceLock::new(),
            counters: InfectionCounters::new(),
            local: DayExposure::new(),
            foreign: ForeignExposure::new(),
            total: DayExposure::new(),
            init_day_no: AtomicU32::new(0),
            middle_day_no: AtomicU32::new(0),
            finalize_day_no: AtomicU32::new(0),
            claims: Mutex::new(vec![0; family_count]),
            stats: ClusterStats::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target number of residents.
    pub fn population(&self) -> u32 {
        self.population
    }

    pub fn location(&self) -> Point2<f64> {
        self.location
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn exposure_per_person(&self) -> f32 {
        self.exposure_per_person
    }

    pub fn counters(&self) -> &InfectionCounters {
        &self.counters
    }

    /// Straight-line distance between centers.
    pub fn distance(&self, other: &City) -> f64 {
        nalgebra::distance(&self.location, &other.location)
    }

    /// True when the two populated areas intersect.
    pub fn overlaps(&self, other: &City) -> bool {
        self.distance(other) < self.radius + other.radius
    }

    // -------------------------------------------------------------------------
    // Build
    // -------------------------------------------------------------------------

    pub fn family_count(&self) -> usize {
        self.families.len()
    }

    /// The family of `type_index`, if built.
    pub fn family(&self, type_index: usize) -> Option<&ClusterFamily> {
        self.families.get(type_index).and_then(OnceLock::get)
    }

    /// Builds the family of `type_index` unless another agent already has.
    pub fn build_family<R: RandomSource>(
        &self,
        type_index: usize,
        registry: &ClusterTypeRegistry,
        rng: &mut R,
    ) -> Option<&ClusterFamily> {
        let slot = self.families.get(type_index)?;
        let ty = registry.get(type_index)?;
        Some(slot.get_or_init(|| ty.make_family(type_index, self.id, self.population, rng)))
    }

    /// Residents; empty until the population is built.
    pub fn people(&self) -> &[Person] {
        self.people.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn person(&self, index: u32) -> Option<&Person> {
        self.people().get(index as usize)
    }

    /// Creates the residents, assigning each a capacity-weighted leaf in
    /// every family. Runs once; later callers see the first result.
    pub fn build_people<R: RandomSource>(
        &self,
        registry: &ClusterTypeRegistry,
        vaccinated: f64,
        mobility: (f64, f64),
        rng: &mut R,
    ) -> &[Person] {
        self.people.get_or_init(|| {
            let families: Vec<&ClusterFamily> = (0..self.families.len())
                .filter_map(|t| self.build_family(t, registry, &mut *rng))
                .collect();
            let mut members: Vec<Vec<Vec<u32>>> =
                families.iter().map(|f| vec![Vec::new(); f.len()]).collect();
            let mut people = Vec::with_capacity(self.population as usize);
            for index in 0..self.population {
                let state = if rng.uniform() < vaccinated {
                    PersonState::Vaccinated
                } else {
                    PersonState::Susceptible
                };
                let person_mobility = rng.uniform_real(mobility.0, mobility.1) as f32;
                let memberships: Box<[u32]> = families
                    .iter()
                    .enumerate()
                    .map(|(t, family)| {
                        let leaf = family.choose_leaf(&mut *rng);
                        members[t][leaf as usize].push(index);
                        if let Some(cluster) = family.cluster(leaf) {
                            cluster.counters().add_person(state);
                        }
                        leaf
                    })
                    .collect();
                self.counters.add_person(state);
                people.push(Person::new(state, person_mobility, memberships));
            }
            for (family, lists) in families.iter().zip(members) {
                for (cluster, list) in family.clusters().iter().zip(lists) {
                    if cluster.is_leaf() {
                        cluster.set_members(list);
                    }
                }
            }
            people
        })
    }

    pub fn neighbors(&self) -> Option<&Neighbors> {
        self.neighbors.get()
    }

    pub(crate) fn neighbors_or_init(&self, init: impl FnOnce() -> Neighbors) -> &Neighbors {
        self.neighbors.get_or_init(init)
    }

    /// Another city weighted by inverse distance.
    pub fn random_neighbor<R: RandomSource>(&self, rng: &mut R) -> Option<u32> {
        self.neighbors()?.by_distance.choose(rng).copied()
    }

    /// A travel destination weighted by appeal.
    pub fn destination<R: RandomSource>(&self, rng: &mut R) -> Option<u32> {
        self.neighbors()?.by_appeal.choose(rng).copied()
    }

    /// A uniformly chosen resident.
    pub fn random_person<R: RandomSource>(&self, rng: &mut R) -> Option<u32> {
        let count = self.people().len() as u64;
        if count == 0 {
            None
        } else {
            Some(rng.uniform_int(0, count - 1) as u32)
        }
    }

    // -------------------------------------------------------------------------
    // Daily phases
    // -------------------------------------------------------------------------

    /// Starts the day: clears the city-level accumulators. Only the first
    /// call per day has any effect.
    pub fn init_day(&self, day: Day) -> bool {
        if !claim_day(&self.init_day_no, day) {
            return false;
        }
        self.local.set(day, 0.0);
        self.foreign.reset(day);
        true
    }

    /// One infectious person is active in this city today. `from_city` is
    /// the depositor's home; anyone else's deposit takes the foreign lock.
    pub fn deposit(&self, day: Day, from_city: u32) {
        if from_city == self.id {
            self.local.add(day, self.exposure_per_person);
        } else {
            self.foreign.add(day, self.exposure_per_person);
        }
    }

    /// Fixes the city's combined exposure for the day. Only the first call
    /// per day does the work.
    pub fn begin_middle(&self, day: Day) -> bool {
        if !claim_day(&self.middle_day_no, day) {
            return false;
        }
        self.exposure(day);
        true
    }

    /// City-level exposure for the day, local and foreign combined.
    pub fn exposure(&self, day: Day) -> f32 {
        self.total
            .memo(day, || combine(self.local.get(day), self.foreign.get(day)))
    }

    /// City-level exposure deposited by residents of other cities.
    pub fn foreign_exposure(&self, day: Day) -> f32 {
        self.foreign.get(day)
    }

    /// Claims `family` for one pass of the middle phase. Exactly one caller
    /// per family, pass and day gets `true`.
    pub fn claim_family(&self, family: usize, pass: MiddlePass, day: Day) -> bool {
        let stamp = pass.claim_stamp(day);
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        match claims.get_mut(family) {
            Some(slot) if *slot != stamp => {
                *slot = stamp;
                true
            }
            _ => false,
        }
    }

    /// Closes the day: refreshes leaf-cluster statistics. Only the first
    /// call per day does the work.
    pub fn finalize_day(&self, day: Day) -> bool {
        if !claim_day(&self.finalize_day_no, day) {
            return false;
        }
        let (untouched, susceptible) = self
            .families
            .iter()
            .filter_map(OnceLock::get)
            .map(ClusterFamily::leaf_stats)
            .fold((0, 0), |(u, s), (fu, fs)| (u + fu, s + fs));
        self.stats.untouched.store(untouched, Ordering::Relaxed);
        self.stats.susceptible.store(susceptible, Ordering::Relaxed);
        true
    }

    /// Leaf clusters nobody in has been infected, as of the last finalized day.
    pub fn untouched_clusters(&self) -> u32 {
        self.stats.untouched.load(Ordering::Relaxed)
    }

    /// Leaf clusters with someone still susceptible, as of the last finalized day.
    pub fn susceptible_clusters(&self) -> u32 {
        self.stats.susceptible.load(Ordering::Relaxed)
    }
}
