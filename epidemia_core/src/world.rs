//! The world: every city, the cluster types and the parameters of a run.
//!
//! A `World` is the single context object the engine runs against. It is
//! created once by [`World::new`], shared with the agents behind an `Arc`,
//! and never replaced. The one-off build work (cluster trees, residents,
//! city links) and the daily phases are driven by the agents through the
//! crate-private methods below.

use crate::chooser::Chooser;
use crate::city::{City, MiddlePass, Neighbors};
use crate::cluster::{Cluster, ClusterRef, ClusterTypeRegistry};
use crate::counters::CounterSnapshot;
use crate::error::BuildError;
use crate::exposure::Day;
use crate::params::SimParams;
use crate::person::{Person, PersonRef, PersonState};
use crate::reciprocal::Reciprocal;
use crate::stats::CityRecord;

use epidemia_env::RandomSource;
use nalgebra::Point2;
use std::f64::consts::PI;
use tracing::{debug, info, warn};

/// Attempts to place a city clear of the ones already placed.
const PLACEMENT_ATTEMPTS: usize = 100;

/// Distance below which two city centers count as coincident.
const MIN_DISTANCE: f64 = 1e-3;

/// Rounds `value` to `digits` significant decimal digits.
fn round_sig(value: f64, digits: i32) -> f64 {
    if value <= 0.0 || !value.is_finite() {
        return value.max(0.0);
    }
    let scale = 10f64.powi(digits - 1 - value.log10().floor() as i32);
    (value * scale).round() / scale
}

/// City count and population bounds derived from the parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CitySizing {
    pub count: u32,
    pub min_pop: u32,
    pub max_pop: u32,
}

impl CitySizing {
    /// Applies the configured values, deriving any left at zero.
    pub fn derive(params: &SimParams) -> Self {
        let c = &params.city;
        let population = params.population as f64;
        let count = if c.count > 0 {
            c.count
        } else {
            let auto = round_sig(population.powf(c.auto_power) / c.auto_divider.max(1e-9), 2);
            (auto as u32).max(c.min_count)
        };
        let count = count.clamp(1, params.population.max(1));
        let max_pop = if c.max_pop > 0 {
            c.max_pop
        } else {
            round_sig(population * c.auto_max_pop, 2) as u32
        };
        let min_pop = if c.min_pop > 0 {
            c.min_pop
        } else {
            let rest = (population - max_pop as f64).max(0.0);
            round_sig(rest / (count as f64 * c.min_size_multiplier.max(1e-9)), 2) as u32
        };
        Self {
            count,
            min_pop: min_pop.max(1),
            max_pop: max_pop.max(1),
        }
    }

    /// Draws city populations, largest first, summing to `population`.
    pub fn populations<R: RandomSource>(&self, population: u32, rng: &mut R) -> Vec<u32> {
        if self.count <= 1 {
            return vec![population];
        }
        let mean = population as f64 / self.count as f64;
        let mut pops = Reciprocal::new(self.min_pop as f64, self.max_pop as f64, self.count as usize, mean)
            .values_int(rng);
        let sum: u64 = pops.iter().map(|&p| p as u64).sum();
        if sum != population as u64 {
            // Rounding of the mean can leave a remainder; the largest city absorbs it.
            debug!(sum, population, "City populations off target, adjusting the largest");
            if let Some(first) = pops.first_mut() {
                *first = (*first as i64 + population as i64 - sum as i64).max(0) as u32;
            }
        }
        pops
    }
}

/// Everything a run needs, shared by all agents.
#[derive(Debug)]
pub struct World {
    /// Engine parameters
    params: SimParams,

    /// Cluster types, finalized with `infection_prob`
    registry: ClusterTypeRegistry,

    /// Every city, indexed by id
    cities: Vec<City>,

    /// Probability that one infectious contact infects
    infection_prob: f64,

    /// Population of the smallest city
    min_city_pop: u32,
}

impl World {
    /// Sizes and places the cities. Cluster trees, residents and city
    /// links are built afterwards by the agents.
    pub fn new<R: RandomSource>(
        params: SimParams,
        mut registry: ClusterTypeRegistry,
        rng: &mut R,
    ) -> Result<Self, BuildError> {
        if params.population == 0 {
            return Err(BuildError::EmptyPopulation);
        }
        if registry.is_empty() {
            return Err(BuildError::NoClusterTypes);
        }
        if params.world_size.is_nan() || params.world_size <= 2.0 {
            return Err(BuildError::invalid("world_size", "must be greater than 2"));
        }
        if params.min_mobility > params.max_mobility {
            return Err(BuildError::invalid("min_mobility", "exceeds max_mobility"));
        }

        let weight = params.exposure_time() * registry.exposure_weight();
        let infection_prob = params.infectiousness / weight;
        if !infection_prob.is_finite() || infection_prob < 0.0 {
            return Err(BuildError::invalid(
                "infectiousness",
                format!("gives infection probability {infection_prob} with cluster weight {weight}"),
            ));
        }
        registry.finalize(infection_prob);

        let sizing = CitySizing::derive(&params);
        let populations = sizing.populations(params.population, rng);
        let min_city_pop = populations.iter().copied().filter(|&p| p > 0).min().unwrap_or(1);
        info!(
            cities = populations.len(),
            min_pop = sizing.min_pop,
            max_pop = sizing.max_pop,
            infection_prob,
            "Sizing world"
        );

        let mut world = Self {
            params,
            registry,
            cities: Vec::with_capacity(populations.len()),
            infection_prob,
            min_city_pop,
        };
        for (id, &population) in populations.iter().enumerate() {
            let city = world.make_city(id as u32, population, &sizing, rng);
            world.cities.push(city);
        }
        Ok(world)
    }

    fn make_city<R: RandomSource>(&self, id: u32, population: u32, sizing: &CitySizing, rng: &mut R) -> City {
        let c = &self.params.city;
        let span = (sizing.max_pop as f64 - sizing.min_pop as f64).max(1.0);
        let ratio = ((population as f64 - sizing.min_pop as f64) / span).clamp(0.0, 1.0);
        let density = (c.min_density + ratio * (c.max_density - c.min_density)).max(1e-9);
        let radius = (population as f64 / density / PI).sqrt();

        let pop_ratio = (population.max(1) as f64 / self.min_city_pop as f64).powf(-c.pop_ratio_power);
        let exposure_per_person = (self.infection_prob * c.exposure * pop_ratio).clamp(0.0, 1.0) as f32;

        let high = self.params.world_size - 1.0;
        let place = |rng: &mut R| Point2::new(rng.uniform_real(1.0, high), rng.uniform_real(1.0, high));
        let mut city = City::new(id, population, place(rng), radius, exposure_per_person, self.registry.len());
        for _ in 0..PLACEMENT_ATTEMPTS {
            if !self.cities.iter().any(|other| city.overlaps(other)) {
                break;
            }
            city = City::new(id, population, place(rng), radius, exposure_per_person, self.registry.len());
        }
        debug!(city = city.name(), population, radius, "Placed city");
        city
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn registry(&self) -> &ClusterTypeRegistry {
        &self.registry
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    pub fn city(&self, id: u32) -> Option<&City> {
        self.cities.get(id as usize)
    }

    pub fn infection_prob(&self) -> f64 {
        self.infection_prob
    }

    /// City populations in id order, as used to partition the agents.
    pub fn populations(&self) -> Vec<u32> {
        self.cities.iter().map(City::population).collect()
    }

    /// Looks a cluster up by address.
    pub fn cluster(&self, r: ClusterRef) -> Option<&Cluster> {
        self.city(r.city)?.family(r.family as usize)?.cluster(r.index)
    }

    pub fn person(&self, r: PersonRef) -> Option<&Person> {
        self.city(r.city)?.person(r.index)
    }

    // -------------------------------------------------------------------------
    // Build steps
    // -------------------------------------------------------------------------

    pub(crate) fn build_clusters<R: RandomSource>(&self, city: u32, rng: &mut R) {
        let Some(c) = self.city(city) else {
            return;
        };
        for t in 0..self.registry.len() {
            c.build_family(t, &self.registry, rng);
        }
        let clusters: usize = (0..c.family_count()).filter_map(|t| c.family(t)).map(|f| f.len()).sum();
        debug!(city = c.name(), clusters, "Built cluster families");
    }

    pub(crate) fn build_population<R: RandomSource>(&self, city: u32, rng: &mut R) {
        let Some(c) = self.city(city) else {
            return;
        };
        let mobility = (self.params.min_mobility, self.params.max_mobility);
        let people = c.build_people(&self.registry, self.params.vaccinated, mobility, rng);
        debug!(city = c.name(), people = people.len(), "Added population");
    }

    /// Fills in the neighbor choosers of `city` and redirects a share of
    /// its leaf clusters to exposure parents in neighboring cities. Needs
    /// every city's cluster families.
    pub(crate) fn link_city<R: RandomSource>(&self, city: u32, rng: &mut R) {
        let Some(c) = self.city(city) else {
            return;
        };
        c.neighbors_or_init(|| self.make_neighbors(c));

        let mut redirected = 0usize;
        for (t, ty) in self.registry.iter().enumerate() {
            if ty.same_city >= 1.0 {
                continue;
            }
            let Some(family) = c.family(t) else {
                continue;
            };
            if family.len() <= 1 {
                continue;
            }
            for &leaf in family.leaf_indices() {
                if rng.uniform() < ty.same_city {
                    continue;
                }
                let Some(neighbor) = c.random_neighbor(rng) else {
                    break;
                };
                let Some(target) = self.city(neighbor).and_then(|n| n.family(t)) else {
                    continue;
                };
                let candidates = target.depth_one();
                if candidates.is_empty() {
                    continue;
                }
                let pick = candidates[rng.uniform_int(0, candidates.len() as u64 - 1) as usize];
                let redirect = family
                    .cluster(leaf)
                    .is_some_and(|cluster| cluster.set_foreign_parent(target.address(pick)));
                if redirect {
                    redirected += 1;
                }
            }
        }
        debug!(city = c.name(), redirected, "Linked city");
    }

    fn make_neighbors(&self, city: &City) -> Neighbors {
        let c = &self.params.city;
        let mut inverse = vec![0.0; self.cities.len()];
        let mut appeal = vec![0.0; self.cities.len()];
        let mut ids = Vec::with_capacity(self.cities.len().saturating_sub(1));
        for other in self.cities.iter().filter(|o| o.id() != city.id()) {
            let inv = 1.0 / city.distance(other).max(MIN_DISTANCE);
            inverse[other.id() as usize] = inv;
            appeal[other.id() as usize] =
                inv * (other.population() as f64).powf(c.appeal_power) * self.params.appeal_factor;
            ids.push(other.id());
        }
        Neighbors {
            by_distance: Chooser::new(ids.clone(), |&id| inverse[id as usize]),
            by_appeal: Chooser::new(ids, |&id| appeal[id as usize]),
        }
    }

    /// Force-infects up to `count` susceptible people, chosen uniformly
    /// across the whole population. Returns how many were infected.
    pub fn seed_infections<R: RandomSource>(&self, count: u32, day: Day, rng: &mut R) -> u32 {
        let ids: Vec<u32> = (0..self.cities.len() as u32).collect();
        let chooser = Chooser::new(ids, |&id| self.cities[id as usize].people().len() as f64);
        let attempts = count as usize * 10 + 100;
        let mut seeded = 0;
        for _ in 0..attempts {
            if seeded >= count {
                break;
            }
            let Some(&city) = chooser.choose(rng) else {
                break;
            };
            let Some(index) = self.cities[city as usize].random_person(rng) else {
                continue;
            };
            let me = PersonRef::new(city, index);
            if let Some(person) = self.person(me) {
                if person.force_infect(me, self, day, rng) {
                    seeded += 1;
                }
            }
        }
        if seeded < count {
            warn!(requested = count, seeded, "Could not find enough susceptible people to seed");
        } else {
            info!(seeded, "Seeded initial infections");
        }
        seeded
    }

    // -------------------------------------------------------------------------
    // Daily operations used by persons
    // -------------------------------------------------------------------------

    /// Moves `person` to `to`, updating the counters of their home city
    /// and of every cluster they belong to.
    pub(crate) fn transition(&self, me: PersonRef, person: &Person, to: PersonState) {
        let from = person.state();
        debug_assert!(from.can_become(to), "illegal transition {from:?} -> {to:?}");
        if let Some(city) = self.city(me.city) {
            city.counters().record_transition(from, to);
        }
        for membership in person.memberships(me.city) {
            if let Some(cluster) = self.cluster(membership) {
                cluster.counters().record_transition(from, to);
            }
        }
        person.set_state(to);
    }

    /// Whose environment `person` shares today: themselves, or with
    /// probability equal to their mobility a random resident of an
    /// appealing other city.
    pub(crate) fn visitee<R: RandomSource>(&self, me: PersonRef, person: &Person, rng: &mut R) -> PersonRef {
        let mobility = person.mobility() as f64;
        if mobility <= 0.0 || rng.uniform() >= mobility {
            return me;
        }
        let Some(destination) = self.city(me.city).and_then(|home| home.destination(rng)) else {
            return me;
        };
        self.city(destination)
            .and_then(|city| city.random_person(rng))
            .map(|index| PersonRef::new(destination, index))
            .unwrap_or(me)
    }

    /// An infectious resident of `home_city` deposits into the city and
    /// the clusters of `visitee`.
    pub(crate) fn deposit(&self, home_city: u32, visitee: PersonRef, day: Day) {
        let Some(city) = self.city(visitee.city) else {
            return;
        };
        city.deposit(day, home_city);
        let Some(person) = city.person(visitee.index) else {
            return;
        };
        let foreign = visitee.city != home_city;
        for (membership, ty) in person.memberships(visitee.city).zip(self.registry.iter()) {
            if let Some(cluster) = self.cluster(membership) {
                cluster.deposit(day, ty.exposure(), foreign);
            }
        }
    }

    /// Today's risk in the environment of `visitee`: city exposure plus
    /// the member exposure of each of their clusters.
    pub(crate) fn risk(&self, visitee: PersonRef, day: Day) -> f64 {
        let Some(city) = self.city(visitee.city) else {
            return 0.0;
        };
        let mut risk = city.exposure(day) as f64;
        if let Some(person) = city.person(visitee.index) {
            for (membership, ty) in person.memberships(visitee.city).zip(self.registry.iter()) {
                if let Some(cluster) = self.cluster(membership) {
                    risk += cluster.member_exposure(day, ty.influence as f32) as f64;
                }
            }
        }
        risk
    }

    // -------------------------------------------------------------------------
    // Middle phase
    // -------------------------------------------------------------------------

    /// Runs one middle-phase pass over a family the caller has claimed.
    pub(crate) fn middle_pass(&self, city: &City, family: usize, pass: MiddlePass, day: Day) {
        let (Some(f), Some(ty)) = (city.family(family), self.registry.get(family)) else {
            return;
        };
        let nest = ty.nest_influence as f32;
        match pass {
            MiddlePass::Forward => f.forward(day, nest, |r| self.cluster(r)),
            MiddlePass::BubbleUp => f.bubble_up(day, nest),
            MiddlePass::TrickleDown => f.trickle_down(day, nest),
        }
    }

    // -------------------------------------------------------------------------
    // Aggregates
    // -------------------------------------------------------------------------

    /// World-wide counts.
    pub fn snapshot(&self) -> CounterSnapshot {
        let mut total = CounterSnapshot::default();
        for city in &self.cities {
            total.accumulate(&city.counters().snapshot());
        }
        total
    }

    /// Cities nobody has been infected in yet.
    pub fn untouched_cities(&self) -> u32 {
        self.cities
            .iter()
            .filter(|c| c.counters().population() > 0 && c.counters().is_untouched())
            .count() as u32
    }

    /// Leaf clusters nobody has been infected in, as of the last finalized day.
    pub fn untouched_clusters(&self) -> u32 {
        self.cities.iter().map(City::untouched_clusters).sum()
    }

    /// Leaf clusters with anyone left to infect, as of the last finalized day.
    pub fn susceptible_clusters(&self) -> u32 {
        self.cities.iter().map(City::susceptible_clusters).sum()
    }

    /// Per-city breakdown for `day`.
    pub fn city_records(&self, day: Day) -> Vec<CityRecord> {
        self.cities.iter().map(|city| CityRecord::new(day, city)).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use epidemia_env::RngFactory;
    use rand_chacha::ChaCha8Rng;

    /// Builds a world and runs the build steps on one thread.
    pub(crate) fn built_world(params: SimParams, seed: u64) -> (World, ChaCha8Rng) {
        let mut rng = RngFactory::new(seed).stream(0);
        let world = World::new(params, ClusterTypeRegistry::builtin(), &mut rng).unwrap();
        for id in 0..world.cities().len() as u32 {
            world.build_clusters(id, &mut rng);
        }
        for id in 0..world.cities().len() as u32 {
            world.build_population(id, &mut rng);
        }
        for id in 0..world.cities().len() as u32 {
            world.link_city(id, &mut rng);
        }
        (world, rng)
    }

    /// Runs one day's phases on one thread.
    pub(crate) fn step(world: &World, day: Day, rng: &mut ChaCha8Rng) {
        for city in world.cities() {
            city.init_day(day);
        }
        for city in world.cities() {
            for (index, person) in city.people().iter().enumerate() {
                person.expose(PersonRef::new(city.id(), index as u32), world, day, rng);
            }
        }
        for pass in MiddlePass::ALL {
            for city in world.cities() {
                city.begin_middle(day);
                for family in 0..city.family_count() {
                    if city.claim_family(family, pass, day) {
                        world.middle_pass(city, family, pass, day);
                    }
                }
            }
        }
        for city in world.cities() {
            for (index, person) in city.people().iter().enumerate() {
                person.infect(PersonRef::new(city.id(), index as u32), world, day, rng);
            }
        }
        for city in world.cities() {
            city.finalize_day(day);
        }
    }

    fn small_params(population: u32) -> SimParams {
        SimParams {
            population,
            initial_infected: 20,
            thread_count: 1,
            ..SimParams::default()
        }
    }

    fn assert_counters_consistent(world: &World) {
        for city in world.cities() {
            let snap = city.counters().snapshot();
            assert_eq!(snap.state_total(), snap.population, "city {}", city.name());
            for t in 0..city.family_count() {
                let family = city.family(t).unwrap();
                for cluster in family.clusters().iter().filter(|c| c.is_leaf()) {
                    let snap = cluster.counters().snapshot();
                    assert_eq!(snap.state_total(), snap.population);
                }
            }
        }
    }

    #[test]
    fn test_round_sig() {
        assert_eq!(round_sig(1234.0, 2), 1200.0);
        assert_eq!(round_sig(0.04567, 2), 0.046);
        assert_eq!(round_sig(3000.0, 2), 3000.0);
        assert_eq!(round_sig(0.0, 2), 0.0);
    }

    #[test]
    fn test_city_sizing() {
        let params = SimParams::default();
        let sizing = CitySizing::derive(&params);
        assert_eq!(sizing.count, 5);
        assert_eq!(sizing.max_pop, 3000);
        assert_eq!(sizing.min_pop, 560);

        let mut rng = RngFactory::new(4).stream(0);
        let pops = sizing.populations(params.population, &mut rng);
        assert_eq!(pops.len(), 5);
        assert_eq!(pops.iter().sum::<u32>(), 10_000);
        assert!(pops.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_explicit_city_count() {
        let mut params = small_params(50);
        params.city.count = 200;
        let sizing = CitySizing::derive(&params);
        assert_eq!(sizing.count, 50);
    }

    #[test]
    fn test_build_errors() {
        let mut rng = RngFactory::new(1).stream(0);
        let registry = ClusterTypeRegistry::builtin();
        assert!(matches!(
            World::new(small_params(0), registry.clone(), &mut rng),
            Err(BuildError::EmptyPopulation)
        ));
        let mut params = small_params(100);
        params.world_size = 1.0;
        assert!(matches!(
            World::new(params, registry, &mut rng),
            Err(BuildError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_world_build_populates_every_city() {
        let (world, _) = built_world(small_params(10_000), 7);
        assert_eq!(world.snapshot().population, 10_000);
        for city in world.cities() {
            assert_eq!(city.people().len() as u32, city.population());
            assert!(city.exposure_per_person() > 0.0);
            let local = city.family(world.registry().local_type()).unwrap();
            let members: usize = local
                .leaf_indices()
                .iter()
                .map(|&i| local.cluster(i).unwrap().members().len())
                .sum();
            assert_eq!(members as u32, city.population());
            assert!(city.neighbors().is_some());
        }
        assert_counters_consistent(&world);
    }

    #[test]
    fn test_foreign_parents_point_at_depth_one() {
        let (world, _) = built_world(small_params(20_000), 11);
        let mut redirected = 0;
        for city in world.cities() {
            for t in 0..city.family_count() {
                let family = city.family(t).unwrap();
                for &leaf in family.leaf_indices() {
                    let me = family.address(leaf);
                    let cluster = family.cluster(leaf).unwrap();
                    if cluster.is_foreign_exposure(me) {
                        redirected += 1;
                        let target = cluster.exposure_parent(me).unwrap();
                        assert_ne!(target.city, city.id());
                        assert_eq!(target.family as usize, t);
                        assert_eq!(world.cluster(target).unwrap().depth(), cluster.depth() + 1);
                    }
                }
            }
        }
        assert!(redirected > 0);
    }

    fn first_redirected_leaf(world: &World) -> Option<ClusterRef> {
        for city in world.cities() {
            for t in 0..city.family_count() {
                let Some(family) = city.family(t) else {
                    continue;
                };
                for &leaf in family.leaf_indices() {
                    let me = family.address(leaf);
                    if family.cluster(leaf).is_some_and(|c| c.is_foreign_exposure(me)) {
                        return Some(me);
                    }
                }
            }
        }
        None
    }

    /// Runs the middle passes for `day`, visiting cities in `order`.
    fn run_middle(world: &World, order: &[u32], day: Day) {
        for pass in MiddlePass::ALL {
            for city in order.iter().filter_map(|&c| world.city(c)) {
                city.begin_middle(day);
                for family in 0..city.family_count() {
                    if city.claim_family(family, pass, day) {
                        world.middle_pass(city, family, pass, day);
                    }
                }
            }
        }
    }

    #[test]
    fn test_cross_city_exposure_independent_of_city_order() {
        let (world, _) = built_world(small_params(20_000), 11);
        let source = first_redirected_leaf(&world).unwrap();
        let target = world.cluster(source).unwrap().exposure_parent(source).unwrap();
        let remote = world.city(target.city).unwrap().family(target.family as usize).unwrap();
        let remote_leaves = |day: Day| -> Vec<f32> {
            remote
                .leaf_indices()
                .iter()
                .map(|&i| remote.cluster(i).unwrap().exposure(day))
                .collect()
        };

        let forward: Vec<u32> = (0..world.cities().len() as u32).collect();
        let backward: Vec<u32> = forward.iter().rev().copied().collect();
        for (day, order) in [(1, &forward), (2, &backward)] {
            world.cluster(source).unwrap().deposit(day, 0.5, false);
            run_middle(&world, order, day);
        }

        assert!(world.cluster(target).unwrap().foreign_exposure(1) > 0.0);
        let (first, second) = (remote_leaves(1), remote_leaves(2));
        assert!(first.iter().all(|&p| p > 0.0));
        for (a, b) in first.iter().zip(&second) {
            assert_relative_eq!(*a, *b, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_travel_deposits_land_in_destination_foreign_accumulators() {
        let mut params = small_params(5_000);
        params.min_mobility = 1.0;
        params.max_mobility = 1.0;
        let (world, mut rng) = built_world(params, 13);
        let me = PersonRef::new(0, 0);
        let person = world.person(me).unwrap();
        assert_eq!(person.mobility(), 1.0);

        let visitee = world.visitee(me, person, &mut rng);
        assert_ne!(visitee.city, me.city);

        let day = 1;
        for city in world.cities() {
            city.init_day(day);
        }
        world.deposit(me.city, visitee, day);

        let home = world.city(me.city).unwrap();
        let away = world.city(visitee.city).unwrap();
        assert!(away.foreign_exposure(day) > 0.0);
        assert_eq!(home.exposure(day), 0.0);
        for membership in world.person(visitee).unwrap().memberships(visitee.city) {
            let cluster = world.cluster(membership).unwrap();
            assert!(cluster.foreign_exposure(day) > 0.0);
            assert_relative_eq!(cluster.exposure(day), cluster.foreign_exposure(day), max_relative = 1e-5);
        }
        for membership in person.memberships(me.city) {
            assert_eq!(world.cluster(membership).unwrap().exposure(day), 0.0);
        }
    }

    #[test]
    fn test_state_machine_legal_over_run() {
        let (world, mut rng) = built_world(small_params(5_000), 3);
        world.seed_infections(20, 0, &mut rng);
        let before: Vec<Vec<PersonState>> = world
            .cities()
            .iter()
            .map(|c| c.people().iter().map(Person::state).collect())
            .collect();
        let mut previous = before;
        for day in 1..=15 {
            step(&world, day, &mut rng);
            for (city, states) in world.cities().iter().zip(previous.iter_mut()) {
                for (person, old) in city.people().iter().zip(states.iter_mut()) {
                    let new = person.state();
                    assert!(new == *old || old.can_become(new), "{old:?} -> {new:?}");
                    *old = new;
                }
            }
            assert_counters_consistent(&world);
        }
    }

    #[test]
    fn test_seeding_infects_requested_count() {
        let (world, mut rng) = built_world(small_params(2_000), 5);
        assert_eq!(world.seed_infections(20, 0, &mut rng), 20);
        let snap = world.snapshot();
        assert_eq!(snap.infected, 20);
        assert_eq!(snap.total_infected, 20);
        assert_eq!(snap.susceptible, 1_980);
    }

    #[test]
    fn test_untouched_cities_fall_as_infection_spreads() {
        let (world, mut rng) = built_world(small_params(5_000), 9);
        assert_eq!(world.untouched_cities(), world.cities().len() as u32);
        world.seed_infections(50, 0, &mut rng);
        assert!(world.untouched_cities() < world.cities().len() as u32);
    }
}
