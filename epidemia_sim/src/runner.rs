//! Day-loop driver: builds a world, seeds it and runs days until nothing
//! interesting is left to happen.

use crate::error::SimError;
use crate::output::RecordSink;

use epidemia_core::{
    Agent, ClusterTypeRegistry, DailyRecord, Day, RunSummary, Scheduler, SimParams, World, WorldStats,
};
use epidemia_env::{ConfigSource, RngFactory};
use std::sync::Arc;
use tracing::{debug, info};

/// When a run may and must stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunLimits {
    /// Always run at least this many days
    pub min_days: Day,

    /// Never run more than this many days (0 = no limit)
    pub max_days: Day,
}

impl RunLimits {
    pub fn from_config(cfg: &impl ConfigSource) -> Self {
        Self {
            min_days: cfg.get_count("min_days", 0) as Day,
            max_days: cfg.get_count("max_days", 0) as Day,
        }
    }
}

/// Whether another day is worth simulating after `latest`.
///
/// Runs on while below `min_days`, stops at `max_days`, and otherwise
/// continues while someone carries the disease and cases are either not
/// falling or still above one in a thousand people.
pub fn still_interesting(limits: &RunLimits, latest: &DailyRecord, previous: Option<&DailyRecord>) -> bool {
    if latest.day < limits.min_days {
        return true;
    }
    if limits.max_days > 0 && latest.day >= limits.max_days {
        return false;
    }
    let active = latest.active();
    let previous_active = previous.map(DailyRecord::active).unwrap_or(active);
    active > 0 && (active >= previous_active || active > latest.counts.population / 1000)
}

/// Owns a built world, its agents and the running statistics.
pub struct DayLoop {
    /// Master seed, resolved if 0 was requested
    seed: u64,

    world: Arc<World>,

    scheduler: Scheduler<Agent>,

    stats: WorldStats,

    limits: RunLimits,

    /// Also report every city each day
    city_breakdown: bool,

    /// Last completed day
    day: Day,
}

impl DayLoop {
    /// Builds the world, starts the agents and seeds the initial infections
    /// as day 0.
    pub fn new(params: SimParams, registry: ClusterTypeRegistry, seed: u64) -> Result<Self, SimError> {
        let factory = RngFactory::new(seed);
        let mut rng = factory.stream(0);
        let initial = params.initial_infected;

        let world = Arc::new(World::new(params, registry, &mut rng)?);
        let agents = Agent::for_world(&world, &factory);
        let mut scheduler = Scheduler::new(agents)?;
        info!(
            seed = factory.seed(),
            cities = world.cities().len(),
            agents = scheduler.worker_count(),
            "Building world"
        );
        scheduler.build();
        info!(population = world.snapshot().population, "World built");

        world.seed_infections(initial, 0, &mut rng);
        for city in world.cities() {
            city.finalize_day(0);
        }
        let mut stats = WorldStats::new();
        stats.record(0, &world);

        Ok(Self {
            seed: factory.seed(),
            world,
            scheduler,
            stats,
            limits: RunLimits::default(),
            city_breakdown: false,
            day: 0,
        })
    }

    /// Sets the day bounds.
    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Reports every city as well as the world.
    pub fn with_city_breakdown(mut self, enabled: bool) -> Self {
        self.city_breakdown = enabled;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn stats(&self) -> &WorldStats {
        &self.stats
    }

    pub fn day(&self) -> Day {
        self.day
    }

    /// Simulates one more day.
    pub fn step(&mut self) -> &DailyRecord {
        self.day += 1;
        self.scheduler.run_day(self.day);
        self.stats.record(self.day, &self.world)
    }

    /// Whether the run should go on after the last completed day.
    pub fn still_interesting(&self) -> bool {
        match self.stats.latest() {
            Some(latest) => still_interesting(&self.limits, latest, self.stats.previous()),
            None => true,
        }
    }

    /// Runs until [`still_interesting`] says stop, reporting every day to
    /// `sink`, including the seeded day 0.
    pub fn run(&mut self, sink: &mut dyn RecordSink) -> Result<RunSummary, SimError> {
        let io = |e| SimError::output("output", e);
        if let Some(start) = self.stats.latest() {
            sink.write_record(start).map_err(io)?;
        }
        if self.city_breakdown {
            sink.write_cities(&self.world.city_records(self.day)).map_err(io)?;
        }
        while self.still_interesting() {
            let record = self.step().clone();
            sink.write_record(&record).map_err(io)?;
            if self.city_breakdown {
                sink.write_cities(&self.world.city_records(self.day)).map_err(io)?;
            }
        }
        let summary = self.stats.summary();
        debug!(days = summary.days, "Run complete");
        sink.finish(&summary).map_err(io)?;
        Ok(summary)
    }

    /// Stops the agent threads. Dropping the loop does the same.
    pub fn shutdown(&mut self) {
        self.scheduler.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CsvSink;
    use epidemia_core::CounterSnapshot;
    use proptest::prelude::*;

    fn record(day: Day, infected: u32, population: u32) -> DailyRecord {
        DailyRecord {
            day,
            counts: CounterSnapshot {
                population,
                infected,
                susceptible: population - infected,
                ..CounterSnapshot::default()
            },
            new_infected: 0,
            growth: 1.0,
            untouched_cities: 0,
            untouched_clusters: 0,
            susceptible_clusters: 0,
        }
    }

    fn scenario_params(threads: usize) -> SimParams {
        SimParams {
            population: 10_000,
            initial_infected: 20,
            thread_count: threads,
            ..SimParams::default()
        }
    }

    #[test]
    fn test_ten_thousand_scenario() {
        let mut run = DayLoop::new(scenario_params(4), ClusterTypeRegistry::builtin(), 42).unwrap();
        let mut totals = vec![run.stats().latest().unwrap().counts.total_infected];
        for _ in 0..5 {
            let record = run.step();
            assert_eq!(record.counts.state_total(), 10_000);
            totals.push(record.counts.total_infected);
        }
        assert!(totals[1] >= 20);
        assert!(totals.windows(2).all(|w| w[0] <= w[1]), "{totals:?}");
        run.shutdown();
    }

    #[test]
    fn test_max_days_stops_run() {
        let limits = RunLimits {
            min_days: 0,
            max_days: 3,
        };
        let mut run = DayLoop::new(scenario_params(1), ClusterTypeRegistry::builtin(), 7)
            .unwrap()
            .with_limits(limits);
        let mut sink = CsvSink::new(Vec::new());
        let summary = run.run(&mut sink).unwrap();
        assert_eq!(summary.days, 3);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 1 + 4);
    }

    #[test]
    fn test_still_interesting_rules() {
        let limits = RunLimits {
            min_days: 5,
            max_days: 10,
        };
        // Below min_days even with nobody infected.
        assert!(still_interesting(&limits, &record(2, 0, 1000), None));
        // At max_days even while growing.
        assert!(!still_interesting(&limits, &record(10, 50, 1000), Some(&record(9, 10, 1000))));
        // Falling but above one in a thousand.
        assert!(still_interesting(&limits, &record(6, 5, 1000), Some(&record(5, 10, 1000))));
        // Falling and at most one in a thousand.
        assert!(!still_interesting(&limits, &record(6, 1, 1000), Some(&record(5, 2, 1000))));
        // Nobody left.
        assert!(!still_interesting(&limits, &record(6, 0, 1000), Some(&record(5, 0, 1000))));
    }

    proptest! {
        #[test]
        fn prop_min_days_always_continue(day in 0u32..50, extra in 1u32..50, infected in 0u32..100) {
            let limits = RunLimits { min_days: day + extra, max_days: 0 };
            prop_assert!(still_interesting(&limits, &record(day, infected, 1000), None));
        }
    }
}
