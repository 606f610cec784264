//! Daily aggregates and run summaries.

use crate::city::City;
use crate::counters::CounterSnapshot;
use crate::exposure::Day;
use crate::world::World;

use serde::Serialize;
use tracing::debug;

/// World-wide state at the end of one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRecord {
    /// Day number, 0 for the seeded start
    pub day: Day,

    /// Counts by state
    #[serde(flatten)]
    pub counts: CounterSnapshot,

    /// Increase in `total_infected` since the previous day
    pub new_infected: u32,

    /// Active cases relative to the previous day
    pub growth: f64,

    /// Cities nobody has been infected in
    pub untouched_cities: u32,

    /// Leaf clusters nobody has been infected in
    pub untouched_clusters: u32,

    /// Leaf clusters with someone still susceptible
    pub susceptible_clusters: u32,
}

impl DailyRecord {
    /// Persons carrying the disease.
    pub fn active(&self) -> u32 {
        self.counts.active()
    }
}

/// One city's state at the end of one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityRecord {
    pub day: Day,
    pub city: u32,
    pub name: String,
    #[serde(flatten)]
    pub counts: CounterSnapshot,
    pub untouched_clusters: u32,
    pub susceptible_clusters: u32,
}

impl CityRecord {
    pub fn new(day: Day, city: &City) -> Self {
        Self {
            day,
            city: city.id(),
            name: city.name().to_string(),
            counts: city.counters().snapshot(),
            untouched_clusters: city.untouched_clusters(),
            susceptible_clusters: city.susceptible_clusters(),
        }
    }
}

/// Headline figures of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Last day simulated
    pub days: Day,

    pub population: u32,

    /// People ever infected, seeds included
    pub total_infected: u32,

    pub dead: u32,

    /// Peak number of active cases
    pub max_active: u32,

    /// Day of the peak
    pub max_active_day: Day,

    /// Largest daily growth once cases exceed 1% of the population
    pub max_growth: f64,

    /// Doubling time implied by `max_growth`, if growth ever exceeded 1
    pub days_to_double: Option<f64>,
}

/// Collects one [`DailyRecord`] per day and tracks the run's extremes.
#[derive(Debug, Default)]
pub struct WorldStats {
    records: Vec<DailyRecord>,
    max_active: u32,
    max_active_day: Day,
    max_growth: f64,
}

impl WorldStats {
    pub fn new() -> Self {
        Self {
            max_growth: 1.0,
            ..Self::default()
        }
    }

    /// Aggregates the world's counters for `day`.
    pub fn record(&mut self, day: Day, world: &World) -> &DailyRecord {
        let counts = world.snapshot();
        let (previous_total, previous_active) = self
            .records
            .last()
            .map(|r| (r.counts.total_infected, r.active()))
            .unwrap_or((counts.total_infected, counts.active()));
        let active = counts.active();
        let growth = if previous_active > 0 {
            active as f64 / previous_active as f64
        } else {
            1.0
        };
        if active > self.max_active {
            self.max_active = active;
            self.max_active_day = day;
        }
        if active > counts.population / 100 && growth > self.max_growth {
            self.max_growth = growth;
        }
        let record = DailyRecord {
            day,
            counts,
            new_infected: counts.total_infected.saturating_sub(previous_total),
            growth,
            untouched_cities: world.untouched_cities(),
            untouched_clusters: world.untouched_clusters(),
            susceptible_clusters: world.susceptible_clusters(),
        };
        debug!(
            day,
            active,
            total_infected = counts.total_infected,
            new_infected = record.new_infected,
            "Day complete"
        );
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[DailyRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&DailyRecord> {
        self.records.last()
    }

    /// The record before the latest.
    pub fn previous(&self) -> Option<&DailyRecord> {
        self.records.len().checked_sub(2).and_then(|i| self.records.get(i))
    }

    pub fn summary(&self) -> RunSummary {
        let Some(last) = self.latest() else {
            return RunSummary::default();
        };
        RunSummary {
            days: last.day,
            population: last.counts.population,
            total_infected: last.counts.total_infected,
            dead: last.counts.dead,
            max_active: self.max_active,
            max_active_day: self.max_active_day,
            max_growth: self.max_growth,
            days_to_double: (self.max_growth > 1.0).then(|| 2f64.ln() / self.max_growth.ln()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SimParams;
    use crate::world::tests::{built_world, step};

    #[test]
    fn test_records_track_new_infections() {
        let params = SimParams {
            population: 3_000,
            initial_infected: 30,
            ..SimParams::default()
        };
        let (world, mut rng) = built_world(params, 17);
        let mut stats = WorldStats::new();
        world.seed_infections(30, 0, &mut rng);
        stats.record(0, &world);
        for day in 1..=10 {
            step(&world, day, &mut rng);
            stats.record(day, &world);
        }
        let records = stats.records();
        assert_eq!(records.len(), 11);
        assert_eq!(records[0].new_infected, 0);
        assert_eq!(records[0].counts.total_infected, 30);
        for pair in records.windows(2) {
            assert_eq!(
                pair[1].new_infected,
                pair[1].counts.total_infected - pair[0].counts.total_infected
            );
        }
        let summary = stats.summary();
        assert_eq!(summary.days, 10);
        assert_eq!(summary.population, 3_000);
        assert!(summary.max_active >= 30);
        assert_eq!(stats.previous().map(|r| r.day), Some(9));
    }

    #[test]
    fn test_empty_summary() {
        let stats = WorldStats::new();
        assert_eq!(stats.summary(), RunSummary::default());
        assert!(stats.latest().is_none());
    }

    #[test]
    fn test_city_records_sum_to_world() {
        let (world, mut rng) = built_world(SimParams::default(), 23);
        world.seed_infections(10, 0, &mut rng);
        let mut sum = CounterSnapshot::default();
        for record in world.city_records(0) {
            sum.accumulate(&record.counts);
        }
        assert_eq!(sum, world.snapshot());
    }
}
