//! Simulation parameters.
//!
//! Read once from a [`ConfigSource`] into plain typed structs; the engine
//! never consults the configuration again after the world is built.

use epidemia_env::{ConfigSource, RandomSource};
use serde::{Deserialize, Serialize};

use crate::exposure::Day;

/// How the immune-versus-gestating decision draws its randomness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawMode {
    /// Reuse the infection draw: immune when `r < risk * auto_immunity`
    Reuse,
    /// Take a fresh draw: immune when `r2 < auto_immunity`
    Fresh,
}

impl DrawMode {
    fn from_number(value: u64) -> Self {
        if value == 1 {
            DrawMode::Fresh
        } else {
            DrawMode::Reuse
        }
    }
}

/// A random duration in days, log-normally distributed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Mean length in days
    pub mean: f64,

    /// Standard deviation in days
    pub sd: f64,

    /// Shortest possible length
    pub floor: f64,
}

impl Interval {
    pub fn new(mean: f64, sd: f64, floor: f64) -> Self {
        Self { mean, sd, floor }
    }

    /// Draws a whole number of days, at least one.
    pub fn sample_days<R: RandomSource>(&self, rng: &mut R) -> Day {
        let days = rng.lognormal(self.mean, self.sd, self.floor).round();
        days.max(self.floor).max(1.0) as Day
    }
}

/// City sizing and geography parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityParams {
    /// Number of cities (0 = derive from population)
    pub count: u32,

    /// Lower bound on the derived city count
    pub min_count: u32,

    /// Exponent in `population^auto_power / auto_divider`
    pub auto_power: f64,

    /// Divisor in the derived city count
    pub auto_divider: f64,

    /// Largest city as a fraction of the population
    pub auto_max_pop: f64,

    /// Controls the size of the smallest city
    pub min_size_multiplier: f64,

    /// Explicit largest city population (0 = derive)
    pub max_pop: u32,

    /// Explicit smallest city population (0 = derive)
    pub min_pop: u32,

    /// Persons per unit area in the largest city
    pub max_density: f64,

    /// Persons per unit area in the smallest city
    pub min_density: f64,

    /// Damping of city-level exposure for large cities
    pub pop_ratio_power: f64,

    /// City-level exposure weight
    pub exposure: f64,

    /// Exponent on destination population when computing appeal
    pub appeal_power: f64,
}

impl Default for CityParams {
    fn default() -> Self {
        Self {
            count: 0,
            min_count: 5,
            auto_power: 0.67,
            auto_divider: 250.0,
            auto_max_pop: 0.3,
            min_size_multiplier: 2.5,
            max_pop: 0,
            min_pop: 0,
            max_density: 5000.0,
            min_density: 1000.0,
            pop_ratio_power: 0.5,
            exposure: 0.001,
            appeal_power: 0.4,
        }
    }
}

/// Every engine parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    /// Total synthetic population
    pub population: u32,

    /// Persons force-infected before the first day
    pub initial_infected: u32,

    /// Target reproduction number
    pub infectiousness: f64,

    /// Fraction of successful exposures that confer immunity instead
    pub auto_immunity: f64,

    /// Probability that an infected person dies
    pub mortality: f64,

    /// Probability that a person starts vaccinated
    pub vaccinated: f64,

    /// Gestation period
    pub gestating: Interval,

    /// Infectious but symptom-free period
    pub asymptomatic: Interval,

    /// Symptomatic period until recovery or death
    pub recovery: Interval,

    /// Lower bound of each person's daily travel probability
    pub min_mobility: f64,

    /// Upper bound of each person's daily travel probability
    pub max_mobility: f64,

    /// Scale of city appeal
    pub appeal_factor: f64,

    /// Side of the square world
    pub world_size: f64,

    /// Worker agents (0 = twice the core count)
    pub thread_count: usize,

    /// Randomness of the immune decision
    pub draw_mode: DrawMode,

    /// City sizing and geography
    pub city: CityParams,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            population: 10_000,
            initial_infected: 100,
            infectiousness: 2.5,
            auto_immunity: 0.0,
            mortality: 0.01,
            vaccinated: 0.0,
            gestating: Interval::new(5.0, 2.0, 1.0),
            asymptomatic: Interval::new(3.0, 1.0, 1.0),
            recovery: Interval::new(12.0, 5.0, 1.0),
            min_mobility: 0.0,
            max_mobility: 0.02,
            appeal_factor: 0.5,
            world_size: 100.0,
            thread_count: 0,
            draw_mode: DrawMode::Reuse,
            city: CityParams::default(),
        }
    }
}

impl SimParams {
    /// Reads every parameter, falling back to the defaults.
    pub fn from_config(cfg: &impl ConfigSource) -> Self {
        let d = Self::default();
        let floor = cfg.get_numeric("min_interval", 1.0);
        let interval = |name: &str, default: &Interval| {
            Interval::new(
                cfg.get_numeric(&format!("{name}_time"), default.mean),
                cfg.get_numeric(&format!("{name}_sd"), default.sd),
                floor,
            )
        };
        let c = &d.city;
        let city = CityParams {
            count: cfg.get_count("city.count", c.count as u64) as u32,
            min_count: cfg.get_count("city.min_count", c.min_count as u64) as u32,
            auto_power: cfg.get_numeric("city.auto_power", c.auto_power),
            auto_divider: cfg.get_numeric("city.auto_divider", c.auto_divider),
            auto_max_pop: cfg.get_numeric("city.auto_max_pop", c.auto_max_pop),
            min_size_multiplier: cfg.get_numeric("city.min_size_multiplier", c.min_size_multiplier),
            max_pop: cfg.get_count("city.max_pop", c.max_pop as u64) as u32,
            min_pop: cfg.get_count("city.min_pop", c.min_pop as u64) as u32,
            max_density: cfg.get_numeric("city.max_density", c.max_density),
            min_density: cfg.get_numeric("city.min_density", c.min_density),
            pop_ratio_power: cfg.get_numeric("city.pop_ratio_power", c.pop_ratio_power),
            exposure: cfg.get_numeric("city.exposure", c.exposure),
            appeal_power: cfg.get_numeric("city.appeal_power", c.appeal_power),
        };
        Self {
            population: cfg.get_count("population", d.population as u64) as u32,
            initial_infected: cfg.get_count("initial_infected", d.initial_infected as u64) as u32,
            infectiousness: cfg.get_numeric("infectiousness", d.infectiousness),
            auto_immunity: cfg.get_numeric("auto_immunity", d.auto_immunity).clamp(0.0, 1.0),
            mortality: cfg.get_numeric("mortality", d.mortality).clamp(0.0, 1.0),
            vaccinated: cfg.get_numeric("vaccinated", d.vaccinated).clamp(0.0, 1.0),
            gestating: interval("gestating", &d.gestating),
            asymptomatic: interval("asymptomatic", &d.asymptomatic),
            recovery: interval("recovery", &d.recovery),
            min_mobility: cfg.get_numeric("min_mobility", d.min_mobility),
            max_mobility: cfg.get_numeric("max_mobility", d.max_mobility),
            appeal_factor: cfg.get_numeric("appeal_factor", d.appeal_factor),
            world_size: cfg.get_numeric("world_size", d.world_size),
            thread_count: cfg.get_count("thread_count", d.thread_count as u64) as usize,
            draw_mode: DrawMode::from_number(cfg.get_count("draw_mode", 0)),
            city,
        }
    }

    /// Days a person spends infectious, used to derive the per-event
    /// infection probability.
    pub fn exposure_time(&self) -> f64 {
        (self.asymptomatic.mean + self.recovery.mean).max(1.0)
    }

    /// Number of agents to run, resolving 0 to twice the available cores.
    pub fn agent_count(&self) -> usize {
        let requested = if self.thread_count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(2)
        } else {
            self.thread_count
        };
        requested.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epidemia_env::{Properties, RngFactory};

    #[test]
    fn test_defaults() {
        let params = SimParams::default();
        assert_eq!(params.population, 10_000);
        assert_eq!(params.initial_infected, 100);
        assert_eq!(params.city.min_count, 5);
        assert_eq!(params.draw_mode, DrawMode::Reuse);
        assert_eq!(params.exposure_time(), 15.0);
    }

    #[test]
    fn test_from_config_overrides() {
        let mut props = Properties::new();
        props.set("population", 2500);
        props.set("recovery_time", 20);
        props.set("min_interval", 2);
        props.set("city.exposure", 0.01);
        props.set("draw_mode", 1);
        props.set("mortality", "lots");
        let params = SimParams::from_config(&props);
        assert_eq!(params.population, 2500);
        assert_eq!(params.recovery.mean, 20.0);
        assert_eq!(params.recovery.floor, 2.0);
        assert_eq!(params.gestating.mean, 5.0);
        assert_eq!(params.city.exposure, 0.01);
        assert_eq!(params.draw_mode, DrawMode::Fresh);
        assert_eq!(params.mortality, 0.01);
    }

    #[test]
    fn test_agent_count_at_least_one() {
        let mut params = SimParams::default();
        assert!(params.agent_count() >= 1);
        params.thread_count = 3;
        assert_eq!(params.agent_count(), 3);
    }

    #[test]
    fn test_interval_respects_floor() {
        let interval = Interval::new(5.0, 2.0, 3.0);
        let mut rng = RngFactory::new(8).stream(0);
        for _ in 0..500 {
            assert!(interval.sample_days(&mut rng) >= 3);
        }
    }
}
