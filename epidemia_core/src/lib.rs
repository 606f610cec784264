//! Epidemia Core - daily engine of an agent-based epidemic simulator
//!
//! A synthetic population lives in cities, and each city groups its people
//! into nested trees of clusters: households, workplaces, social circles.
//! Each simulated day:
//! 1. **Expose**: infectious people deposit exposure into the city and the
//!    clusters of whoever they share the day with
//! 2. **Middle**: exposure bubbles up each cluster tree, crossing into
//!    neighboring cities where ties exist, then trickles back down
//! 3. **Infect**: susceptible people roll once against the combined risk
//!
//! Work is split across [`Agent`]s, one OS thread each, kept in lockstep
//! by the [`Scheduler`]'s phase barrier.

pub mod agent;
pub mod chooser;
pub mod city;
pub mod cluster;
pub mod counters;
pub mod error;
pub mod exposure;
pub mod params;
pub mod partition;
pub mod person;
pub mod probability;
pub mod reciprocal;
pub mod scheduler;
pub mod stats;
pub mod world;

// Re-export key types for convenience
pub use agent::Agent;
pub use chooser::Chooser;
pub use city::{City, MiddlePass};
pub use cluster::{Cluster, ClusterFamily, ClusterRef, ClusterType, ClusterTypeRegistry, MAX_CLUSTER_TYPES};
pub use counters::{CounterSnapshot, InfectionCounters};
pub use error::BuildError;
pub use exposure::Day;
pub use params::{CityParams, DrawMode, Interval, SimParams};
pub use partition::Share;
pub use person::{Person, PersonRef, PersonState};
pub use scheduler::{Phase, PhaseWorker, Scheduler};
pub use stats::{CityRecord, DailyRecord, RunSummary, WorldStats};
pub use world::World;
