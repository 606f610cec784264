//! Epidemia Environment Abstraction Layer
//!
//! This crate provides the collaborators the simulation engine consumes
//! but does not own:
//! - **Configuration**: named numeric parameters with wildcard fallback
//!   ([`ConfigSource`], [`Properties`])
//! - **Randomness**: uniform, ranged and log-normal draws ([`RandomSource`])
//!   from seeded, independent streams ([`RngFactory`])
//!
//! By deriving every generator from a single 64-bit seed, a run with one
//! agent is reproducible from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use epidemia_env::{ConfigSource, Properties, RandomSource, RngFactory};
//!
//! let mut props = Properties::from_file("base.props")?;
//! props.parse_assignment("population=50000")?;
//! let population = props.get_numeric("population", 10000.0);
//!
//! let mut rng = RngFactory::new(42).stream(0);
//! let days = rng.lognormal(12.0, 5.0, 1.0);
//! ```

mod config;
mod error;
mod random;

pub use config::{ConfigSource, Properties, PropertyEntry};
pub use error::EnvError;
pub use random::{LogNormalShape, RandomSource, RngFactory};
