//! Epidemia Simulation Harness
//!
//! Wraps the engine in a runnable program:
//! - **Day loop**: builds the world, seeds day 0 and steps days until the
//!   epidemic stops being interesting ([`DayLoop`])
//! - **Output**: CSV rows, a console table, or a JSON export of the whole
//!   run ([`RecordSink`], [`RunExport`])
//!
//! # Usage
//!
//! ```ignore
//! use epidemia_core::{ClusterTypeRegistry, SimParams};
//! use epidemia_sim::{DayLoop, RunLimits, TableSink};
//!
//! let mut run = DayLoop::new(SimParams::default(), ClusterTypeRegistry::builtin(), 42)?
//!     .with_limits(RunLimits { min_days: 0, max_days: 100 });
//! let summary = run.run(&mut TableSink::new(std::io::stdout()))?;
//! ```

mod error;
mod exporter;
mod output;
mod runner;

pub use error::SimError;
pub use exporter::RunExport;
pub use output::{CsvSink, Fanout, RecordSink, TableSink};
pub use runner::{still_interesting, DayLoop, RunLimits};
