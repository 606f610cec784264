//! JSON export of a whole run.
//!
//! Collects the parameters, every daily record and the summary, then
//! writes them as one pretty-printed document for plotting tools.

use crate::output::RecordSink;

use epidemia_core::{CityRecord, ClusterTypeRegistry, DailyRecord, RunSummary, SimParams};
use epidemia_env::Properties;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Complete run export.
#[derive(Debug, Clone, Serialize)]
pub struct RunExport {
    /// Master seed
    pub seed: u64,

    /// Property definitions the run was configured from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,

    /// Engine parameters
    pub params: SimParams,

    /// Cluster types in effect
    pub cluster_types: ClusterTypeRegistry,

    /// One record per day, day 0 first
    pub days: Vec<DailyRecord>,

    /// Per-city records, when a breakdown was requested
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cities: Vec<CityRecord>,

    /// Set once the run is over
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl RunExport {
    /// Creates an empty export for a run.
    pub fn new(seed: u64, params: SimParams, cluster_types: ClusterTypeRegistry) -> Self {
        Self {
            seed,
            properties: None,
            params,
            cluster_types,
            days: Vec::new(),
            cities: Vec::new(),
            summary: None,
        }
    }

    /// Records the raw properties alongside the resolved parameters.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

impl RecordSink for RunExport {
    fn write_record(&mut self, record: &DailyRecord) -> io::Result<()> {
        self.days.push(record.clone());
        Ok(())
    }

    fn write_cities(&mut self, records: &[CityRecord]) -> io::Result<()> {
        self.cities.extend_from_slice(records);
        Ok(())
    }

    fn finish(&mut self, summary: &RunSummary) -> io::Result<()> {
        self.summary = Some(summary.clone());
        Ok(())
    }
}
