//! Named configuration parameters.
//!
//! Parameters are dotted names (`cluster.household.influence`) mapped to
//! text values. Any component of a stored name may be `*`, which matches
//! any component in a lookup. An exact entry always wins; otherwise the
//! matching entry with the fewest wildcards is used, and among equals the
//! one defined last.
//!
//! # File format
//!
//! ```text
//! # comment
//! population = 100000
//! cluster.*.nest_influence = 0.1
//! cluster.work.average_pop = 12   # trailing comment
//! ```

use crate::error::EnvError;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Read-only access to named parameters.
///
/// The simulation engine only ever asks for numbers with a fallback, so
/// a missing or malformed entry is never an error at this level.
pub trait ConfigSource {
    /// Returns the raw text for `name`, after wildcard resolution.
    fn get_text(&self, name: &str) -> Option<&str>;

    /// Returns every concrete (wildcard-free) name defined.
    fn names(&self) -> Vec<String>;

    /// Returns `name` as a number, or `default` when it is missing or not numeric.
    fn get_numeric(&self, name: &str, default: f64) -> f64 {
        self.get_text(name)
            .and_then(|text| text.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(default)
    }

    /// Returns `name` as a non-negative integer, rounding, or `default`.
    fn get_count(&self, name: &str, default: u64) -> u64 {
        let value = self.get_numeric(name, default as f64);
        if value >= 0.0 {
            value.round() as u64
        } else {
            default
        }
    }
}

/// A single `name = value` definition.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyEntry {
    /// Full dotted name as written
    pub name: String,

    /// Value text, trimmed
    pub value: String,

    #[serde(skip)]
    components: Vec<String>,

    #[serde(skip)]
    wildcards: usize,
}

impl PropertyEntry {
    fn new(name: &str, value: &str) -> Self {
        let components: Vec<String> = name.split('.').map(|c| c.trim().to_string()).collect();
        let wildcards = components.iter().filter(|c| c.as_str() == "*").count();
        Self {
            name: components.join("."),
            value: value.trim().to_string(),
            components,
            wildcards,
        }
    }

    /// True when any component is `*`.
    pub fn is_wild(&self) -> bool {
        self.wildcards > 0
    }

    /// Returns the dotted components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    fn matches(&self, wanted: &[&str]) -> bool {
        self.components.len() == wanted.len()
            && self
                .components
                .iter()
                .zip(wanted)
                .all(|(have, want)| have == "*" || have == want)
    }
}

/// An ordered set of property definitions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Properties {
    entries: Vec<PropertyEntry>,
}

impl Properties {
    /// Creates an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a property file into a new set.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EnvError> {
        let mut props = Self::new();
        props.load_file(path)?;
        Ok(props)
    }

    /// Adds every definition in a property file. Later definitions of the
    /// same name replace earlier ones.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), EnvError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EnvError::io(path, e))?;
        let before = self.entries.len();
        self.parse_str(&text, &path.display().to_string())?;
        debug!(
            "Loaded {} properties from {}",
            self.entries.len().saturating_sub(before),
            path.display()
        );
        Ok(())
    }

    /// Parses property text. `origin` names the source in error messages.
    pub fn parse_str(&mut self, text: &str, origin: &str) -> Result<(), EnvError> {
        for (index, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let (name, value) = split_assignment(line)
                .ok_or_else(|| EnvError::syntax(origin, index + 1, raw.trim()))?;
            self.set(name, value);
        }
        Ok(())
    }

    /// Parses a single `name=value` assignment, as given on a command line.
    pub fn parse_assignment(&mut self, text: &str) -> Result<(), EnvError> {
        let (name, value) =
            split_assignment(text.trim()).ok_or_else(|| EnvError::syntax("argument", 1, text))?;
        self.set(name, value);
        Ok(())
    }

    /// Defines `name`, replacing any existing definition of exactly that name.
    pub fn set(&mut self, name: &str, value: impl ToString) {
        let entry = PropertyEntry::new(name, &value.to_string());
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => existing.value = entry.value,
            None => self.entries.push(entry),
        }
    }

    /// Resolves `name` through wildcard matching.
    pub fn lookup(&self, name: &str) -> Option<&PropertyEntry> {
        let wanted: Vec<&str> = name.split('.').map(str::trim).collect();
        self.entries
            .iter()
            .filter(|e| e.matches(&wanted))
            .fold(None, |best: Option<&PropertyEntry>, e| match best {
                Some(b) if b.wildcards < e.wildcards => Some(b),
                _ => Some(e),
            })
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is defined.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over definitions in the order they were first defined.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyEntry> {
        self.entries.iter()
    }
}

impl ConfigSource for Properties {
    fn get_text(&self, name: &str) -> Option<&str> {
        self.lookup(name).map(|e| e.value.as_str())
    }

    fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.is_wild())
            .map(|e| e.name.clone())
            .collect()
    }
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || name.split('.').any(|c| c.trim().is_empty()) {
        return None;
    }
    Some((name, value.trim()))
}
