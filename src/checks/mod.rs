//! Check registry loaded from TOML files.
//!
//! Each `*.toml` file in the checks directory holds any number of
//! `[[check]]` tables:
//!
//! ```toml
//! [[check]]
//! network = "hoodi"
//! client = "geth"
//! schedule = "*/30 * * * *"
//! ```

pub mod hook;

use crate::error::{Error, Result};
use crate::model::{CheckAlert, WorkItem};
use crate::scheduler::Schedule;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub use hook::HookWorker;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ChecksFile {
    #[serde(default)]
    check: Vec<CheckAlert>,
}

/// Registry of loaded checks, indexed by dedup key.
#[derive(Debug, Default)]
pub struct CheckRegistry {
    checks: BTreeMap<String, CheckAlert>,
}

impl CheckRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry from checks already in memory.
    pub fn from_checks(checks: impl IntoIterator<Item = CheckAlert>) -> Result<Self> {
        let mut registry = Self::empty();
        for check in checks {
            registry.insert(check, "<memory>")?;
        }
        Ok(registry)
    }

    /// Load all `.toml` files from a directory and build the registry.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::Config(format!("cannot read checks dir {}: {e}", dir.display())))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut registry = Self::empty();
        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let file: ChecksFile = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("bad checks file {}: {e}", path.display())))?;
            for check in file.check {
                registry.insert(check, &path.display().to_string())?;
            }
        }

        Ok(registry)
    }

    fn insert(&mut self, check: CheckAlert, origin: &str) -> Result<()> {
        Schedule::parse(&check.schedule)
            .map_err(|e| Error::Config(format!("check {} in {origin}: {e}", check.key())))?;

        let key = check.key();
        if self.checks.contains_key(&key) {
            return Err(Error::Config(format!("duplicate check {key} in {origin}")));
        }
        self.checks.insert(key, check);
        Ok(())
    }

    /// Look up a check by its dedup key.
    pub fn get(&self, key: &str) -> Option<&CheckAlert> {
        self.checks.get(key)
    }

    /// All checks, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = &CheckAlert> {
        self.checks.values()
    }

    /// Checks that should be scheduled.
    pub fn enabled(&self) -> impl Iterator<Item = &CheckAlert> {
        self.iter().filter(|check| check.enabled)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
