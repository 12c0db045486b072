//! Status aggregation shared between module loops and status queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orderflow_core::{Health, ModuleStatus, SymbolValues};
use parking_lot::RwLock;
use serde::Serialize;

/// Last published status per module.
///
/// Each module loop writes only its own entry; readers get a copy, so the
/// lock is held only for the clone.
#[derive(Debug, Clone, Default)]
pub struct StatusMap {
    inner: Arc<RwLock<BTreeMap<String, ModuleStatus>>>,
}

impl StatusMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entry for `status.module_name`.
    pub fn publish(&self, status: ModuleStatus) {
        self.inner
            .write()
            .insert(status.module_name.clone(), status);
    }

    #[must_use]
    pub fn get(&self, module: &str) -> Option<ModuleStatus> {
        self.inner.read().get(module).cloned()
    }

    /// Copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ModuleStatus> {
        self.inner.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One module's line in a [`StatusReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub health: Health,
    /// Seconds since the last successful cycle; `None` if there never was one
    pub age_secs: Option<u64>,
    pub last_error: Option<String>,
    pub values: BTreeMap<String, SymbolValues>,
    pub counters: BTreeMap<String, u64>,
}

/// Serialisable view of every module's status at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    /// Worst health across modules
    pub overall: Health,
    pub modules: Vec<ModuleReport>,
}

impl StatusReport {
    #[must_use]
    pub fn build(statuses: &BTreeMap<String, ModuleStatus>, now: DateTime<Utc>) -> Self {
        let modules: Vec<ModuleReport> = statuses
            .values()
            .map(|status| ModuleReport {
                module: status.module_name.clone(),
                health: status.health,
                age_secs: status.age(now).map(|age| age.as_secs()),
                last_error: status.last_error.clone(),
                values: status.per_symbol_values.clone(),
                counters: status.counters.clone(),
            })
            .collect();

        let overall = modules
            .iter()
            .fold(Health::Healthy, |acc, m| acc.worst(m.health));

        Self {
            generated_at: now,
            overall,
            modules,
        }
    }

    #[must_use]
    pub fn module(&self, name: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|m| m.module == name)
    }

    /// Modules that are not healthy.
    #[must_use]
    pub fn unhealthy(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|m| m.health != Health::Healthy)
            .map(|m| m.module.as_str())
            .collect()
    }
}
