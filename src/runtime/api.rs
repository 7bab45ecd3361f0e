//! Read-only views of engine state for status endpoints and the daemon.

use serde::{Deserialize, Serialize};

use crate::core::{ModuleState, Scheduler};

/// One registered module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    /// Module alias.
    pub alias: String,
    /// Current state.
    pub state: ModuleState,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// No module is degraded.
    pub ok: bool,
    /// Aliases of degraded modules.
    pub degraded: Vec<String>,
}

/// Every module in iteration order.
#[must_use]
pub fn snapshot(scheduler: &Scheduler) -> Vec<ModuleSnapshot> {
    scheduler
        .registry()
        .states()
        .into_iter()
        .map(|(alias, state)| ModuleSnapshot { alias, state })
        .collect()
}

/// Return a health payload.
#[must_use]
pub fn health(scheduler: &Scheduler) -> Health {
    let degraded: Vec<String> = scheduler
        .registry()
        .states()
        .into_iter()
        .filter(|(_, state)| !state.is_active())
        .map(|(alias, _)| alias)
        .collect();
    Health {
        ok: degraded.is_empty(),
        degraded,
    }
}
