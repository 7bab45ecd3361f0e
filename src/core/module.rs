//! The uniform capability every scheduled unit implements.

use serde::{Deserialize, Serialize};

use super::ModuleError;

/// A unit driven once per scheduler tick.
///
/// `iterate` must poll its own transport or process state and return
/// promptly. Anything slow (DNS, subprocesses, blocking I/O) has to be modeled
/// as a poll-and-return call, because every other module waits while this one
/// runs.
///
/// # Example
///
/// ```
/// use prometheus_relay::core::{Module, ModuleError};
///
/// struct Counter(u64);
///
/// impl Module for Counter {
///     fn iterate(&mut self) -> Result<(), ModuleError> {
///         self.0 += 1;
///         Ok(())
///     }
/// }
/// ```
pub trait Module: Send {
    /// Run one non-blocking step.
    ///
    /// # Errors
    ///
    /// `ModuleError::Failed` marks the module degraded; `ModuleError::Permanent`
    /// removes it from the registry.
    fn iterate(&mut self) -> Result<(), ModuleError>;
}

impl<M: Module + ?Sized> Module for Box<M> {
    fn iterate(&mut self) -> Result<(), ModuleError> {
        (**self).iterate()
    }
}

/// Health of a registered module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Iterated every tick.
    Active,
    /// Skipped until explicitly reset.
    Degraded {
        /// Failure that caused the degradation.
        reason: String,
    },
}

impl ModuleState {
    /// Whether the scheduler will iterate the module.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}
