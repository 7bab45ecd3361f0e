//! Module registry and the cooperative scheduling loop.
//!
//! The [`Scheduler`] owns a [`ModuleRegistry`] and a [`Throttle`]. Each tick it
//! sleeps for the throttle's delay, then iterates every active module once in
//! registration order. A module that fails or panics is marked degraded and
//! skipped on later ticks until [`Scheduler::reset`] is called; it can never
//! take the loop down with it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::audit::{record_event, EngineEventKind, SharedEventSink};
use crate::core::{Module, ModuleError, ModuleState, RegistryError, Throttle};
use crate::util::clock::{system_clock, SharedClock};

struct ModuleEntry {
    alias: String,
    module: Box<dyn Module>,
    state: ModuleState,
}

/// Alias-keyed modules in stable registration order.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: Vec<ModuleEntry>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module at the end of the iteration order.
    ///
    /// # Errors
    ///
    /// `RegistryError::DuplicateAlias` if the alias is taken.
    pub fn register(
        &mut self,
        alias: impl Into<String>,
        module: Box<dyn Module>,
    ) -> Result<(), RegistryError> {
        let alias = alias.into();
        if self.contains(&alias) {
            return Err(RegistryError::DuplicateAlias(alias));
        }
        self.entries.push(ModuleEntry {
            alias,
            module,
            state: ModuleState::Active,
        });
        Ok(())
    }

    /// Remove a module and hand it back.
    ///
    /// # Errors
    ///
    /// `RegistryError::NotFound` if no module has this alias.
    pub fn unregister(&mut self, alias: &str) -> Result<Box<dyn Module>, RegistryError> {
        let index = self.position(alias)?;
        Ok(self.entries.remove(index).module)
    }

    /// Whether a module is registered under `alias`.
    #[must_use]
    pub fn contains(&self, alias: &str) -> bool {
        self.entries.iter().any(|e| e.alias == alias)
    }

    /// Current state of a module.
    #[must_use]
    pub fn state(&self, alias: &str) -> Option<&ModuleState> {
        self.entries.iter().find(|e| e.alias == alias).map(|e| &e.state)
    }

    /// Aliases in iteration order.
    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.alias.clone()).collect()
    }

    /// `(alias, state)` pairs in iteration order.
    #[must_use]
    pub fn states(&self) -> Vec<(String, ModuleState)> {
        self.entries
            .iter()
            .map(|e| (e.alias.clone(), e.state.clone()))
            .collect()
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, alias: &str) -> Result<usize, RegistryError> {
        self.entries
            .iter()
            .position(|e| e.alias == alias)
            .ok_or_else(|| RegistryError::NotFound(alias.to_string()))
    }
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Modules whose `iterate` returned `Ok`.
    pub iterated: usize,
    /// Degraded modules that were skipped.
    pub skipped: usize,
    /// Aliases that failed during this tick and are now degraded.
    pub degraded: Vec<String>,
    /// Aliases that signalled permanent failure and were removed.
    pub removed: Vec<String>,
}

/// Cloneable flag that ends [`Scheduler::run_forever`].
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request the loop to stop after the current tick.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Single-threaded cooperative scheduler.
pub struct Scheduler {
    registry: ModuleRegistry,
    throttle: Box<dyn Throttle>,
    clock: SharedClock,
    events: Option<SharedEventSink>,
    stop: StopHandle,
    ticks: u64,
}

impl Scheduler {
    /// Create a scheduler paced by `throttle`.
    #[must_use]
    pub fn new(throttle: Box<dyn Throttle>) -> Self {
        Self {
            registry: ModuleRegistry::new(),
            throttle,
            clock: system_clock(),
            events: None,
            stop: StopHandle::default(),
            ticks: 0,
        }
    }

    /// Sleep through `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Attach an engine event sink.
    #[must_use]
    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Register a module under a unique alias.
    ///
    /// # Errors
    ///
    /// `RegistryError::DuplicateAlias` if the alias exists.
    pub fn register(
        &mut self,
        alias: impl Into<String>,
        module: Box<dyn Module>,
    ) -> Result<(), RegistryError> {
        let alias = alias.into();
        self.registry.register(alias.clone(), module)?;
        tracing::info!(alias = %alias, "module registered");
        record_event(
            self.events.as_ref(),
            EngineEventKind::ModuleRegistered,
            &alias,
            None,
        );
        Ok(())
    }

    /// Remove a module and return it.
    ///
    /// # Errors
    ///
    /// `RegistryError::NotFound` if no module has this alias.
    pub fn unregister(&mut self, alias: &str) -> Result<Box<dyn Module>, RegistryError> {
        let module = self.registry.unregister(alias)?;
        tracing::info!(alias = %alias, "module unregistered");
        record_event(
            self.events.as_ref(),
            EngineEventKind::ModuleUnregistered,
            alias,
            None,
        );
        Ok(module)
    }

    /// Re-enable a degraded module.
    ///
    /// # Errors
    ///
    /// `RegistryError::NotFound` if no module has this alias.
    pub fn reset(&mut self, alias: &str) -> Result<(), RegistryError> {
        let index = self.registry.position(alias)?;
        let entry = &mut self.registry.entries[index];
        if !entry.state.is_active() {
            entry.state = ModuleState::Active;
            tracing::info!(alias = %alias, "module reset");
            record_event(self.events.as_ref(), EngineEventKind::ModuleReset, alias, None);
        }
        Ok(())
    }

    /// Read access to the registry.
    #[must_use]
    pub const fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Handle that stops [`run_forever`](Self::run_forever).
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ticks completed so far.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Iterate every active module once, without sleeping.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let mut index = 0;
        while index < self.registry.entries.len() {
            let entry = &mut self.registry.entries[index];
            if !entry.state.is_active() {
                report.skipped += 1;
                index += 1;
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| entry.module.iterate()));
            match outcome {
                Ok(Ok(())) => {
                    report.iterated += 1;
                    index += 1;
                }
                Ok(Err(ModuleError::Permanent(reason))) => {
                    let alias = entry.alias.clone();
                    tracing::warn!(alias = %alias, reason = %reason, "module removed after permanent failure");
                    record_event(
                        self.events.as_ref(),
                        EngineEventKind::ModuleRemoved,
                        &alias,
                        Some(reason),
                    );
                    self.registry.entries.remove(index);
                    report.removed.push(alias);
                }
                Ok(Err(ModuleError::Failed(reason))) => {
                    Self::degrade(entry, reason, self.events.as_ref(), &mut report);
                    index += 1;
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    Self::degrade(entry, reason, self.events.as_ref(), &mut report);
                    index += 1;
                }
            }
        }
        self.ticks += 1;
        report
    }

    /// Sleep for the throttle's delay, then tick once.
    pub fn run_once(&mut self) -> TickReport {
        let delay = self.throttle.next_delay();
        self.clock.sleep(delay);
        self.tick()
    }

    /// Tick until the stop handle is triggered.
    ///
    /// Under normal operation nothing triggers it and this never returns.
    pub fn run_forever(&mut self) {
        tracing::info!(modules = self.registry.len(), "scheduler loop starting");
        while !self.stop.is_stopped() {
            self.run_once();
        }
        tracing::info!(ticks = self.ticks, "scheduler loop stopped");
    }

    fn degrade(
        entry: &mut ModuleEntry,
        reason: String,
        events: Option<&SharedEventSink>,
        report: &mut TickReport,
    ) {
        tracing::warn!(alias = %entry.alias, reason = %reason, "module degraded");
        record_event(
            events,
            EngineEventKind::ModuleDegraded,
            &entry.alias,
            Some(reason.clone()),
        );
        entry.state = ModuleState::Degraded { reason };
        report.degraded.push(entry.alias.clone());
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
