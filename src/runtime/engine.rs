//! The assembled engine: scheduler, bus and shared process manager.

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::core::{Module, RegistryError, Scheduler, StopHandle, TickReport};
use crate::process::SharedProcessControl;

/// One running relay engine.
///
/// Every module registered here shares the same bus and process manager;
/// nothing else is shared between modules.
pub struct Engine {
    scheduler: Scheduler,
    bus: MessageBus,
    processes: SharedProcessControl,
}

impl Engine {
    /// Bundle existing parts.
    #[must_use]
    pub fn new(scheduler: Scheduler, bus: MessageBus, processes: SharedProcessControl) -> Self {
        Self {
            scheduler,
            bus,
            processes,
        }
    }

    /// The scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Mutable access to the scheduler, for reset and unregister.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// The shared bus.
    #[must_use]
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// The shared process manager.
    #[must_use]
    pub fn processes(&self) -> SharedProcessControl {
        Arc::clone(&self.processes)
    }

    /// Handle that ends [`run_forever`](Self::run_forever) from another thread
    /// or a signal handler.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.scheduler.stop_handle()
    }

    /// Register an additional module.
    ///
    /// # Errors
    ///
    /// `RegistryError::DuplicateAlias` if the alias exists.
    pub fn register(
        &mut self,
        alias: impl Into<String>,
        module: Box<dyn Module>,
    ) -> Result<(), RegistryError> {
        self.scheduler.register(alias, module)
    }

    /// Iterate every module once without sleeping.
    pub fn tick(&mut self) -> TickReport {
        self.scheduler.tick()
    }

    /// Sleep for the throttle delay and tick once.
    pub fn run_once(&mut self) -> TickReport {
        self.scheduler.run_once()
    }

    /// Run until the stop handle fires.
    pub fn run_forever(&mut self) {
        self.scheduler.run_forever();
    }
}
