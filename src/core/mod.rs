//! Core scheduling abstractions: modules, registry, scheduler and throttles.

pub mod audit;
pub mod error;
pub mod module;
pub mod scheduler;
pub mod throttle;

pub use audit::{
    shared_sink, EngineEvent, EngineEventKind, EventSink, InMemoryEventSink, ObservableEventSink,
    SharedEventSink, TracingEventSink,
};
pub use error::{
    AppResult, BuildError, BusError, ConfigError, ConnectionError, ListenError, ModuleError,
    ProcessError, RegistryError,
};
pub use module::{Module, ModuleState};
pub use scheduler::{ModuleRegistry, Scheduler, StopHandle, TickReport};
pub use throttle::{AdaptiveThrottle, FixedThrottle, Throttle};
