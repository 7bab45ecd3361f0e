//! Configuration models for the engine, its throttle, resolver and modules.

pub mod engine;

pub use engine::{
    DnsConfig, EngineConfig, ListenConfig, ModuleConfig, ThrottleConfig, ThrottlePolicy,
};
