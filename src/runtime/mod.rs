//! Engine runtime and API surface.

pub mod api;
pub mod engine;

pub use api::{health, snapshot, Health, ModuleSnapshot};
pub use engine::Engine;
