//! Asynchronous external process execution.

pub mod manager;

use std::sync::Arc;

use parking_lot::Mutex;

pub use manager::{ProcessControl, ProcessId, ProcessManager, ProcessOutcome, ProcessStatus};

/// Process manager shared by every module of one engine.
pub type SharedProcessControl = Arc<Mutex<dyn ProcessControl>>;

/// Wrap a process controller for sharing between modules.
pub fn shared_process_control<P: ProcessControl + 'static>(control: P) -> SharedProcessControl {
    Arc::new(Mutex::new(control))
}
