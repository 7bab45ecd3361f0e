//! Error types for engine components.

use std::net::SocketAddr;

use thiserror::Error;

use crate::bus::SubscriptionId;
use crate::net::ClientId;
use crate::process::ProcessId;

/// Errors produced by the module registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A module is already registered under this alias.
    #[error("duplicate alias: {0}")]
    DuplicateAlias(String),
    /// No module is registered under this alias.
    #[error("module not found: {0}")]
    NotFound(String),
}

/// Failure reported by a module's `iterate`.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Recoverable fault; the module is marked degraded until reset.
    #[error("module failed: {0}")]
    Failed(String),
    /// The module will never work again and should be removed.
    #[error("module permanently failed: {0}")]
    Permanent(String),
}

/// Errors produced synchronously by a client connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// `connect` called while connecting or connected.
    #[error("already connected")]
    AlreadyConnected,
    /// `send` called while not connected.
    #[error("not connected")]
    NotConnected,
    /// Address could not be parsed as a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors produced by a listening socket.
#[derive(Debug, Error)]
pub enum ListenError {
    /// The address could not be bound.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        /// Requested address.
        addr: SocketAddr,
        /// OS-level reason.
        source: std::io::Error,
    },
    /// The bound socket could not start accepting.
    #[error("listen failed on {addr}: {source}")]
    ListenFailed {
        /// Requested address.
        addr: SocketAddr,
        /// OS-level reason.
        source: std::io::Error,
    },
    /// No accepted connection carries this identifier.
    #[error("unknown client: {0}")]
    UnknownClient(ClientId),
    /// `listen` has not been called, or the listener was closed.
    #[error("not listening")]
    NotListening,
}

/// Errors produced by the process manager.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command could not be started at all.
    #[error("spawn failed for `{command}`: {source}")]
    SpawnFailed {
        /// Command line that was requested.
        command: String,
        /// OS-level reason.
        source: std::io::Error,
    },
    /// Identifier unknown or already retired.
    #[error("process not found: {0}")]
    NotFound(ProcessId),
    /// The kill signal could not be delivered.
    #[error("kill failed for process {id}: {source}")]
    KillFailed {
        /// Target process.
        id: ProcessId,
        /// OS-level reason.
        source: std::io::Error,
    },
}

/// Errors produced by the message bus.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// Subscription already removed or never issued.
    #[error("subscription not found: {0}")]
    NotFound(SubscriptionId),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Input could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// Parsed values violate a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// No factory is registered for this module kind.
    #[error("unknown module kind: {0}")]
    UnknownModuleKind(String),
}

/// Errors raised while assembling an engine from configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Module registration rejected.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Listener could not be opened.
    #[error(transparent)]
    Listen(#[from] ListenError),
    /// A module factory failed.
    #[error("factory for `{alias}` failed: {reason}")]
    Factory {
        /// Alias of the module being built.
        alias: String,
        /// Factory-supplied reason.
        reason: String,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
