//! # Prometheus Relay
//!
//! A cooperative, single-threaded I/O engine for IRC relay and bouncer daemons.
//!
//! One scheduling thread drives every network link, listener, resolver and
//! protocol module of the process. Nothing blocks that thread: sockets are
//! polled without waiting, external commands run as child processes whose
//! results are collected by polling, and modules talk to each other only
//! through an in-process message bus.
//!
//! ## Core Pieces
//!
//! - **Scheduler**: iterates registered modules in registration order once per
//!   tick; a failing or panicking module is degraded, never fatal
//! - **Throttle**: paces ticks, either fixed or adjusted for the time the
//!   previous tick took
//! - **Connection / Listener**: non-blocking transports with exactly-once
//!   lifecycle callbacks
//! - **Process manager**: asynchronous `sh -c` execution with poll-based
//!   completion
//! - **Message bus**: synchronous publish/subscribe between modules
//! - **DNS resolver**: turns `dns/resolve` messages into `dns/resolve-complete`
//!   replies using the process manager
//!
//! ## Example
//!
//! ```rust,no_run
//! use prometheus_relay::builders::{build_engine, ModuleFactoryRegistry};
//! use prometheus_relay::config::EngineConfig;
//!
//! let cfg = EngineConfig::from_json_str(r#"{
//!     "throttle": { "policy": "adaptive", "interval_ms": 50 },
//!     "listen": { "alias": "bnc", "address": "127.0.0.1:6667" },
//!     "modules": [
//!         { "alias": "libera", "kind": "relay", "address": "irc.libera.chat:6667", "reconnect_secs": 10 }
//!     ]
//! }"#)?;
//! let mut engine = build_engine(&cfg, &ModuleFactoryRegistry::with_defaults())?;
//! engine.run_forever();
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! For complete scenarios, see the integration tests under `tests/`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: modules, registry, scheduler and throttles.
pub mod core;
/// Non-blocking network transports and their callback contracts.
pub mod net;
/// Asynchronous external process execution.
pub mod process;
/// Publish/subscribe message bus.
pub mod bus;
/// Modules composed from transports, processes and the bus.
pub mod modules;
/// Configuration models for the engine and its modules.
pub mod config;
/// Builders to construct engines from configuration.
pub mod builders;
/// Engine runtime and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
