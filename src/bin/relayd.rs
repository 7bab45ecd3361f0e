//! relayd -- runs a relay engine from a JSON configuration file.
//!
//! Usage:
//!
//!   relayd [CONFIG]
//!
//! Without `CONFIG` the built-in defaults are used (resolver only).
//!
//! Environment:
//!
//!   RELAY_THROTTLE_MS    Override `throttle.interval_ms`
//!   RELAY_LISTEN_ADDR    Override `listen.address`
//!   RELAY_DNS_COMMAND    Override `dns.command`
//!   RUST_LOG             Log filter, e.g. `info` or `prometheus_relay=debug`
//!
//! The daemon runs until the process is terminated.

use anyhow::Context;

use prometheus_relay::builders::{build_engine, ModuleFactoryRegistry};
use prometheus_relay::config::EngineConfig;
use prometheus_relay::core::AppResult;
use prometheus_relay::runtime::health;
use prometheus_relay::util::init_tracing;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        tracing::error!(error = %format!("{err:#}"), "relayd failed");
        eprintln!("relayd: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> AppResult<()> {
    let mut cfg = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => EngineConfig::default(),
    };
    cfg.apply_env_overrides()
        .context("applying environment overrides")?;

    let mut engine = build_engine(&cfg, &ModuleFactoryRegistry::with_defaults())
        .context("building engine")?;
    let status = health(engine.scheduler());
    tracing::info!(
        modules = engine.scheduler().registry().len(),
        ok = status.ok,
        "relayd started"
    );
    engine.run_forever();
    Ok(())
}
