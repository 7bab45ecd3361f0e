//! Builders to construct an engine from configuration.
//!
//! Module kinds named in configuration are resolved once, here, through a
//! [`ModuleFactoryRegistry`]. Nothing looks a kind up by name after startup.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::MessageBus;
use crate::config::{EngineConfig, ModuleConfig, ThrottlePolicy};
use crate::core::{
    AdaptiveThrottle, BuildError, ConfigError, FixedThrottle, Module, Scheduler, SharedEventSink,
    Throttle,
};
use crate::modules::{
    DnsResolver, RelayClient, RelayClientSettings, RelayServer, RelayTarget, ResolverSettings,
};
use crate::process::{shared_process_control, ProcessManager, SharedProcessControl};
use crate::runtime::Engine;
use crate::util::clock::{system_clock, SharedClock};

/// Alias under which the resolver is registered.
pub const DNS_ALIAS: &str = "dns";

/// Shared resources handed to every factory.
pub struct BuildContext {
    /// Engine bus.
    pub bus: MessageBus,
    /// Engine process manager.
    pub processes: SharedProcessControl,
    /// Engine clock.
    pub clock: SharedClock,
    /// Configured read buffer size.
    pub read_buffer_size: usize,
}

/// Factory producing a module from its configuration entry.
pub type ModuleFactory =
    Box<dyn Fn(&ModuleConfig, &BuildContext) -> Result<Box<dyn Module>, BuildError> + Send + Sync>;

/// Map from configuration `kind` to factory.
#[derive(Default)]
pub struct ModuleFactoryRegistry {
    factories: BTreeMap<String, ModuleFactory>,
}

impl ModuleFactoryRegistry {
    /// Registry with no kinds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `relay` kind.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("relay", relay_factory);
        registry
    }

    /// Add or replace the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ModuleConfig, &BuildContext) -> Result<Box<dyn Module>, BuildError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Whether `kind` has a factory.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build one module.
    ///
    /// # Errors
    ///
    /// `ConfigError::UnknownModuleKind` when no factory matches, otherwise
    /// whatever the factory returns.
    pub fn build(
        &self,
        cfg: &ModuleConfig,
        ctx: &BuildContext,
    ) -> Result<Box<dyn Module>, BuildError> {
        let factory = self
            .factories
            .get(&cfg.kind)
            .ok_or_else(|| ConfigError::UnknownModuleKind(cfg.kind.clone()))?;
        factory(cfg, ctx)
    }
}

/// Factory for the `relay` kind.
///
/// # Errors
///
/// `BuildError::Factory` when the entry has no usable address.
pub fn relay_factory(
    cfg: &ModuleConfig,
    ctx: &BuildContext,
) -> Result<Box<dyn Module>, BuildError> {
    let factory_error = |reason: String| BuildError::Factory {
        alias: cfg.alias.clone(),
        reason,
    };
    let address = cfg
        .address
        .as_deref()
        .ok_or_else(|| factory_error("relay modules need an address".into()))?;
    let target = RelayTarget::parse(address).map_err(|e| factory_error(e.to_string()))?;
    let settings = RelayClientSettings {
        alias: cfg.alias.clone(),
        target,
        reconnect: Duration::from_secs(cfg.reconnect_secs),
        read_buffer_size: ctx.read_buffer_size,
    };
    Ok(Box::new(RelayClient::with_clock(
        &ctx.bus,
        settings,
        Arc::clone(&ctx.clock),
    )))
}

/// Optional replacements for the parts `build_engine` would create.
#[derive(Default)]
pub struct BuildOptions {
    /// Process manager to share instead of a fresh [`ProcessManager`].
    pub processes: Option<SharedProcessControl>,
    /// Clock for the throttle, scheduler and modules.
    pub clock: Option<SharedClock>,
    /// Engine event sink.
    pub events: Option<SharedEventSink>,
}

/// Validate `cfg` and build a ready-to-run engine.
///
/// Registration order: resolver (when enabled), relay server (when `listen`
/// is set), then every configured module in order.
///
/// # Errors
///
/// Any [`BuildError`]; nothing is left running on failure.
pub fn build_engine(
    cfg: &EngineConfig,
    factories: &ModuleFactoryRegistry,
) -> Result<Engine, BuildError> {
    build_engine_with(cfg, factories, BuildOptions::default())
}

/// [`build_engine`] with injected parts.
///
/// # Errors
///
/// As [`build_engine`].
pub fn build_engine_with(
    cfg: &EngineConfig,
    factories: &ModuleFactoryRegistry,
    options: BuildOptions,
) -> Result<Engine, BuildError> {
    cfg.validate()?;
    for module in &cfg.modules {
        if !factories.contains(&module.kind) {
            return Err(ConfigError::UnknownModuleKind(module.kind.clone()).into());
        }
    }

    let clock = options.clock.unwrap_or_else(system_clock);
    let processes = options
        .processes
        .unwrap_or_else(|| shared_process_control(ProcessManager::new()));
    let mut bus = MessageBus::new();
    if let Some(events) = &options.events {
        bus = bus.with_events(Arc::clone(events));
    }

    let throttle = build_throttle(cfg, &clock, options.events.as_ref());
    let mut scheduler = Scheduler::new(throttle).with_clock(Arc::clone(&clock));
    if let Some(events) = &options.events {
        scheduler = scheduler.with_events(Arc::clone(events));
    }

    if cfg.dns.enabled {
        let settings = ResolverSettings {
            command: cfg.dns.command.clone(),
            timeout: (cfg.dns.timeout_secs > 0)
                .then(|| Duration::from_secs(cfg.dns.timeout_secs)),
            cache_ttl: Duration::from_secs(cfg.dns.cache_ttl_secs),
        };
        let resolver =
            DnsResolver::with_clock(&bus, Arc::clone(&processes), settings, Arc::clone(&clock));
        scheduler.register(DNS_ALIAS, Box::new(resolver))?;
    }

    if let Some(listen) = &cfg.listen {
        let addr: SocketAddr = listen
            .address
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad listen.address `{}`", listen.address)))?;
        let server = RelayServer::bind(&bus, listen.alias.clone(), addr, cfg.read_buffer_size)?;
        scheduler.register(listen.alias.clone(), Box::new(server))?;
    }

    let ctx = BuildContext {
        bus: bus.clone(),
        processes: Arc::clone(&processes),
        clock,
        read_buffer_size: cfg.read_buffer_size,
    };
    for module_cfg in &cfg.modules {
        let module = factories.build(module_cfg, &ctx)?;
        scheduler.register(module_cfg.alias.clone(), module)?;
    }

    tracing::info!(
        modules = scheduler.registry().len(),
        policy = ?cfg.throttle.policy,
        interval_ms = cfg.throttle.interval_ms,
        "engine built"
    );
    Ok(Engine::new(scheduler, bus, processes))
}

fn build_throttle(
    cfg: &EngineConfig,
    clock: &SharedClock,
    events: Option<&SharedEventSink>,
) -> Box<dyn Throttle> {
    let interval = cfg.throttle.interval();
    match cfg.throttle.policy {
        ThrottlePolicy::Fixed => Box::new(FixedThrottle::new(interval)),
        ThrottlePolicy::Adaptive => {
            let mut throttle = AdaptiveThrottle::with_clock(interval, Arc::clone(clock));
            if let Some(events) = events {
                throttle = throttle.with_events(Arc::clone(events));
            }
            Box::new(throttle)
        }
    }
}
