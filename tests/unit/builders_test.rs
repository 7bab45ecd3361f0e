//! Tests for builder modules

use std::sync::Arc;

use prometheus_relay::builders::{relay_factory, BuildContext, ModuleFactoryRegistry, DNS_ALIAS};
use prometheus_relay::bus::MessageBus;
use prometheus_relay::config::ModuleConfig;
use prometheus_relay::core::{BuildError, ConfigError};
use prometheus_relay::process::{shared_process_control, ProcessManager};
use prometheus_relay::util::ManualClock;

fn context() -> BuildContext {
    BuildContext {
        bus: MessageBus::new(),
        processes: shared_process_control(ProcessManager::new()),
        clock: Arc::new(ManualClock::new()),
        read_buffer_size: 512,
    }
}

fn config(kind: &str, address: Option<&str>) -> ModuleConfig {
    ModuleConfig {
        alias: "up".to_string(),
        kind: kind.to_string(),
        address: address.map(str::to_string),
        reconnect_secs: 10,
    }
}

#[test]
fn test_registry_defaults() {
    let registry = ModuleFactoryRegistry::with_defaults();
    assert_eq!(registry.kinds(), vec!["relay".to_string()]);
    assert!(registry.contains("relay"));
    assert!(!ModuleFactoryRegistry::new().contains("relay"));
    assert_eq!(DNS_ALIAS, "dns");
}

#[test]
fn test_registry_unknown_kind() {
    let registry = ModuleFactoryRegistry::with_defaults();
    let result = registry.build(&config("irc", None), &context());
    assert!(matches!(
        result,
        Err(BuildError::Config(ConfigError::UnknownModuleKind(kind))) if kind == "irc"
    ));
}

#[test]
fn test_relay_factory_subscribes_to_bus() {
    let ctx = context();
    let module = relay_factory(&config("relay", Some("127.0.0.1:6667")), &ctx).unwrap();
    assert_eq!(ctx.bus.subscription_count(), 1);
    drop(module);
    assert_eq!(ctx.bus.subscription_count(), 0);
}

#[test]
fn test_relay_factory_host_target_waits_for_dns() {
    let ctx = context();
    let _module = relay_factory(&config("relay", Some("irc.example.org:6667")), &ctx).unwrap();
    // relay/send plus dns/resolve-complete for its host
    assert_eq!(ctx.bus.subscription_count(), 2);
}

#[test]
fn test_relay_factory_rejects_bad_address() {
    let ctx = context();
    assert!(matches!(
        relay_factory(&config("relay", None), &ctx),
        Err(BuildError::Factory { .. })
    ));
    assert!(matches!(
        relay_factory(&config("relay", Some("bad host")), &ctx),
        Err(BuildError::Factory { .. })
    ));
}
