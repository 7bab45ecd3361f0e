//! Tests for configuration validation

use prometheus_relay::config::{
    DnsConfig, EngineConfig, ListenConfig, ModuleConfig, ThrottleConfig, ThrottlePolicy,
};
use prometheus_relay::core::ConfigError;

fn relay(alias: &str, address: &str) -> ModuleConfig {
    ModuleConfig {
        alias: alias.to_string(),
        kind: "relay".to_string(),
        address: Some(address.to_string()),
        reconnect_secs: 30,
    }
}

#[test]
fn test_default_config_validation() {
    let valid = EngineConfig::default();
    assert!(valid.validate().is_ok());
    assert_eq!(valid.throttle.interval_ms, 50);
    assert_eq!(valid.read_buffer_size, 4096);
}

#[test]
fn test_adaptive_zero_interval_invalid() {
    let invalid = EngineConfig {
        throttle: ThrottleConfig {
            policy: ThrottlePolicy::Adaptive,
            interval_ms: 0,
        },
        ..EngineConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_zero_read_buffer_invalid() {
    let invalid = EngineConfig {
        read_buffer_size: 0,
        ..EngineConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_dns_command_needs_placeholder() {
    let invalid = EngineConfig {
        dns: DnsConfig {
            command: "getent hosts".to_string(),
            ..DnsConfig::default()
        },
        ..EngineConfig::default()
    };
    assert!(invalid.validate().is_err());

    let disabled = EngineConfig {
        dns: DnsConfig {
            enabled: false,
            command: "getent hosts".to_string(),
            ..DnsConfig::default()
        },
        ..EngineConfig::default()
    };
    assert!(disabled.validate().is_ok());
}

#[test]
fn test_bad_listen_address_invalid() {
    let invalid = EngineConfig {
        listen: Some(ListenConfig {
            alias: "bnc".to_string(),
            address: "localhost".to_string(),
        }),
        ..EngineConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_duplicate_aliases_invalid() {
    let invalid = EngineConfig {
        listen: Some(ListenConfig {
            alias: "net".to_string(),
            address: "127.0.0.1:7000".to_string(),
        }),
        modules: vec![relay("net", "irc.example.org:6667")],
        ..EngineConfig::default()
    };
    assert!(invalid.validate().is_err());

    let invalid = EngineConfig {
        modules: vec![relay("a", "127.0.0.1:1"), relay("a", "127.0.0.1:2")],
        ..EngineConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_module_address_checked() {
    let invalid = EngineConfig {
        modules: vec![relay("up", "no port here")],
        ..EngineConfig::default()
    };
    assert!(matches!(invalid.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_engine_config_from_json() {
    let json = r#"{
        "throttle": { "policy": "fixed", "interval_ms": 20 },
        "read_buffer_size": 1024,
        "dns": { "command": "host {host}", "timeout_secs": 5 },
        "listen": { "address": "127.0.0.1:6667" },
        "modules": [
            { "alias": "libera", "kind": "relay", "address": "irc.libera.chat:6667", "reconnect_secs": 60 }
        ]
    }"#;

    let config = EngineConfig::from_json_str(json).unwrap();
    assert_eq!(config.throttle.policy, ThrottlePolicy::Fixed);
    assert_eq!(config.dns.timeout_secs, 5);
    assert_eq!(config.dns.cache_ttl_secs, 300);
    assert_eq!(config.listen.as_ref().map(|l| l.alias.as_str()), Some("bnc"));
    assert_eq!(config.modules[0], relay_with_reconnect("libera", "irc.libera.chat:6667", 60));
    assert_eq!(config.get("read_buffer_size").as_deref(), Some("1024"));
    assert_eq!(config.get("nonexistent"), None);
}

fn relay_with_reconnect(alias: &str, address: &str, reconnect_secs: u64) -> ModuleConfig {
    ModuleConfig {
        reconnect_secs,
        ..relay(alias, address)
    }
}

#[test]
fn test_malformed_json_is_parse_error() {
    assert!(matches!(
        EngineConfig::from_json_str("{ not json"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_missing_file_is_parse_error() {
    assert!(matches!(
        EngineConfig::from_file("/nonexistent/relay.json"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_bad_override_rejected() {
    let mut config = EngineConfig::default();
    let err = config
        .apply_overrides(|key| (key == "RELAY_THROTTLE_MS").then(|| "soon".to_string()))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
