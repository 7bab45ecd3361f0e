//! Tests for error types

use prometheus_relay::bus::MessageBus;
use prometheus_relay::core::{
    BuildError, BusError, ConfigError, ConnectionError, ListenError, ModuleError, ProcessError,
    RegistryError,
};

#[test]
fn test_registry_errors() {
    let err = RegistryError::DuplicateAlias("dns".to_string());
    assert_eq!(format!("{}", err), "duplicate alias: dns");
    let err = RegistryError::NotFound("bnc".to_string());
    assert_eq!(format!("{}", err), "module not found: bnc");
}

#[test]
fn test_module_errors() {
    let err = ModuleError::Failed("socket gone".to_string());
    assert_eq!(format!("{}", err), "module failed: socket gone");
    let err = ModuleError::Permanent("bad config".to_string());
    assert_eq!(format!("{}", err), "module permanently failed: bad config");
}

#[test]
fn test_connection_errors() {
    assert_eq!(format!("{}", ConnectionError::AlreadyConnected), "already connected");
    assert_eq!(format!("{}", ConnectionError::NotConnected), "not connected");
    assert_eq!(
        format!("{}", ConnectionError::InvalidAddress("nowhere".to_string())),
        "invalid address: nowhere"
    );
}

#[test]
fn test_listen_error_names_address() {
    let err = ListenError::BindFailed {
        addr: "127.0.0.1:6667".parse().unwrap(),
        source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
    };
    assert_eq!(format!("{}", err), "bind failed on 127.0.0.1:6667: in use");
    assert_eq!(format!("{}", ListenError::UnknownClient(4)), "unknown client: 4");
}

#[test]
fn test_process_and_bus_errors() {
    assert_eq!(format!("{}", ProcessError::NotFound(9)), "process not found: 9");
    let bus = MessageBus::new();
    let id = bus.subscribe(|_| Ok(()));
    assert_eq!(format!("{}", BusError::NotFound(id)), "subscription not found: sub-1");
}

#[test]
fn test_build_error_is_transparent() {
    let err: BuildError = ConfigError::UnknownModuleKind("irc".to_string()).into();
    assert_eq!(format!("{}", err), "unknown module kind: irc");
    let err: BuildError = RegistryError::DuplicateAlias("x".to_string()).into();
    assert_eq!(format!("{}", err), "duplicate alias: x");
}
