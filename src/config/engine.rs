//! Engine configuration structures.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ConfigError;
use crate::modules::dns::HOST_PLACEHOLDER;
use crate::modules::relay::RelayTarget;
use crate::net::DEFAULT_READ_BUFFER;

/// Environment variable overriding `throttle.interval_ms`.
pub const ENV_THROTTLE_MS: &str = "RELAY_THROTTLE_MS";
/// Environment variable overriding `listen.address`.
pub const ENV_LISTEN_ADDR: &str = "RELAY_LISTEN_ADDR";
/// Environment variable overriding `dns.command`.
pub const ENV_DNS_COMMAND: &str = "RELAY_DNS_COMMAND";

/// Throttle policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Sleep the interval minus the time the last tick took.
    #[default]
    Adaptive,
    /// Always sleep the interval.
    Fixed,
}

impl ThrottlePolicy {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Adaptive => "adaptive",
            Self::Fixed => "fixed",
        }
    }
}

/// Loop pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Pacing policy.
    #[serde(default)]
    pub policy: ThrottlePolicy,
    /// Target tick interval in milliseconds.
    pub interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            policy: ThrottlePolicy::Adaptive,
            interval_ms: 50,
        }
    }
}

impl ThrottleConfig {
    /// Interval as a duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Register the resolver module.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lookup command template containing `{host}`.
    #[serde(default = "default_dns_command")]
    pub command: String,
    /// Lookup timeout; 0 disables it.
    #[serde(default = "default_dns_timeout")]
    pub timeout_secs: u64,
    /// Cache lifetime of successful answers; 0 disables caching.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_dns_command(),
            timeout_secs: default_dns_timeout(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_dns_command() -> String {
    "getent hosts {host}".to_string()
}

const fn default_dns_timeout() -> u64 {
    30
}

const fn default_cache_ttl() -> u64 {
    300
}

const fn default_read_buffer() -> usize {
    DEFAULT_READ_BUFFER
}

/// Downstream listening endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Module alias.
    #[serde(default = "default_listen_alias")]
    pub alias: String,
    /// Socket address to bind.
    pub address: String,
}

fn default_listen_alias() -> String {
    "bnc".to_string()
}

/// One configured module, built by the factory registered for `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Unique alias.
    pub alias: String,
    /// Factory key, e.g. `relay`.
    pub kind: String,
    /// Remote address, `host:port`.
    #[serde(default)]
    pub address: Option<String>,
    /// Reconnect delay in seconds; 0 never reconnects.
    #[serde(default)]
    pub reconnect_secs: u64,
}

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Loop pacing.
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Bytes read per connection per tick.
    #[serde(default = "default_read_buffer")]
    pub read_buffer_size: usize,
    /// Resolver settings.
    #[serde(default)]
    pub dns: DnsConfig,
    /// Optional downstream listener.
    #[serde(default)]
    pub listen: Option<ListenConfig>,
    /// Additional modules, registered in order.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig::default(),
            read_buffer_size: DEFAULT_READ_BUFFER,
            dns: DnsConfig::default(),
            listen: None,
            modules: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.throttle.policy == ThrottlePolicy::Adaptive && self.throttle.interval_ms == 0 {
            return invalid("throttle.interval_ms must be greater than 0 for adaptive".into());
        }
        if self.read_buffer_size == 0 {
            return invalid("read_buffer_size must be greater than 0".into());
        }
        if self.dns.enabled && !self.dns.command.contains(HOST_PLACEHOLDER) {
            return invalid(format!("dns.command must contain `{HOST_PLACEHOLDER}`"));
        }

        let mut aliases = HashSet::new();
        if self.dns.enabled {
            aliases.insert(crate::builders::DNS_ALIAS.to_string());
        }
        if let Some(listen) = &self.listen {
            if listen.address.parse::<SocketAddr>().is_err() {
                return invalid(format!(
                    "listen.address `{}` is not a socket address",
                    listen.address
                ));
            }
            if !aliases.insert(listen.alias.clone()) {
                return invalid(format!("duplicate alias `{}`", listen.alias));
            }
        }
        for module in &self.modules {
            if module.alias.is_empty() {
                return invalid("module alias must not be empty".into());
            }
            if module.kind.is_empty() {
                return invalid(format!("module `{}` has no kind", module.alias));
            }
            if !aliases.insert(module.alias.clone()) {
                return invalid(format!("duplicate alias `{}`", module.alias));
            }
            if let Some(address) = &module.address {
                RelayTarget::parse(address).map_err(|e| {
                    ConfigError::Invalid(format!("module `{}` invalid: {e}", module.alias))
                })?;
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` for malformed JSON, otherwise as [`validate`](Self::validate).
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON file.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` if the file cannot be read or parsed, otherwise as
    /// [`validate`](Self::validate).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&input)
    }

    /// Flat key lookup used by collaborators that only need single values.
    ///
    /// Supported keys: `throttle.policy`, `throttle.interval_ms`,
    /// `read_buffer_size`, `listen.address`, `listen.alias`, `dns.command`,
    /// `dns.timeout_secs`, `dns.cache_ttl_secs`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "throttle.policy" => Some(self.throttle.policy.as_str().to_string()),
            "throttle.interval_ms" => Some(self.throttle.interval_ms.to_string()),
            "read_buffer_size" => Some(self.read_buffer_size.to_string()),
            "listen.address" => self.listen.as_ref().map(|l| l.address.clone()),
            "listen.alias" => self.listen.as_ref().map(|l| l.alias.clone()),
            "dns.command" => Some(self.dns.command.clone()),
            "dns.timeout_secs" => Some(self.dns.timeout_secs.to_string()),
            "dns.cache_ttl_secs" => Some(self.dns.cache_ttl_secs.to_string()),
            _ => None,
        }
    }

    /// Load `.env` if present, apply `RELAY_*` overrides, and revalidate.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` for an unparsable override or when the result
    /// fails validation.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, then revalidate.
    ///
    /// # Errors
    ///
    /// As [`apply_env_overrides`](Self::apply_env_overrides).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_THROTTLE_MS) {
            self.throttle.interval_ms = value.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_THROTTLE_MS} `{value}` is not a number"))
            })?;
        }
        if let Some(address) = lookup(ENV_LISTEN_ADDR) {
            match &mut self.listen {
                Some(listen) => listen.address = address,
                None => {
                    self.listen = Some(ListenConfig {
                        alias: default_listen_alias(),
                        address,
                    });
                }
            }
        }
        if let Some(command) = lookup(ENV_DNS_COMMAND) {
            self.dns.command = command;
        }
        self.validate()
    }
}
