//! Asynchronous hostname resolution over the bus.
//!
//! The resolver subscribes to `{protocol: dns, action: resolve, host}` and
//! answers every request with exactly one
//! `{protocol: dns, action: resolve-complete, host, result}` message. `result`
//! is the first address literal found in the lookup command's output, or the
//! empty string when there is none, the host is invalid, the command could not
//! be started, or the lookup timed out.
//!
//! Lookups run as external commands through the shared process manager, so
//! the scheduling thread never blocks on DNS.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bus::{Filter, Message, MessageBus, SubscriptionId};
use crate::core::{Module, ModuleError};
use crate::process::{ProcessId, SharedProcessControl};
use crate::util::clock::{system_clock, SharedClock};

/// Bus protocol name used by the resolver.
pub const PROTOCOL: &str = "dns";
/// Request action.
pub const ACTION_RESOLVE: &str = "resolve";
/// Reply action.
pub const ACTION_RESOLVE_COMPLETE: &str = "resolve-complete";
/// Placeholder replaced by the hostname in the command template.
pub const HOST_PLACEHOLDER: &str = "{host}";
/// Longest hostname accepted.
pub const MAX_HOST_LEN: usize = 253;

/// Build a resolve request.
pub fn resolve_request(host: impl Into<String>) -> Message {
    Message::new(PROTOCOL, ACTION_RESOLVE).with("host", host.into())
}

/// Build a resolve reply.
pub fn resolve_complete(host: impl Into<String>, result: impl Into<String>) -> Message {
    Message::new(PROTOCOL, ACTION_RESOLVE_COMPLETE)
        .with("host", host.into())
        .with("result", result.into())
}

/// Resolver behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Lookup command; `{host}` is substituted.
    pub command: String,
    /// Kill lookups running longer than this. `None` waits forever.
    pub timeout: Option<Duration>,
    /// How long a successful answer is served from the cache. Zero disables caching.
    pub cache_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            command: "getent hosts {host}".to_string(),
            timeout: Some(Duration::from_secs(30)),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Answers owned by one resolver, each valid for a fixed TTL.
#[derive(Debug, Clone)]
pub struct DnsCache {
    ttl: Duration,
    entries: HashMap<String, (String, Instant)>,
}

impl DnsCache {
    /// Create an empty cache. A zero `ttl` stores nothing.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Unexpired answer for `host`.
    #[must_use]
    pub fn get(&self, host: &str, now: Instant) -> Option<&str> {
        self.entries
            .get(&host.to_ascii_lowercase())
            .filter(|(_, expires)| now < *expires)
            .map(|(result, _)| result.as_str())
    }

    /// Store an answer observed at `now`.
    pub fn insert(&mut self, host: &str, result: impl Into<String>, now: Instant) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries
            .insert(host.to_ascii_lowercase(), (result.into(), now + self.ttl));
    }

    /// Drop expired entries.
    pub fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, (_, expires)| now < *expires);
    }

    /// Number of stored entries, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether `host` may be substituted into the lookup command.
///
/// Accepts letters, digits, `-`, `.`, `_` and `:` (IPv6 literals), 1 to 253
/// characters. A leading `-` is rejected so the host is never read as an
/// option by the lookup command.
#[must_use]
pub fn is_valid_host(host: &str) -> bool {
    (1..=MAX_HOST_LEN).contains(&host.len())
        && !host.starts_with('-')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | ':'))
}

/// First address literal in lookup output.
///
/// Each line is checked in order; the first whitespace-separated token that
/// parses as an IPv4 or IPv6 address wins. Anything else yields `""`.
#[must_use]
pub fn parse_lookup_output(output: &str) -> String {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .find_map(|token| token.parse::<IpAddr>().ok())
        .map(|addr| addr.to_string())
        .unwrap_or_default()
}

struct PendingLookup {
    /// Lowercased host, as looked up and cached.
    host: String,
    /// Spellings asked for while the lookup ran; each gets one reply.
    requested: Vec<String>,
    started: Instant,
    killed: bool,
}

impl PendingLookup {
    fn replies(&self, result: &str) -> impl Iterator<Item = Message> + '_ {
        let result = result.to_string();
        self.requested
            .iter()
            .map(move |host| resolve_complete(host.as_str(), result.as_str()))
    }
}

struct ResolverState {
    processes: SharedProcessControl,
    settings: ResolverSettings,
    cache: DnsCache,
    pending: BTreeMap<ProcessId, PendingLookup>,
    clock: SharedClock,
}

impl ResolverState {
    /// Handle one request. Returns a reply to publish now, if the answer does
    /// not depend on a lookup process.
    fn request(&mut self, host: &str) -> Option<Message> {
        if !is_valid_host(host) {
            tracing::debug!(host = %host, "rejecting invalid hostname");
            return Some(resolve_complete(host, ""));
        }
        let now = self.clock.now();
        if let Some(cached) = self.cache.get(host, now) {
            tracing::debug!(host = %host, result = %cached, "dns cache hit");
            return Some(resolve_complete(host, cached));
        }
        let key = host.to_ascii_lowercase();
        if let Some(lookup) = self
            .pending
            .values_mut()
            .find(|p| p.host == key && !p.killed)
        {
            if !lookup.requested.iter().any(|h| h == host) {
                lookup.requested.push(host.to_string());
            }
            return None;
        }

        let command = self.settings.command.replace(HOST_PLACEHOLDER, &key);
        match self.processes.lock().execute(&command) {
            Ok(id) => {
                tracing::debug!(host = %host, id, "dns lookup started");
                self.pending.insert(
                    id,
                    PendingLookup {
                        host: key,
                        requested: vec![host.to_string()],
                        started: now,
                        killed: false,
                    },
                );
                None
            }
            Err(err) => {
                tracing::warn!(host = %host, error = %err, "dns lookup could not start");
                Some(resolve_complete(host, ""))
            }
        }
    }

    /// Collect finished and timed-out lookups.
    fn poll(&mut self) -> Vec<Message> {
        let now = self.clock.now();
        let mut replies = Vec::new();

        let completed = self.processes.lock().poll_completed();
        for (id, outcome) in completed {
            let Some(lookup) = self.pending.remove(&id) else {
                continue;
            };
            if lookup.killed {
                continue;
            }
            let result = parse_lookup_output(&outcome.output);
            tracing::debug!(
                host = %lookup.host,
                result = %result,
                status = ?outcome.status,
                "dns lookup finished"
            );
            if !result.is_empty() {
                self.cache.insert(&lookup.host, result.as_str(), now);
            }
            replies.extend(lookup.replies(&result));
        }

        if let Some(timeout) = self.settings.timeout {
            let expired: Vec<ProcessId> = self
                .pending
                .iter()
                .filter(|(_, p)| !p.killed && now.saturating_duration_since(p.started) >= timeout)
                .map(|(id, _)| *id)
                .collect();
            for id in expired {
                let Some(lookup) = self.pending.get_mut(&id) else {
                    continue;
                };
                lookup.killed = true;
                tracing::warn!(host = %lookup.host, id, "dns lookup timed out");
                replies.extend(lookup.replies(""));
                if let Err(err) = self.processes.lock().kill(id) {
                    tracing::debug!(id, error = %err, "kill after timeout");
                    self.pending.remove(&id);
                }
            }
        }

        self.cache.purge_expired(now);
        replies
    }
}

/// Module answering `dns/resolve` bus requests.
pub struct DnsResolver {
    state: Arc<Mutex<ResolverState>>,
    bus: MessageBus,
    subscription: SubscriptionId,
}

impl DnsResolver {
    /// Create a resolver and subscribe it to `bus`.
    pub fn new(bus: &MessageBus, processes: SharedProcessControl, settings: ResolverSettings) -> Self {
        Self::with_clock(bus, processes, settings, system_clock())
    }

    /// As [`new`](Self::new), measuring cache expiry and timeouts with `clock`.
    pub fn with_clock(
        bus: &MessageBus,
        processes: SharedProcessControl,
        settings: ResolverSettings,
        clock: SharedClock,
    ) -> Self {
        let state = Arc::new(Mutex::new(ResolverState {
            processes,
            cache: DnsCache::new(settings.cache_ttl),
            settings,
            pending: BTreeMap::new(),
            clock,
        }));

        let handler_state = Arc::clone(&state);
        let reply_bus = bus.clone();
        let subscription = bus.subscribe_filtered(
            Filter::protocol(PROTOCOL).action(ACTION_RESOLVE),
            move |message| {
                let Some(host) = message.get_str("host") else {
                    tracing::debug!("resolve request without host ignored");
                    return Ok(());
                };
                let reply = handler_state.lock().request(host);
                if let Some(reply) = reply {
                    reply_bus.publish(&reply);
                }
                Ok(())
            },
        );

        Self {
            state,
            bus: bus.clone(),
            subscription,
        }
    }

    /// Lookups currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().pending.values().filter(|p| !p.killed).count()
    }

    /// Number of cached answers.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.state.lock().cache.len()
    }
}

impl Module for DnsResolver {
    fn iterate(&mut self) -> Result<(), ModuleError> {
        let replies = self.state.lock().poll();
        for reply in &replies {
            self.bus.publish(reply);
        }
        Ok(())
    }
}

impl Drop for DnsResolver {
    fn drop(&mut self) {
        if let Err(err) = self.bus.unsubscribe(self.subscription) {
            tracing::debug!(error = %err, "resolver subscription already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_address_literal() {
        assert_eq!(parse_lookup_output("127.0.0.1\n"), "127.0.0.1");
        assert_eq!(
            parse_lookup_output("garbage\n::1       localhost\n127.0.0.1 localhost\n"),
            "::1"
        );
        assert_eq!(parse_lookup_output(""), "");
        assert_eq!(parse_lookup_output("no such host\n"), "");
    }

    #[test]
    fn host_validation() {
        assert!(is_valid_host("irc.libera.chat"));
        assert!(is_valid_host("fe80::1"));
        assert!(is_valid_host("_srv.example"));
        assert!(!is_valid_host(""));
        assert!(!is_valid_host("a; rm -rf /"));
        assert!(!is_valid_host("$(id)"));
        assert!(!is_valid_host("-s"));
        assert!(!is_valid_host("--help"));
        assert!(is_valid_host("a-b.example"));
        assert!(!is_valid_host(&"a".repeat(254)));
    }

    #[test]
    fn cache_expires() {
        let start = Instant::now();
        let mut cache = DnsCache::new(Duration::from_secs(10));
        cache.insert("Example.org", "10.0.0.1", start);
        assert_eq!(cache.get("example.org", start), Some("10.0.0.1"));
        assert_eq!(cache.get("example.org", start + Duration::from_secs(10)), None);
        cache.purge_expired(start + Duration::from_secs(11));
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_cache_stores_nothing() {
        let mut cache = DnsCache::new(Duration::ZERO);
        cache.insert("a", "10.0.0.1", Instant::now());
        assert!(cache.is_empty());
    }
}
