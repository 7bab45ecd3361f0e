//! Bus message records and subscription filters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable record passed by value through the bus.
///
/// `protocol` and `action` discriminate the message; every other field is
/// action-specific and opaque to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol namespace, e.g. `dns` or `relay`.
    pub protocol: String,
    /// Action within the protocol, e.g. `resolve`.
    pub action: String,
    /// Remaining named fields, ordered by name.
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Message {
    /// Create a message with no extra fields.
    pub fn new(protocol: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            action: action.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add or replace a field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Raw field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field value when it is a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Field value when it is a non-negative integer.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    /// `protocol`, `action` or an extra field, for equality matching.
    fn field_ref(&self, key: &str) -> Option<FieldRef<'_>> {
        match key {
            "protocol" => Some(FieldRef::Str(&self.protocol)),
            "action" => Some(FieldRef::Str(&self.action)),
            _ => self.fields.get(key).map(FieldRef::Value),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.action)
    }
}

enum FieldRef<'a> {
    Str(&'a str),
    Value(&'a Value),
}

impl FieldRef<'_> {
    fn equals(&self, expected: &Value) -> bool {
        match self {
            Self::Str(s) => expected.as_str() == Some(*s),
            Self::Value(v) => *v == expected,
        }
    }
}

/// Field-equality predicate over messages.
///
/// A message matches when every listed field is present and equal. An empty
/// filter matches everything.
///
/// ```
/// use prometheus_relay::bus::{Filter, Message};
///
/// let filter = Filter::protocol("dns").action("resolve");
/// assert!(filter.matches(&Message::new("dns", "resolve").with("host", "localhost")));
/// assert!(!filter.matches(&Message::new("dns", "resolve-complete")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    fields: BTreeMap<String, Value>,
}

impl Filter {
    /// Filter that matches every message.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter on `protocol`.
    pub fn protocol(protocol: impl Into<String>) -> Self {
        Self::any().field("protocol", protocol.into())
    }

    /// Additionally require `action`.
    #[must_use]
    pub fn action(self, action: impl Into<String>) -> Self {
        self.field("action", action.into())
    }

    /// Additionally require field `key` to equal `value`.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Whether `message` satisfies every condition.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        self.fields.iter().all(|(key, expected)| {
            message
                .field_ref(key)
                .is_some_and(|actual| actual.equals(expected))
        })
    }
}
