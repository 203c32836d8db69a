//! Strongly-typed identifiers for vigil entities.

use crate::error::{Result, VigilError};
use once_cell::sync::Lazy;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a session.
///
/// A session is one continuous period of foreground/background activity and
/// the unit of telemetry delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a session ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parse a session ID from its string form.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| VigilError::InvalidIdentifier {
                kind: "session",
                value: s.to_string(),
            })
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// Identifier of the process that owns a session.
///
/// Generated once per process launch. A session whose process id differs
/// from [`ProcessId::current`] belongs to a previous launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(Uuid);

static CURRENT_PROCESS: Lazy<ProcessId> = Lazy::new(ProcessId::random);

impl ProcessId {
    /// The identifier of the running process.
    #[must_use]
    pub fn current() -> Self {
        *CURRENT_PROCESS
    }

    /// Create a fresh random process ID (used to simulate other launches).
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a process ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Create a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                let mut bytes = [0u8; $len];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(bytes)
            }

            /// Create an identifier from raw bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Lowercase hex encoding.
            #[must_use]
            pub fn to_hex(&self) -> String {
                self.0.iter().map(|b| format!("{:02x}", b)).collect()
            }

            /// Parse the hex encoding produced by [`Self::to_hex`].
            pub fn parse(s: &str) -> Result<Self> {
                let invalid = || VigilError::InvalidIdentifier {
                    kind: $kind,
                    value: s.to_string(),
                };
                if s.len() != $len * 2 || !s.is_ascii() {
                    return Err(invalid());
                }
                let mut bytes = [0u8; $len];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
                }
                Ok(Self(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id!(
    /// Identifier shared by all spans of one trace (16 bytes).
    TraceId,
    16,
    "trace"
);

hex_id!(
    /// Identifier of a single span (8 bytes).
    SpanId,
    8,
    "span"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_display_and_parse() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(SessionId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn trace_and_span_ids_are_hex() {
        let trace = TraceId::new();
        let span = SpanId::new();
        assert_eq!(trace.to_hex().len(), 32);
        assert_eq!(span.to_hex().len(), 16);
        assert_eq!(TraceId::parse(&trace.to_hex()).unwrap(), trace);
        assert_eq!(SpanId::parse(&span.to_hex()).unwrap(), span);
    }

    #[test]
    fn span_id_rejects_bad_input() {
        assert!(SpanId::parse("xyz").is_err());
        assert!(SpanId::parse("zzzzzzzzzzzzzzzz").is_err());
        let err = SpanId::parse("12").unwrap_err();
        assert_eq!(err.code(), "E201");
    }

    #[test]
    fn ids_serialize_as_strings() {
        let span = SpanId::from_bytes([0, 1, 2, 3, 4, 5, 6, 0xff]);
        let json = serde_json::to_string(&span).unwrap();
        assert_eq!(json, "\"00010203040506ff\"");
        let back: SpanId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, span);
    }

    #[test]
    fn current_process_is_stable() {
        assert_eq!(ProcessId::current(), ProcessId::current());
        assert_ne!(ProcessId::current(), ProcessId::random());
    }
}
