//! Values that flow between pipeline stages.

use std::fmt;

/// Opaque name of a resource to fetch, as read from one source record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    value: String,
    /// 1-based record number in the source (header excluded).
    record: u64,
}

impl Identifier {
    pub fn new(value: impl Into<String>, record: u64) -> Self {
        Self {
            value: value.into(),
            record,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Record number in the source this identifier came from.
    pub fn record(&self) -> u64 {
        self.record
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Non-empty body fetched for one identifier. Owned by whichever stage holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub source: Identifier,
    pub bytes: Vec<u8>,
}

impl Payload {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Why a fetch did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Transport-level error (DNS, connect, TLS, reset, local timeout).
    Transport(String),
    /// Server answered with a non-2xx status.
    Status(u32),
    /// Body exceeded the configured size limit.
    TooLarge { limit: u64 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(msg) => write!(f, "transport: {}", msg),
            FailureReason::Status(code) => write!(f, "unexpected status code: {}", code),
            FailureReason::TooLarge { limit } => write!(f, "body exceeds {} bytes", limit),
        }
    }
}

/// Classified result of one fetch. Only `Payload` reaches persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Payload(Vec<u8>),
    Empty,
    Failed(FailureReason),
}

/// Unique name under which one payload is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
