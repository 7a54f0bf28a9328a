//! Error types for the vCenter inventory crate.

use std::fmt;

/// Categorised error kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcenterErrorKind {
    /// Endpoint unreachable, TLS failure, rejected credentials or closed session
    ConnectionError,
    /// No (unambiguous) datacenter visible to the caller
    NoDatacenter,
    /// Property query rejected or the object vanished (stale reference)
    PropertyRetrieval,
    /// A cluster's resource pool or its VM membership could not be resolved
    PoolResolution,
    /// Caller cancelled the traversal or its deadline passed
    Cancelled,
    /// HTTP timeout
    Timeout,
    /// JSON parse / deserialization error
    ParseError,
}

/// Crate error type carrying a kind + human-readable message.
#[derive(Debug, Clone)]
pub struct VcenterError {
    pub kind: VcenterErrorKind,
    pub message: String,
}

impl VcenterError {
    pub fn new(kind: VcenterErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(VcenterErrorKind::ConnectionError, msg)
    }

    pub fn no_datacenter(msg: impl Into<String>) -> Self {
        Self::new(VcenterErrorKind::NoDatacenter, msg)
    }

    pub fn property(msg: impl Into<String>) -> Self {
        Self::new(VcenterErrorKind::PropertyRetrieval, msg)
    }

    pub fn pool(msg: impl Into<String>) -> Self {
        Self::new(VcenterErrorKind::PoolResolution, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(VcenterErrorKind::Cancelled, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(VcenterErrorKind::Timeout, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(VcenterErrorKind::ParseError, msg)
    }

    /// Cancellation must abort the whole walk, never be skipped per child.
    pub fn is_cancelled(&self) -> bool {
        self.kind == VcenterErrorKind::Cancelled
    }

    /// Rewrap under another kind, keeping the message.
    pub fn into_kind(self, kind: VcenterErrorKind) -> Self {
        if self.is_cancelled() {
            return self;
        }
        Self { kind, message: self.message }
    }
}

impl fmt::Display for VcenterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for VcenterError {}

impl From<reqwest::Error> for VcenterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("HTTP timeout: {e}"))
        } else {
            Self::connection(format!("Connection failed: {e}"))
        }
    }
}

impl From<serde_json::Error> for VcenterError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {e}"))
    }
}

impl From<url::ParseError> for VcenterError {
    fn from(e: url::ParseError) -> Self {
        Self::connection(format!("Invalid endpoint: {e}"))
    }
}

/// Convenience alias.
pub type VcenterResult<T> = Result<T, VcenterError>;
