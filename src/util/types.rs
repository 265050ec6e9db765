//! Identifiers and small enums shared by every layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a work request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Stable hash of a normalized workload. The engine treats it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a fingerprint produced by the workload parser.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Caller-declared priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Never deferred; always runs immediately with the fastest strategy.
    Critical,
    /// Deferrable when carbon intensity is high.
    #[default]
    Normal,
    /// Batch-style work, deferrable.
    Low,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::Normal => "normal",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

/// Execution mode trading latency against energy footprint.
///
/// Variants are declared from least to most energy-efficient, so the derived
/// `Ord` compares efficiency: `Fast < Balanced < Efficient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Maximum parallelism, lowest latency.
    Fast,
    /// Middle ground between latency and energy.
    Balanced,
    /// Reduced parallelism, lowest guaranteed footprint.
    Efficient,
}

impl Strategy {
    /// All strategies, least to most efficient.
    pub const ALL: [Self; 3] = [Self::Fast, Self::Balanced, Self::Efficient];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Efficient => "efficient",
        };
        f.write_str(s)
    }
}
