//! Token counting and per-message usage.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// A token counter that saturates instead of overflowing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TokenCount(u64);

impl TokenCount {
    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Clamped at zero.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl Add for TokenCount {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
}

impl AddAssign for TokenCount {
    fn add_assign(&mut self, other: Self) {
        *self = self.saturating_add(other);
    }
}

/// Token usage reported for one API call (or one whole turn).
///
/// Mirrors the `usage` object the CLI attaches to assistant messages and
/// to the terminal result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Fresh input tokens
    pub input: TokenCount,
    /// Output tokens
    pub output: TokenCount,
    /// Tokens written to the prompt cache
    pub cache_creation: TokenCount,
    /// Tokens read back from the prompt cache
    pub cache_read: TokenCount,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64, cache_creation: u64, cache_read: u64) -> Self {
        Self {
            input: TokenCount::new(input),
            output: TokenCount::new(output),
            cache_creation: TokenCount::new(cache_creation),
            cache_read: TokenCount::new(cache_read),
        }
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            input: self.input + other.input,
            output: self.output + other.output,
            cache_creation: self.cache_creation + other.cache_creation,
            cache_read: self.cache_read + other.cache_read,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}
