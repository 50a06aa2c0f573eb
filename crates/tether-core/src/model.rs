//! Model selection and pricing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Model the user picked for the CLI.
///
/// `Default` leaves the choice to the CLI itself, so no `--model` flag is
/// passed. Unrecognised names are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ModelChoice {
    /// Let the CLI pick its configured default
    #[default]
    Default,

    /// Opus family alias
    Opus,

    /// Sonnet family alias
    Sonnet,

    /// Haiku family alias
    Haiku,

    /// Full model id or an alias we don't know about
    Custom(String),
}

impl ModelChoice {
    /// Parses a model choice from its configuration name.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "" | "default" => Self::Default,
            "opus" => Self::Opus,
            "sonnet" => Self::Sonnet,
            "haiku" => Self::Haiku,
            _ => Self::Custom(name.trim().to_string()),
        }
    }

    /// Returns the configuration name.
    pub fn name(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Opus => "opus",
            Self::Sonnet => "sonnet",
            Self::Haiku => "haiku",
            Self::Custom(name) => name.as_str(),
        }
    }

    /// Returns the value for `--model`, or `None` for the default model.
    pub fn cli_flag(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            other => Some(other.name()),
        }
    }

    /// Returns the per-million-token pricing used for local cost estimates.
    pub fn pricing(&self) -> Pricing {
        match self {
            Self::Opus => Pricing::OPUS,
            Self::Haiku => Pricing::HAIKU,
            Self::Custom(name) => {
                let lower = name.to_lowercase();
                if lower.contains("opus") {
                    Pricing::OPUS
                } else if lower.contains("haiku") {
                    Pricing::HAIKU
                } else {
                    Pricing::SONNET
                }
            }
            // Conservative default
            Self::Default | Self::Sonnet => Pricing::SONNET,
        }
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ModelChoice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ModelChoice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// USD prices per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_write_per_million: f64,
    pub cache_read_per_million: f64,
}

impl Pricing {
    pub const OPUS: Self = Self {
        input_per_million: 15.00,
        output_per_million: 75.00,
        cache_write_per_million: 18.75,
        cache_read_per_million: 1.50,
    };

    pub const SONNET: Self = Self {
        input_per_million: 3.00,
        output_per_million: 15.00,
        cache_write_per_million: 3.75,
        cache_read_per_million: 0.30,
    };

    pub const HAIKU: Self = Self {
        input_per_million: 0.80,
        output_per_million: 4.00,
        cache_write_per_million: 1.00,
        cache_read_per_million: 0.08,
    };
}

impl Default for Pricing {
    fn default() -> Self {
        Self::SONNET
    }
}
