use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Account plan level, which decides how aggressively the queue may send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[default]
    Free,
    Starter,
    Pro,
}

impl Tier {
    pub const ALL: [Self; 3] = [Self::Free, Self::Starter, Self::Pro];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            other => Err(format!("Unknown tier '{other}', expected free, starter or pro")),
        }
    }
}

/// Source of the current account tier.
///
/// The tier is looked up at the start of every dispatch cycle, so an upgrade
/// takes effect on the next tick without restarting anything.
pub trait TierProvider: Send + Sync + fmt::Debug {
    fn tier(&self) -> Tier;
}

impl TierProvider for Tier {
    fn tier(&self) -> Tier {
        *self
    }
}
