use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Liveness of the backing store as seen by a status poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    /// No connection object exists.
    Closed,
    /// A connection exists but the liveness probe failed.
    Unreachable,
    /// The liveness probe succeeded.
    Connected,
}

impl DatabaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Unreachable => "unreachable",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for DatabaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "unreachable" => Ok(Self::Unreachable),
            "connected" => Ok(Self::Connected),
            other => Err(TypeError::UnknownStatus(other.to_string())),
        }
    }
}
