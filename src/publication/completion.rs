use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// What happens to a publication record once it is completed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionMode {
    /// Keep the record in place with its completion date set.
    #[default]
    Update,
    /// Remove the record. Completed publications are never queryable.
    Delete,
    /// Copy the record into the archive, then remove the live row.
    Archive,
}

impl CompletionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionMode::Update => "UPDATE",
            CompletionMode::Delete => "DELETE",
            CompletionMode::Archive => "ARCHIVE",
        }
    }

    pub fn uses_archive(&self) -> bool {
        matches!(self, CompletionMode::Archive)
    }
}

impl fmt::Display for CompletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown completion mode '{0}' (expected UPDATE, DELETE or ARCHIVE)")]
pub struct UnknownCompletionMode(pub String);

impl FromStr for CompletionMode {
    type Err = UnknownCompletionMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UPDATE" => Ok(CompletionMode::Update),
            "DELETE" => Ok(CompletionMode::Delete),
            "ARCHIVE" => Ok(CompletionMode::Archive),
            _ => Err(UnknownCompletionMode(value.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for CompletionMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
