use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Which backend is the system of record at this point of the migration.
///
/// Fixed for the lifetime of a router; switching requires building a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Local is authoritative, remote gets a best-effort copy of the configuration
    #[default]
    RemoteSecondary,
    /// Remote is authoritative, local still receives every write for rollback
    RemotePrimary,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteSecondary => "remote_secondary",
            Self::RemotePrimary => "remote_primary",
        }
    }
}

impl std::fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown migration mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for MigrationMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "remote_secondary" => Ok(Self::RemoteSecondary),
            "remote_primary" => Ok(Self::RemotePrimary),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}
