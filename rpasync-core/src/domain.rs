// rpasync_core/src/domain.rs
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One object as reported by a bucket listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
}

impl ObjectInfo {
    /// Last path segment of the key; empty for directory markers (`foo/`).
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or("")
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Sent,
    Completed,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Sent => "sent",
            TransferStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransferRecord {
    pub filename: String,
    pub status: TransferStatus,
    /// Time of the last status change.
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub sent_at: Option<OffsetDateTime>,
}

/// A resolved (prefix, input dir, completed dir, result prefix) tuple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub prefix: String,
    pub input_dir: std::path::PathBuf,
    pub completed_dir: std::path::PathBuf,
    pub result_prefix: Option<String>,
}
