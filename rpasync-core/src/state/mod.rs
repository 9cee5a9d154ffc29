//! Persisted transfer ledger.
//!
//! The ledger is a single JSON document keyed by file name. Every mutation is
//! written through to disk immediately (temp file + rename), and a pass that
//! changes nothing never touches the file.

mod legacy;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::domain::{TransferRecord, TransferStatus};
use crate::error::{Result, SyncError};

pub const STATE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SyncState {
    pub version: u32,
    /// Result files not modified after this instant are never uploaded.
    #[serde(with = "time::serde::rfc3339")]
    pub baseline_time: OffsetDateTime,
    pub records: BTreeMap<String, TransferRecord>,
    /// Completed-directory paths already uploaded to a result prefix.
    #[serde(default)]
    pub uploaded: BTreeSet<String>,
    /// Result files that passed the upload filter but whose upload failed.
    /// They stay eligible regardless of later inputs until uploaded.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub result_candidates: BTreeSet<String>,
}

impl SyncState {
    pub fn new(baseline_time: OffsetDateTime) -> Self {
        Self {
            version: STATE_VERSION,
            baseline_time,
            records: BTreeMap::new(),
            uploaded: BTreeSet::new(),
            result_candidates: BTreeSet::new(),
        }
    }

    /// Decode either the current document or a legacy one.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let obj = value
            .as_object()
            .ok_or_else(|| SyncError::State("state document is not a JSON object".into()))?;
        if obj.contains_key("records") {
            let st: SyncState = serde_json::from_value(value)?;
            if st.version > STATE_VERSION {
                return Err(SyncError::State(format!(
                    "state version {} is newer than supported {}",
                    st.version, STATE_VERSION
                )));
            }
            Ok(st)
        } else if obj.contains_key("downloaded") {
            let old: legacy::LegacyState = serde_json::from_value(value)?;
            Ok(old.migrate(OffsetDateTime::now_utc()))
        } else {
            Err(SyncError::State(
                "unrecognized state document (no `records` or `downloaded`)".into(),
            ))
        }
    }
}

pub struct StateStore {
    path: PathBuf,
    state: SyncState,
}

impl StateStore {
    /// Load the ledger at `path`, creating it when absent.
    pub fn open(path: &Path) -> Result<Self> {
        let state = match fs::read(path) {
            Ok(bytes) => {
                let st = SyncState::from_json(&bytes)?;
                debug!(path = %path.display(), records = st.records.len(), "state loaded");
                st
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "creating new state file");
                let store = Self {
                    path: path.to_path_buf(),
                    state: SyncState::new(OffsetDateTime::now_utc()),
                };
                store.save()?;
                return Ok(store);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn baseline_time(&self) -> OffsetDateTime {
        self.state.baseline_time
    }

    pub fn get(&self, filename: &str) -> Option<&TransferRecord> {
        self.state.records.get(filename)
    }

    pub fn records(&self) -> impl Iterator<Item = &TransferRecord> {
        self.state.records.values()
    }

    pub fn len(&self) -> usize {
        self.state.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.records.is_empty()
    }

    /// True when `filename` is untracked or a previous attempt never finished.
    pub fn needs_transfer(&self, filename: &str) -> bool {
        self.get(filename)
            .is_none_or(|r| r.status == TransferStatus::Pending)
    }

    pub fn mark_pending(&mut self, filename: &str, key: &str) -> Result<()> {
        if let Some(r) = self.state.records.get(filename) {
            if r.status != TransferStatus::Pending {
                return Err(SyncError::State(format!(
                    "{filename} is already {}; refusing to reset to pending",
                    r.status
                )));
            }
            if r.source_key.as_deref() == Some(key) {
                return Ok(());
            }
        }
        self.state.records.insert(
            filename.to_string(),
            TransferRecord {
                filename: filename.to_string(),
                status: TransferStatus::Pending,
                last_seen: OffsetDateTime::now_utc(),
                source_key: Some(key.to_string()),
                sent_at: None,
            },
        );
        self.save()
    }

    pub fn mark_sent(&mut self, filename: &str) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let rec = self
            .state
            .records
            .entry(filename.to_string())
            .or_insert_with(|| TransferRecord {
                filename: filename.to_string(),
                status: TransferStatus::Pending,
                last_seen: now,
                source_key: None,
                sent_at: None,
            });
        rec.status = TransferStatus::Sent;
        rec.last_seen = now;
        rec.sent_at = Some(now);
        self.save()
    }

    /// Move a `sent` record to `completed`. Returns false (and writes nothing)
    /// for any other state.
    pub fn mark_completed(&mut self, filename: &str) -> Result<bool> {
        match self.state.records.get_mut(filename) {
            Some(rec) if rec.status == TransferStatus::Sent => {
                rec.status = TransferStatus::Completed;
                rec.last_seen = OffsetDateTime::now_utc();
                self.save()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Newest download completion time across all records.
    pub fn last_sent_at(&self) -> Option<OffsetDateTime> {
        self.records().filter_map(|r| r.sent_at).max()
    }

    pub fn is_uploaded(&self, path: &str) -> bool {
        self.state.uploaded.contains(path)
    }

    pub fn mark_uploaded(&mut self, path: &str) -> Result<()> {
        let removed = self.state.result_candidates.remove(path);
        if self.state.uploaded.insert(path.to_string()) || removed {
            self.save()?;
        }
        Ok(())
    }

    pub fn is_result_candidate(&self, path: &str) -> bool {
        self.state.result_candidates.contains(path)
    }

    /// Keep `path` eligible for upload until `mark_uploaded` succeeds.
    pub fn mark_result_candidate(&mut self, path: &str) -> Result<()> {
        if self.state.result_candidates.insert(path.to_string()) {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.state)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| SyncError::Io(e.error))?;
        Ok(())
    }
}
