// Ledger layout written by the first-generation sync script:
// {"downloaded": [name], "uploaded": [path], "input_times": {name: iso}, "baseline_time": iso}
use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{info, warn};

use super::{STATE_VERSION, SyncState};
use crate::domain::{TransferRecord, TransferStatus};

#[derive(Deserialize, Debug, Default)]
pub(super) struct LegacyState {
    #[serde(default)]
    downloaded: Vec<String>,
    #[serde(default)]
    uploaded: Vec<String>,
    #[serde(default)]
    input_times: BTreeMap<String, String>,
    #[serde(default)]
    baseline_time: Option<String>,
}

/// Naive ISO-8601 timestamps (no offset) are taken as UTC.
pub(super) fn parse_iso(s: &str) -> Option<OffsetDateTime> {
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(t);
    }
    let naive = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(s, naive)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

impl LegacyState {
    pub(super) fn migrate(self, now: OffsetDateTime) -> SyncState {
        let baseline_time = match self.baseline_time.as_deref() {
            Some(s) => parse_iso(s).unwrap_or_else(|| {
                warn!(value = s, "unparseable legacy baseline_time; using now");
                now
            }),
            None => now,
        };

        let mut records = BTreeMap::new();
        for name in self.downloaded {
            let sent_at = self.input_times.get(&name).and_then(|s| parse_iso(s));
            records.insert(
                name.clone(),
                TransferRecord {
                    filename: name,
                    status: TransferStatus::Sent,
                    last_seen: sent_at.unwrap_or(now),
                    source_key: None,
                    sent_at,
                },
            );
        }
        info!(records = records.len(), "migrated legacy state document");

        SyncState {
            version: STATE_VERSION,
            baseline_time,
            records,
            uploaded: self.uploaded.into_iter().collect::<BTreeSet<_>>(),
            result_candidates: BTreeSet::new(),
        }
    }
}
