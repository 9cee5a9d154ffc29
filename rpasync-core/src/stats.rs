use serde::{Deserialize, Serialize};

/// Counters for one sync pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub listed: u64,
    pub downloaded: u64,
    pub skipped: u64,
    pub completed: u64,
    pub uploaded: u64,
    pub failures: usize,
}

impl PassStats {
    pub fn is_idle(&self) -> bool {
        self.downloaded == 0 && self.completed == 0 && self.uploaded == 0
    }
}
