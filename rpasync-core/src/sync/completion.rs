use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::state::StateStore;
use crate::stats::PassStats;

#[derive(Clone, Debug)]
pub(crate) struct CompletedFile {
    pub path: PathBuf,
    pub name: String,
    pub modified: Option<OffsetDateTime>,
}

/// Every regular file below `dir`, at any depth. A missing dir yields nothing.
pub(crate) async fn completed_files(dir: &Path) -> Result<Vec<CompletedFile>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        if !dir.is_dir() {
            return out;
        }
        for entry in WalkDir::new(&dir).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(OffsetDateTime::from);
            out.push(CompletedFile {
                path: entry.path().to_path_buf(),
                name: name.to_string(),
                modified,
            });
        }
        out
    })
    .await
    .map_err(|e| SyncError::Io(std::io::Error::other(e)))
}

/// `sent` records whose file name shows up in the completed dir become `completed`.
pub(crate) fn mark_completed(
    state: &mut StateStore,
    files: &[CompletedFile],
    stats: &mut PassStats,
) -> Result<()> {
    for f in files {
        if state.mark_completed(&f.name)? {
            stats.completed += 1;
            info!(file = %f.name, path = %f.path.display(), "completed");
        }
    }
    Ok(())
}
