use time::OffsetDateTime;
use tracing::{debug, error, info};

use super::completion::CompletedFile;
use crate::error::Result;
use crate::repo::BucketRepo;
use crate::state::StateStore;
use crate::stats::PassStats;

pub(crate) struct ResultFilter<'a> {
    pub suffix: Option<&'a str>,
    pub baseline: OffsetDateTime,
    /// Newest input delivered before this pass began.
    pub last_input: Option<OffsetDateTime>,
}

impl ResultFilter<'_> {
    fn accepts(&self, f: &CompletedFile) -> bool {
        if let Some(sfx) = self.suffix {
            if !f.name.ends_with(sfx) {
                return false;
            }
        }
        let Some(mtime) = f.modified else {
            return false;
        };
        if mtime <= self.baseline {
            return false;
        }
        self.last_input.is_none_or(|t| mtime > t)
    }
}

/// Upload new result files to `{result_prefix}{file name}`, each path once.
pub(crate) async fn upload_results(
    repo: &dyn BucketRepo,
    state: &mut StateStore,
    result_prefix: &str,
    files: &[CompletedFile],
    filter: &ResultFilter<'_>,
    stats: &mut PassStats,
) -> Result<()> {
    for f in files {
        let path_key = f.path.to_string_lossy().to_string();
        if state.is_uploaded(&path_key) {
            continue;
        }
        // A failed upload stays eligible even once newer inputs have arrived.
        if !state.is_result_candidate(&path_key) && !filter.accepts(f) {
            continue;
        }
        let key = format!("{result_prefix}{}", f.name);
        match repo.upload_from(&f.path, &key).await {
            Ok(()) => {
                state.mark_uploaded(&path_key)?;
                stats.uploaded += 1;
                info!(path = %f.path.display(), key = %key, "completed -> bucket result");
            }
            Err(e) => {
                error!(path = %f.path.display(), key = %key, error = %e, "result upload failed");
                state.mark_result_candidate(&path_key)?;
                stats.failures += 1;
            }
        }
    }
    debug!(prefix = result_prefix, "result scan done");
    Ok(())
}
