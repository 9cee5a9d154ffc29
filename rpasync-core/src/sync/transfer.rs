use std::path::Path;

use tracing::{debug, error, info};

use crate::domain::Route;
use crate::error::Result;
use crate::repo::BucketRepo;
use crate::state::StateStore;
use crate::stats::PassStats;

/// Copy every untracked object under the route prefix into its input dir.
///
/// Listing and download failures are counted and logged; the object stays
/// `pending` and is picked up again next pass. Ledger write failures abort.
/// With a `staging` dir the download lands there and is renamed into place.
pub(crate) async fn transfer_route(
    repo: &dyn BucketRepo,
    state: &mut StateStore,
    route: &Route,
    staging: Option<&Path>,
    stats: &mut PassStats,
) -> Result<()> {
    let objects = match repo.list_objects(&route.prefix).await {
        Ok(o) => o,
        Err(e) => {
            error!(prefix = %route.prefix, error = %e, "listing failed");
            stats.failures += 1;
            return Ok(());
        }
    };
    stats.listed += objects.len() as u64;

    for obj in &objects {
        let name = obj.file_name();
        if name.is_empty() || name == "." || name == ".." {
            continue;
        }
        if !state.needs_transfer(name) {
            debug!(key = %obj.key, "already tracked");
            stats.skipped += 1;
            continue;
        }

        state.mark_pending(name, &obj.key)?;
        if let Err(e) = tokio::fs::create_dir_all(&route.input_dir).await {
            error!(dir = %route.input_dir.display(), error = %e, "cannot create input dir");
            stats.failures += 1;
            continue;
        }
        let dest = route.input_dir.join(name);
        match fetch(repo, &obj.key, &dest, staging).await {
            Ok(()) => {
                state.mark_sent(name)?;
                stats.downloaded += 1;
                info!(key = %obj.key, dest = %dest.display(), "bucket -> input");
            }
            Err(e) => {
                error!(key = %obj.key, dest = %dest.display(), error = %e, "download failed");
                stats.failures += 1;
            }
        }
    }
    Ok(())
}

async fn fetch(
    repo: &dyn BucketRepo,
    key: &str,
    dest: &Path,
    staging: Option<&Path>,
) -> Result<()> {
    let (Some(dir), Some(name)) = (staging, dest.file_name()) else {
        return repo.download_to(key, dest).await;
    };
    tokio::fs::create_dir_all(dir).await?;
    let staged = dir.join(name);
    repo.download_to(key, &staged).await?;
    if let Err(e) = tokio::fs::rename(&staged, dest).await {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(e.into());
    }
    Ok(())
}
