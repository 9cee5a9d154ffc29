// rpasync_core/src/repo.rs
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::ObjectInfo;
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct OpenParams {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Root directory for the filesystem backend.
    pub fs_root: Option<PathBuf>,
}

/// Object access needed by a sync pass.
#[async_trait]
pub trait BucketRepo: Send + Sync {
    /// All objects under `prefix`, across every listing page.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Download `key` to `dest`. `dest` only appears once the body is fully written.
    async fn download_to(&self, key: &str, dest: &Path) -> Result<()>;

    async fn upload_from(&self, src: &Path, key: &str) -> Result<()>;
}

/// Sibling path used while a download is in flight.
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.part"))
}
