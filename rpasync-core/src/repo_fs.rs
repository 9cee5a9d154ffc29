use std::path::{Path, PathBuf};

use async_trait::async_trait;
use time::OffsetDateTime;
use walkdir::WalkDir;

use crate::domain::ObjectInfo;
use crate::error::{Result, SyncError};
use crate::repo::{BucketRepo, OpenParams, part_path};

/// A plain directory standing in for a bucket; keys are `/`-joined relative paths.
pub struct FsBucketRepo {
    root: PathBuf,
}

impl FsBucketRepo {
    pub fn new(params: OpenParams) -> Result<Self> {
        let root = params
            .fs_root
            .ok_or_else(|| SyncError::Config("fs backend requires fs_root".into()))?;
        Ok(Self::at(root))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let mut p = self.root.clone();
        for seg in key.split('/').filter(|s| !s.is_empty()) {
            if seg == "." || seg == ".." {
                return Err(SyncError::Storage(format!("invalid key {key:?}")));
            }
            p.push(seg);
        }
        Ok(p)
    }
}

#[async_trait]
impl BucketRepo for FsBucketRepo {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<ObjectInfo>> {
            let mut out = Vec::new();
            if !root.exists() {
                return Ok(out);
            }
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| SyncError::Storage(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = match entry.path().strip_prefix(&root) {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(&prefix) {
                    continue;
                }
                let md = entry.metadata().map_err(|e| SyncError::Storage(e.to_string()))?;
                out.push(ObjectInfo {
                    key,
                    size: md.len(),
                    last_modified: md.modified().ok().map(OffsetDateTime::from),
                });
            }
            Ok(out)
        })
        .await
        .map_err(|e| SyncError::Storage(format!("listing task failed: {e}")))?
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<()> {
        let src = self.key_path(key)?;
        let part = part_path(dest);
        if let Err(e) = tokio::fs::copy(&src, &part).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(SyncError::Storage(format!("copy {}: {e}", src.display())));
        }
        tokio::fs::rename(&part, dest).await?;
        Ok(())
    }

    async fn upload_from(&self, src: &Path, key: &str) -> Result<()> {
        let dst = self.key_path(key)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(src, &dst)
            .await
            .map_err(|e| SyncError::Storage(format!("copy to {}: {e}", dst.display())))?;
        Ok(())
    }
}
