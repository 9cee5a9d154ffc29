use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::Object;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::ObjectInfo;
use crate::error::{Result, SyncError};
use crate::repo::{BucketRepo, OpenParams, part_path};

pub struct S3BucketRepo {
    client: Client,
    bucket: String,
}

impl S3BucketRepo {
    /// Build a client from the default AWS provider chain, overridden by any
    /// region, static credentials, or endpoint set in `params`.
    pub async fn connect(params: OpenParams) -> Result<Self> {
        if params.bucket.is_empty() {
            return Err(SyncError::Config("s3 backend requires a bucket name".into()));
        }
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = params.region {
            loader = loader.region(Region::new(region));
        }
        if let (Some(id), Some(secret)) = (params.access_key_id, params.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                id,
                secret,
                None,
                None,
                "rpasync-config",
            ));
        }
        if let Some(url) = &params.endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let shared = loader.load().await;

        // Custom endpoints (MinIO, LocalStack) generally need path-style addressing.
        let conf = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(params.endpoint_url.is_some())
            .build();
        Ok(Self {
            client: Client::from_conf(conf),
            bucket: params.bucket,
        })
    }
}

fn object_info(obj: &Object) -> Option<ObjectInfo> {
    let key = obj.key()?;
    Some(ObjectInfo {
        key: key.to_string(),
        size: obj.size().unwrap_or(0).max(0) as u64,
        last_modified: obj
            .last_modified()
            .and_then(|t| OffsetDateTime::from_unix_timestamp(t.secs()).ok()),
    })
}

fn page_objects(page: &ListObjectsV2Output) -> impl Iterator<Item = ObjectInfo> + '_ {
    page.contents().iter().filter_map(object_info)
}

#[async_trait]
impl BucketRepo for S3BucketRepo {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut out = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        let mut n_pages = 0usize;
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                SyncError::Storage(format!(
                    "list s3://{}/{prefix}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;
            n_pages += 1;
            out.extend(page_objects(&page));
        }
        debug!(bucket = %self.bucket, prefix, pages = n_pages, objects = out.len(), "listed");
        Ok(out)
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<()> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                SyncError::Storage(format!(
                    "get s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;
        store_body(resp.body, dest).await
    }

    async fn upload_from(&self, src: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| SyncError::Storage(format!("read {}: {e}", src.display())))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                SyncError::Storage(format!(
                    "put s3://{}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

/// Stream `body` into the part file next to `dest`, then rename it into place.
async fn store_body(body: ByteStream, dest: &Path) -> Result<()> {
    let part = part_path(dest);
    if let Err(e) = write_body(body, &part).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }
    tokio::fs::rename(&part, dest).await?;
    Ok(())
}

async fn write_body(mut body: ByteStream, path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| SyncError::Storage(format!("body stream: {e}")))?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
