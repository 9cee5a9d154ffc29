//! Sync configuration
//!
//! Loaded from a JSON file shaped like the pickup-folder deployments'
//! `config.json` (`aws`, `path_templates`, `hq_versions`), then overridden by
//! `RPASYNC_*` / `AWS_*` environment variables. Either source may be used alone.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Route;
use crate::error::{Result, SyncError};
use crate::repo::OpenParams;
use crate::util::template::expand;

/// Storage backend behind the bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    S3,
    Fs,
}

impl FromStr for Backend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(Backend::S3),
            "fs" | "file" | "local" => Ok(Backend::Fs),
            other => Err(SyncError::Config(format!("unknown backend {other:?}"))),
        }
    }
}

/// Bucket and credential settings
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AwsSettings {
    #[serde(default)]
    pub bucket: String,

    #[serde(default, alias = "region_name")]
    pub region: Option<String>,

    #[serde(default, rename = "aws_access_key_id")]
    pub access_key_id: Option<String>,

    #[serde(default, rename = "aws_secret_access_key")]
    pub secret_access_key: Option<String>,

    /// Custom S3-compatible endpoint (MinIO, LocalStack)
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

/// Templates expanded once per entry of `hq_versions`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathTemplates {
    pub s3_input: String,
    pub local_input: String,
    pub local_completed: String,
    #[serde(default)]
    pub s3_result: Option<String>,
}

/// A single route given directly rather than through templates
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DirectRoute {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub input_dir: PathBuf,
    #[serde(default)]
    pub completed_dir: PathBuf,
    #[serde(default)]
    pub result_prefix: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Only completed files ending with this suffix are uploaded as results.
    #[serde(default)]
    pub result_suffix: Option<String>,

    #[serde(default)]
    pub backend: Backend,

    /// Bucket root directory for the fs backend
    #[serde(default)]
    pub fs_root: Option<PathBuf>,

    /// Downloads land here first and are renamed into the input dir once
    /// complete. Must be on the same filesystem as the input dirs.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            poll_interval_secs: default_poll_interval(),
            result_suffix: None,
            backend: Backend::default(),
            fs_root: None,
            staging_dir: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub aws: AwsSettings,

    #[serde(default)]
    pub path_templates: Option<PathTemplates>,

    #[serde(default)]
    pub hq_versions: Vec<BTreeMap<String, String>>,

    #[serde(default)]
    pub route: Option<DirectRoute>,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            SyncError::Config(format!("read {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Config(format!("parse {}: {e}", path.display())))
    }

    /// File (when given) overridden by the process environment, then validated.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay environment values read through `get`.
    pub fn apply_env<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| get(k).filter(|v| !v.is_empty());

        if let Some(v) = get("RPASYNC_BUCKET") {
            self.aws.bucket = v;
        }
        if let Some(v) = get("AWS_REGION") {
            self.aws.region = Some(v);
        }
        if let Some(v) = get("AWS_ACCESS_KEY_ID") {
            self.aws.access_key_id = Some(v);
        }
        if let Some(v) = get("AWS_SECRET_ACCESS_KEY") {
            self.aws.secret_access_key = Some(v);
        }
        if let Some(v) = get("RPASYNC_ENDPOINT_URL") {
            self.aws.endpoint_url = Some(v);
        }
        if let Some(v) = get("RPASYNC_STATE_FILE") {
            self.sync.state_file = PathBuf::from(v);
        }
        if let Some(v) = get("RPASYNC_POLL_INTERVAL_SECS") {
            self.sync.poll_interval_secs = v.parse().map_err(|_| {
                SyncError::Config(format!("RPASYNC_POLL_INTERVAL_SECS: not a number: {v:?}"))
            })?;
        }
        if let Some(v) = get("RPASYNC_RESULT_SUFFIX") {
            self.sync.result_suffix = Some(v);
        }
        if let Some(v) = get("RPASYNC_BACKEND") {
            self.sync.backend = v.parse()?;
        }
        if let Some(v) = get("RPASYNC_FS_ROOT") {
            self.sync.fs_root = Some(PathBuf::from(v));
        }
        if let Some(v) = get("RPASYNC_STAGING_DIR") {
            self.sync.staging_dir = Some(PathBuf::from(v));
        }

        let mut touched = self.route.is_some();
        let mut route = self.route.take().unwrap_or_default();
        if let Some(v) = get("RPASYNC_PREFIX") {
            route.prefix = v;
            touched = true;
        }
        if let Some(v) = get("RPASYNC_INPUT_DIR") {
            route.input_dir = PathBuf::from(v);
            touched = true;
        }
        if let Some(v) = get("RPASYNC_COMPLETED_DIR") {
            route.completed_dir = PathBuf::from(v);
            touched = true;
        }
        if let Some(v) = get("RPASYNC_RESULT_PREFIX") {
            route.result_prefix = Some(v);
            touched = true;
        }
        if touched {
            self.route = Some(route);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        match self.sync.backend {
            Backend::S3 if self.aws.bucket.is_empty() => {
                return Err(SyncError::Config(
                    "bucket name missing (aws.bucket or RPASYNC_BUCKET)".into(),
                ));
            }
            Backend::Fs if self.sync.fs_root.is_none() => {
                return Err(SyncError::Config(
                    "fs backend needs sync.fs_root or RPASYNC_FS_ROOT".into(),
                ));
            }
            _ => {}
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::Config("poll interval must be at least 1s".into()));
        }
        if self.routes()?.is_empty() {
            return Err(SyncError::Config(
                "no routes configured (path_templates or RPASYNC_INPUT_DIR/RPASYNC_COMPLETED_DIR)"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Templated routes first, then the direct route.
    pub fn routes(&self) -> Result<Vec<Route>> {
        let mut out = Vec::new();
        if let Some(t) = &self.path_templates {
            let empty = [BTreeMap::new()];
            let sets: &[BTreeMap<String, String>] = if self.hq_versions.is_empty() {
                &empty
            } else {
                &self.hq_versions
            };
            for vars in sets {
                out.push(Route {
                    prefix: expand(&t.s3_input, vars)?,
                    input_dir: PathBuf::from(expand(&t.local_input, vars)?),
                    completed_dir: PathBuf::from(expand(&t.local_completed, vars)?),
                    result_prefix: t.s3_result.as_deref().map(|r| expand(r, vars)).transpose()?,
                });
            }
        }
        if let Some(r) = &self.route {
            if r.input_dir.as_os_str().is_empty() || r.completed_dir.as_os_str().is_empty() {
                return Err(SyncError::Config(
                    "route needs both an input dir and a completed dir".into(),
                ));
            }
            out.push(Route {
                prefix: r.prefix.clone(),
                input_dir: r.input_dir.clone(),
                completed_dir: r.completed_dir.clone(),
                result_prefix: r.result_prefix.clone(),
            });
        }
        Ok(out)
    }

    pub fn open_params(&self) -> OpenParams {
        OpenParams {
            bucket: self.aws.bucket.clone(),
            region: self.aws.region.clone(),
            endpoint_url: self.aws.endpoint_url.clone(),
            access_key_id: self.aws.access_key_id.clone(),
            secret_access_key: self.aws.secret_access_key.clone(),
            fs_root: self.sync.fs_root.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }
}
