//! One polling pass: bucket -> input dirs, completed dirs -> ledger, and
//! completed dirs -> result prefixes.

mod completion;
mod results;
mod transfer;

use std::path::PathBuf;

use tracing::info;

use crate::config::SyncConfig;
use crate::domain::Route;
use crate::error::Result;
use crate::repo::BucketRepo;
use crate::repo_factory::open_repo;
use crate::state::StateStore;
use crate::stats::PassStats;

pub struct Syncer {
    repo: Box<dyn BucketRepo>,
    state: StateStore,
    routes: Vec<Route>,
    result_suffix: Option<String>,
    staging_dir: Option<PathBuf>,
}

impl Syncer {
    pub fn new(repo: Box<dyn BucketRepo>, state: StateStore, routes: Vec<Route>) -> Self {
        Self {
            repo,
            state,
            routes,
            result_suffix: None,
            staging_dir: None,
        }
    }

    /// Open the configured backend and ledger.
    pub async fn from_config(cfg: &SyncConfig) -> Result<Self> {
        let routes = cfg.routes()?;
        let repo = open_repo(cfg.sync.backend, cfg.open_params()).await?;
        let state = StateStore::open(&cfg.sync.state_file)?;
        Ok(Self::new(repo, state, routes)
            .with_result_suffix(cfg.sync.result_suffix.clone())
            .with_staging_dir(cfg.sync.staging_dir.clone()))
    }

    pub fn with_result_suffix(mut self, suffix: Option<String>) -> Self {
        self.result_suffix = suffix;
        self
    }

    /// Download into `dir` and rename into the input dir when complete.
    pub fn with_staging_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.staging_dir = dir;
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Transfer, then completion, then result upload, over every route.
    pub async fn run_pass(&mut self) -> Result<PassStats> {
        let mut stats = PassStats::default();
        let filter = results::ResultFilter {
            suffix: self.result_suffix.as_deref(),
            baseline: self.state.baseline_time(),
            last_input: self.state.last_sent_at(),
        };

        for route in &self.routes {
            transfer::transfer_route(
                self.repo.as_ref(),
                &mut self.state,
                route,
                self.staging_dir.as_deref(),
                &mut stats,
            )
            .await?;
        }

        for route in &self.routes {
            let files = completion::completed_files(&route.completed_dir).await?;
            completion::mark_completed(&mut self.state, &files, &mut stats)?;
            if let Some(prefix) = &route.result_prefix {
                results::upload_results(
                    self.repo.as_ref(),
                    &mut self.state,
                    prefix,
                    &files,
                    &filter,
                    &mut stats,
                )
                .await?;
            }
        }

        info!(
            listed = stats.listed,
            downloaded = stats.downloaded,
            completed = stats.completed,
            uploaded = stats.uploaded,
            failures = stats.failures,
            "pass finished"
        );
        Ok(stats)
    }
}
