use std::path::PathBuf;
use std::time::Duration;

use rpasync_core::error::{Result, SyncError};
use rpasync_core::state::StateStore;
use rpasync_core::{SyncConfig, Syncer};
use time::format_description::well_known::Rfc3339;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub async fn handle_once(config: Option<PathBuf>) -> Result<()> {
    let cfg = SyncConfig::resolve(config.as_deref())?;
    run_once(&cfg).await
}

/// One pass; any counted failure becomes `PassFailed`.
pub async fn run_once(cfg: &SyncConfig) -> Result<()> {
    let mut syncer = Syncer::from_config(cfg).await?;
    let stats = syncer.run_pass().await?;
    if stats.failures > 0 {
        return Err(SyncError::PassFailed {
            failures: stats.failures,
        });
    }
    Ok(())
}

pub async fn handle_run(config: Option<PathBuf>, interval: Option<u64>) -> Result<()> {
    let cfg = SyncConfig::resolve(config.as_deref())?;
    let period = match interval {
        Some(0) => return Err(SyncError::Config("--interval must be at least 1".into())),
        Some(secs) => Duration::from_secs(secs),
        None => cfg.poll_interval(),
    };
    let mut syncer = Syncer::from_config(&cfg).await?;
    info!(
        routes = syncer.routes().len(),
        every_secs = period.as_secs(),
        state = %syncer.state().path().display(),
        "polling started"
    );

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match syncer.run_pass().await {
                    Ok(stats) if stats.failures > 0 => {
                        warn!(failures = stats.failures, "pass had failures; retrying next poll");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "pass aborted"),
                }
            }
            _ = &mut shutdown => {
                info!("interrupted; stopping");
                return Ok(());
            }
        }
    }
}

pub fn handle_status(config: Option<PathBuf>, json: bool) -> Result<()> {
    let mut cfg = match config.as_deref() {
        Some(p) => SyncConfig::load(p)?,
        None => SyncConfig::default(),
    };
    cfg.apply_env(|k| std::env::var(k).ok())?;

    let path = &cfg.sync.state_file;
    if !path.exists() {
        eprintln!("status: no state file at {}", path.display());
        return Ok(());
    }
    let store = StateStore::open(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(store.state())?);
        return Ok(());
    }
    for r in store.records() {
        let seen = r
            .last_seen
            .format(&Rfc3339)
            .unwrap_or_else(|_| r.last_seen.to_string());
        println!("{:<9}  {:<30}  {}", r.status.to_string(), seen, r.filename);
    }
    eprintln!(
        "status: {} record(s), {} result upload(s)",
        store.len(),
        store.state().uploaded.len()
    );
    Ok(())
}
