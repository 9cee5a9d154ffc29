#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod stats;

pub mod util {
    pub mod template;
}

pub mod repo;
pub mod repo_factory;
pub mod repo_fs;
pub mod repo_s3;

pub mod state;
pub mod sync;

// Re-exports: stable API surface
pub use config::{Backend, SyncConfig};
pub use domain::{ObjectInfo, Route, TransferRecord, TransferStatus};
pub use error::{Result, SyncError};
pub use repo::{BucketRepo, OpenParams};
pub use state::StateStore;
pub use stats::PassStats;
pub use sync::Syncer;
