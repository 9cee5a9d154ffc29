use crate::error::Result;
use crate::repo::{BucketRepo, OpenParams};
use crate::repo_fs::FsBucketRepo;
use crate::repo_s3::S3BucketRepo;

pub use crate::config::Backend;

pub async fn open_repo(backend: Backend, p: OpenParams) -> Result<Box<dyn BucketRepo>> {
    match backend {
        Backend::S3 => Ok(Box::new(S3BucketRepo::connect(p).await?)),
        Backend::Fs => Ok(Box::new(FsBucketRepo::new(p)?)),
    }
}
