//! End-to-end sync passes against an in-memory bucket and a directory bucket.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rpasync_core::repo_fs::FsBucketRepo;
use rpasync_core::{
    BucketRepo, ObjectInfo, Route, StateStore, SyncError, Syncer, TransferStatus,
};

#[derive(Default)]
struct MockInner {
    objects: BTreeMap<String, Vec<u8>>,
    uploads: BTreeMap<String, Vec<u8>>,
    downloads: Vec<String>,
    download_dests: Vec<PathBuf>,
    fail_downloads: HashSet<String>,
    fail_listing: bool,
    fail_uploads: bool,
}

/// In-memory bucket; clones share contents so tests can inspect after a pass.
#[derive(Clone, Default)]
struct MockRepo {
    inner: Arc<Mutex<MockInner>>,
}

impl MockRepo {
    fn put(&self, key: &str, data: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .objects
            .insert(key.to_string(), data.to_vec());
    }

    fn fail_download(&self, key: &str, fail: bool) {
        let mut g = self.inner.lock().unwrap();
        if fail {
            g.fail_downloads.insert(key.to_string());
        } else {
            g.fail_downloads.remove(key);
        }
    }

    fn downloads(&self) -> Vec<String> {
        self.inner.lock().unwrap().downloads.clone()
    }

    fn fail_uploads(&self, fail: bool) {
        self.inner.lock().unwrap().fail_uploads = fail;
    }

    fn download_dests(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().download_dests.clone()
    }

    fn uploads(&self) -> BTreeMap<String, Vec<u8>> {
        self.inner.lock().unwrap().uploads.clone()
    }
}

#[async_trait]
impl BucketRepo for MockRepo {
    async fn list_objects(&self, prefix: &str) -> rpasync_core::Result<Vec<ObjectInfo>> {
        let g = self.inner.lock().unwrap();
        if g.fail_listing {
            return Err(SyncError::Storage("listing unavailable".into()));
        }
        Ok(g.objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectInfo {
                key: k.clone(),
                size: v.len() as u64,
                last_modified: None,
            })
            .collect())
    }

    async fn download_to(&self, key: &str, dest: &Path) -> rpasync_core::Result<()> {
        let data = {
            let mut g = self.inner.lock().unwrap();
            if g.fail_downloads.contains(key) {
                return Err(SyncError::Storage(format!("injected failure for {key}")));
            }
            g.downloads.push(key.to_string());
            g.download_dests.push(dest.to_path_buf());
            g.objects
                .get(key)
                .cloned()
                .ok_or_else(|| SyncError::Storage(format!("no such key {key}")))?
        };
        std::fs::write(dest, data)?;
        Ok(())
    }

    async fn upload_from(&self, src: &Path, key: &str) -> rpasync_core::Result<()> {
        let data = std::fs::read(src)?;
        let mut g = self.inner.lock().unwrap();
        if g.fail_uploads {
            return Err(SyncError::Storage(format!("injected failure for {key}")));
        }
        g.uploads.insert(key.to_string(), data);
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Self { _dir: dir, root }
    }

    fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    fn input(&self) -> PathBuf {
        self.root.join("rpa").join("Input")
    }

    fn completed(&self) -> PathBuf {
        self.root.join("rpa").join("Completed")
    }

    fn route(&self, prefix: &str, result_prefix: Option<&str>) -> Route {
        Route {
            prefix: prefix.to_string(),
            input_dir: self.input(),
            completed_dir: self.completed(),
            result_prefix: result_prefix.map(str::to_string),
        }
    }

    fn syncer(&self, repo: impl BucketRepo + 'static, routes: Vec<Route>) -> Syncer {
        let state = StateStore::open(&self.state_path()).unwrap();
        Syncer::new(Box::new(repo), state, routes)
    }
}

fn touch_future(path: &Path) {
    let f = std::fs::File::options().write(true).open(path).unwrap();
    f.set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();
}

#[tokio::test]
async fn new_object_is_copied_and_marked_sent() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.put("input/hq1/order-001.xlsx", b"order");

    let mut syncer = fx.syncer(repo.clone(), vec![fx.route("input/hq1/", None)]);
    let stats = syncer.run_pass().await.unwrap();

    assert_eq!(stats.downloaded, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(
        std::fs::read(fx.input().join("order-001.xlsx")).unwrap(),
        b"order"
    );
    let rec = syncer.state().get("order-001.xlsx").unwrap();
    assert_eq!(rec.status, TransferStatus::Sent);
    assert_eq!(rec.source_key.as_deref(), Some("input/hq1/order-001.xlsx"));

    // Persisted, not just in memory.
    let reopened = StateStore::open(&fx.state_path()).unwrap();
    assert_eq!(
        reopened.get("order-001.xlsx").unwrap().status,
        TransferStatus::Sent
    );
}

#[tokio::test]
async fn sent_and_completed_files_are_never_recopied() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.put("input/a.xlsx", b"a");
    repo.put("input/b.xlsx", b"b");

    let mut syncer = fx.syncer(repo.clone(), vec![fx.route("input/", None)]);
    syncer.run_pass().await.unwrap();
    assert_eq!(repo.downloads().len(), 2);

    // The RPA consumed a.xlsx and finished b.xlsx.
    std::fs::remove_file(fx.input().join("a.xlsx")).unwrap();
    let day = fx.completed().join("2025").join("0301_v1");
    std::fs::create_dir_all(&day).unwrap();
    std::fs::rename(fx.input().join("b.xlsx"), day.join("b.xlsx")).unwrap();

    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.downloaded, 0);
    assert_eq!(stats.skipped, 2);
    assert_eq!(repo.downloads().len(), 2);
    assert!(!fx.input().join("a.xlsx").exists());

    // A fresh process over the same ledger behaves the same.
    let mut again = fx.syncer(repo.clone(), vec![fx.route("input/", None)]);
    again.run_pass().await.unwrap();
    assert_eq!(repo.downloads().len(), 2);
}

#[tokio::test]
async fn file_in_completed_dir_transitions_sent_to_completed() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.put("input/a.xlsx", b"a");
    repo.put("input/b.xlsx", b"b");

    let mut syncer = fx.syncer(repo.clone(), vec![fx.route("input/", None)]);
    syncer.run_pass().await.unwrap();

    let day = fx.completed().join("2025").join("0301_v1");
    std::fs::create_dir_all(&day).unwrap();
    std::fs::rename(fx.input().join("a.xlsx"), day.join("a.xlsx")).unwrap();
    // Untracked files in the completed dir are ignored.
    std::fs::write(day.join("stray.txt"), b"?").unwrap();

    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(
        syncer.state().get("a.xlsx").unwrap().status,
        TransferStatus::Completed
    );
    assert_eq!(syncer.state().get("b.xlsx").unwrap().status, TransferStatus::Sent);
    assert!(syncer.state().get("stray.txt").is_none());

    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.completed, 0);
}

#[tokio::test]
async fn idle_pass_leaves_state_file_untouched() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.put("input/a.xlsx", b"a");

    let mut syncer = fx.syncer(repo.clone(), vec![fx.route("input/", None)]);
    syncer.run_pass().await.unwrap();
    let day = fx.completed().join("d1");
    std::fs::create_dir_all(&day).unwrap();
    std::fs::rename(fx.input().join("a.xlsx"), day.join("a.xlsx")).unwrap();
    syncer.run_pass().await.unwrap();

    let before = std::fs::read(fx.state_path()).unwrap();
    let before_mtime = std::fs::metadata(fx.state_path())
        .unwrap()
        .modified()
        .unwrap();

    let stats = syncer.run_pass().await.unwrap();
    assert!(stats.is_idle());
    assert_eq!(std::fs::read(fx.state_path()).unwrap(), before);
    assert_eq!(
        std::fs::metadata(fx.state_path())
            .unwrap()
            .modified()
            .unwrap(),
        before_mtime
    );
}

#[tokio::test]
async fn failed_download_stays_pending_and_is_retried() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.put("input/a.xlsx", b"a");
    repo.put("input/b.xlsx", b"b");
    repo.fail_download("input/a.xlsx", true);

    let mut syncer = fx.syncer(repo.clone(), vec![fx.route("input/", None)]);
    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.downloaded, 1);
    assert_eq!(
        syncer.state().get("a.xlsx").unwrap().status,
        TransferStatus::Pending
    );
    assert!(!fx.input().join("a.xlsx").exists());

    repo.fail_download("input/a.xlsx", false);
    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.downloaded, 1);
    assert_eq!(syncer.state().get("a.xlsx").unwrap().status, TransferStatus::Sent);
}

#[tokio::test]
async fn staged_download_is_moved_into_input_dir() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.put("input/a.xlsx", b"a");
    let staging = fx.root.join("rpa").join(".staging");

    let mut syncer = fx
        .syncer(repo.clone(), vec![fx.route("input/", None)])
        .with_staging_dir(Some(staging.clone()));
    let stats = syncer.run_pass().await.unwrap();

    assert_eq!(stats.downloaded, 1);
    assert_eq!(repo.download_dests(), vec![staging.join("a.xlsx")]);
    assert_eq!(std::fs::read(fx.input().join("a.xlsx")).unwrap(), b"a");
    assert!(!staging.join("a.xlsx").exists());
    assert_eq!(syncer.state().get("a.xlsx").unwrap().status, TransferStatus::Sent);
}

#[tokio::test]
async fn listing_failure_is_counted_not_fatal() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.inner.lock().unwrap().fail_listing = true;

    let mut syncer = fx.syncer(repo.clone(), vec![fx.route("input/", None)]);
    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.failures, 1);
    assert!(syncer.state().is_empty());
}

#[tokio::test]
async fn directory_markers_and_duplicate_names_are_skipped() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.put("input/hq1/", b"");
    repo.put("input/hq1/a.xlsx", b"first");
    repo.put("input/hq2/a.xlsx", b"second");

    let mut syncer = fx.syncer(repo.clone(), vec![fx.route("input/", None)]);
    let stats = syncer.run_pass().await.unwrap();

    assert_eq!(stats.listed, 3);
    assert_eq!(stats.downloaded, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(repo.downloads(), vec!["input/hq1/a.xlsx".to_string()]);
    assert_eq!(syncer.state().len(), 1);
}

#[tokio::test]
async fn result_files_are_uploaded_once() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.put("input/a.xlsx", b"a");

    let mut syncer = fx
        .syncer(
            repo.clone(),
            vec![fx.route("input/", Some("result/hq1/"))],
        )
        .with_result_suffix(Some("_out.xlsx".to_string()));
    syncer.run_pass().await.unwrap();

    let day = fx.completed().join("2025").join("0301_v1");
    std::fs::create_dir_all(&day).unwrap();
    let result = day.join("a_out.xlsx");
    std::fs::write(&result, b"processed").unwrap();
    touch_future(&result);
    let ignored = day.join("notes.txt");
    std::fs::write(&ignored, b"n").unwrap();
    touch_future(&ignored);

    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.uploaded, 1);
    let uploads = repo.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads["result/hq1/a_out.xlsx"], b"processed");
    assert!(syncer.state().is_uploaded(&result.to_string_lossy()));

    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.uploaded, 0);
    assert_eq!(repo.uploads().len(), 1);
}

#[tokio::test]
async fn failed_result_upload_is_retried_after_newer_input() {
    let fx = Fixture::new();
    let repo = MockRepo::default();
    repo.put("input/a.xlsx", b"a");

    let mut syncer = fx
        .syncer(repo.clone(), vec![fx.route("input/", Some("result/"))])
        .with_result_suffix(Some("_out.xlsx".to_string()));
    syncer.run_pass().await.unwrap();

    // Finished after a.xlsx arrived but before b.xlsx does.
    let day = fx.completed().join("2025").join("0301_v1");
    std::fs::create_dir_all(&day).unwrap();
    let result = day.join("a_out.xlsx");
    std::fs::write(&result, b"processed").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&result)
        .unwrap()
        .set_modified(SystemTime::now())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    repo.fail_uploads(true);
    repo.put("input/b.xlsx", b"b");
    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.downloaded, 1);
    assert_eq!(stats.uploaded, 0);
    assert_eq!(stats.failures, 1);
    let key = result.to_string_lossy().to_string();
    assert!(syncer.state().is_result_candidate(&key));

    repo.fail_uploads(false);
    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.uploaded, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(repo.uploads()["result/a_out.xlsx"], b"processed");
    assert!(syncer.state().is_uploaded(&key));
    assert!(!syncer.state().is_result_candidate(&key));
}

#[tokio::test]
async fn results_older_than_baseline_are_ignored() {
    let fx = Fixture::new();
    let day = fx.completed().join("old");
    std::fs::create_dir_all(&day).unwrap();
    let stale = day.join("stale_out.xlsx");
    std::fs::write(&stale, b"old").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&stale)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(3600))
        .unwrap();

    let repo = MockRepo::default();
    let mut syncer = fx.syncer(repo.clone(), vec![fx.route("input/", Some("result/"))]);
    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.uploaded, 0);
    assert!(repo.uploads().is_empty());
}

#[tokio::test]
async fn legacy_ledger_suppresses_recopy() {
    let fx = Fixture::new();
    std::fs::write(
        fx.state_path(),
        r#"{"downloaded": ["a.xlsx"], "uploaded": [], "input_times": {}}"#,
    )
    .unwrap();
    let repo = MockRepo::default();
    repo.put("input/a.xlsx", b"a");
    repo.put("input/b.xlsx", b"b");

    let mut syncer = fx.syncer(repo.clone(), vec![fx.route("input/", None)]);
    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.downloaded, 1);
    assert_eq!(repo.downloads(), vec!["input/b.xlsx".to_string()]);

    // Rewritten in the current layout after the first mutation.
    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(fx.state_path()).unwrap()).unwrap();
    assert_eq!(doc["version"], 1);
    assert_eq!(doc["records"]["a.xlsx"]["status"], "sent");
}

#[tokio::test]
async fn directory_bucket_end_to_end() {
    let fx = Fixture::new();
    let bucket = fx.root.join("bucket");
    std::fs::create_dir_all(bucket.join("input/hq1")).unwrap();
    std::fs::write(bucket.join("input/hq1/a.xlsx"), b"payload").unwrap();

    let mut syncer = fx
        .syncer(
            FsBucketRepo::at(&bucket),
            vec![fx.route("input/hq1/", Some("result/hq1/"))],
        )
        .with_result_suffix(Some("_out.xlsx".to_string()));
    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.downloaded, 1);
    assert_eq!(std::fs::read(fx.input().join("a.xlsx")).unwrap(), b"payload");

    let day = fx.completed().join("2025").join("d1");
    std::fs::create_dir_all(&day).unwrap();
    std::fs::rename(fx.input().join("a.xlsx"), day.join("a.xlsx")).unwrap();
    let out = day.join("a_out.xlsx");
    std::fs::write(&out, b"done").unwrap();
    touch_future(&out);

    let stats = syncer.run_pass().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.uploaded, 1);
    assert_eq!(
        std::fs::read(bucket.join("result/hq1/a_out.xlsx")).unwrap(),
        b"done"
    );
    assert_eq!(
        syncer.state().get("a.xlsx").unwrap().status,
        TransferStatus::Completed
    );
}
