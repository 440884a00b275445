//! End-to-end download scenarios driven through a scripted HTTP client.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use time::OffsetDateTime;

use modeldock_fetch::{
    BoxStream, Credentials, DetailedProgress, DiskProbe, DownloadConfig, DownloadError,
    DownloadPhase, Downloader, HttpClient, HttpError, PostProcess, ProgressCallback,
};
use modeldock_store::{Journal, JournalStore, StorageLayout};
use modeldock_verify::{sha256_file, sha256_hex};

#[derive(Clone, Debug)]
enum Reply {
    Body(Vec<u8>),
    Status(u16),
    Hang,
}

#[derive(Default)]
struct MockState {
    manifests: Mutex<Vec<String>>,
    replies: Mutex<HashMap<String, Vec<Reply>>>,
    gets: AtomicUsize,
    posts: AtomicUsize,
}

/// Scripted HTTP client: manifest bodies are served in order (the last one
/// repeats), chunk URLs consume their reply queues the same way. Clones
/// share state so tests keep a counter handle after the downloader takes
/// the client.
#[derive(Clone, Default)]
struct MockClient(Arc<MockState>);

impl MockClient {
    fn new(manifest: String) -> Self {
        let client = Self::default();
        client.0.manifests.lock().unwrap().push(manifest);
        client
    }

    fn script(&self, url: &str, replies: Vec<Reply>) {
        self.0
            .replies
            .lock()
            .unwrap()
            .insert(url.to_string(), replies);
    }

    fn gets(&self) -> usize {
        self.0.gets.load(Ordering::SeqCst)
    }

    fn posts(&self) -> usize {
        self.0.posts.load(Ordering::SeqCst)
    }
}

impl HttpClient for MockClient {
    async fn post_json(
        &self,
        _url: &str,
        headers: &[(String, String)],
        _body: String,
    ) -> Result<(u16, Bytes), HttpError> {
        self.0.posts.fetch_add(1, Ordering::SeqCst);
        assert!(
            headers
                .iter()
                .any(|(k, v)| k == "Authorization" && v.starts_with("Bearer ")),
            "manifest request missing bearer auth"
        );
        let body = {
            let mut manifests = self.0.manifests.lock().unwrap();
            if manifests.len() > 1 {
                manifests.remove(0)
            } else {
                manifests[0].clone()
            }
        };
        Ok((200, Bytes::from(body)))
    }

    async fn get_stream(
        &self,
        url: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, HttpError>>, HttpError> {
        self.0.gets.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut replies = self.0.replies.lock().unwrap();
            let queue = replies
                .get_mut(url)
                .unwrap_or_else(|| panic!("unexpected GET {url}"));
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            }
        };
        match reply {
            Reply::Body(bytes) => {
                let stream: BoxStream<'static, Result<Bytes, HttpError>> =
                    Box::pin(futures_util::stream::iter(vec![Ok(Bytes::from(bytes))]));
                Ok(stream)
            }
            Reply::Status(code) => Err(HttpError::Status(code)),
            Reply::Hang => {
                futures_util::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

struct FixedDisk(u64);

impl DiskProbe for FixedDisk {
    fn available_space(&self, _path: &Path) -> Option<u64> {
        Some(self.0)
    }
}

/// Build the `initDownload` response body for the given chunk payloads.
/// Returns the body together with the whole-file hash.
fn manifest_json(model_id: &str, file_ext: &str, chunks: &[(String, Vec<u8>)]) -> (String, String) {
    let whole: Vec<u8> = chunks.iter().flat_map(|(_, bytes)| bytes.clone()).collect();
    let whole_hash = sha256_hex(&whole);
    let url_info_list: Vec<serde_json::Value> = chunks
        .iter()
        .enumerate()
        .map(|(index, (url, bytes))| {
            serde_json::json!({
                "chunkIndex": index,
                "urlInfo": { "url": url, "expiration": 1_900_000_000i64 },
                "chunkHash": sha256_hex(bytes),
            })
        })
        .collect();
    let body = serde_json::json!({
        "urlInfoList": url_info_list,
        "hash": whole_hash,
        "modelName": format!("{model_id} name"),
        "modelId": model_id,
        "version": "1.0",
        "description": "test model",
        "category": "test",
        "fileExt": file_ext,
    })
    .to_string();
    (body, whole_hash)
}

fn three_chunks() -> Vec<(String, Vec<u8>)> {
    vec![
        ("https://cdn.example/c0".to_string(), vec![b'a'; 1000]),
        ("https://cdn.example/c1".to_string(), vec![b'b'; 1000]),
        ("https://cdn.example/c2".to_string(), vec![b'c'; 999]),
    ]
}

fn script_bodies(client: &MockClient, chunks: &[(String, Vec<u8>)]) {
    for (url, bytes) in chunks {
        client.script(url, vec![Reply::Body(bytes.clone())]);
    }
}

fn downloader(root: &Path, client: MockClient) -> Downloader<MockClient> {
    let config = DownloadConfig::new("https://coord.example", root)
        .credentials(Credentials::new("AK", "SK"))
        .retry_backoff(Duration::from_millis(1));
    Downloader::with_client(config, client).disk_probe(Arc::new(FixedDisk(u64::MAX / 4)))
}

fn collect_events() -> (ProgressCallback, Arc<Mutex<Vec<DetailedProgress>>>) {
    let events: Arc<Mutex<Vec<DetailedProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: ProgressCallback = Arc::new(move |p: &DetailedProgress| {
        sink.lock().unwrap().push(p.clone());
    });
    (callback, events)
}

fn chunk_files(root: &Path) -> Vec<String> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains("_chunk_"))
        .collect()
}

fn seed_journal(
    root: &Path,
    model_id: &str,
    whole_hash: &str,
    chunks: &[(String, Vec<u8>)],
    validated: &[u32],
) {
    let layout = StorageLayout::new(root);
    for &index in validated {
        std::fs::write(
            layout.chunk_path(model_id, index),
            &chunks[index as usize].1,
        )
        .unwrap();
    }
    let journal = Journal {
        model_id: model_id.to_string(),
        whole_hash: whole_hash.to_string(),
        file_ext: "bin".to_string(),
        total_chunks: chunks.len() as u32,
        chunk_hashes: chunks
            .iter()
            .enumerate()
            .map(|(i, (_, bytes))| (i as u32, sha256_hex(bytes)))
            .collect(),
        validated_chunks: validated.iter().copied().collect(),
        model_name: format!("{model_id} name"),
        version: "1.0".to_string(),
        description: None,
        category: None,
        last_updated: OffsetDateTime::UNIX_EPOCH,
    };
    JournalStore::new(layout).save(&journal).unwrap();
}

#[tokio::test]
async fn cold_download_three_chunks() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, whole_hash) = manifest_json("m1", "bin", &chunks);
    let client = MockClient::new(manifest);
    script_bodies(&client, &chunks);

    let dl = downloader(dir.path(), client.clone());
    let (callback, events) = collect_events();
    let outcome = dl.download("m1", Some(callback)).await.unwrap();

    assert_eq!(outcome.artifact_path, dir.path().join("m1"));
    assert_eq!(outcome.metadata_path, dir.path().join("m1_metadata"));
    assert_eq!(
        std::fs::metadata(&outcome.artifact_path).unwrap().len(),
        2999
    );
    assert_eq!(sha256_file(&outcome.artifact_path).unwrap(), whole_hash);
    assert!(outcome.metadata_path.exists());
    assert!(!dir.path().join("m1_progress").exists());
    assert!(chunk_files(dir.path()).is_empty());
    assert_eq!(client.gets(), 3);

    let events = events.lock().unwrap();
    let phases: Vec<DownloadPhase> = events.iter().map(|e| e.phase).collect();
    assert_eq!(phases.first(), Some(&DownloadPhase::Initializing));
    let order = [
        DownloadPhase::Initializing,
        DownloadPhase::Downloading,
        DownloadPhase::Merging,
        DownloadPhase::Validating,
        DownloadPhase::Complete,
    ];
    let mut cursor = 0;
    for phase in &phases {
        if cursor < order.len() && *phase == order[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(cursor, order.len(), "phases out of order: {phases:?}");
    let last = events.last().unwrap();
    assert_eq!(last.phase, DownloadPhase::Complete);
    assert_eq!(last.percentage, 100.0);
    assert_eq!(last.total_chunks, 3);
}

#[tokio::test]
async fn second_download_uses_catalog_without_network() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, _) = manifest_json("m1", "bin", &chunks);
    let client = MockClient::new(manifest);
    script_bodies(&client, &chunks);

    let dl = downloader(dir.path(), client.clone());
    let first = dl.download("m1", None).await.unwrap();
    let (posts, gets) = (client.posts(), client.gets());

    let second = dl.download("m1", None).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(client.posts(), posts, "second call hit the network");
    assert_eq!(client.gets(), gets);
}

#[tokio::test]
async fn resume_after_partial_progress() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, whole_hash) = manifest_json("m1", "bin", &chunks);
    seed_journal(dir.path(), "m1", &whole_hash, &chunks, &[0, 1]);

    let client = MockClient::new(manifest);
    // only the missing chunk may be requested
    client.script(&chunks[2].0, vec![Reply::Body(chunks[2].1.clone())]);
    let dl = downloader(dir.path(), client.clone());

    let status = dl.status("m1").unwrap();
    assert!(status.has_progress);
    assert_eq!(status.existing_chunks, vec![0, 1]);
    assert_eq!(status.missing_chunks, vec![2]);

    let outcome = dl.download("m1", None).await.unwrap();
    assert_eq!(client.gets(), 1);
    assert_eq!(sha256_file(&outcome.artifact_path).unwrap(), whole_hash);
    assert!(!dir.path().join("m1_progress").exists());
    assert!(chunk_files(dir.path()).is_empty());
}

#[tokio::test]
async fn manifest_rotation_purges_prior_chunks() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, whole_hash) = manifest_json("m1", "bin", &chunks);

    // progress made under an older manifest with a different whole hash
    let old_chunks = vec![
        ("https://cdn.example/old0".to_string(), vec![b'z'; 500]),
        ("https://cdn.example/old1".to_string(), vec![b'y'; 500]),
        ("https://cdn.example/old2".to_string(), vec![b'x'; 500]),
    ];
    let (_, old_whole) = manifest_json("m1", "bin", &old_chunks);
    seed_journal(dir.path(), "m1", &old_whole, &old_chunks, &[0]);

    let client = MockClient::new(manifest);
    script_bodies(&client, &chunks);
    let dl = downloader(dir.path(), client.clone());

    let outcome = dl.download("m1", None).await.unwrap();
    assert_eq!(sha256_file(&outcome.artifact_path).unwrap(), whole_hash);
    // every chunk of the new manifest was fetched
    assert_eq!(client.gets(), 3);
}

#[tokio::test]
async fn corrupt_chunk_is_refetched_once() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, whole_hash) = manifest_json("m1", "bin", &chunks);
    let client = MockClient::new(manifest);
    client.script(&chunks[0].0, vec![Reply::Body(chunks[0].1.clone())]);
    // wrong bytes on the first attempt, correct on the second
    client.script(
        &chunks[1].0,
        vec![
            Reply::Body(vec![b'!'; 1000]),
            Reply::Body(chunks[1].1.clone()),
        ],
    );
    client.script(&chunks[2].0, vec![Reply::Body(chunks[2].1.clone())]);

    let dl = downloader(dir.path(), client.clone());
    let outcome = dl.download("m1", None).await.unwrap();

    assert_eq!(sha256_file(&outcome.artifact_path).unwrap(), whole_hash);
    assert_eq!(client.gets(), 4, "expected exactly one retry");
}

#[tokio::test]
async fn unrecoverable_status_fails_without_retry() {
    let dir = TempDir::new().unwrap();
    let chunks = vec![("https://cdn.example/only".to_string(), vec![b'a'; 100])];
    let (manifest, _) = manifest_json("m1", "bin", &chunks);
    let client = MockClient::new(manifest);
    client.script(&chunks[0].0, vec![Reply::Status(403)]);

    let dl = downloader(dir.path(), client.clone());
    let error = dl.download("m1", None).await.unwrap_err();
    assert!(matches!(error, DownloadError::ServerStatus { status: 403 }));
    assert_eq!(client.gets(), 1, "4xx must not be retried");
    // the journal survives a failed run for a later resume
    assert!(dir.path().join("m1_progress").exists());
}

#[tokio::test]
async fn disk_guard_blocks_before_fetching() {
    let dir = TempDir::new().unwrap();
    let chunks: Vec<(String, Vec<u8>)> = (0..10)
        .map(|i| (format!("https://cdn.example/g{i}"), vec![b'd'; 1000]))
        .collect();
    let (manifest, whole_hash) = manifest_json("m1", "bin", &chunks);
    // one validated chunk on disk puts the estimate at 10_000 bytes
    seed_journal(dir.path(), "m1", &whole_hash, &chunks, &[0]);

    let client = MockClient::new(manifest);
    let config = DownloadConfig::new("https://coord.example", dir.path())
        .credentials(Credentials::new("AK", "SK"))
        .retry_backoff(Duration::from_millis(1));
    let dl = Downloader::with_client(config, client.clone())
        .disk_probe(Arc::new(FixedDisk(15_000)));

    let error = dl.download("m1", None).await.unwrap_err();
    match error {
        DownloadError::InsufficientDiskSpace {
            required,
            available,
        } => {
            assert_eq!(required, 20_000);
            assert_eq!(available, 15_000);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.gets(), 0, "no chunk may be fetched");
}

#[tokio::test]
async fn cancellation_purges_journal_and_chunks() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, _) = manifest_json("m1", "bin", &chunks);
    let client = MockClient::new(manifest);
    for (url, _) in &chunks {
        client.script(url, vec![Reply::Hang]);
    }

    let dl = Arc::new(downloader(dir.path(), client));
    let task = {
        let dl = dl.clone();
        tokio::spawn(async move { dl.download("m1", None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    dl.cancel("m1").unwrap();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert!(!dir.path().join("m1_progress").exists());
    assert!(chunk_files(dir.path()).is_empty());
}

#[tokio::test]
async fn concurrent_download_same_id_is_busy() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, _) = manifest_json("m1", "bin", &chunks);
    let client = MockClient::new(manifest);
    for (url, _) in &chunks {
        client.script(url, vec![Reply::Hang]);
    }

    let dl = Arc::new(downloader(dir.path(), client));
    let task = {
        let dl = dl.clone();
        tokio::spawn(async move { dl.download("m1", None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = dl.download("m1", None).await;
    assert!(matches!(second, Err(DownloadError::Busy(_))));

    dl.cancel("m1").unwrap();
    let _ = task.await.unwrap();
}

#[tokio::test]
async fn cancel_unknown_id_is_noop() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, _) = manifest_json("m1", "bin", &chunks);
    let dl = downloader(dir.path(), MockClient::new(manifest));
    dl.cancel("never-started").unwrap();
    dl.cancel("never-started").unwrap();
}

#[tokio::test]
async fn single_chunk_model_passes_all_phases() {
    let dir = TempDir::new().unwrap();
    let chunks = vec![("https://cdn.example/solo".to_string(), vec![b's'; 64])];
    let (manifest, whole_hash) = manifest_json("m1", "bin", &chunks);
    let client = MockClient::new(manifest);
    script_bodies(&client, &chunks);

    let dl = downloader(dir.path(), client);
    let (callback, events) = collect_events();
    let outcome = dl.download("m1", Some(callback)).await.unwrap();

    assert_eq!(sha256_file(&outcome.artifact_path).unwrap(), whole_hash);
    let phases: BTreeSet<String> = events
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.phase.to_string())
        .collect();
    for required in ["downloading", "merging", "validating", "complete"] {
        assert!(phases.contains(required), "missing phase {required}");
    }
}

#[tokio::test]
async fn whole_hash_mismatch_removes_artifact() {
    let dir = TempDir::new().unwrap();
    let chunks = vec![
        ("https://cdn.example/w0".to_string(), vec![b's'; 64]),
        ("https://cdn.example/w1".to_string(), vec![b't'; 64]),
    ];
    let (manifest, whole_hash) = manifest_json("m1", "bin", &chunks);
    // corrupt only the composite hash; per-chunk hashes stay valid
    let manifest = manifest.replace(&whole_hash, &"0".repeat(64));
    let client = MockClient::new(manifest);
    script_bodies(&client, &chunks);

    let dl = downloader(dir.path(), client);
    let error = dl.download("m1", None).await.unwrap_err();
    assert!(matches!(error, DownloadError::WholeHashMismatch { .. }));
    assert!(!dir.path().join("m1").exists());
    assert!(!dir.path().join("m1_metadata").exists());
}

#[tokio::test]
async fn missing_credentials_fail_fast() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, _) = manifest_json("m1", "bin", &chunks);
    let config = DownloadConfig::new("https://coord.example", dir.path());
    let dl = Downloader::with_client(config, MockClient::new(manifest));

    let error = dl.download("m1", None).await.unwrap_err();
    assert!(matches!(error, DownloadError::MissingCredentials));
}

#[tokio::test]
async fn invalid_model_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let chunks = three_chunks();
    let (manifest, _) = manifest_json("m1", "bin", &chunks);
    let dl = downloader(dir.path(), MockClient::new(manifest));

    let error = dl.download("../escape", None).await.unwrap_err();
    assert!(matches!(error, DownloadError::Store(_)));
}

/// Compiles the generic artifact into a directory, the way a native
/// inference toolchain would.
struct DirCompiler;

impl PostProcess for DirCompiler {
    fn transform(
        &self,
        source: &Path,
        model_id: &str,
    ) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
        let parent = source.parent().ok_or("no parent")?;
        let dest = parent.join(format!("{model_id}.mlmodelc"));
        std::fs::create_dir_all(&dest)?;
        std::fs::rename(source, dest.join("model.bin"))?;
        Ok(dest)
    }
}

struct FailingCompiler;

impl PostProcess for FailingCompiler {
    fn transform(
        &self,
        _source: &Path,
        _model_id: &str,
    ) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
        Err("toolchain exploded".into())
    }
}

#[tokio::test]
async fn native_artifact_is_post_processed() {
    let dir = TempDir::new().unwrap();
    let chunks = vec![("https://cdn.example/n0".to_string(), vec![b'n'; 256])];
    let (manifest, _) = manifest_json("m1", "mlmodel", &chunks);
    let client = MockClient::new(manifest);
    script_bodies(&client, &chunks);

    let dl = downloader(dir.path(), client).post_process(Arc::new(DirCompiler));
    let (callback, events) = collect_events();
    let outcome = dl.download("m1", Some(callback)).await.unwrap();

    assert_eq!(outcome.artifact_path, dir.path().join("m1.mlmodelc"));
    assert!(outcome.artifact_path.is_dir());
    assert!(
        !dir.path().join("m1").exists(),
        "generic source must be gone"
    );
    assert!(dir.path().join("m1_metadata").exists());

    let phases: Vec<DownloadPhase> = events.lock().unwrap().iter().map(|e| e.phase).collect();
    assert!(phases.contains(&DownloadPhase::Compiling));

    // the catalog resolves the native directory
    let exists = dl.exists("m1").unwrap();
    assert_eq!(exists.artifact_path, Some(dir.path().join("m1.mlmodelc")));
}

#[tokio::test]
async fn failed_post_processing_keeps_artifact_and_journal() {
    let dir = TempDir::new().unwrap();
    let chunks = vec![("https://cdn.example/n0".to_string(), vec![b'n'; 256])];
    let (manifest, _) = manifest_json("m1", "mlmodel", &chunks);
    let client = MockClient::new(manifest);
    script_bodies(&client, &chunks);

    let dl = downloader(dir.path(), client).post_process(Arc::new(FailingCompiler));
    let error = dl.download("m1", None).await.unwrap_err();

    assert!(matches!(error, DownloadError::PostProcessFailed(_)));
    // left in place for inspection; without metadata the catalog does not
    // list it
    assert!(dir.path().join("m1").exists());
    assert!(dir.path().join("m1_progress").exists());
    assert!(!dir.path().join("m1_metadata").exists());
    assert!(!dl.exists("m1").unwrap().exists);
}

#[tokio::test]
async fn find_by_name_and_list_after_download() {
    let dir = TempDir::new().unwrap();
    let chunks = vec![("https://cdn.example/f0".to_string(), vec![b'f'; 128])];
    let (manifest, _) = manifest_json("m1", "bin", &chunks);
    let client = MockClient::new(manifest);
    script_bodies(&client, &chunks);

    let dl = downloader(dir.path(), client);
    dl.download("m1", None).await.unwrap();

    let by_name = dl.find_by_name("m1 name").unwrap();
    assert!(by_name.exists);
    assert_eq!(by_name.metadata.map(|m| m.model_id), Some("m1".to_string()));
    assert!(!dl.find_by_name("unknown").unwrap().exists);

    let listed = dl.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].model_id, "m1");
    assert_eq!(listed[0].size_bytes, 128);

    dl.delete("m1").unwrap();
    assert!(!dl.exists("m1").unwrap().exists);
}
