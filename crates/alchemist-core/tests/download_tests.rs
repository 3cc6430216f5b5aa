//! Download manager tests against a local HTTP server.

use alchemist_core::download::{part_path, ProgressSink};
use alchemist_core::{
    BroadcastSink, DownloadManager, ProgressEvent, ResolvedArtifact, ResourceReference,
    ResourceType, TaskRegistry, TransferState,
};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const BODY: &[u8] = b"pretend these are model weights";

#[derive(Clone, Default)]
struct Hits {
    first: Arc<AtomicUsize>,
    second: Arc<AtomicUsize>,
}

async fn first(State(hits): State<Hits>) -> impl IntoResponse {
    hits.first.fetch_add(1, Ordering::SeqCst);
    BODY
}

async fn second(State(hits): State<Hits>) -> impl IntoResponse {
    hits.second.fetch_add(1, Ordering::SeqCst);
    BODY
}

async fn renamed() -> impl IntoResponse {
    (
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"served-name.safetensors\"",
        )],
        BODY,
    )
}

async fn guarded(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
    if query.get("token").map(String::as_str) == Some("secret") {
        (StatusCode::OK, BODY).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

/// Twenty 1 KiB chunks, one every 100 ms.
async fn slow() -> impl IntoResponse {
    let chunks = futures::stream::iter(0..20).then(|_| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, std::io::Error>(vec![7u8; 1024])
    });
    axum::body::Body::from_stream(chunks)
}

async fn spawn_server(hits: Hits) -> String {
    let router = Router::new()
        .route("/files/first", get(first))
        .route("/files/second", get(second))
        .route("/files/renamed", get(renamed))
        .route("/files/guarded", get(guarded))
        .route("/files/slow", get(slow))
        .with_state(hits);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn body_sha256() -> String {
    hex::encode(Sha256::digest(BODY))
}

fn artifact(dir: &Path, url: String, filename: &str, sha256: Option<String>) -> ResolvedArtifact {
    let mut a = ResolvedArtifact::unresolved(
        ResourceReference::new(filename, ResourceType::Lora, None, None, Some(1)),
        "",
    );
    a.resolved = true;
    a.error = None;
    a.filename = Some(filename.to_string());
    a.download_url = Some(url);
    a.target_path = Some(dir.join("loras").join(filename));
    a.sha256 = sha256;
    a
}

fn files_under(dir: &Path) -> Vec<String> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().display().to_string())
        .collect()
}

fn part_files(dir: &Path) -> Vec<String> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".part"))
        .collect()
}

#[tokio::test]
async fn test_verified_download_lands_at_final_name() {
    let temp = TempDir::new().unwrap();
    let base = spawn_server(Hits::default()).await;
    let manager = DownloadManager::new(None).unwrap();

    // Uppercase expected digest: comparison ignores case.
    let expected = body_sha256().to_ascii_uppercase();
    let a = artifact(temp.path(), format!("{}/files/first", base), "a.safetensors", Some(expected));

    let outcomes = manager.download_batch(vec![a], None).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, TransferState::Completed, "{:?}", outcomes[0].error);
    assert!(outcomes[0].artifact.already_present);

    let target = temp.path().join("loras/a.safetensors");
    assert_eq!(std::fs::read(&target).unwrap(), BODY);
    assert!(!part_path(&target).exists());
    assert!(manager.active_tasks().is_empty());
}

#[tokio::test]
async fn test_checksum_mismatch_discards_partial_file() {
    let temp = TempDir::new().unwrap();
    let base = spawn_server(Hits::default()).await;
    let manager = DownloadManager::new(None).unwrap();

    let a = artifact(
        temp.path(),
        format!("{}/files/first", base),
        "bad.safetensors",
        Some("00".repeat(32)),
    );
    let outcomes = manager.download_batch(vec![a], None).await.unwrap();

    assert_eq!(outcomes[0].status, TransferState::Failed);
    assert!(outcomes[0].error.as_deref().unwrap().contains("checksum"));
    assert!(!temp.path().join("loras/bad.safetensors").exists());
    assert!(part_files(temp.path()).is_empty());
}

#[tokio::test]
async fn test_checksum_mismatch_keeps_existing_final_file_untouched() {
    let temp = TempDir::new().unwrap();
    let base = spawn_server(Hits::default()).await;
    let manager = DownloadManager::new(None).unwrap();

    let mut a = artifact(
        temp.path(),
        format!("{}/files/renamed", base),
        "original.safetensors",
        Some("ff".repeat(32)),
    );
    a.already_present = false;
    let served = temp.path().join("loras/served-name.safetensors");
    std::fs::create_dir_all(served.parent().unwrap()).unwrap();
    std::fs::write(&served, b"previous").unwrap();

    // The target on disk is the pre-rename name, so the transfer runs.
    let outcomes = manager.download_batch(vec![a], None).await.unwrap();
    assert_eq!(outcomes[0].status, TransferState::Failed);
    assert_eq!(std::fs::read(&served).unwrap(), b"previous");
    assert!(part_files(temp.path()).is_empty());
}

#[tokio::test]
async fn test_content_disposition_renames_target() {
    let temp = TempDir::new().unwrap();
    let base = spawn_server(Hits::default()).await;
    let manager = DownloadManager::new(None).unwrap();

    let a = artifact(temp.path(), format!("{}/files/renamed", base), "guess.safetensors", None);
    let outcomes = manager.download_batch(vec![a], None).await.unwrap();

    let done = &outcomes[0];
    assert_eq!(done.status, TransferState::Completed);
    assert_eq!(done.artifact.filename.as_deref(), Some("served-name.safetensors"));
    assert_eq!(
        done.artifact.target_path.as_deref(),
        Some(temp.path().join("loras/served-name.safetensors").as_path())
    );
    assert_eq!(done.artifact.sha256.as_deref(), Some(body_sha256().as_str()));
    assert!(!temp.path().join("loras/guess.safetensors").exists());
}

#[tokio::test]
async fn test_token_is_sent_as_query_parameter() {
    let temp = TempDir::new().unwrap();
    let base = spawn_server(Hits::default()).await;
    let manager = DownloadManager::new(Some("secret".into())).unwrap();

    let a = artifact(temp.path(), format!("{}/files/guarded", base), "g.safetensors", None);
    let ok = manager.download_batch(vec![a.clone()], None).await.unwrap();
    assert_eq!(ok[0].status, TransferState::Completed);

    std::fs::remove_file(temp.path().join("loras/g.safetensors")).unwrap();
    let rejected = manager.download_batch(vec![a], Some("wrong")).await.unwrap();
    assert_eq!(rejected[0].status, TransferState::Failed);
    assert!(rejected[0].error.as_deref().unwrap().contains("Unauthorized"));
}

#[tokio::test]
async fn test_present_artifacts_complete_without_network() {
    let temp = TempDir::new().unwrap();
    let hits = Hits::default();
    let base = spawn_server(hits.clone()).await;
    let manager = DownloadManager::new(None).unwrap();

    let a = artifact(temp.path(), format!("{}/files/first", base), "have.safetensors", None);
    let target = a.target_path.clone().unwrap();
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, b"local copy").unwrap();

    let outcomes = manager.download_batch(vec![a], None).await.unwrap();
    assert_eq!(outcomes[0].status, TransferState::Completed);
    assert!(outcomes[0].artifact.already_present);
    assert_eq!(hits.first.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read(&target).unwrap(), b"local copy");
}

/// Cancels the task as soon as its first artifact completes.
struct CancelAfterFirst {
    registry: TaskRegistry,
}

impl ProgressSink for CancelAfterFirst {
    fn emit(&self, event: ProgressEvent) {
        if event.status == TransferState::Completed {
            let _ = self.registry.cancel(&event.task_id);
        }
    }
}

#[tokio::test]
async fn test_cancel_between_batch_items() {
    let temp = TempDir::new().unwrap();
    let hits = Hits::default();
    let base = spawn_server(hits.clone()).await;
    let registry = TaskRegistry::new();
    let manager = DownloadManager::new(None)
        .unwrap()
        .with_registry(registry.clone())
        .with_sink(Arc::new(CancelAfterFirst { registry }));

    let batch = vec![
        artifact(temp.path(), format!("{}/files/first", base), "one.safetensors", None),
        artifact(temp.path(), format!("{}/files/second", base), "two.safetensors", None),
        artifact(temp.path(), format!("{}/files/second", base), "three.safetensors", None),
    ];
    let (task_id, handle) = manager.spawn_batch(batch, None).unwrap();
    let outcomes = handle.await.unwrap();

    let states: Vec<_> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        states,
        vec![
            TransferState::Completed,
            TransferState::Cancelled,
            TransferState::Cancelled
        ]
    );
    assert!(outcomes.iter().all(|o| o.task_id == task_id));
    assert_eq!(hits.second.load(Ordering::SeqCst), 0);
    assert!(temp.path().join("loras/one.safetensors").exists());
    assert!(part_files(temp.path()).is_empty());

    // Terminal tasks leave the registry.
    assert!(manager.cancel(&task_id).is_err());
}

#[tokio::test]
async fn test_background_task_reports_progress() {
    let temp = TempDir::new().unwrap();
    let base = spawn_server(Hits::default()).await;
    let sink = BroadcastSink::new(64);
    let mut rx = sink.subscribe();
    let manager = DownloadManager::new(None)
        .unwrap()
        .with_sink(Arc::new(sink));

    let a = artifact(temp.path(), format!("{}/files/first", base), "bg.safetensors", None);
    let task_id = manager.start_single(a, None).unwrap();

    let mut seen = Vec::new();
    let completed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.task_id, task_id);
            seen.push(event.status);
            if event.status.is_terminal() {
                return event;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(completed.status, TransferState::Completed);
    assert_eq!(completed.progress, 100.0);
    assert_eq!(seen.first(), Some(&TransferState::Downloading));
    assert!(seen.contains(&TransferState::Verifying));
}

#[tokio::test]
async fn test_cancel_mid_stream_leaves_no_files() {
    let temp = TempDir::new().unwrap();
    let base = spawn_server(Hits::default()).await;
    let manager = DownloadManager::new(None).unwrap();

    let a = artifact(temp.path(), format!("{}/files/slow", base), "slow.safetensors", None);
    let (task_id, handle) = manager.spawn_batch(vec![a], None).unwrap();

    tokio::time::sleep(Duration::from_millis(450)).await;
    manager.cancel(&task_id).unwrap();
    let outcomes = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcomes[0].status, TransferState::Cancelled);
    assert!(!outcomes[0].artifact.already_present);
    assert!(files_under(temp.path()).is_empty(), "{:?}", files_under(temp.path()));
    assert!(manager.active_tasks().is_empty());
}

#[tokio::test]
async fn test_failed_move_into_place_removes_part_file() {
    let temp = TempDir::new().unwrap();
    let base = spawn_server(Hits::default()).await;
    let manager = DownloadManager::new(None).unwrap();

    // A non-empty directory squats on the final name.
    let blocked = temp.path().join("loras/blocked.safetensors");
    std::fs::create_dir_all(&blocked).unwrap();
    std::fs::write(blocked.join("keep"), b"x").unwrap();

    let a = artifact(temp.path(), format!("{}/files/first", base), "blocked.safetensors", None);
    let outcomes = manager.download_batch(vec![a], None).await.unwrap();

    assert_eq!(outcomes[0].status, TransferState::Failed);
    assert!(outcomes[0].error.as_deref().unwrap().contains("move"));
    assert!(part_files(temp.path()).is_empty());
    assert!(blocked.join("keep").exists());
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn test_progress_is_throttled_from_the_first_event() {
    let temp = TempDir::new().unwrap();
    let base = spawn_server(Hits::default()).await;
    let sink = Arc::new(RecordingSink::default());
    let manager = DownloadManager::new(None)
        .unwrap()
        .with_sink(sink.clone());

    let a = artifact(temp.path(), format!("{}/files/first", base), "quick.safetensors", None);
    let outcomes = manager.download_batch(vec![a], None).await.unwrap();
    assert_eq!(outcomes[0].status, TransferState::Completed);

    let events = sink.events.lock().unwrap();
    let downloading: Vec<_> = events
        .iter()
        .filter(|e| e.status == TransferState::Downloading)
        .collect();
    assert_eq!(downloading.len(), 1);
    assert_eq!(downloading[0].downloaded_bytes, 0);
}
