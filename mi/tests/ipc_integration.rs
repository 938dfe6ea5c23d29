//! Integration tests for the IPC service
//!
//! These tests run the service over real Unix domain sockets in temp dirs.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use modipc::VERSION;
use modipc::ipc::unix::UnixEndpoint;
use modipc::ipc::{
    EndpointName, IpcClient, IpcError, IpcService, RequestProcessor, ServiceConfig, ServiceHandle, ServiceState,
    SessionInfo, ShutdownMode,
};
use modipc::router::MessageRouter;
use tempfile::TempDir;

/// Records every request and answers with a fixed transform
#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<String>>,
}

impl Recorder {
    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestProcessor for Recorder {
    async fn process(&self, _session: &SessionInfo, request: &str) -> String {
        self.requests.lock().unwrap().push(request.to_string());
        format!(r#"{{"success":true,"reply":{}}}"#, serde_json::to_string(request).unwrap())
    }
}

/// Replies with the request length
struct Length;

#[async_trait]
impl RequestProcessor for Length {
    async fn process(&self, _session: &SessionInfo, request: &str) -> String {
        format!("len:{}", request.len())
    }
}

fn endpoint_name(temp: &TempDir) -> EndpointName {
    EndpointName::new(temp.path().join("host.sock").display().to_string())
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..500 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("socket {} never appeared", path.display());
}

async fn start(
    name: &EndpointName,
    processor: Arc<dyn RequestProcessor>,
    state: ServiceState,
    config: ServiceConfig,
) -> ServiceHandle {
    let handle = IpcService::start(UnixEndpoint::new(name.clone()), processor, state, config)
        .expect("Failed to start service");
    wait_for_socket(&name.socket_path()).await;
    handle
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// =============================================================================
// Exchange
// =============================================================================

#[tokio::test]
async fn test_ping_request_reaches_processor_verbatim() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let name = endpoint_name(&temp);
    let recorder = Arc::new(Recorder::default());
    let handle = start(&name, recorder.clone(), ServiceState::new(), ServiceConfig::default()).await;

    let reply = IpcClient::new(name).send_raw(br#"{"mod":"ping"}"#).await.unwrap();

    assert_eq!(recorder.requests(), vec![r#"{"mod":"ping"}"#.to_string()]);
    assert_eq!(reply, r#"{"success":true,"reply":"{\"mod\":\"ping\"}"}"#);

    handle.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_clients_all_get_replies() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let name = endpoint_name(&temp);
    let recorder = Arc::new(Recorder::default());
    let handle = start(&name, recorder.clone(), ServiceState::new(), ServiceConfig::default()).await;

    let mut clients = tokio::task::JoinSet::new();
    for i in 0..64 {
        let client = IpcClient::new(name.clone());
        clients.spawn(async move {
            let request = format!("client-{}", i);
            let reply = client.send_raw(request.as_bytes()).await.unwrap();
            (request, reply)
        });
    }

    let mut replies = 0;
    while let Some(result) = clients.join_next().await {
        let (request, reply) = result.unwrap();
        assert!(reply.contains(&request), "reply {} does not belong to {}", reply, request);
        replies += 1;
    }

    assert_eq!(replies, 64);
    assert_eq!(recorder.requests().len(), 64);
    handle.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn test_simultaneous_clients_are_not_conflated() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let name = endpoint_name(&temp);
    let handle = start(&name, Arc::new(Recorder::default()), ServiceState::new(), ServiceConfig::default()).await;

    let a = IpcClient::new(name.clone());
    let b = IpcClient::new(name.clone());
    let (reply_a, reply_b) = tokio::join!(a.send_raw(b"first"), b.send_raw(b"second"));

    assert_eq!(reply_a.unwrap(), r#"{"success":true,"reply":"first"}"#);
    assert_eq!(reply_b.unwrap(), r#"{"success":true,"reply":"second"}"#);

    let stats = handle.state().stats();
    wait_until(|| stats.connected() == 2 && stats.open() == 1).await;
    handle.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn test_same_request_twice_is_processed_twice() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let name = endpoint_name(&temp);
    let recorder = Arc::new(Recorder::default());
    let handle = start(&name, recorder.clone(), ServiceState::new(), ServiceConfig::default()).await;

    let client = IpcClient::new(name);
    let first = client.send_raw(b"same").await.unwrap();
    let second = client.send_raw(b"same").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(recorder.requests(), vec!["same".to_string(), "same".to_string()]);
    handle.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn test_oversized_request_is_truncated() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let name = endpoint_name(&temp);
    let config = ServiceConfig {
        buffer_size: 64,
        ..ServiceConfig::default()
    };
    let handle = start(&name, Arc::new(Length), ServiceState::new(), config).await;

    let reply = IpcClient::new(name).send_raw(&[b'a'; 200]).await.unwrap();
    assert_eq!(reply, "len:63");

    handle.shutdown(ShutdownMode::Drain).await.unwrap();
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_connect_disconnect_churn_leaks_nothing() {
    const CYCLES: u64 = 2_000;

    let temp = TempDir::new().expect("Failed to create temp dir");
    let name = endpoint_name(&temp);
    let recorder = Arc::new(Recorder::default());
    let handle = start(&name, recorder.clone(), ServiceState::new(), ServiceConfig::default()).await;
    let socket_path = name.socket_path();

    for _ in 0..CYCLES {
        let stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        drop(stream);
    }

    let stats = handle.state().stats();
    wait_until(|| stats.connected() == CYCLES && stats.open() == 1).await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.closed, snapshot.created - 1);
    assert_eq!(snapshot.listening, 1);
    assert!(recorder.requests().is_empty());

    // still serving after the churn
    let reply = IpcClient::new(name).send_raw(b"after").await.unwrap();
    assert_eq!(reply, r#"{"success":true,"reply":"after"}"#);

    handle.shutdown(ShutdownMode::Drain).await.unwrap();
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn test_creation_failure_marks_service_down() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let blocker = temp.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();
    let name = EndpointName::new(blocker.join("host.sock").display().to_string());

    let state = ServiceState::new();
    let mut handle = IpcService::start(
        UnixEndpoint::new(name),
        Arc::new(Recorder::default()),
        state.clone(),
        ServiceConfig::default(),
    )
    .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
    assert!(matches!(result, Err(IpcError::EndpointCreate { .. })));
    assert!(!state.is_alive());
    assert_eq!(state.lifecycle().created, 0);

    // the host runtime keeps working
    let value = tokio::spawn(async { 40 + 2 }).await.unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let name = endpoint_name(&temp);
    let handle = start(&name, Arc::new(Length), ServiceState::new(), ServiceConfig::default()).await;

    let path: PathBuf = name.socket_path();
    assert!(path.exists());

    handle.shutdown(ShutdownMode::Drain).await.unwrap();
    assert!(!path.exists());
    assert!(IpcClient::new(name).send_raw(b"late").await.is_err());
}

// =============================================================================
// Router
// =============================================================================

#[tokio::test]
async fn test_router_ping_and_status() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let name = endpoint_name(&temp);
    let state = ServiceState::new();
    let router = Arc::new(MessageRouter::with_builtins(state.clone()));
    let handle = start(&name, router, state, ServiceConfig::default()).await;

    let client = IpcClient::new(name);
    assert_eq!(client.ping().await.unwrap(), VERSION);

    let status = client.status().await.unwrap();
    assert_eq!(status["alive"], serde_json::json!(true));
    assert!(status["lifecycle"]["connected"].as_u64().unwrap() >= 1);

    let reply = client.send("nope", "hello", serde_json::Value::Null).await.unwrap();
    assert!(!reply.success);
    assert_eq!(reply.error.as_deref(), Some("Unknown mod 'nope'"));

    handle.shutdown(ShutdownMode::Drain).await.unwrap();
}
