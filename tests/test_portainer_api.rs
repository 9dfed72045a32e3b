// ABOUTME: Contract tests for the Portainer HTTP calls against a mock server
// Covers auth caching, container resolution, exec lifecycle and resize pushes

use portainer_shell::error::{ApiError, AuthError, ExecSpawnError, ResolutionError};
use portainer_shell::portainer::{
    Chooser, ContainerCandidate, ContainerId, ContainerResolver, Credentials,
    ExecInstanceId, ExecSessionManager, PortainerClient, TerminalDimensions,
};
use portainer_shell::terminal::{ResizeEvent, ResizeFailure, ResizeSignaler, SizeSource};
use serde_json::json;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONTAINERS: &str = "/api/endpoints/1/docker/containers/json";

fn client_for(server: &MockServer, credentials: Credentials) -> Arc<PortainerClient> {
    let api_url = format!("{}/api/", server.uri());
    Arc::new(PortainerClient::new(&api_url, 1, credentials, Duration::from_secs(5)).unwrap())
}

fn password() -> Credentials {
    Credentials::new("admin", "secret", "").unwrap()
}

fn api_key() -> Credentials {
    Credentials::new("", "", "ptr_key").unwrap()
}

// Chooser answering with a fixed index and counting how often it was asked
struct ScriptedChooser {
    answer: usize,
    calls: AtomicUsize,
}

impl ScriptedChooser {
    fn answering(answer: usize) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }
}

impl Chooser for ScriptedChooser {
    fn choose(&self, candidates: &[ContainerCandidate]) -> Result<usize, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(candidates.len() > 1);
        Ok(self.answer)
    }
}

struct FixedSize(TerminalDimensions);

impl SizeSource for FixedSize {
    fn size(&self) -> io::Result<TerminalDimensions> {
        Ok(self.0)
    }
}

async fn mount_containers(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(CONTAINERS))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_jwt_is_exchanged_once_and_reused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .and(body_json(json!({"username": "admin", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jwt": "t0k"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CONTAINERS))
        .and(header("Authorization", "Bearer t0k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, password());
    let resolver = ContainerResolver::new(Arc::clone(&client), ScriptedChooser::answering(0));
    assert!(resolver.list_running().await.unwrap().is_empty());
    assert!(resolver.list_running().await.unwrap().is_empty());

    let credential = client.credential().await.unwrap();
    assert_eq!(credential.query_token(), "t0k");
}

#[tokio::test]
async fn test_api_key_never_calls_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jwt": "unused"})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CONTAINERS))
        .and(header("X-API-Key", "ptr_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, api_key());
    assert!(client.uses_api_key());
    let resolver = ContainerResolver::new(Arc::clone(&client), ScriptedChooser::answering(0));
    resolver.list_running().await.unwrap();
    assert_eq!(client.credential().await.unwrap().query_token(), "");
}

#[tokio::test]
async fn test_rejected_credentials_surface_as_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(ResponseTemplate::new(422).set_body_string("Invalid credentials"))
        .mount(&server)
        .await;

    let client = client_for(&server, password());
    let resolver = ContainerResolver::new(client, ScriptedChooser::answering(0));
    match resolver.resolve("web").await {
        Err(ResolutionError::Api(ApiError::Auth(AuthError::Rejected { status, .. }))) => {
            assert_eq!(status, 422);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_resolve_not_found() {
    let server = MockServer::start().await;
    mount_containers(&server, json!([{"Id": "c1", "Names": ["/web"]}])).await;

    let chooser = ScriptedChooser::answering(0);
    let resolver = ContainerResolver::new(client_for(&server, api_key()), chooser.clone());
    let result = resolver.resolve("api*").await;

    assert!(matches!(result, Err(ResolutionError::NotFound { .. })));
    assert_eq!(chooser.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resolve_single_match_skips_chooser() {
    let server = MockServer::start().await;
    mount_containers(
        &server,
        json!([
            {"Id": "c1", "Names": ["/web"]},
            {"Id": "c2", "Names": ["/api-1"]}
        ]),
    )
    .await;

    let chooser = ScriptedChooser::answering(0);
    let resolver = ContainerResolver::new(client_for(&server, api_key()), chooser.clone());
    let found = resolver.resolve("api%").await.unwrap();

    assert_eq!(found.name, "/api-1");
    assert_eq!(found.id, ContainerId("c2".to_string()));
    assert_eq!(chooser.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resolve_multiple_matches_asks_chooser() {
    let server = MockServer::start().await;
    mount_containers(
        &server,
        json!([
            {"Id": "c1", "Names": ["/api-1"]},
            {"Id": "c2", "Names": ["/web"]},
            {"Id": "c3", "Names": ["/api-2"]}
        ]),
    )
    .await;

    let chooser = ScriptedChooser::answering(1);
    let resolver = ContainerResolver::new(client_for(&server, api_key()), chooser.clone());
    let found = resolver.resolve("api*").await.unwrap();

    assert_eq!(found.name, "/api-2");
    assert_eq!(found.id, ContainerId("c3".to_string()));
    assert_eq!(chooser.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_listing_failure_is_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONTAINERS))
        .respond_with(ResponseTemplate::new(500).set_body_string("docker down"))
        .mount(&server)
        .await;

    let resolver = ContainerResolver::new(client_for(&server, api_key()), ScriptedChooser::answering(0));
    match resolver.resolve("web").await {
        Err(ResolutionError::Api(ApiError::Status { status, body, .. })) => {
            assert_eq!(status, 500);
            assert_eq!(body, "docker down");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_spawn_sends_interactive_exec_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/endpoints/1/docker/containers/c1/exec"))
        .and(body_json(json!({
            "AttachStdin": true,
            "AttachStdout": true,
            "AttachStderr": true,
            "Cmd": ["sh", "-c", "echo hi"],
            "Tty": true,
            "id": "c1",
            "User": "root",
            "WorkingDir": "/srv"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"Id": "e1"})))
        .expect(1)
        .mount(&server)
        .await;

    let exec = ExecSessionManager::new(client_for(&server, api_key()));
    let command = vec!["sh".to_string(), "-c".to_string(), "echo hi".to_string()];
    let exec_id = exec
        .spawn(&ContainerId("c1".to_string()), &command, Some("root"), Some("/srv"))
        .await
        .unwrap();

    assert_eq!(exec_id, ExecInstanceId("e1".to_string()));
}

#[tokio::test]
async fn test_spawn_failure_names_container() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/endpoints/1/docker/containers/c1/exec"))
        .respond_with(ResponseTemplate::new(409).set_body_string("container is paused"))
        .mount(&server)
        .await;

    let exec = ExecSessionManager::new(client_for(&server, api_key()));
    let result = exec
        .spawn(&ContainerId("c1".to_string()), &["bash".to_string()], None, None)
        .await;

    match result {
        Err(ExecSpawnError::Create { container_id, .. }) => assert_eq!(container_id, "c1"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_exit_code_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/endpoints/1/docker/exec/e1/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ExitCode": 130.0})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/endpoints/1/docker/exec/e2/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ExitCode": null})))
        .mount(&server)
        .await;

    let exec = ExecSessionManager::new(client_for(&server, api_key()));
    assert_eq!(exec.exit_code(&ExecInstanceId("e1".to_string())).await.unwrap(), 130);
    assert!(matches!(
        exec.exit_code(&ExecInstanceId("e2".to_string())).await,
        Err(ExecSpawnError::MissingExitCode { .. })
    ));
}

#[tokio::test]
async fn test_resize_pushes_changed_and_triggered_sizes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/endpoints/1/docker/exec/e1/resize"))
        .and(query_param("h", "24"))
        .and(query_param("w", "80"))
        .and(body_json(json!({"Height": 24, "Width": 80, "id": "e1"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/endpoints/1/docker/exec/e1/resize"))
        .and(query_param("h", "50"))
        .and(query_param("w", "120"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let exec = ExecSessionManager::new(client_for(&server, api_key()));
    let source = Arc::new(FixedSize(TerminalDimensions {
        width: 80,
        height: 24,
    }));
    let signaler = ResizeSignaler::spawn(exec, ExecInstanceId("e1".to_string()), source);

    // Same as the startup size, so nothing is pushed for it
    signaler.send(ResizeEvent::Changed(TerminalDimensions {
        width: 80,
        height: 24,
    }));
    signaler.send(ResizeEvent::Changed(TerminalDimensions {
        width: 120,
        height: 50,
    }));
    signaler.trigger();

    let failures = signaler.finish().await;
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_resize_failures_are_reported_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/endpoints/1/docker/exec/e1/resize"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let exec = ExecSessionManager::new(client_for(&server, api_key()));
    let source = Arc::new(FixedSize(TerminalDimensions {
        width: 80,
        height: 24,
    }));
    let signaler = ResizeSignaler::spawn(exec, ExecInstanceId("e1".to_string()), source);
    signaler.trigger();
    signaler.trigger();

    let failures = signaler.finish().await;
    assert_eq!(failures.len(), 2);
    assert!(failures
        .iter()
        .all(|f| matches!(f, ResizeFailure::Push(ExecSpawnError::Resize { .. }))));
}
