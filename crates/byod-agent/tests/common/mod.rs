//! Test utilities and common setup.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Body, Bytes, to_bytes},
    extract::State,
    http::{Method, Request},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use byod_agent::api::{AppState, create_router};
use byod_agent::auth::{AccountsApi, AuthError};
use byod_agent::config::AgentConfig;
use byod_agent::context::{AgentContext, Remotes};
use byod_agent::db::Database;
use byod_agent::fleet::{FleetApi, FleetResult, TunnelIdentity};
use byod_agent::paths::AgentPaths;
use byod_protocol::{FleetSnapshot, Organization, UserDetails};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const OWNER_ORG: i64 = 42;
pub const SESSION_ID: &str = "s1";

pub fn basic_auth(user: &str, token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{token}")))
}

pub fn account(username: &str, org: i64) -> UserDetails {
    UserDetails {
        username: username.to_string(),
        org_id: org,
        organization: Organization {
            id: org,
            ..Organization::default()
        },
        ..UserDetails::default()
    }
}

/// Accepts any key except `wrong`. Bearer tokens starting with `other` belong
/// to another organization.
#[derive(Default)]
pub struct FakeAccounts {
    pub basic_calls: AtomicUsize,
    pub bearer_calls: AtomicUsize,
}

#[async_trait]
impl AccountsApi for FakeAccounts {
    async fn validate_basic(&self, username: &str, token: &str) -> Result<UserDetails, AuthError> {
        self.basic_calls.fetch_add(1, Ordering::SeqCst);
        if token == "wrong" {
            return Err(AuthError::InvalidCredentials(username.to_string()));
        }
        Ok(account(username, OWNER_ORG))
    }

    async fn validate_bearer(&self, authorization: &str) -> Result<UserDetails, AuthError> {
        self.bearer_calls.fetch_add(1, Ordering::SeqCst);
        if authorization.starts_with("Bearer other") {
            return Ok(account("stranger", OWNER_ORG + 1));
        }
        Ok(account("bearer-user", OWNER_ORG))
    }
}

#[derive(Default)]
pub struct RecordingFleet {
    pub snapshots: Mutex<Vec<FleetSnapshot>>,
}

#[async_trait]
impl FleetApi for RecordingFleet {
    async fn sync(&self, snapshot: &FleetSnapshot) -> FleetResult<()> {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

pub struct FixedTunnel;

#[async_trait]
impl TunnelIdentity for FixedTunnel {
    async fn identifier(&self) -> FleetResult<String> {
        Ok("tunnel-1".to_string())
    }
}

/// A request seen by the mock automation server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub body: Bytes,
}

/// Stands in for an automation server: new-session requests get session
/// `s1`, everything else gets `{"value":null}`.
#[derive(Clone, Default)]
pub struct MockBackend {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockBackend {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    async fn spawn(&self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = Router::new()
            .fallback(backend_handler)
            .with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }
}

async fn backend_handler(State(backend): State<MockBackend>, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap();
    backend.requests.lock().unwrap().push(Recorded {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        body,
    });
    if parts.method == Method::POST && parts.uri.path().ends_with("/session") {
        Json(json!({"value": {"sessionId": SESSION_ID, "capabilities": {}}})).into_response()
    } else {
        Json(json!({"value": null})).into_response()
    }
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const FAKE_ADB: &str = r#"case "$*" in
  *"pm list packages"*) echo "package:com.example.app" ;;
  *"dumpsys package"*) echo "    versionName=1.2.3" ;;
  *"uninstall com.missing"*) echo "Failure [DELETE_FAILED_INTERNAL_ERROR]" >&2; exit 1 ;;
esac
exit 0"#;

pub struct TestHarness {
    pub app: Router,
    pub ctx: Arc<AgentContext>,
    pub accounts: Arc<FakeAccounts>,
    pub fleet: Arc<RecordingFleet>,
    pub backend: MockBackend,
    pub backend_port: u16,
    pub dir: TempDir,
}

/// Build the full router around fakes. The first device leased gets the mock
/// backend's port.
pub async fn test_harness() -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();

    let backend = MockBackend::default();
    let backend_port = backend.spawn().await;

    let mut config = AgentConfig::default();
    config.paths.work_dir = dir.path().join("work").display().to_string();
    config.tools.adb = Some(write_script(&bin, "adb", FAKE_ADB).display().to_string());
    config.tools.go_ios = Some(write_script(&bin, "go-ios", "exit 1").display().to_string());
    config.tools.appium = write_script(&bin, "appium", "exec sleep 30")
        .display()
        .to_string();
    config.tools.lsof = write_script(&bin, "lsof", "exit 1").display().to_string();
    config.tools.command_timeout_secs = 5;
    config.automation.base_port = backend_port;
    config.automation.settle_delay_ms = 0;

    let paths = AgentPaths::new(&config.paths.work_dir);
    paths.ensure().unwrap();
    let db = Database::in_memory().await.unwrap();

    let accounts = Arc::new(FakeAccounts::default());
    let fleet = Arc::new(RecordingFleet::default());
    let remotes = Remotes {
        accounts: accounts.clone(),
        fleet: fleet.clone(),
        tunnel: Arc::new(FixedTunnel),
    };
    let ctx = Arc::new(
        AgentContext::new(config, paths, &db, account("owner", OWNER_ORG), remotes).unwrap(),
    );
    let app = create_router(AppState::from_context(&ctx));

    TestHarness {
        app,
        ctx,
        accounts,
        fleet,
        backend,
        backend_port,
        dir,
    }
}
