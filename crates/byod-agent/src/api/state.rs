//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::AuthCache;
use crate::automation::ProcessManager;
use crate::context::AgentContext;
use crate::paths::AgentPaths;
use crate::supervisor::TaskSupervisor;
use crate::tools::DeviceTools;

use super::proxy::HttpClient;
use super::session::SessionRouter;

#[derive(Clone)]
pub struct AppState {
    pub processes: ProcessManager,
    pub devices: Arc<DeviceTools>,
    pub auth: Arc<AuthCache>,
    pub sessions: Arc<SessionRouter>,
    pub supervisor: TaskSupervisor,
    pub paths: Arc<AgentPaths>,
    /// Client for app downloads.
    pub http: reqwest::Client,
    /// Client for proxied traffic.
    pub http_client: HttpClient,
    /// WebDriver base path without a trailing slash, e.g. `/wd/hub`.
    pub base_path: String,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn from_context(ctx: &AgentContext) -> Self {
        Self {
            processes: ctx.processes.clone(),
            devices: Arc::clone(&ctx.devices),
            auth: Arc::clone(&ctx.auth),
            sessions: Arc::clone(&ctx.sessions),
            supervisor: ctx.supervisor.clone(),
            paths: Arc::new(ctx.paths.clone()),
            http: ctx.http.clone(),
            http_client: ctx.http_client.clone(),
            base_path: ctx.config.server.base_path.trim_end_matches('/').to_string(),
            max_body_bytes: ctx.config.server.max_body_bytes,
        }
    }
}
