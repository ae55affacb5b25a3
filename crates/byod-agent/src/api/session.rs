//! WebDriver session routing.
//!
//! `POST <base>/session` starts (or reuses) the automation server of the
//! requested device and forwards the request to it. Every JSON response that
//! carries `value.sessionId` binds that id to the proxy that produced it, so
//! later `<base>/session/<id>/...` commands go straight to the same backend.
//! Unknown ids are answered locally and never reach a backend.

use std::sync::Arc;

use axum::{
    Json,
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use byod_protocol::{NewSessionPayload, TestInfo, session_id_from_body};
use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::error::{ApiError, ApiResult};
use super::proxy::{ProxyCache, ReverseProxy};
use super::state::AppState;

/// Session id plus whatever follows it.
static SESSION_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/session/([^/]+)(/.*)?$").expect("Invalid regex pattern for session path")
});

/// Session id addressed by `path`, if any.
pub fn session_id_from_path(path: &str) -> Option<&str> {
    SESSION_PATH
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Whether `path` is `.../session/<id>` with nothing after the id.
fn is_bare_session_path(path: &str) -> bool {
    SESSION_PATH
        .captures(path)
        .is_some_and(|caps| caps.get(2).is_none_or(|rest| rest.as_str() == "/"))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}

/// Response for ids that were never bound or were deleted.
pub fn invalid_session() -> Response {
    (StatusCode::OK, Json(json!({"status": "invalid session"}))).into_response()
}

/// Where a session's commands go.
#[derive(Debug, Clone)]
pub struct SessionRoute {
    pub proxy: Arc<ReverseProxy>,
    pub udid: String,
}

/// Session id index plus the per-backend proxy cache.
#[derive(Debug)]
pub struct SessionRouter {
    routes: DashMap<String, SessionRoute>,
    proxies: ProxyCache,
}

impl SessionRouter {
    pub fn new(proxies: ProxyCache) -> Self {
        Self {
            routes: DashMap::new(),
            proxies,
        }
    }

    pub fn proxies(&self) -> &ProxyCache {
        &self.proxies
    }

    /// Bind `session_id` unless it is already bound. The first binding wins.
    pub fn bind(&self, session_id: &str, proxy: &Arc<ReverseProxy>, udid: &str) -> bool {
        let mut inserted = false;
        self.routes.entry(session_id.to_string()).or_insert_with(|| {
            inserted = true;
            SessionRoute {
                proxy: Arc::clone(proxy),
                udid: udid.to_string(),
            }
        });
        if inserted {
            info!("Session {} bound to {} ({})", session_id, proxy.target(), udid);
        }
        inserted
    }

    pub fn route(&self, session_id: &str) -> Option<SessionRoute> {
        self.routes.get(session_id).map(|r| r.value().clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionRoute> {
        self.routes.remove(session_id).map(|(_, route)| route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Bind any session id found in a JSON response, then replay the body
    /// byte for byte.
    pub async fn intercept(
        &self,
        response: Response,
        proxy: &Arc<ReverseProxy>,
        udid: &str,
    ) -> ApiResult<Response> {
        if !is_json(response.headers()) {
            return Ok(response);
        }
        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ApiError::bad_gateway(format!("failed to read backend response: {e}")))?;
        if let Some(session_id) = session_id_from_body(&bytes) {
            self.bind(&session_id, proxy, udid);
        }
        Ok(Response::from_parts(parts, Body::from(bytes)))
    }
}

async fn read_body(body: Body, limit: usize) -> ApiResult<Bytes> {
    to_bytes(body, limit)
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to read request body: {e}")))
}

/// `POST <base>/session`
pub async fn create_session(
    State(state): State<AppState>,
    req: Request<Body>,
) -> ApiResult<Response> {
    let (parts, body) = req.into_parts();
    let body = read_body(body, state.max_body_bytes).await?;
    let info: TestInfo = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid session request: {e}")))?;
    if info.udid.is_empty() {
        return Err(ApiError::bad_request("udid must be set"));
    }
    info!("New session on {} (test {})", info.udid, info.test_id);

    if let Some(platform) = info.platform()
        && !info.app_package.is_empty()
    {
        let devices = Arc::clone(&state.devices);
        let udid = info.udid.clone();
        let package = info.app_package.clone();
        state.supervisor.spawn_once("app-launch", async move {
            if let Err(e) = devices.launch_app(platform, &udid, &package).await {
                debug!("Launching {} on {} failed: {:#}", package, udid, e);
            }
            Ok(())
        });
    }

    if !info.test_id.is_empty() {
        let placeholder = state.paths.test_placeholder(&info.test_id);
        if let Err(e) = tokio::fs::write(&placeholder, b"").await {
            warn!("Failed to create {}: {}", placeholder.display(), e);
        }
    }

    let port = state
        .processes
        .start(&info.udid, &info.test_id)
        .await
        .map_err(|e| {
            ApiError::service_unavailable(format!(
                "automation server for {} unavailable: {e:#}",
                info.udid
            ))
        })?;
    let proxy = state.sessions.proxies().for_port(port)?;

    let body = if info.is_manual() {
        let payload = NewSessionPayload::manual(&info);
        Bytes::from(
            serde_json::to_vec(&payload)
                .map_err(|e| ApiError::internal(format!("encoding session payload: {e}")))?,
        )
    } else {
        body
    };

    let response = proxy.forward(&parts, body).await?;
    state.sessions.intercept(response, &proxy, &info.udid).await
}

/// Any request under `<base>/session/<id>`.
pub async fn forward_session(
    State(state): State<AppState>,
    req: Request<Body>,
) -> ApiResult<Response> {
    let path = req.uri().path().to_string();
    let Some(session_id) = session_id_from_path(&path) else {
        return Ok(invalid_session());
    };
    let Some(route) = state.sessions.route(session_id) else {
        debug!("Unknown session {}", session_id);
        return Ok(invalid_session());
    };

    let (parts, body) = req.into_parts();
    let teardown = parts.method == Method::DELETE && is_bare_session_path(&path);
    let body = if teardown {
        Bytes::new()
    } else {
        read_body(body, state.max_body_bytes).await?
    };

    let response = route.proxy.forward(&parts, body).await?;
    let response = state
        .sessions
        .intercept(response, &route.proxy, &route.udid)
        .await?;

    if teardown {
        state.sessions.remove(session_id);
        info!("Session {} deleted, stopping {}", session_id, route.udid);
        let processes = state.processes.clone();
        let udid = route.udid.clone();
        state.supervisor.spawn_once("automation-stop", async move {
            processes.stop(&udid).await;
            Ok(())
        });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::proxy::http_client;

    #[test]
    fn test_session_id_from_path() {
        assert_eq!(session_id_from_path("/wd/hub/session/abc"), Some("abc"));
        assert_eq!(
            session_id_from_path("/wd/hub/session/abc/element/5/click"),
            Some("abc")
        );
        assert_eq!(session_id_from_path("/wd/hub/session"), None);
        assert_eq!(session_id_from_path("/wd/hub/status"), None);
    }

    #[test]
    fn test_bare_session_path() {
        assert!(is_bare_session_path("/wd/hub/session/abc"));
        assert!(is_bare_session_path("/wd/hub/session/abc/"));
        assert!(!is_bare_session_path("/wd/hub/session/abc/window"));
    }

    #[test]
    fn test_json_detection_uses_essence() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "Application/JSON; charset=utf-8".parse().unwrap(),
        );
        assert!(is_json(&headers));
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!is_json(&headers));
        assert!(!is_json(&HeaderMap::new()));
    }

    #[test]
    fn test_first_binding_wins() {
        let cache = ProxyCache::new(http_client());
        let router = SessionRouter::new(cache.clone());
        let first = cache.for_port(4724).unwrap();
        let second = cache.for_port(4725).unwrap();

        assert!(router.bind("s1", &first, "X"));
        assert!(!router.bind("s1", &second, "Y"));
        let route = router.route("s1").unwrap();
        assert!(Arc::ptr_eq(&route.proxy, &first));
        assert_eq!(route.udid, "X");

        router.remove("s1");
        assert!(router.route("s1").is_none());
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_intercept_replays_exact_bytes() {
        let cache = ProxyCache::new(http_client());
        let router = SessionRouter::new(cache.clone());
        let proxy = cache.for_port(4724).unwrap();

        let raw = br#"{"value": {"sessionId": "s9", "capabilities": {}}}"#;
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(Body::from(raw.to_vec()))
            .unwrap();

        let replayed = router.intercept(response, &proxy, "X").await.unwrap();
        let body = to_bytes(replayed.into_body(), 4096).await.unwrap();
        assert_eq!(&body[..], &raw[..]);
        assert_eq!(router.route("s9").unwrap().udid, "X");
    }

    #[tokio::test]
    async fn test_non_json_response_is_not_inspected() {
        let cache = ProxyCache::new(http_client());
        let router = SessionRouter::new(cache.clone());
        let proxy = cache.for_port(4724).unwrap();

        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(r#"{"value":{"sessionId":"s9"}}"#))
            .unwrap();
        router.intercept(response, &proxy, "X").await.unwrap();
        assert!(router.route("s9").is_none());
    }
}
