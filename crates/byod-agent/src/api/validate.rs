//! Element validation through the on-device instrumentation server.

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderValue, Request, header},
    response::Response,
};
use byod_protocol::{Platform, ValidationRequest};
use log::debug;

use super::error::{ApiError, ApiResult};
use super::proxy::ReverseProxy;
use super::state::AppState;

/// `POST /validate`
///
/// The body is forwarded unchanged to `http://<device ip>:<app pid>/<action>`.
pub async fn validate(State(state): State<AppState>, req: Request<Body>) -> ApiResult<Response> {
    let (parts, body) = req.into_parts();
    let body = to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to read request body: {e}")))?;
    let request: ValidationRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid validation request: {e}")))?;
    let platform = Platform::from_os(&request.os)
        .ok_or_else(|| ApiError::bad_request(format!("unsupported os {:?}", request.os)))?;

    let ip = state
        .devices
        .device_ip(platform, &request.udid)
        .await
        .map_err(|e| ApiError::bad_gateway(format!("{e:#}")))?;
    let pid = state
        .devices
        .app_pid(&request.udid, &request.package)
        .await
        .map_err(|e| ApiError::bad_gateway(format!("{e:#}")))?;

    let target = format!("http://{ip}:{pid}");
    debug!("Validating {} on {} via {}", request.action, request.udid, target);
    let proxy = ReverseProxy::new(state.http_client.clone(), target)?;

    let mut response = proxy
        .forward_to(&parts, &format!("/{}", request.action), body)
        .await?;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    Ok(response)
}
