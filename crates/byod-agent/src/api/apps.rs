//! App management on attached devices.

use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::{Json, extract::State};
use byod_protocol::{AppAction, AppRequest, AppResponse, Platform};
use bytes::Bytes;
use log::{info, warn};

use super::state::AppState;
use crate::auth::CurrentUser;
use crate::download;

/// `POST /app`
///
/// Failures of any kind are reported as `{"status":"failed"}`.
pub async fn app_action(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Bytes,
) -> Json<AppResponse> {
    let request: AppRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejecting app request from {}: {}", user.username(), e);
            return Json(AppResponse::failed());
        }
    };

    info!(
        "App {:?} on {} requested by {}",
        request.action,
        request.udid,
        user.username()
    );
    match run_action(&state, &request).await {
        Ok(response) => Json(response),
        Err(e) => {
            warn!("App {:?} on {} failed: {:#}", request.action, request.udid, e);
            Json(AppResponse::failed())
        }
    }
}

async fn run_action(state: &AppState, request: &AppRequest) -> Result<AppResponse> {
    let platform = Platform::from_os(&request.os)
        .with_context(|| format!("unsupported os {:?}", request.os))?;
    let devices = &state.devices;
    let udid = request.udid.as_str();

    match request.action {
        AppAction::Install => {
            let path = local_app_path(state, &request.app_path).await?;
            devices.install_app(platform, udid, &path).await?;
        }
        AppAction::Uninstall => devices.uninstall_app(platform, udid, &request.package).await?,
        AppAction::Launch => devices.launch_app(platform, udid, &request.package).await?,
        AppAction::Kill => devices.kill_app(platform, udid, &request.package).await?,
        AppAction::Apps => {
            let apps = devices.list_apps(platform, udid).await?;
            return Ok(AppResponse::with_apps(apps));
        }
    }
    Ok(AppResponse::success())
}

/// Download remote packages into the applications directory.
async fn local_app_path(state: &AppState, app_path: &str) -> Result<PathBuf> {
    if !download::is_remote(app_path) {
        return Ok(PathBuf::from(app_path));
    }
    let name = download::file_name_from_url(app_path)
        .with_context(|| format!("no file name in {app_path}"))?;
    let target = state.paths.applications.join(name);
    download::download_file(&state.http, app_path, &target).await?;
    Ok(target)
}
