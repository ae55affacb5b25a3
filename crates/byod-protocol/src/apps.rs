//! App management and validation request bodies.

use serde::{Deserialize, Serialize};

/// Operation requested on `POST /app`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppAction {
    Install,
    Uninstall,
    Launch,
    Kill,
    Apps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRequest {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub udid: String,
    #[serde(default)]
    pub app_path: String,
    #[serde(default)]
    pub package: String,
    pub action: AppAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failed,
}

/// An installed application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppResponse {
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apps: Option<Vec<AppInfo>>,
}

impl AppResponse {
    pub fn success() -> Self {
        Self {
            status: ActionStatus::Success,
            apps: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: ActionStatus::Failed,
            apps: None,
        }
    }

    pub fn with_apps(apps: Vec<AppInfo>) -> Self {
        Self {
            status: ActionStatus::Success,
            apps: Some(apps),
        }
    }
}

/// Body of `POST /validate`. Only the routing fields are interpreted by the
/// agent; the rest is forwarded untouched to the on-device instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub udid: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub xpath: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub keys: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub element_id: String,
    #[serde(default)]
    pub wda_port: String,
    #[serde(default)]
    pub case_sensitive_locator: bool,
    #[serde(default)]
    pub instrumented_fallback: bool,
}
