//! WebDriver session-creation shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::Platform;

/// Command timeout applied to agent-built sessions, in seconds.
pub const NEW_COMMAND_TIMEOUT_SECS: u64 = 7200;

/// Routing fields a client sends alongside (or instead of) W3C capabilities
/// when creating a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestInfo {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub udid: String,
    #[serde(default)]
    pub test_type: String,
    #[serde(default)]
    pub app_package: String,
    #[serde(default)]
    pub app_activity: String,
    #[serde(default)]
    pub test_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub app_path: String,
    #[serde(default)]
    pub hub_url: String,
    #[serde(default)]
    pub automation_name: String,
    #[serde(default)]
    pub value: SessionValue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionValue {
    #[serde(default)]
    pub session_id: String,
}

impl TestInfo {
    /// Whether the request came from an interactive (non-scripted) client.
    pub fn is_manual(&self) -> bool {
        self.test_type == "manual"
    }

    pub fn platform(&self) -> Option<Platform> {
        Platform::from_os(&self.os)
    }
}

/// Canonical new-session request built for manual clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionPayload {
    pub capabilities: Capabilities,
    pub desired_capabilities: DesiredCapabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub always_match: AlwaysMatch,
    pub first_match: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlwaysMatch {
    #[serde(rename = "appium:udid")]
    pub udid: String,
    #[serde(rename = "platformName")]
    pub platform_name: String,
    #[serde(rename = "appium:automationName")]
    pub automation_name: String,
    #[serde(rename = "appium:noReset")]
    pub no_reset: bool,
    #[serde(rename = "appium:ensureWebviewsHavePages")]
    pub ensure_webviews_have_pages: bool,
    #[serde(rename = "appium:nativeWebScreenshot")]
    pub native_web_screenshot: bool,
    #[serde(rename = "appium:newCommandTimeout")]
    pub new_command_timeout: u64,
    #[serde(rename = "appium:connectHardwareKeyboard")]
    pub connect_hardware_keyboard: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredCapabilities {
    #[serde(rename = "appium:udid")]
    pub udid: String,
    #[serde(rename = "platformName")]
    pub platform_name: String,
    #[serde(rename = "automationName")]
    pub automation_name: String,
    #[serde(rename = "appium:noReset")]
    pub no_reset: bool,
    #[serde(rename = "appium:appPackage")]
    pub app_package: String,
    #[serde(rename = "appium:appActivity")]
    pub app_activity: String,
    #[serde(rename = "appium:ensureWebviewsHavePages")]
    pub ensure_webviews_have_pages: bool,
    #[serde(rename = "appium:nativeWebScreenshot")]
    pub native_web_screenshot: bool,
    #[serde(rename = "appium:newCommandTimeout")]
    pub new_command_timeout: u64,
    #[serde(rename = "appium:connectHardwareKeyboard")]
    pub connect_hardware_keyboard: bool,
}

impl NewSessionPayload {
    /// Build the fixed capability set for a manual session on `info.udid`.
    ///
    /// `platformName` echoes the client's `os` field verbatim.
    pub fn manual(info: &TestInfo) -> Self {
        let automation_name = info
            .platform()
            .unwrap_or(Platform::Android)
            .automation_name()
            .to_string();

        Self {
            capabilities: Capabilities {
                always_match: AlwaysMatch {
                    udid: info.udid.clone(),
                    platform_name: info.os.clone(),
                    automation_name: automation_name.clone(),
                    no_reset: true,
                    ensure_webviews_have_pages: true,
                    native_web_screenshot: true,
                    new_command_timeout: NEW_COMMAND_TIMEOUT_SECS,
                    connect_hardware_keyboard: true,
                },
                first_match: vec![Map::new()],
            },
            desired_capabilities: DesiredCapabilities {
                udid: info.udid.clone(),
                platform_name: info.os.clone(),
                automation_name,
                no_reset: true,
                app_package: info.app_package.clone(),
                app_activity: info.app_activity.clone(),
                ensure_webviews_have_pages: true,
                native_web_screenshot: true,
                new_command_timeout: NEW_COMMAND_TIMEOUT_SECS,
                connect_hardware_keyboard: true,
            },
        }
    }
}

/// Extract `value.sessionId` from a WebDriver response body.
pub fn session_id_from_body(body: &[u8]) -> Option<String> {
    let parsed: Value = serde_json::from_slice(body).ok()?;
    parsed
        .pointer("/value/sessionId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
