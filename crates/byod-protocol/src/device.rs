//! Attached device records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    /// Parse a client supplied `os` field.
    ///
    /// Clients send `android`, `ios` or `iOS`; matching is case-insensitive.
    pub fn from_os(os: &str) -> Option<Self> {
        if os.eq_ignore_ascii_case("android") {
            Some(Self::Android)
        } else if os.eq_ignore_ascii_case("ios") {
            Some(Self::Ios)
        } else {
            None
        }
    }

    /// Appium automation driver for this platform.
    pub fn automation_name(self) -> &'static str {
        match self {
            Self::Android => "UiAutomator2",
            Self::Ios => "XCUITest",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of an attached device as reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Visible to the host but not yet usable for automation.
    Connected,
    /// Usable for automation.
    Ready,
    /// No longer attached.
    Disconnected,
}

/// One device as seen by a discovery poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub os: Platform,
    #[serde(default)]
    pub name: String,
    pub udid: String,
    #[serde(default)]
    pub brand: String,
    pub status: DeviceStatus,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub full_os_version: String,
}

impl DeviceRecord {
    /// A freshly enumerated device with no properties resolved yet.
    pub fn connected(os: Platform, udid: impl Into<String>) -> Self {
        Self {
            os,
            name: String::new(),
            udid: udid.into(),
            brand: String::new(),
            status: DeviceStatus::Connected,
            os_version: String::new(),
            full_os_version: String::new(),
        }
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }
}
