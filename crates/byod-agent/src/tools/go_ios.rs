//! go-ios developer tunnel CLI.

use std::path::{Path, PathBuf};

use byod_protocol::AppInfo;
use serde::Deserialize;

use super::Invocation;

#[derive(Debug, Clone)]
pub struct GoIos {
    binary: PathBuf,
}

impl GoIos {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn base(&self) -> Invocation {
        Invocation::new(&self.binary)
    }

    pub fn list(&self) -> Invocation {
        self.base().arg("list")
    }

    pub fn info(&self, udid: &str) -> Invocation {
        self.base().args(["info", "--udid", udid])
    }

    pub fn install(&self, udid: &str, bundle: &Path) -> Invocation {
        self.base()
            .arg("install")
            .arg(format!("--path={}", bundle.display()))
            .args(["--udid", udid])
    }

    pub fn uninstall(&self, udid: &str, bundle_id: &str) -> Invocation {
        self.base().args(["uninstall", bundle_id, "--udid", udid])
    }

    pub fn launch(&self, udid: &str, bundle_id: &str) -> Invocation {
        self.base().args(["launch", bundle_id, "--udid", udid])
    }

    pub fn kill(&self, udid: &str, bundle_id: &str) -> Invocation {
        self.base().args(["kill", bundle_id, "--udid", udid])
    }

    pub fn apps(&self, udid: &str) -> Invocation {
        self.base().args(["apps", "--list", "--udid", udid])
    }

    /// Mount the developer disk image matching the device, looking up images
    /// under `basedir`.
    pub fn mount_image(&self, udid: &str, basedir: &Path) -> Invocation {
        self.base()
            .args(["image", "auto"])
            .arg(format!("--basedir={}", basedir.display()))
            .args(["--udid", udid])
    }

    pub fn tunnel_start(&self) -> Invocation {
        self.base()
            .args(["tunnel", "start", "--pair-record-path=/tmp"])
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(rename = "deviceList", default)]
    device_list: Vec<String>,
}

/// Parse `go-ios list` JSON output into device serials.
pub fn parse_device_list(output: &str) -> serde_json::Result<Vec<String>> {
    let list: DeviceList = serde_json::from_str(output.trim())?;
    Ok(list.device_list)
}

/// Lockdown values reported by `go-ios info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IosDeviceValues {
    #[serde(rename = "DeviceName", default)]
    pub device_name: String,
    #[serde(rename = "DeviceClass", default)]
    pub device_class: String,
    #[serde(rename = "ProductVersion", default)]
    pub product_version: String,
}

impl IosDeviceValues {
    pub fn parse(output: &str) -> serde_json::Result<Self> {
        serde_json::from_str(output.trim())
    }

    /// Major component of the product version (`17` for `17.2.1`).
    pub fn major_version(&self) -> String {
        self.product_version
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

/// Parse `apps --list` lines of the form `<bundle id> <name> <version>`.
pub fn parse_app_list(output: &str) -> Vec<AppInfo> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (package, rest) = fields.split_first()?;
            let (name, version) = match rest {
                [name @ .., version] if !name.is_empty() => (name, *version),
                _ => (rest, ""),
            };
            Some(AppInfo {
                name: name.join(" "),
                package: (*package).to_string(),
                version: version.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let out = r#"{"deviceList":["00008030-001A2C","00008110-000E1D"]}"#;
        assert_eq!(
            parse_device_list(out).unwrap(),
            vec!["00008030-001A2C".to_string(), "00008110-000E1D".to_string()]
        );
        assert!(parse_device_list(r#"{"deviceList":[]}"#).unwrap().is_empty());
        assert!(parse_device_list("garbage").is_err());
    }

    #[test]
    fn test_device_values() {
        let values = IosDeviceValues::parse(
            r#"{"DeviceName":"QA iPhone","DeviceClass":"iPhone","ProductVersion":"17.2.1","BuildVersion":"21C66"}"#,
        )
        .unwrap();
        assert_eq!(values.device_name, "QA iPhone");
        assert_eq!(values.device_class, "iPhone");
        assert_eq!(values.major_version(), "17");
    }

    #[test]
    fn test_parse_app_list() {
        let out = "com.example.app Example 2.1.0\ncom.apple.test Test App 1.0\n";
        let apps = parse_app_list(out);
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].package, "com.example.app");
        assert_eq!(apps[0].name, "Example");
        assert_eq!(apps[0].version, "2.1.0");
        assert_eq!(apps[1].name, "Test App");
        assert_eq!(apps[1].version, "1.0");
    }

    #[test]
    fn test_install_uses_path_flag() {
        let go_ios = GoIos::new("/a/go-ios");
        assert_eq!(
            go_ios
                .install("U1", Path::new("/a/WebDriverAgentRunner-Runner.app"))
                .to_string(),
            "/a/go-ios install --path=/a/WebDriverAgentRunner-Runner.app --udid U1"
        );
        assert_eq!(
            go_ios.mount_image("U1", Path::new("/a/diskimages")).to_string(),
            "/a/go-ios image auto --basedir=/a/diskimages --udid U1"
        );
    }
}
