//! Android debug bridge.

use std::path::{Path, PathBuf};

use super::Invocation;

#[derive(Debug, Clone)]
pub struct Adb {
    binary: PathBuf,
}

impl Adb {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn on(&self, udid: &str) -> Invocation {
        Invocation::new(&self.binary).arg("-s").arg(udid)
    }

    pub fn devices(&self) -> Invocation {
        Invocation::new(&self.binary).arg("devices")
    }

    pub fn getprop(&self, udid: &str, prop: &str) -> Invocation {
        self.on(udid).args(["shell", "getprop", prop])
    }

    pub fn install(&self, udid: &str, apk: &Path) -> Invocation {
        self.on(udid).args(["install", "-t"]).arg(apk)
    }

    pub fn uninstall(&self, udid: &str, package: &str) -> Invocation {
        self.on(udid).args(["uninstall", package])
    }

    pub fn launch(&self, udid: &str, package: &str) -> Invocation {
        self.on(udid).args([
            "shell",
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])
    }

    pub fn force_stop(&self, udid: &str, package: &str) -> Invocation {
        self.on(udid).args(["shell", "am", "force-stop", package])
    }

    pub fn third_party_packages(&self, udid: &str) -> Invocation {
        self.on(udid).args(["shell", "pm", "list", "packages", "-3"])
    }

    pub fn dumpsys_package(&self, udid: &str, package: &str) -> Invocation {
        self.on(udid).args(["shell", "dumpsys", "package", package])
    }

    pub fn ip_route(&self, udid: &str) -> Invocation {
        self.on(udid).args(["shell", "ip", "route"])
    }

    pub fn pidof(&self, udid: &str, package: &str) -> Invocation {
        self.on(udid).args(["shell", "pidof", package])
    }
}

/// Parse `adb devices` into `(serial, state)` pairs.
pub fn parse_devices(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            Some((serial.to_string(), state.to_string()))
        })
        .collect()
}

/// Parse `pm list packages` output (`package:<name>` per line).
pub fn parse_packages(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// First `versionName=` entry of a `dumpsys package` dump.
pub fn parse_version_name(dump: &str) -> Option<String> {
    dump.lines()
        .find_map(|line| line.trim().strip_prefix("versionName="))
        .map(|v| v.trim().to_string())
}

/// The last field of `ip route` output is the device's source address.
pub fn parse_route_ip(output: &str) -> Option<String> {
    output.split_whitespace().last().map(str::to_string)
}
