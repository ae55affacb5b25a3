//! Device enumeration per platform.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use byod_protocol::{DeviceRecord, DeviceStatus, Platform};
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::disk_images::DiskImages;
use crate::tools::{Adb, GoIos, IosDeviceValues, adb, go_ios};

/// A source of attached devices.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    fn platform(&self) -> Platform;

    /// Devices currently attached, with their status resolved.
    async fn list(&self) -> Result<Vec<DeviceRecord>>;

    /// Called once for every newly attached device.
    async fn on_attached(&self, _udid: &str) -> Result<()> {
        Ok(())
    }

    /// Called when a device disappears.
    async fn forget(&self, _udid: &str) {}
}

/// iOS devices through go-ios. A device is ready once its developer disk
/// image is mounted.
#[derive(Debug)]
pub struct IosBackend {
    go_ios: GoIos,
    disk_images: DiskImages,
    runner_bundle: PathBuf,
    limit: Duration,
    mounted: Mutex<HashSet<String>>,
}

impl IosBackend {
    pub fn new(go_ios: GoIos, disk_images: DiskImages, runner_bundle: PathBuf, limit: Duration) -> Self {
        Self {
            go_ios,
            disk_images,
            runner_bundle,
            limit,
            mounted: Mutex::new(HashSet::new()),
        }
    }

    async fn mount(&self, udid: &str, version: &str) -> Result<()> {
        if self.mounted.lock().await.contains(udid) {
            return Ok(());
        }
        self.disk_images.ensure(version).await?;
        self.go_ios
            .mount_image(udid, self.disk_images.dir())
            .run(self.limit)
            .await?;
        info!("Disk image mounted on {}", udid);
        self.mounted.lock().await.insert(udid.to_string());
        Ok(())
    }
}

#[async_trait]
impl DeviceBackend for IosBackend {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    async fn list(&self) -> Result<Vec<DeviceRecord>> {
        let listing = self.go_ios.list().run(self.limit).await?;
        let udids = go_ios::parse_device_list(&listing)?;

        let mut records = Vec::with_capacity(udids.len());
        for udid in udids {
            let mut record = DeviceRecord::connected(Platform::Ios, &udid);

            let values = match self.go_ios.info(&udid).run(self.limit).await {
                Ok(out) => IosDeviceValues::parse(&out).map_err(anyhow::Error::from),
                Err(e) => Err(e),
            };
            match values {
                Ok(values) => {
                    record.name = values.device_name.clone();
                    record.brand = values.device_class.clone();
                    record.os_version = values.major_version();
                    record.full_os_version = values.product_version;
                }
                Err(e) => warn!("No device values for {}: {:#}", udid, e),
            }

            if !record.full_os_version.is_empty() {
                match self.mount(&udid, &record.full_os_version).await {
                    Ok(()) => record.status = DeviceStatus::Ready,
                    Err(e) => warn!("Disk image for {} not ready: {:#}", udid, e),
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Install the WebDriverAgent runner.
    async fn on_attached(&self, udid: &str) -> Result<()> {
        self.go_ios
            .install(udid, &self.runner_bundle)
            .run(self.limit)
            .await?;
        info!("Runner installed on {}", udid);
        Ok(())
    }

    async fn forget(&self, udid: &str) {
        self.mounted.lock().await.remove(udid);
    }
}

/// Android devices through adb.
#[derive(Debug, Clone)]
pub struct AndroidBackend {
    adb: Adb,
    limit: Duration,
}

impl AndroidBackend {
    pub fn new(adb: Adb, limit: Duration) -> Self {
        Self { adb, limit }
    }

    async fn prop(&self, udid: &str, name: &str) -> String {
        match self.adb.getprop(udid, name).run(self.limit).await {
            Ok(value) => value.trim().to_string(),
            Err(e) => {
                debug!("getprop {} on {} failed: {:#}", name, udid, e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl DeviceBackend for AndroidBackend {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    async fn list(&self) -> Result<Vec<DeviceRecord>> {
        let listing = self.adb.devices().run(self.limit).await?;

        let mut records = Vec::new();
        for (udid, state) in adb::parse_devices(&listing) {
            let mut record = DeviceRecord::connected(Platform::Android, &udid);
            if state == "device" {
                record.status = DeviceStatus::Ready;
            }
            record.name = self.prop(&udid, "ro.product.model").await;
            record.brand = self.prop(&udid, "ro.product.brand").await;
            record.os_version = self.prop(&udid, "ro.build.version.release").await;
            record.full_os_version = record.os_version.clone();
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const FAKE_ADB: &str = r#"
case "$1" in
  devices) printf 'List of devices attached\nR58M40\tdevice\nZY22\tunauthorized\n' ;;
  -s)
    case "$5" in
      ro.product.model) echo "Galaxy S10" ;;
      ro.product.brand) echo "samsung" ;;
      ro.build.version.release) echo "12" ;;
    esac ;;
esac
"#;

    #[tokio::test]
    async fn test_android_status_follows_bridge_state() {
        let dir = tempfile::tempdir().unwrap();
        let adb = write_tool(dir.path(), "adb", FAKE_ADB);
        let backend = AndroidBackend::new(Adb::new(adb), Duration::from_secs(5));

        let records = backend.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].udid, "R58M40");
        assert_eq!(records[0].status, DeviceStatus::Ready);
        assert_eq!(records[0].name, "Galaxy S10");
        assert_eq!(records[0].brand, "samsung");
        assert_eq!(records[0].os_version, "12");
        assert_eq!(records[0].full_os_version, "12");
        assert_eq!(records[1].status, DeviceStatus::Connected);
    }

    #[tokio::test]
    async fn test_android_bridge_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let adb = write_tool(dir.path(), "adb", "echo 'cannot connect to daemon' >&2; exit 1");
        let backend = AndroidBackend::new(Adb::new(adb), Duration::from_secs(5));
        assert!(backend.list().await.is_err());
    }

    fn fake_go_ios(dir: &Path, mount_exit: i32) -> PathBuf {
        let marker = dir.join("installed");
        write_tool(
            dir,
            "go-ios",
            &format!(
                r#"
case "$1" in
  list) echo '{{"deviceList":["00008030-AA"]}}' ;;
  info) echo '{{"DeviceName":"QA iPhone","DeviceClass":"iPhone","ProductVersion":"17.2.1"}}' ;;
  image) exit {mount_exit} ;;
  install) echo "$2" > {marker} ;;
esac
"#,
                marker = marker.display()
            ),
        )
    }

    #[tokio::test]
    async fn test_ios_ready_after_mount() {
        let dir = tempfile::tempdir().unwrap();
        let images_dir = dir.path().join("diskimages");
        std::fs::create_dir_all(images_dir.join("17.2.1")).unwrap();
        let go_ios = fake_go_ios(dir.path(), 0);

        let backend = IosBackend::new(
            GoIos::new(go_ios),
            DiskImages::new(&images_dir, None, Client::new()),
            dir.path().join("WebDriverAgentRunner-Runner.app"),
            Duration::from_secs(5),
        );
        let records = backend.list().await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status, DeviceStatus::Ready);
        assert_eq!(record.name, "QA iPhone");
        assert_eq!(record.brand, "iPhone");
        assert_eq!(record.os_version, "17");
        assert_eq!(record.full_os_version, "17.2.1");

        backend.on_attached("00008030-AA").await.unwrap();
        let installed = std::fs::read_to_string(dir.path().join("installed")).unwrap();
        assert!(installed.contains("WebDriverAgentRunner-Runner.app"));
    }

    #[tokio::test]
    async fn test_ios_mount_failure_stays_connected() {
        let dir = tempfile::tempdir().unwrap();
        let images_dir = dir.path().join("diskimages");
        std::fs::create_dir_all(images_dir.join("17.2.1")).unwrap();
        let go_ios = fake_go_ios(dir.path(), 1);

        let backend = IosBackend::new(
            GoIos::new(go_ios),
            DiskImages::new(&images_dir, None, Client::new()),
            dir.path().join("runner.app"),
            Duration::from_secs(5),
        );
        let records = backend.list().await.unwrap();
        assert_eq!(records[0].status, DeviceStatus::Connected);
        assert_eq!(records[0].full_os_version, "17.2.1");
    }
}
