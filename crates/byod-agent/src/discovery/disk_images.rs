//! Developer disk images for iOS devices, fetched once per OS version.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use reqwest::Client;

use crate::download::{download_file, extract_zip};

#[derive(Debug, Clone)]
pub struct DiskImages {
    dir: PathBuf,
    assets_url: Option<String>,
    client: Client,
}

impl DiskImages {
    pub fn new(dir: impl Into<PathBuf>, assets_url: Option<String>, client: Client) -> Self {
        Self {
            dir: dir.into(),
            assets_url,
            client,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Make sure the image bundle for `version` is unpacked locally.
    pub async fn ensure(&self, version: &str) -> Result<()> {
        let unpacked = self.dir.join(version);
        if unpacked.exists() {
            return Ok(());
        }

        let base = self
            .assets_url
            .as_deref()
            .context("no assets URL configured for disk image download")?;
        let source = format!("{}/diskimages/{}.zip", base.trim_end_matches('/'), version);
        let archive = self.dir.join(format!("{version}.zip"));

        download_file(&self.client, &source, &archive).await?;
        extract_zip(&archive, &self.dir).await?;
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            log::debug!("Leaving {} in place: {}", archive.display(), e);
        }
        info!("Disk image {} unpacked into {}", version, self.dir.display());
        Ok(())
    }
}
