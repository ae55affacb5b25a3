//! Fetching remote files: disk image bundles and application packages.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use log::{debug, info};
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;

/// Whether `path` names an `http(s)` resource rather than a local file.
pub fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Last path segment of `url`, ignoring query and fragment.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Stream `url` into `target`.
///
/// The body is written to a sibling `.part` file and renamed once complete,
/// so an interrupted download never leaves a truncated `target`.
pub async fn download_file(client: &Client, url: &str, target: &Path) -> Result<()> {
    info!("Downloading {} to {}", url, target.display());
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("requesting {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("downloading {url} failed with status {status}");
    }

    let mut partial = target.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("creating {}", partial.display()))?;
    let mut stream = response.bytes_stream();
    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("reading body of {url}"))?;
        file.write_all(&chunk)
            .await
            .with_context(|| format!("writing {}", partial.display()))?;
        written += chunk.len();
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, target)
        .await
        .with_context(|| format!("moving download into {}", target.display()))?;
    debug!("Downloaded {} bytes from {}", written, url);
    Ok(())
}

/// Unpack the zip `archive` into `dest`. Entries escaping `dest` are skipped.
pub async fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip_blocking(&archive, &dest))
        .await
        .context("zip extraction task failed")?
}

fn extract_zip_blocking(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)
        .with_context(|| format!("opening {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("reading zip archive {}", archive.display()))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let outpath = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = std::fs::File::create(&outpath)
                .with_context(|| format!("creating {}", outpath.display()))?;
            std::io::copy(&mut entry, &mut outfile)?;
        }
    }
    Ok(())
}
