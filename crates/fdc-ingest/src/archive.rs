//! Archive acquisition: download and extract the USDA release archives
//!
//! Each release ships as a zip containing a single JSON document. Both steps
//! are idempotent: an archive or document already on disk is never fetched
//! or extracted again, so interrupted runs resume where they left off.

use crate::datasets::DatasetSpec;
use fdc_common::checksum::verify_file_checksum;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Archive {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Archive {0} contains no JSON document")]
    EmptyArchive(PathBuf),

    #[error(transparent)]
    Checksum(#[from] fdc_common::FdcError),

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Ensure the decompressed JSON document for `dataset` exists under
/// `data_dir`, downloading and extracting the archive as needed. Returns the
/// document path.
pub async fn ensure_dataset(
    data_dir: &Path,
    dataset: &DatasetSpec,
) -> Result<PathBuf, ArchiveError> {
    std::fs::create_dir_all(data_dir)?;

    let json_path = data_dir.join(format!("{}.json", dataset.name));
    if json_path.exists() {
        return Ok(json_path);
    }

    let zip_path = data_dir.join(format!("{}.zip", dataset.name));
    if !zip_path.exists() {
        download_archive(&dataset.url, &zip_path).await?;
        if let Some(ref expected) = dataset.sha256 {
            verify_file_checksum(&zip_path, expected)?;
        }
    }

    extract_json(&zip_path, &json_path).await?;
    Ok(json_path)
}

/// Download `url` to `dest` with a progress bar
async fn download_archive(url: &str, dest: &Path) -> Result<(), ArchiveError> {
    info!("Downloading {} ...", dest.display());

    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ArchiveError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(ArchiveError::Download {
            url: url.to_string(),
            reason: response.status().to_string(),
        });
    }

    let total_size = response.content_length().unwrap_or(0);
    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .map_err(|e| ArchiveError::Task(e.to_string()))?
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {}", dest.display()));

    // Write to a partial file first so an interrupted download is retried
    // rather than mistaken for a complete archive.
    let partial = dest.with_extension("zip.partial");
    let mut file = std::fs::File::create(&partial)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    use futures::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ArchiveError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }
    file.flush()?;
    std::fs::rename(&partial, dest)?;

    pb.finish_with_message(format!("Downloaded {}", dest.display()));
    Ok(())
}

/// Extract the JSON document from the archive at `zip_path` to `json_path`
async fn extract_json(zip_path: &Path, json_path: &Path) -> Result<(), ArchiveError> {
    info!(
        "Extracting {} to {}",
        zip_path.display(),
        json_path.display()
    );

    let zip_path = zip_path.to_path_buf();
    let json_path = json_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&zip_path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|source| ArchiveError::Corrupt {
            path: zip_path.clone(),
            source,
        })?;

        // Releases hold exactly one document; take the first JSON entry and
        // fall back to the first entry of any name.
        let entries = archive.len();
        let index = (0..entries)
            .find(|&i| {
                archive
                    .by_index(i)
                    .map(|entry| entry.name().ends_with(".json"))
                    .unwrap_or(false)
            })
            .or((entries > 0).then_some(0))
            .ok_or_else(|| ArchiveError::EmptyArchive(zip_path.clone()))?;

        let mut entry = archive
            .by_index(index)
            .map_err(|source| ArchiveError::Corrupt {
                path: zip_path.clone(),
                source,
            })?;
        let partial = json_path.with_extension("json.partial");
        let mut out = std::fs::File::create(&partial)?;
        std::io::copy(&mut entry, &mut out)?;
        std::fs::rename(&partial, &json_path)?;
        Ok(())
    })
    .await
    .map_err(|e| ArchiveError::Task(e.to_string()))?
}
