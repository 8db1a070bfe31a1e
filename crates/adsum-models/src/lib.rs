//! Face-pipeline model assets.
//!
//! The capture backends run the buffalo_l detection and recognition models;
//! this crate owns the single manifest of those files, verifies on-disk
//! copies against their published SHA-256 checksums, and fetches missing
//! ones. Verification and download share the manifest so the two can never
//! disagree about what a valid installation looks like.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One required model file.
pub struct ModelAsset {
    pub name: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

// Checksums verified from HuggingFace Git LFS pointer files (oid sha256: field).
// Source: https://huggingface.co/public-data/insightface/raw/main/models/buffalo_l/
pub const ASSETS: &[ModelAsset] = &[
    ModelAsset {
        name: "det_10g.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
        sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
        size_display: "16 MB",
    },
    ModelAsset {
        name: "w600k_r50.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx",
        sha256: "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
        size_display: "166 MB",
    },
];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download failed for {name}: {source}")]
    Download {
        name: &'static str,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error(
        "checksum mismatch for downloaded {name}\n  expected: {expected}\n  got:      {got}"
    )]
    DownloadChecksum {
        name: &'static str,
        expected: &'static str,
        got: String,
    },
}

/// Verification state of one manifest entry on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetState {
    Valid,
    Missing,
    ChecksumMismatch { got: String },
}

/// Per-asset verification results for a model directory.
#[derive(Debug)]
pub struct IntegrityReport {
    pub entries: Vec<(&'static str, AssetState)>,
}

impl IntegrityReport {
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|(_, s)| *s == AssetState::Valid)
    }

    /// Names of assets that are absent or corrupt.
    pub fn unusable(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|(_, s)| *s != AssetState::Valid)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Verify every manifest asset under `model_dir`.
///
/// A missing or corrupt file is reported, not an error; only I/O failures
/// on an existing file fail the check itself.
pub fn check_dir(model_dir: &Path) -> Result<IntegrityReport, ModelError> {
    let mut entries = Vec::with_capacity(ASSETS.len());
    for asset in ASSETS {
        let path = model_dir.join(asset.name);
        let state = if !path.exists() {
            AssetState::Missing
        } else {
            let digest = sha256_file_hex(&path)?;
            if digest == asset.sha256 {
                AssetState::Valid
            } else {
                AssetState::ChecksumMismatch { got: digest }
            }
        };
        entries.push((asset.name, state));
    }
    Ok(IntegrityReport { entries })
}

/// What a download pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub already_valid: usize,
}

/// Download every asset that is missing or fails verification.
///
/// Each file lands as `<name>.part` and is renamed into place only after
/// its checksum matches, so an interrupted download never leaves a
/// plausible-looking model behind.
pub fn download_missing(model_dir: &Path) -> Result<DownloadSummary, ModelError> {
    fs::create_dir_all(model_dir).map_err(|source| ModelError::Io {
        path: model_dir.to_path_buf(),
        source,
    })?;

    let mut summary = DownloadSummary::default();
    let report = check_dir(model_dir)?;

    for (asset, (_, state)) in ASSETS.iter().zip(report.entries.iter()) {
        match state {
            AssetState::Valid => {
                tracing::debug!(name = asset.name, "model already present, checksum ok");
                summary.already_valid += 1;
            }
            AssetState::Missing => {
                fetch(asset, model_dir)?;
                summary.downloaded += 1;
            }
            AssetState::ChecksumMismatch { got } => {
                tracing::warn!(
                    name = asset.name,
                    got = %got,
                    "model checksum differs, re-downloading"
                );
                fetch(asset, model_dir)?;
                summary.downloaded += 1;
            }
        }
    }
    Ok(summary)
}

fn fetch(asset: &ModelAsset, model_dir: &Path) -> Result<(), ModelError> {
    let dest = model_dir.join(asset.name);
    let tmp_path = model_dir.join(format!("{}.part", asset.name));

    tracing::info!(
        name = asset.name,
        size = asset.size_display,
        "downloading model"
    );

    let resp = ureq::get(asset.url)
        .call()
        .map_err(|source| ModelError::Download {
            name: asset.name,
            source: Box::new(source),
        })?;

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path).map_err(|source| ModelError::Io {
        path: tmp_path.clone(),
        source,
    })?;

    let mut buf = [0u8; 65536];
    loop {
        let n = reader.read(&mut buf).map_err(|source| ModelError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(|source| ModelError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    }
    file.flush().map_err(|source| ModelError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    drop(file);

    let digest = sha256_file_hex(&tmp_path)?;
    if digest != asset.sha256 {
        fs::remove_file(&tmp_path).ok();
        return Err(ModelError::DownloadChecksum {
            name: asset.name,
            expected: asset.sha256,
            got: digest,
        });
    }

    fs::rename(&tmp_path, &dest).map_err(|source| ModelError::Io {
        path: dest.clone(),
        source,
    })?;
    tracing::info!(name = asset.name, "model downloaded and verified");
    Ok(())
}

/// Streaming SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelError> {
    let mut file = fs::File::open(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
