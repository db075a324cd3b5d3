//! Input resolution: turn user-supplied image references into raw bytes.
//!
//! Three kinds of reference are accepted:
//!
//! * a local file path,
//! * an `http://` / `https://` URL, downloaded with a timeout,
//! * a base64 payload, bare or as a `data:image/...;base64,` URI (what web
//!   front-ends upload).
//!
//! Every loaded payload is checked against the JPEG/PNG/WebP magic bytes so a
//! stray PDF or HTML error page fails here with a clear message instead of
//! surfacing later as an unreadable image inside the model call.

use crate::error::ExtractError;
use crate::pipeline::encode::AssetFormat;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// A reference to one listing photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Url(String),
    Base64(String),
}

impl ImageSource {
    /// Classify a CLI/user string.
    pub fn parse(input: &str) -> Self {
        if is_url(input) {
            ImageSource::Url(input.to_string())
        } else if input.starts_with("data:") {
            ImageSource::Base64(input.to_string())
        } else {
            ImageSource::Path(PathBuf::from(input))
        }
    }

    fn describe(&self) -> String {
        match self {
            ImageSource::Path(p) => p.display().to_string(),
            ImageSource::Url(u) => u.clone(),
            ImageSource::Base64(_) => "<base64>".to_string(),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load every source in order. Fails on the first bad input.
pub async fn load_images(
    sources: &[ImageSource],
    timeout_secs: u64,
) -> Result<Vec<Vec<u8>>, ExtractError> {
    let mut out = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        out.push(load_image(source, index, timeout_secs).await?);
    }
    Ok(out)
}

/// Load a single image and verify it is a supported format.
pub async fn load_image(
    source: &ImageSource,
    index: usize,
    timeout_secs: u64,
) -> Result<Vec<u8>, ExtractError> {
    let bytes = match source {
        ImageSource::Path(path) => read_local(path).await?,
        ImageSource::Url(url) => download_url(url, timeout_secs).await?,
        ImageSource::Base64(payload) => decode_base64(index, payload)?,
    };
    ensure_image(&bytes, &source.describe())?;
    Ok(bytes)
}

/// Decode a batch of base64 payloads as sent by a web client.
pub fn decode_base64_images(payloads: &[String]) -> Result<Vec<Vec<u8>>, ExtractError> {
    payloads
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let bytes = decode_base64(i, p)?;
            ensure_image(&bytes, &format!("image #{i}"))?;
            Ok(bytes)
        })
        .collect()
}

/// Decode base64, tolerating a `data:` URI prefix and embedded whitespace.
pub fn decode_base64(index: usize, payload: &str) -> Result<Vec<u8>, ExtractError> {
    let body = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    let cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| ExtractError::InvalidBase64 {
            index,
            detail: e.to_string(),
        })
}

fn ensure_image(bytes: &[u8], input: &str) -> Result<(), ExtractError> {
    match AssetFormat::sniff(bytes) {
        Some(format) => {
            debug!("Loaded {} ({}, {} bytes)", input, format.mime_type(), bytes.len());
            Ok(())
        }
        None => Err(ExtractError::UnsupportedImage {
            input: input.to_string(),
        }),
    }
}

async fn read_local(path: &PathBuf) -> Result<Vec<u8>, ExtractError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied { path: path.clone() },
        _ => ExtractError::ImageNotFound { path: path.clone() },
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ExtractError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    Ok(bytes.to_vec())
}
