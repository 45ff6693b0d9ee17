//! Input resolution: turn a user-supplied path or URL into a decoded
//! [`RasterImage`] plus the label shown in the composite delimiter.
//!
//! The format is sniffed from magic bytes rather than the extension, so a
//! `.jpg` that is really a PNG still loads and a renamed GIF is refused with
//! a clear error instead of a decoder panic deep in the pipeline.

use crate::error::DeckScanError;
use crate::pipeline::raster::RasterImage;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Identify a supported raster format from its leading bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some(ImageFormat::Png),
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [b'B', b'M', ..] => Some(ImageFormat::Bmp),
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Decode an in-memory image. `source_name` only appears in errors.
pub fn decode_bytes(bytes: &[u8], source_name: &str) -> Result<RasterImage, DeckScanError> {
    let format = detect_format(bytes).ok_or_else(|| DeckScanError::UnsupportedFormat {
        source_name: source_name.to_string(),
    })?;
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        DeckScanError::DecodeFailed {
            source_name: source_name.to_string(),
            detail: e.to_string(),
        }
    })?;
    debug!(
        "Decoded {} as {:?} ({}x{})",
        source_name,
        format,
        img.width(),
        img.height()
    );
    Ok(RasterImage::from_dynamic(img))
}

/// Resolve one input to `(image, label)`.
///
/// Local paths are read from disk; HTTP(S) URLs are downloaded with the
/// given timeout. The label is the file name (last URL path segment for
/// downloads).
pub async fn load_image(input: &str, timeout_secs: u64) -> Result<(RasterImage, String), DeckScanError> {
    let (bytes, label) = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    let name = label.clone();
    let image = tokio::task::spawn_blocking(move || decode_bytes(&bytes, &name))
        .await
        .map_err(|e| DeckScanError::Internal(format!("decode task panicked: {e}")))??;
    Ok((image, label))
}

/// Label for a local path: its file name, or the whole path if it has none.
pub fn label_for_path(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn read_local(path_str: &str) -> Result<(Vec<u8>, String), DeckScanError> {
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(DeckScanError::FileNotFound { path });
    }
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DeckScanError::PermissionDenied { path });
        }
        Err(_) => return Err(DeckScanError::FileNotFound { path }),
    };
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok((bytes, label_for_path(&path)))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<(Vec<u8>, String), DeckScanError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DeckScanError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DeckScanError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DeckScanError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DeckScanError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DeckScanError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok((bytes.to_vec(), filename_from_url(url)))
}

/// Last non-empty path segment of the URL, or `"downloaded-image"`.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(last) = parsed
            .path_segments()
            .and_then(|s| s.filter(|seg| !seg.is_empty()).last())
        {
            return last.to_string();
        }
    }
    "downloaded-image".to_string()
}
