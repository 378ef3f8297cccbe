//! Input resolution: turn a user-supplied path or URL into image bytes plus
//! the MIME type to declare to the ingestor.
//!
//! ## Choosing the declared type
//!
//! The ingestor trusts magic bytes over the declared type, so the type chosen
//! here only decides whether the input is *accepted*. For URLs the server's
//! `Content-Type` wins when it names an image; otherwise the file extension
//! is used, and as a last resort the bytes are sniffed.

use crate::error::HandTexError;
use crate::pipeline::ingest::SourceFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Raw image bytes ready for [`crate::pipeline::ingest::ingest`].
#[derive(Debug, Clone)]
pub struct ImageSource {
    pub bytes: Vec<u8>,
    pub mime: String,
    /// File name or URL, for logs and batch results.
    pub name: String,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or HTTP(S) URL to image bytes.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ImageSource, HandTexError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.contains("://") || input.trim().is_empty() {
        Err(HandTexError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<ImageSource, HandTexError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => HandTexError::InputNotFound {
            path: PathBuf::from(path),
        },
        _ => HandTexError::Internal(format!("Failed to read '{}': {}", path.display(), e)),
    })?;

    let mime = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(SourceFormat::from_extension)
        .or_else(|| SourceFormat::sniff(&bytes))
        .map(|f| f.mime().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    debug!(path = %path.display(), bytes = bytes.len(), mime, "Resolved local image");
    Ok(ImageSource {
        bytes,
        mime,
        name: path.display().to_string(),
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ImageSource, HandTexError> {
    info!("Downloading image from: {}", url);
    let failed = |reason: String| HandTexError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {}s", timeout_secs))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| SourceFormat::from_mime(v).is_some())
        .map(str::to_string);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| failed(e.to_string()))?
        .to_vec();

    let mime = content_type
        .or_else(|| extension_from_url(url).and_then(|e| SourceFormat::from_extension(&e)).map(|f| f.mime().to_string()))
        .or_else(|| SourceFormat::sniff(&bytes).map(|f| f.mime().to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    info!(bytes = bytes.len(), mime, "Downloaded image");
    Ok(ImageSource {
        bytes,
        mime,
        name: url.to_string(),
    })
}

/// Extension of the last URL path segment, if it has one.
fn extension_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/eq.png"));
        assert!(is_url("http://example.com/eq.png"));
        assert!(!is_url("/tmp/eq.png"));
        assert!(!is_url("eq.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn url_extension() {
        assert_eq!(
            extension_from_url("https://example.com/a/b/photo.JPG?x=1").as_deref(),
            Some("JPG")
        );
        assert_eq!(extension_from_url("https://example.com/a/b/"), None);
        assert_eq!(extension_from_url("https://example.com/noext"), None);
    }

    #[tokio::test]
    async fn missing_file_is_input_not_found() {
        let err = resolve_input("/definitely/not/here.png", 5).await.unwrap_err();
        assert!(matches!(err, HandTexError::InputNotFound { .. }));
    }

    #[tokio::test]
    async fn other_schemes_are_invalid() {
        let err = resolve_input("ftp://example.com/eq.png", 5).await.unwrap_err();
        assert!(matches!(err, HandTexError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn local_file_type_comes_from_extension_or_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let named = dir.path().join("eq.webp");
        std::fs::write(&named, b"whatever").unwrap();
        let src = resolve_input(named.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(src.mime, "image/webp");

        let unnamed = dir.path().join("scan");
        std::fs::write(&unnamed, b"\x89PNG\r\n\x1a\nrest").unwrap();
        let src = resolve_input(unnamed.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(src.mime, "image/png");
        assert_eq!(src.bytes.len(), 12);
    }
}
