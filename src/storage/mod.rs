//! Blob storage for exported previews
//!
//! Finished frames can be published to Cloudflare R2. R2 is S3-compatible,
//! so [`R2Store`] uses the AWS SDK; anything else implementing [`BlobStore`]
//! works the same way.

mod r2;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::engine::export::{self, ExportError, ExportFormat};
use crate::engine::CompositeFrame;

pub use r2::R2Store;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob storage not configured")]
    NotConfigured,

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Delete failed: {0}")]
    Delete(String),

    #[error("Presign failed: {0}")]
    Presign(String),

    #[error("Failed to encode preview: {0}")]
    Encode(#[from] ExportError),
}

/// Result of an upload operation
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// The object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    pub content_type: String,
    /// Public URL if the bucket has one
    pub public_url: Option<String>,
}

/// A URL the browser can PUT an object to directly
#[derive(Debug, Clone, PartialEq)]
pub struct PresignedUpload {
    pub url: String,
    pub key: String,
    pub expires_in_secs: u64,
}

/// Object storage backend
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<StoredObject, StorageError>;

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Pre-signed PUT URL for `key`
    async fn presign_put(&self, key: &str, content_type: &str) -> Result<PresignedUpload, StorageError>;
}

/// Object key for a published preview: `{prefix}/{YYYY/MM/DD}/{uuid}.{ext}`
pub fn preview_key(prefix: &str, format: ExportFormat, at: DateTime<Utc>, id: Uuid) -> String {
    let prefix = prefix.trim_matches('/');
    let path = format!("{}/{}.{}", at.format("%Y/%m/%d"), id, format.extension());

    if prefix.is_empty() {
        path
    } else {
        format!("{}/{}", prefix, path)
    }
}

/// Join a public URL prefix and an object key
pub fn public_url(prefix: Option<&str>, key: &str) -> Option<String> {
    prefix.map(|prefix| format!("{}/{}", prefix.trim_end_matches('/'), key))
}

/// Encode a frame and store it under a fresh preview key
#[instrument(skip(store, frame), fields(width = frame.dimensions().0, height = frame.dimensions().1))]
pub async fn publish_frame<S: BlobStore + ?Sized>(
    store: &S,
    frame: &CompositeFrame,
    format: ExportFormat,
    prefix: &str,
) -> Result<StoredObject, StorageError> {
    let data = export::encode(frame.image(), format)?;
    let key = preview_key(prefix, format, Utc::now(), Uuid::new_v4());

    let stored = store.put(&key, data, format.content_type()).await?;

    info!(key = %stored.key, size = stored.size, "Preview published");
    Ok(stored)
}

/// PUT bytes to a pre-signed URL, as a browser client would
#[instrument(skip(http_client, url, data), fields(size = data.len()))]
pub async fn upload_presigned(
    http_client: &reqwest::Client,
    url: &str,
    data: Bytes,
    content_type: &str,
) -> Result<(), StorageError> {
    let response = http_client
        .put(url)
        .header(reqwest::header::CONTENT_TYPE, content_type)
        .body(data)
        .send()
        .await
        .map_err(|e| StorageError::Upload(format!("HTTP error: {}", e)))?;

    if !response.status().is_success() {
        return Err(StorageError::Upload(format!("HTTP {} from pre-signed URL", response.status())));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DesignPlacement;
    use crate::engine::displacement::{build_displacement_map, BlurKind};
    use crate::engine::{CompositeInputs, Compositor, LayerStyle};
    use chrono::TimeZone;
    use image::{Rgba, RgbaImage};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<String, (Bytes, String)>>,
    }

    #[async_trait]
    impl BlobStore for MemoryStore {
        async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<StoredObject, StorageError> {
            let size = data.len() as u64;
            self.objects
                .lock()
                .insert(key.to_string(), (data, content_type.to_string()));
            Ok(StoredObject {
                key: key.to_string(),
                size,
                content_type: content_type.to_string(),
                public_url: public_url(Some("https://cdn.example.com"), key),
            })
        }

        async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
            self.objects
                .lock()
                .get(key)
                .map(|(data, _)| data.clone())
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.objects.lock().remove(key);
            Ok(())
        }

        async fn presign_put(&self, key: &str, _content_type: &str) -> Result<PresignedUpload, StorageError> {
            Ok(PresignedUpload {
                url: format!("https://upload.example.com/{}", key),
                key: key.to_string(),
                expires_in_secs: 60,
            })
        }
    }

    fn frame() -> CompositeFrame {
        let base = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        let map = build_displacement_map(&base, 0.0, BlurKind::Gaussian);
        Compositor::new()
            .compose(&CompositeInputs {
                base: &base,
                displacement_map: &map,
                design: None,
                color: None,
                shadow: None,
                placement: DesignPlacement::default(),
                strength: 0.0,
                style: LayerStyle::default(),
            })
            .unwrap()
    }

    #[test]
    fn test_preview_key_layout() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        let id = Uuid::nil();

        assert_eq!(
            preview_key("previews", ExportFormat::Png, at, id),
            "previews/2024/03/07/00000000-0000-0000-0000-000000000000.png"
        );
        assert_eq!(
            preview_key("/shop/previews/", ExportFormat::Jpeg { quality: 80 }, at, id),
            "shop/previews/2024/03/07/00000000-0000-0000-0000-000000000000.jpg"
        );
        assert_eq!(
            preview_key("", ExportFormat::Png, at, id),
            "2024/03/07/00000000-0000-0000-0000-000000000000.png"
        );
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            public_url(Some("https://cdn.example.com/"), "a/b.png"),
            Some("https://cdn.example.com/a/b.png".to_string())
        );
        assert_eq!(public_url(None, "a/b.png"), None);
    }

    #[test]
    fn test_publish_frame_stores_encoded_png() {
        let store = MemoryStore::default();

        let stored = tokio_test::block_on(publish_frame(&store, &frame(), ExportFormat::Png, "previews")).unwrap();

        assert!(stored.key.starts_with("previews/"));
        assert!(stored.key.ends_with(".png"));
        assert_eq!(stored.content_type, "image/png");

        let data = tokio_test::block_on(store.get(&stored.key)).unwrap();
        assert_eq!(data.len() as u64, stored.size);
        let decoded = image::load_from_memory(&data).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_publish_rejects_bad_quality() {
        let store = MemoryStore::default();
        let result = tokio_test::block_on(publish_frame(&store, &frame(), ExportFormat::Jpeg { quality: 0 }, "previews"));

        assert!(matches!(result, Err(StorageError::Encode(ExportError::InvalidQuality(0)))));
        assert!(store.objects.lock().is_empty());
    }

    /// Accept one request on a local port and answer with `status`
    async fn serve_once(status: &'static str) -> (String, tokio::task::JoinHandle<(String, Vec<u8>)>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];

            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);

            while buf.len() < head_end + length {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before body");
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
            socket.write_all(response.as_bytes()).await.unwrap();

            (head, buf[head_end..head_end + length].to_vec())
        });

        (format!("http://{}", addr), handle)
    }

    fn http_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn test_upload_presigned_puts_body() {
        tokio_test::block_on(async {
            let (base, server) = serve_once("200 OK").await;
            let url = format!("{}/garment-previews/previews/x.png?X-Amz-Signature=abc", base);

            upload_presigned(&http_client(), &url, Bytes::from_static(b"png bytes"), "image/png")
                .await
                .unwrap();

            let (head, body) = server.await.unwrap();
            assert!(head.starts_with("PUT /garment-previews/previews/x.png?X-Amz-Signature=abc HTTP/1.1"));
            assert!(head.to_ascii_lowercase().contains("content-type: image/png"));
            assert_eq!(body, b"png bytes");
        });
    }

    #[test]
    fn test_upload_presigned_rejected() {
        tokio_test::block_on(async {
            let (base, server) = serve_once("403 Forbidden").await;
            let url = format!("{}/expired.png", base);

            let result = upload_presigned(&http_client(), &url, Bytes::from_static(b"x"), "image/png").await;

            assert!(matches!(result, Err(StorageError::Upload(ref msg)) if msg.contains("403")));
            server.await.unwrap();
        });
    }

    #[test]
    fn test_missing_object() {
        let store = MemoryStore::default();
        assert!(matches!(
            tokio_test::block_on(store.get("nope.png")),
            Err(StorageError::NotFound(_))
        ));
    }
}
