//! Image loading for base, shadow and design assets
//!
//! Fetching and decoding is the only suspending step of the pipeline.
//! Decoding runs on the blocking pool so large photos don't stall the
//! runtime.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use image::RgbaImage;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::LoaderSettings;

/// Image loading errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Invalid image source '{0}'")]
    InvalidSource(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} fetching {url}")]
    Status { status: u16, url: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Decode task failed: {0}")]
    Task(String),
}

/// Where an image comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageSource {
    Url(Url),
    Path(PathBuf),
    /// Inline `data:` URL, kept verbatim
    Data(String),
}

impl ImageSource {
    /// Parse a source string: `http(s)://`, `file://`, `data:` or a plain path
    pub fn parse(source: &str) -> Result<Self, LoadError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(LoadError::InvalidSource(source.to_string()));
        }

        if trimmed.starts_with("data:") {
            return Ok(ImageSource::Data(trimmed.to_string()));
        }

        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            let url = Url::parse(trimmed).map_err(|_| LoadError::InvalidSource(source.to_string()))?;
            return Ok(ImageSource::Url(url));
        }

        if trimmed.starts_with("file://") {
            let path = Url::parse(trimmed)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| LoadError::InvalidSource(source.to_string()))?;
            return Ok(ImageSource::Path(path));
        }

        Ok(ImageSource::Path(PathBuf::from(trimmed)))
    }

    /// Stable key for caching; inline data is never cached
    pub fn cache_key(&self) -> Option<String> {
        match self {
            ImageSource::Url(url) => Some(url.to_string()),
            ImageSource::Path(path) => Some(format!("file:{}", path.display())),
            ImageSource::Data(_) => None,
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Url(url) => write!(f, "{}", url),
            ImageSource::Path(path) => write!(f, "{}", path.display()),
            // Data URLs can be megabytes long
            ImageSource::Data(data) => write!(f, "{}...", preview(data)),
        }
    }
}

/// Something that can turn an [`ImageSource`] into pixels
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, source: &ImageSource) -> Result<Arc<RgbaImage>, LoadError>;
}

#[async_trait]
impl<L: ImageLoader + ?Sized> ImageLoader for Arc<L> {
    async fn load(&self, source: &ImageSource) -> Result<Arc<RgbaImage>, LoadError> {
        (**self).load(source).await
    }
}

/// Loads images over HTTP, from disk or from `data:` URLs
#[derive(Clone)]
pub struct HttpImageLoader {
    http_client: reqwest::Client,
}

impl HttpImageLoader {
    pub fn new(settings: &LoaderSettings) -> Result<Self, LoadError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .build()?;

        Ok(HttpImageLoader { http_client })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        HttpImageLoader { http_client }
    }

    async fn fetch(&self, url: &Url) -> Result<Bytes, LoadError> {
        debug!(url = %url, "Fetching image");

        let response = self.http_client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(LoadError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, source: &ImageSource) -> Result<Arc<RgbaImage>, LoadError> {
        let bytes = match source {
            ImageSource::Url(url) => self.fetch(url).await?,
            ImageSource::Path(path) => Bytes::from(tokio::fs::read(path).await?),
            ImageSource::Data(data) => decode_data_url(data)?,
        };

        let image = decode(bytes).await?;

        info!(
            source = %source,
            width = image.width(),
            height = image.height(),
            "Image loaded"
        );

        Ok(Arc::new(image))
    }
}

/// Keeps decoded images in memory, keyed by source
///
/// Base and shadow images are immutable once loaded, so repeated loads of
/// the same URL or path reuse the decoded pixels. `data:` sources carry
/// their own bytes and always go to the inner loader.
pub struct CachingLoader<L> {
    inner: L,
    images: RwLock<HashMap<String, Arc<RgbaImage>>>,
}

impl<L: ImageLoader> CachingLoader<L> {
    pub fn new(inner: L) -> Self {
        CachingLoader {
            inner,
            images: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached images
    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.read().is_empty()
    }

    pub fn clear(&self) {
        self.images.write().clear();
    }
}

#[async_trait]
impl<L: ImageLoader> ImageLoader for CachingLoader<L> {
    async fn load(&self, source: &ImageSource) -> Result<Arc<RgbaImage>, LoadError> {
        let Some(key) = source.cache_key() else {
            return self.inner.load(source).await;
        };
        let cached = self.images.read().get(&key).cloned();
        if let Some(image) = cached {
            debug!(source = %source, "Image cache hit");
            return Ok(image);
        }

        let image = self.inner.load(source).await?;
        self.images.write().insert(key, image.clone());
        Ok(image)
    }
}

/// Decode an encoded image on the blocking pool
pub async fn decode(bytes: Bytes) -> Result<RgbaImage, LoadError> {
    let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| LoadError::Task(e.to_string()))??;

    Ok(image.to_rgba8())
}

fn preview(data: &str) -> String {
    data.chars().take(32).collect()
}

/// Extract the payload of a base64 `data:` URL
fn decode_data_url(data: &str) -> Result<Bytes, LoadError> {
    let invalid = || LoadError::InvalidSource(format!("{}...", preview(data)));

    let (header, payload) = data
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(invalid)?;

    if !header.ends_with(";base64") {
        return Err(invalid());
    }

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map(Bytes::from)
        .map_err(|_| invalid())
}
