//! Watermark image resolution
//!
//! A watermark comes either from a URL (one of the configured presets) or from
//! image bytes the user uploaded. Either way the result is a decoded raster
//! image held in memory for the duration of one rendering call.

use std::fmt;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Where the watermark image comes from
#[derive(Clone, PartialEq, Eq)]
pub enum WatermarkSource {
    /// Fetch the image over HTTP(S)
    Url(String),
    /// Image bytes supplied directly
    Upload(Vec<u8>),
}

impl fmt::Debug for WatermarkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            WatermarkSource::Upload(bytes) => write!(f, "Upload({} bytes)", bytes.len()),
        }
    }
}

/// A decoded watermark image
#[derive(Clone)]
pub struct WatermarkImage {
    image: DynamicImage,
}

impl fmt::Debug for WatermarkImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatermarkImage")
            .field("dimensions", &self.image.dimensions())
            .field("has_alpha", &self.image.color().has_alpha())
            .finish()
    }
}

impl WatermarkImage {
    /// Decode raster image bytes
    ///
    /// The format is detected from the leading magic bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::Decode("image data is empty".to_string()));
        }

        let format = image::guess_format(bytes)
            .map_err(|e| Error::Decode(format!("unrecognised image format: {}", e)))?;

        if !matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP
        ) {
            return Err(Error::Decode(format!("unsupported image format: {:?}", format)));
        }

        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| Error::Decode(e.to_string()))?;

        Self::from_image(image)
    }

    /// Wrap an already decoded image
    pub fn from_image(image: DynamicImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::Decode(format!("image has no pixels ({}x{})", width, height)));
        }
        Ok(Self { image })
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Height divided by width
    pub fn aspect(&self) -> f64 {
        self.height() as f64 / self.width() as f64
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

/// Downloads watermark images
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    http_client: reqwest::blocking::Client,
}

impl ImageFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Fetch(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// GET the raw bytes at `url`
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::Fetch(format!(
                "unsupported URL '{}', expected http:// or https://",
                url
            )));
        }

        debug!(url, "fetching watermark image");

        let response = self
            .http_client
            .get(url)
            .send()
            .map_err(|e| Error::Fetch(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("{} returned status {}", url, status)));
        }

        let bytes = response
            .bytes()
            .map_err(|e| Error::Fetch(format!("failed to read body from {}: {}", url, e)))?;

        debug!(url, bytes = bytes.len(), "watermark image downloaded");
        Ok(bytes.to_vec())
    }

    /// Resolve a source into a decoded image
    pub fn resolve(&self, source: &WatermarkSource) -> Result<WatermarkImage> {
        let image = match source {
            WatermarkSource::Url(url) => {
                let bytes = self.fetch(url)?;
                WatermarkImage::decode(&bytes)?
            }
            WatermarkSource::Upload(bytes) => WatermarkImage::decode(bytes)?,
        };

        info!(
            width = image.width(),
            height = image.height(),
            "resolved watermark image"
        );
        Ok(image)
    }
}
