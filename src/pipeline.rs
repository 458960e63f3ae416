//! The merge-then-watermark pipeline
//!
//! Documents are merged first, then the watermark image is resolved and
//! rendered into an overlay page, which is finally drawn onto every merged
//! page. Any failure aborts the whole run and nothing is returned.

use chrono::Utc;
use lopdf::Document;
use tracing::info;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::layout::PlacementStyle;
use crate::pdf::{apply_overlay, merge_documents};
use crate::pdf::metadata::stamp_info;
use crate::watermark::{render_overlay, ImageFetcher, OverlayPage, WatermarkSource};

/// Producer string written into output documents
const PRODUCER: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// Merge `documents` and watermark every page, using the default configuration
///
/// Returns the finished PDF as bytes.
pub fn produce_watermarked_merge<B: AsRef<[u8]>>(
    documents: &[B],
    source: &WatermarkSource,
    transparency: f32,
    style: PlacementStyle,
) -> Result<Vec<u8>> {
    Pipeline::new(AppConfig::default())?.run(documents, source, transparency, style)
}

/// A configured pipeline
///
/// Holds no per-run state; every call to [`Pipeline::run`] builds its own
/// intermediate documents.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: AppConfig,
    fetcher: ImageFetcher,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = ImageFetcher::new(config.fetch_timeout())?;
        Ok(Self { config, fetcher })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Watermark source for a preset, by name or 1-based position
    pub fn preset_source(&self, key: &str) -> Result<WatermarkSource> {
        let preset = self.config.find_preset(key)?;
        Ok(WatermarkSource::Url(preset.url.clone()))
    }

    /// Watermark source for uploaded image bytes
    pub fn upload_source(&self, bytes: Vec<u8>) -> Result<WatermarkSource> {
        let source = WatermarkSource::Upload(bytes);
        self.check_source_allowed(&source)?;
        Ok(source)
    }

    fn check_source_allowed(&self, source: &WatermarkSource) -> Result<()> {
        if matches!(source, WatermarkSource::Upload(_)) && !self.config.source_mode.allows_upload() {
            return Err(Error::UploadNotAllowed);
        }
        Ok(())
    }

    /// Resolve the watermark and render the overlay page
    pub fn render(
        &self,
        source: &WatermarkSource,
        transparency: f32,
        style: PlacementStyle,
    ) -> Result<OverlayPage> {
        check_transparency(transparency)?;
        self.check_source_allowed(source)?;
        let image = self.fetcher.resolve(source)?;
        render_overlay(&image, transparency, style)
    }

    /// Merge the documents, then watermark every page
    pub fn run<B: AsRef<[u8]>>(
        &self,
        documents: &[B],
        source: &WatermarkSource,
        transparency: f32,
        style: PlacementStyle,
    ) -> Result<Vec<u8>> {
        check_transparency(transparency)?;
        self.check_source_allowed(source)?;

        info!(documents = documents.len(), %style, transparency, "starting merge and watermark");

        let merged = merge_documents(documents)?;
        let overlay = self.render(source, transparency, style)?;
        let watermarked = apply_overlay(merged, &overlay)?;

        finish(watermarked)
    }
}

fn check_transparency(transparency: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&transparency) {
        return Err(Error::InvalidTransparency(transparency));
    }
    Ok(())
}

/// Stamp, compress and serialise the output document
fn finish(mut doc: Document) -> Result<Vec<u8>> {
    stamp_info(&mut doc, PRODUCER, Utc::now());
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    info!(bytes = buffer.len(), "watermarked document ready");
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceMode;

    #[test]
    fn test_preset_source_resolves_url() {
        let pipeline = Pipeline::new(AppConfig::default()).unwrap();
        match pipeline.preset_source("copy-logo-3").unwrap() {
            WatermarkSource::Url(url) => assert!(url.ends_with("COPY-LOGO-3.png")),
            other => panic!("unexpected source {:?}", other),
        }
        assert!(matches!(pipeline.preset_source("9"), Err(Error::UnknownPreset(_))));
    }

    #[test]
    fn test_upload_rejected_in_presets_mode() {
        let config = AppConfig {
            source_mode: SourceMode::Presets,
            ..AppConfig::default()
        };
        let pipeline = Pipeline::new(config).unwrap();

        assert!(matches!(pipeline.upload_source(vec![1, 2, 3]), Err(Error::UploadNotAllowed)));
        let result = pipeline.run(
            &[Vec::<u8>::new()],
            &WatermarkSource::Upload(vec![1, 2, 3]),
            0.5,
            PlacementStyle::Mosaic,
        );
        assert!(matches!(result, Err(Error::UploadNotAllowed)));
    }

    #[test]
    fn test_transparency_checked_before_any_work() {
        // Inputs are garbage, so reaching the merge would give a parse error instead
        let result = produce_watermarked_merge(
            &[b"garbage".to_vec()],
            &WatermarkSource::Upload(Vec::new()),
            1.01,
            PlacementStyle::Centered,
        );
        assert!(matches!(result, Err(Error::InvalidTransparency(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AppConfig {
            fetch_timeout_secs: 0,
            ..AppConfig::default()
        };
        assert!(matches!(Pipeline::new(config), Err(Error::Config(_))));
    }
}
