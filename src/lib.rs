//! PDF Watermark Library
//!
//! Merges PDF documents into one file and overlays a watermark image on
//! every page. This library provides functionality to:
//! - Merge multiple PDF documents, preserving document and page order
//! - Resolve a watermark image from a URL or uploaded bytes
//! - Render an overlay page with the image tiled (mosaic) or centered
//! - Composite the overlay onto every page with adjustable transparency
//!
//! # Example
//!
//! ```no_run
//! use pdf_watermark::{produce_watermarked_merge, PlacementStyle, WatermarkSource};
//!
//! let documents = vec![
//!     std::fs::read("1. intro.pdf").unwrap(),
//!     std::fs::read("2. advanced.pdf").unwrap(),
//! ];
//! let logo = std::fs::read("logo.png").unwrap();
//!
//! let pdf = produce_watermarked_merge(
//!     &documents,
//!     &WatermarkSource::Upload(logo),
//!     0.5,
//!     PlacementStyle::Mosaic,
//! ).expect("Failed to watermark PDFs");
//!
//! std::fs::write("merged_watermarked.pdf", pdf).unwrap();
//! ```

pub mod error;
pub mod config;
pub mod layout;
pub mod pdf;
pub mod watermark;
pub mod pipeline;

// Re-export commonly used items
pub use error::{Error, Result};
pub use config::{AppConfig, Preset, SourceMode, OUTPUT_CONTENT_TYPE, OUTPUT_FILE_NAME};
pub use layout::PlacementStyle;
pub use pipeline::{produce_watermarked_merge, Pipeline};
pub use watermark::{WatermarkImage, WatermarkSource};
