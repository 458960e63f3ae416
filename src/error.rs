//! Error types for the PDF watermark library

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the PDF watermark library
///
/// Every variant aborts the whole pipeline; no partial output is produced.
#[derive(Error, Debug)]
pub enum Error {
    /// Watermark URL unreachable, rejected, or answered with a non-success status
    #[error("Failed to fetch watermark image: {0}")]
    Fetch(String),

    /// Watermark bytes are not a decodable raster image
    #[error("Failed to decode watermark image: {0}")]
    Decode(String),

    /// An input stream is not a valid PDF document
    #[error("Input document {index} is not a valid PDF: {reason}")]
    Parse { index: usize, reason: String },

    /// The watermark image cannot be drawn onto the overlay page
    #[error("Failed to render watermark overlay: {0}")]
    Render(String),

    /// A page and the overlay page have incompatible geometry
    #[error("Cannot apply watermark to page {page}: {reason}")]
    Composite { page: usize, reason: String },

    /// A page's MediaBox or page tree node cannot be read
    #[error("Invalid page box: {0}")]
    PageBox(String),

    /// PDF processing error while writing output
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration file or value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Transparency outside [0, 1]
    #[error("Transparency must be between 0.0 and 1.0, got {0}")]
    InvalidTransparency(f32),

    /// Uploaded watermark used while the configuration only allows presets
    #[error("Custom watermark uploads are disabled; choose one of the presets")]
    UploadNotAllowed,

    /// No preset with the requested name or position
    #[error("Unknown watermark preset: {0}")]
    UnknownPreset(String),

    /// Nothing to merge
    #[error("No input documents provided")]
    NoInput,

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}
