//! Watermark image resolution and overlay rendering

pub mod source;
pub mod render;

pub use source::{ImageFetcher, WatermarkImage, WatermarkSource};
pub use render::{render_overlay, render_overlay_on, OverlayPage};
