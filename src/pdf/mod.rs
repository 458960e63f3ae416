//! PDF manipulation module

pub mod merge;
pub mod metadata;
pub mod composite;

// Re-export commonly used items
pub use merge::{merge_documents, merge_pdfs, MergeOptions};
pub use metadata::{count_pages, extract_metadata, inspect, media_box, page_dimensions, PdfMetadata};
pub use composite::apply_overlay;
