//! PDF metadata extraction and page geometry

use std::path::Path;
use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use crate::error::{Error, Result};
use crate::layout::{PageBox, PageDimensions};

/// Count pages by reading the Count field from the Pages dictionary
///
/// Falls back to walking the page tree when Count is missing or unreadable.
fn count_pages_from_catalog(doc: &Document) -> usize {
    let count = doc
        .catalog()
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .and_then(|pages_id| doc.get_object(pages_id))
        .and_then(Object::as_dict)
        .and_then(|pages| pages.get(b"Count"))
        .and_then(Object::as_i64);

    match count {
        Ok(n) if n >= 0 => n as usize,
        _ => doc.get_pages().len(),
    }
}

/// PDF metadata
#[derive(Debug, Clone)]
pub struct PdfMetadata {
    /// Number of pages in the PDF
    pub page_count: usize,
    /// Size of the first page, if it declares one
    pub first_page_size: Option<PageDimensions>,
    /// Document title (if present)
    pub title: Option<String>,
    /// Document author (if present)
    pub author: Option<String>,
    /// Producing application (if present)
    pub producer: Option<String>,
}

/// Extract metadata from PDF bytes
pub fn inspect(bytes: &[u8]) -> Result<PdfMetadata> {
    let doc = Document::load_mem(bytes).map_err(|e| Error::Parse {
        index: 0,
        reason: e.to_string(),
    })?;

    let page_count = count_pages_from_catalog(&doc);

    let first_page_size = match doc.get_pages().values().next() {
        Some(page_id) => page_dimensions(&doc, *page_id)?,
        None => None,
    };

    let info = info_dictionary(&doc);
    let text = |key: &[u8]| {
        info.and_then(|dict| dict.get(key).ok())
            .and_then(|obj| obj.as_str().ok())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    };

    Ok(PdfMetadata {
        page_count,
        first_page_size,
        title: text(b"Title"),
        author: text(b"Author"),
        producer: text(b"Producer"),
    })
}

/// Extract metadata from a PDF file
pub fn extract_metadata(path: &Path) -> Result<PdfMetadata> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    inspect(&std::fs::read(path)?)
}

/// Count the number of pages in a PDF file
pub fn count_pages(path: &Path) -> Result<usize> {
    Ok(extract_metadata(path)?.page_count)
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn as_number(doc: &Document, object: &Object) -> Option<f64> {
    match object {
        Object::Integer(n) => Some(*n as f64),
        Object::Real(r) => Some(*r as f64),
        Object::Reference(id) => as_number(doc, doc.get_object(*id).ok()?),
        _ => None,
    }
}

/// Effective MediaBox of a page, following inheritance up the page tree
///
/// Returns `None` when neither the page nor any ancestor declares a MediaBox.
pub fn media_box(doc: &Document, page_id: ObjectId) -> Result<Option<PageBox>> {
    let mut node_id = Some(page_id);
    let mut depth = 0;

    while let Some(id) = node_id {
        if depth > 64 {
            break;
        }
        let node = doc
            .get_object(id)
            .and_then(Object::as_dict)
            .map_err(|e| Error::PageBox(format!("page tree node {} {}: {}", id.0, id.1, e)))?;

        if let Ok(media_box) = node.get(b"MediaBox") {
            let media_box = match media_box {
                Object::Reference(box_id) => doc
                    .get_object(*box_id)
                    .map_err(|e| Error::PageBox(format!("MediaBox: {}", e)))?,
                other => other,
            };
            let values: Vec<f64> = media_box
                .as_array()
                .map_err(|_| Error::PageBox("MediaBox is not an array".to_string()))?
                .iter()
                .filter_map(|v| as_number(doc, v))
                .collect();

            if values.len() != 4 {
                return Err(Error::PageBox(format!(
                    "MediaBox has {} numeric entries",
                    values.len()
                )));
            }

            return Ok(Some(PageBox::from_corners(values[0], values[1], values[2], values[3])));
        }

        node_id = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }

    Ok(None)
}

/// Effective MediaBox size of a page
pub fn page_dimensions(doc: &Document, page_id: ObjectId) -> Result<Option<PageDimensions>> {
    Ok(media_box(doc, page_id)?.map(|b| b.dimensions))
}

/// Format a timestamp as a PDF date string
pub fn pdf_date(time: DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%SZ").to_string()
}

/// Record the producing application and creation time in the document's Info dictionary
pub fn stamp_info(doc: &mut Document, producer: &str, created: DateTime<Utc>) {
    let mut info = info_dictionary(doc).cloned().unwrap_or_default();
    info.set(
        "Producer",
        Object::String(producer.as_bytes().to_vec(), StringFormat::Literal),
    );
    info.set(
        "CreationDate",
        Object::String(pdf_date(created).into_bytes(), StringFormat::Literal),
    );
    let info_id = doc.add_object(Object::Dictionary(info));
    doc.trailer.set("Info", Object::Reference(info_id));
}
