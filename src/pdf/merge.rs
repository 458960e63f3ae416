//! PDF merging functionality using lopdf

use std::collections::BTreeMap;
use std::path::PathBuf;
use lopdf::{Document, Object, ObjectId, Dictionary};
use tracing::{debug, info, warn};
use crate::error::{Error, Result};

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Options for merging PDF files on disk
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Input PDF file paths in the order they should be merged
    pub input_paths: Vec<PathBuf>,
    /// Output PDF file path
    pub output_path: PathBuf,
}

/// Merge multiple PDF files into a single PDF file
///
/// # Example
///
/// ```no_run
/// use pdf_watermark::pdf::{MergeOptions, merge_pdfs};
/// use std::path::PathBuf;
///
/// let options = MergeOptions {
///     input_paths: vec![
///         PathBuf::from("1. first.pdf"),
///         PathBuf::from("2. second.pdf"),
///     ],
///     output_path: PathBuf::from("merged.pdf"),
/// };
///
/// merge_pdfs(&options).expect("Failed to merge");
/// ```
pub fn merge_pdfs(options: &MergeOptions) -> Result<()> {
    if options.input_paths.is_empty() {
        return Err(Error::NoInput);
    }

    // Validate all input files exist
    for path in &options.input_paths {
        if !path.exists() {
            return Err(Error::FileNotFound(path.clone()));
        }
    }

    let mut inputs = Vec::with_capacity(options.input_paths.len());
    for path in &options.input_paths {
        inputs.push(std::fs::read(path)?);
    }

    let mut merged = merge_documents(&inputs)?;
    merged.compress();
    merged.save(&options.output_path)?;

    Ok(())
}

/// Parse one input stream, tagging failures with its position
pub fn parse_document(index: usize, bytes: &[u8]) -> Result<Document> {
    Document::load_mem(bytes).map_err(|e| Error::Parse {
        index,
        reason: e.to_string(),
    })
}

/// Concatenate the pages of every input document, in order
///
/// Any input that fails to parse aborts the whole merge. Inputs without
/// pages contribute nothing.
pub fn merge_documents<B: AsRef<[u8]>>(inputs: &[B]) -> Result<Document> {
    if inputs.is_empty() {
        return Err(Error::NoInput);
    }

    let mut documents = Vec::with_capacity(inputs.len());
    for (index, bytes) in inputs.iter().enumerate() {
        let doc = parse_document(index, bytes.as_ref())?;
        if doc.get_pages().is_empty() {
            warn!(index, "input document has no pages, skipping");
            continue;
        }
        documents.push(doc);
    }

    Ok(merge_loaded(documents))
}

/// Merge already parsed documents into one
pub fn merge_loaded(documents: Vec<Document>) -> Document {
    let input_count = documents.len();

    // Define a starting max_id for merged document
    let mut max_id = 1;
    let mut page_ids: Vec<ObjectId> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for mut doc in documents {
        // Pages get re-parented below, so pull inherited attributes down first
        flatten_inherited_attributes(&mut doc);

        // Renumber objects in this document to avoid conflicts
        doc.renumber_objects_with(max_id);

        // Update max_id for next document
        max_id = doc.max_id + 1;

        // Collect page IDs from this document
        let pages = doc.get_pages();
        debug!(pages = pages.len(), "collected pages from input");
        page_ids.extend(pages.into_iter().map(|(_, id)| id));

        // The old catalog and page tree nodes are replaced by a single new tree
        objects.extend(doc.objects.into_iter().filter(|(_, object)| {
            !matches!(type_name(object), Some(b"Catalog") | Some(b"Pages"))
        }));
    }

    // Create new document and add all collected objects first
    let mut merged_doc = Document::with_version("1.5");
    merged_doc.objects.extend(objects);

    // new_object_id() must hand out ids above everything we just inserted
    merged_doc.max_id = max_id - 1;

    let pages_id = merged_doc.new_object_id();

    // Create Kids array with all page references
    let kids: Vec<Object> = page_ids
        .iter()
        .map(|&id| Object::Reference(id))
        .collect();

    // Create Pages object
    let mut pages_object = Dictionary::new();
    pages_object.set("Type", Object::Name(b"Pages".to_vec()));
    pages_object.set("Count", Object::Integer(page_ids.len() as i64));
    pages_object.set("Kids", Object::Array(kids));

    // Create Catalog
    let catalog_id = merged_doc.new_object_id();
    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));

    merged_doc.objects.insert(catalog_id, Object::Dictionary(catalog));
    merged_doc.objects.insert(pages_id, Object::Dictionary(pages_object));

    // Set the catalog as the root
    merged_doc.trailer.set("Root", Object::Reference(catalog_id));

    // Update parent references for all pages
    for &page_id in &page_ids {
        if let Ok(Object::Dictionary(dict)) = merged_doc.get_object_mut(page_id) {
            dict.set("Parent", Object::Reference(pages_id));
        }
    }

    info!(inputs = input_count, pages = page_ids.len(), "merged documents");
    merged_doc
}

/// The `/Type` name of a dictionary or stream object
fn type_name(object: &Object) -> Option<&[u8]> {
    let dict = match object {
        Object::Dictionary(dict) => dict,
        Object::Stream(stream) => &stream.dict,
        _ => return None,
    };
    match dict.get(b"Type") {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}

/// Copy inheritable attributes from ancestor page tree nodes onto each page
fn flatten_inherited_attributes(doc: &mut Document) {
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

    for page_id in page_ids {
        let inherited = collect_inherited(doc, page_id);
        if inherited.is_empty() {
            continue;
        }
        if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
            for (key, value) in inherited {
                page.set(key, value);
            }
        }
    }
}

/// Attributes missing on the page but defined on one of its ancestors
fn collect_inherited(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let Ok(Object::Dictionary(page)) = doc.get_object(page_id) else {
        return Vec::new();
    };

    let mut missing: Vec<&[u8]> = INHERITABLE_KEYS
        .iter()
        .copied()
        .filter(|key| page.get(key).is_err())
        .collect();

    let mut found = Vec::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // Bounded walk in case of a cyclic Parent chain
    let mut depth = 0;

    while let Some(parent_id) = parent {
        if missing.is_empty() || depth > 64 {
            break;
        }
        let Ok(Object::Dictionary(node)) = doc.get_object(parent_id) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                found.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }

    found
}
