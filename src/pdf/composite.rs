//! Applying the overlay page to every page of a document
//!
//! The overlay is imported once as a Form XObject. Every page then gets:
//! - its original content wrapped in `q`/`Q`, so a transformation left active
//!   by the page cannot move the watermark
//! - the Form XObject registered in its resources under a free name
//! - a final content stream invoking the Form XObject, painted last and
//!   translated to the page's MediaBox origin

use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::layout::{PageBox, PageDimensions};
use crate::pdf::metadata::media_box;
use crate::watermark::OverlayPage;

/// Allowed difference between page and overlay sizes, in points
const GEOMETRY_TOLERANCE: f64 = 1.0;

/// Base resource name for the imported overlay
const OVERLAY_RESOURCE: &str = "WmOverlay";

/// Draw `overlay` on top of every page of `doc`
///
/// Page count and order are unchanged. Fails without touching any page when a
/// page's size differs from the overlay's.
pub fn apply_overlay(mut doc: Document, overlay: &OverlayPage) -> Result<Document> {
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let target = overlay.dimensions();

    let mut boxes = Vec::with_capacity(page_ids.len());
    for (index, page_id) in page_ids.iter().enumerate() {
        boxes.push(check_geometry(&doc, *page_id, index + 1, &target)?);
    }

    let form_id = import_overlay_form(&mut doc, overlay)?;

    let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let close_id = doc.add_object(Stream::new(Dictionary::new(), b"Q\n".to_vec()));

    for (index, (page_id, page_box)) in page_ids.iter().zip(&boxes).enumerate() {
        let name = add_form_to_page_resources(&mut doc, *page_id, form_id)?;

        let invoke = invoke_content(&name, page_box);
        let invoke_id = doc.add_object(Stream::new(Dictionary::new(), invoke.into_bytes()));

        wrap_and_append_content(&mut doc, *page_id, open_id, close_id, invoke_id)?;
        debug!(page = index + 1, resource = %name, "applied watermark overlay");
    }

    info!(pages = page_ids.len(), "watermark applied to all pages");
    Ok(doc)
}

fn check_geometry(doc: &Document, page_id: ObjectId, page: usize, target: &PageDimensions) -> Result<PageBox> {
    // A page without a MediaBox is rendered as letter size
    let page_box = media_box(doc, page_id)
        .map_err(|e| match e {
            Error::PageBox(reason) => Error::Composite { page, reason },
            other => other,
        })?
        .unwrap_or_else(PageBox::letter);

    let dims = page_box.dimensions;
    if !dims.matches(target, GEOMETRY_TOLERANCE) {
        return Err(Error::Composite {
            page,
            reason: format!(
                "page is {:.1}x{:.1}pt but the watermark overlay is {:.1}x{:.1}pt",
                dims.width.pt(),
                dims.height.pt(),
                target.width.pt(),
                target.height.pt()
            ),
        });
    }
    Ok(page_box)
}

/// Content stream painting the overlay form, moved to the page's MediaBox origin
fn invoke_content(name: &str, page_box: &PageBox) -> String {
    if page_box.is_at_origin() {
        format!("q\n/{} Do\nQ\n", name)
    } else {
        format!(
            "q\n1 0 0 1 {} {} cm\n/{} Do\nQ\n",
            page_box.x.pt(),
            page_box.y.pt(),
            name
        )
    }
}

/// Copy the overlay's drawing objects into `doc` and wrap its content in a Form XObject
fn import_overlay_form(doc: &mut Document, overlay: &OverlayPage) -> Result<ObjectId> {
    let source = overlay.document();
    let skipped = overlay.page_tree_ids();
    let content_id = overlay.content_id();

    // Build complete ID map first
    let mut next_id = doc.max_id;
    let mut id_map: HashMap<ObjectId, ObjectId> = HashMap::new();
    for old_id in source.objects.keys() {
        if skipped.contains(old_id) || *old_id == content_id {
            continue;
        }
        next_id += 1;
        id_map.insert(*old_id, (next_id, 0));
    }

    for (old_id, new_id) in &id_map {
        let object = source.get_object(*old_id)?;
        doc.objects.insert(*new_id, renumber_object_references(object, &id_map));
    }
    doc.max_id = next_id;

    let content_stream = source.get_object(content_id)?.as_stream()?;
    let content = if content_stream.dict.has(b"Filter") {
        content_stream.decompressed_content()?
    } else {
        content_stream.content.clone()
    };

    let resources = renumber_object_references(
        &Object::Dictionary(overlay.resources()?.clone()),
        &id_map,
    );

    let dims = overlay.dimensions();
    let mut form = Dictionary::new();
    form.set("Type", Object::Name(b"XObject".to_vec()));
    form.set("Subtype", Object::Name(b"Form".to_vec()));
    form.set("FormType", Object::Integer(1));
    form.set("BBox", Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Real(dims.width.pt() as f32),
        Object::Real(dims.height.pt() as f32),
    ]));
    form.set("Matrix", Object::Array(vec![
        Object::Integer(1),
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(1),
        Object::Integer(0),
        Object::Integer(0),
    ]));
    form.set("Resources", resources);

    let form_id = doc.add_object(Stream::new(form, content));
    debug!(objects = id_map.len(), "imported watermark overlay");
    Ok(form_id)
}

/// Renumber all object references in an object
fn renumber_object_references(object: &Object, id_map: &HashMap<ObjectId, ObjectId>) -> Object {
    match object {
        Object::Reference(old_id) => {
            Object::Reference(*id_map.get(old_id).unwrap_or(old_id))
        }
        Object::Array(arr) => {
            Object::Array(arr.iter().map(|obj| renumber_object_references(obj, id_map)).collect())
        }
        Object::Dictionary(dict) => Object::Dictionary(renumber_dictionary(dict, id_map)),
        Object::Stream(stream) => {
            let mut renumbered = stream.clone();
            renumbered.dict = renumber_dictionary(&stream.dict, id_map);
            Object::Stream(renumbered)
        }
        _ => object.clone(),
    }
}

fn renumber_dictionary(dict: &Dictionary, id_map: &HashMap<ObjectId, ObjectId>) -> Dictionary {
    let mut new_dict = Dictionary::new();
    for (key, value) in dict.iter() {
        new_dict.set(key.clone(), renumber_object_references(value, id_map));
    }
    new_dict
}

/// Resolve an object that may be an indirect reference to a dictionary
fn resolve_dictionary(doc: &Document, object: &Object) -> Option<Dictionary> {
    match object {
        Object::Dictionary(dict) => Some(dict.clone()),
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(Object::Dictionary(dict)) => Some(dict.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Register the overlay form in the page's XObject resources
///
/// Returns the resource name used, which never shadows an existing entry.
fn add_form_to_page_resources(doc: &mut Document, page_id: ObjectId, form_id: ObjectId) -> Result<String> {
    let mut resources = {
        let page_dict = doc.get_object(page_id)?.as_dict()?;
        page_dict
            .get(b"Resources")
            .ok()
            .and_then(|res| resolve_dictionary(doc, res))
            .unwrap_or_default()
    };

    let mut xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|xo| resolve_dictionary(doc, xo))
        .unwrap_or_default();

    let name = free_resource_name(&xobjects, OVERLAY_RESOURCE);
    xobjects.set(name.as_bytes().to_vec(), Object::Reference(form_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    // The page gets its own copy so shared resource objects stay untouched
    let page_dict = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page_dict.set("Resources", Object::Dictionary(resources));

    Ok(name)
}

fn free_resource_name(dict: &Dictionary, base: &str) -> String {
    if !dict.has(base.as_bytes()) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !dict.has(candidate.as_bytes()))
        .unwrap_or_else(|| base.to_string())
}

/// Content stream references of a page, following an indirect Contents array
fn content_references(doc: &Document, page_dict: &Dictionary) -> Vec<Object> {
    match page_dict.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(arr)) => arr.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(arr)) => arr.clone(),
        _ => Vec::new(),
    }
}

/// Surround the page's content with `q`/`Q` and append the overlay invocation
fn wrap_and_append_content(
    doc: &mut Document,
    page_id: ObjectId,
    open_id: ObjectId,
    close_id: ObjectId,
    invoke_id: ObjectId,
) -> Result<()> {
    let existing = {
        let page_dict = doc.get_object(page_id)?.as_dict()?;
        content_references(doc, page_dict)
    };

    let mut contents = Vec::with_capacity(existing.len() + 3);
    if !existing.is_empty() {
        contents.push(Object::Reference(open_id));
        contents.extend(existing);
        contents.push(Object::Reference(close_id));
    }
    contents.push(Object::Reference(invoke_id));

    let page_dict = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page_dict.set("Contents", Object::Array(contents));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Length, PlacementStyle};
    use crate::watermark::{render_overlay, WatermarkImage};
    use image::{DynamicImage, ImageBuffer, Rgba};

    fn overlay() -> OverlayPage {
        let img = ImageBuffer::from_pixel(20, 10, Rgba([255u8, 0, 0, 255]));
        let image = WatermarkImage::from_image(DynamicImage::ImageRgba8(img)).unwrap();
        render_overlay(&image, 0.5, PlacementStyle::Centered).unwrap()
    }

    /// A document with `count` pages of the given size, each with one content stream
    fn document(count: usize, width: i64, height: i64) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for i in 0..count {
            let content = format!("1 0 0 1 10 10 cm BT /F1 12 Tf (page{}) Tj ET", i + 1);
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
            let mut page = Dictionary::new();
            page.set("Type", Object::Name(b"Page".to_vec()));
            page.set("Parent", Object::Reference(pages_id));
            page.set("MediaBox", Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(width),
                Object::Integer(height),
            ]));
            page.set("Contents", Object::Reference(content_id));
            kids.push(Object::Reference(doc.add_object(Object::Dictionary(page))));
        }
        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(count as i64));
        pages.set("Kids", Object::Array(kids));
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = doc.add_object(Object::Dictionary(catalog));
        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc
    }

    #[test]
    fn test_every_page_gets_overlay_once_in_order() {
        let result = apply_overlay(document(3, 612, 792), &overlay()).unwrap();
        let pages = result.get_pages();
        assert_eq!(pages.len(), 3);

        for (i, page_id) in pages.values().enumerate() {
            let content = String::from_utf8_lossy(&result.get_page_content(*page_id).unwrap()).into_owned();
            assert!(content.contains(&format!("(page{})", i + 1)));
            assert_eq!(content.matches("/WmOverlay Do").count(), 1);

            // Original content is isolated and the overlay is painted last
            assert!(content.starts_with("q\n"));
            let original_end = content.find("ET").unwrap();
            let invoke = content.find("/WmOverlay Do").unwrap();
            assert!(original_end < invoke);
        }
    }

    #[test]
    fn test_overlay_form_registered_in_resources() {
        let result = apply_overlay(document(1, 612, 792), &overlay()).unwrap();
        let page_id = *result.get_pages().values().next().unwrap();
        let page = result.get_object(page_id).unwrap().as_dict().unwrap();
        let form_id = page
            .get(b"Resources").unwrap()
            .as_dict().unwrap()
            .get(b"XObject").unwrap()
            .as_dict().unwrap()
            .get(b"WmOverlay").unwrap()
            .as_reference().unwrap();

        let form = result.get_object(form_id).unwrap().as_stream().unwrap();
        assert_eq!(form.dict.get(b"Subtype").unwrap().as_name().unwrap(), b"Form");
        let content = String::from_utf8_lossy(&form.content);
        assert!(content.contains("/WmAlpha gs"));
        assert!(content.contains("/WmImage Do"));
    }

    #[test]
    fn test_second_application_uses_fresh_name() {
        let once = apply_overlay(document(1, 612, 792), &overlay()).unwrap();
        let twice = apply_overlay(once, &overlay()).unwrap();
        let page_id = *twice.get_pages().values().next().unwrap();
        let content = String::from_utf8_lossy(&twice.get_page_content(page_id).unwrap()).into_owned();
        assert!(content.contains("/WmOverlay Do"));
        assert!(content.contains("/WmOverlay1 Do"));
    }

    #[test]
    fn test_mismatched_page_size_fails() {
        // A4 in points
        let result = apply_overlay(document(2, 595, 842), &overlay());
        match result {
            Err(Error::Composite { page, .. }) => assert_eq!(page, 1),
            other => panic!("expected composite error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_offset_media_box_moves_overlay_onto_page() {
        let mut doc = document(1, 1012, 1292);
        let page_id = *doc.get_pages().values().next().unwrap();
        doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap().set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(400),
                Object::Integer(500),
                Object::Integer(1012),
                Object::Integer(1292),
            ]),
        );

        let result = apply_overlay(doc, &overlay()).unwrap();
        let content = String::from_utf8_lossy(&result.get_page_content(page_id).unwrap()).into_owned();
        let translate = content.find("1 0 0 1 400 500 cm").expect("overlay not translated");
        assert!(translate < content.find("/WmOverlay Do").unwrap());
    }

    #[test]
    fn test_origin_media_box_is_not_translated() {
        let result = apply_overlay(document(1, 612, 792), &overlay()).unwrap();
        let page_id = *result.get_pages().values().next().unwrap();
        let content = String::from_utf8_lossy(&result.get_page_content(page_id).unwrap()).into_owned();
        assert!(content.contains("q\n/WmOverlay Do\nQ\n"));
        assert!(!content.contains("cm\n/WmOverlay Do"));
    }

    #[test]
    fn test_malformed_media_box_names_page() {
        let mut doc = document(2, 612, 792);
        let second = *doc.get_pages().values().nth(1).unwrap();
        doc.get_object_mut(second).unwrap().as_dict_mut().unwrap().set(
            "MediaBox",
            Object::Array(vec![Object::Integer(0), Object::Integer(0), Object::Integer(612)]),
        );

        match apply_overlay(doc, &overlay()) {
            Err(Error::Composite { page, reason }) => {
                assert_eq!(page, 2);
                assert!(reason.contains("MediaBox"));
            }
            other => panic!("expected composite error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_overlay_for_other_size_matches_that_size() {
        let img = ImageBuffer::from_pixel(20, 10, Rgba([255u8, 0, 0, 255]));
        let image = WatermarkImage::from_image(DynamicImage::ImageRgba8(img)).unwrap();
        let a4 = PageDimensions { width: Length(595.0), height: Length(842.0) };
        let overlay = crate::watermark::render_overlay_on(&image, 0.5, PlacementStyle::Mosaic, a4).unwrap();

        assert!(apply_overlay(document(1, 595, 842), &overlay).is_ok());
    }

    #[test]
    fn test_page_without_contents_gets_only_overlay() {
        let mut doc = document(1, 612, 792);
        let page_id = *doc.get_pages().values().next().unwrap();
        doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap().remove(b"Contents");

        let result = apply_overlay(doc, &overlay()).unwrap();
        let page = result.get_object(page_id).unwrap().as_dict().unwrap();
        assert_eq!(page.get(b"Contents").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_free_resource_name() {
        let mut dict = Dictionary::new();
        assert_eq!(free_resource_name(&dict, "WmOverlay"), "WmOverlay");
        dict.set("WmOverlay", Object::Null);
        dict.set("WmOverlay1", Object::Null);
        assert_eq!(free_resource_name(&dict, "WmOverlay"), "WmOverlay2");
    }
}
