//! Overlay page rendering
//!
//! Produces a single-page PDF holding nothing but watermark placements. The
//! image is embedded once as an Image XObject and drawn at every placement;
//! an ExtGState carrying the fill alpha is selected before the first draw so
//! the transparency applies uniformly to the whole page.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::{Error, Result};
use crate::layout::{compute_placements, watermark_draw_width, PageDimensions, Placement, PlacementStyle};
use crate::watermark::source::WatermarkImage;

/// Resource name of the watermark image XObject
pub const IMAGE_RESOURCE: &str = "WmImage";

/// Resource name of the transparency ExtGState
pub const ALPHA_RESOURCE: &str = "WmAlpha";

/// A synthetic page containing only watermark placements
#[derive(Debug, Clone)]
pub struct OverlayPage {
    document: Document,
    page_id: ObjectId,
    content_id: ObjectId,
    dimensions: PageDimensions,
    transparency: f32,
    placements: Vec<Placement>,
}

impl OverlayPage {
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn transparency(&self) -> f32 {
        self.transparency
    }

    pub fn dimensions(&self) -> PageDimensions {
        self.dimensions
    }

    /// The one-page document backing this overlay
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Object id of the overlay's content stream
    pub fn content_id(&self) -> ObjectId {
        self.content_id
    }

    /// The overlay page's resources dictionary
    pub fn resources(&self) -> Result<&Dictionary> {
        let page = self.document.get_object(self.page_id)?.as_dict()?;
        Ok(page.get(b"Resources")?.as_dict()?)
    }

    /// Object ids that belong to the page tree rather than the drawing
    pub(crate) fn page_tree_ids(&self) -> Vec<ObjectId> {
        let mut ids = vec![self.page_id];
        if let Ok(Object::Reference(root)) = self.document.trailer.get(b"Root") {
            ids.push(*root);
            if let Ok(Object::Dictionary(catalog)) = self.document.get_object(*root) {
                if let Ok(Object::Reference(pages)) = catalog.get(b"Pages") {
                    ids.push(*pages);
                }
            }
        }
        ids
    }

    /// Serialise the overlay as a standalone PDF
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut doc = self.document.clone();
        doc.compress();
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)?;
        Ok(buffer)
    }
}

/// Render the watermark overlay for a letter-size page
///
/// `transparency` is the fill alpha: 0.0 is invisible, 1.0 fully opaque.
pub fn render_overlay(
    image: &WatermarkImage,
    transparency: f32,
    style: PlacementStyle,
) -> Result<OverlayPage> {
    render_overlay_on(image, transparency, style, PageDimensions::letter())
}

/// Render the watermark overlay for an arbitrary page size
pub fn render_overlay_on(
    image: &WatermarkImage,
    transparency: f32,
    style: PlacementStyle,
    dimensions: PageDimensions,
) -> Result<OverlayPage> {
    if !(0.0..=1.0).contains(&transparency) {
        return Err(Error::InvalidTransparency(transparency));
    }

    let placements = compute_placements(style, &dimensions, watermark_draw_width(), image.aspect())?;
    debug!(%style, count = placements.len(), "computed watermark placements");

    let mut doc = Document::with_version("1.5");

    let image_id = add_image_xobject(&mut doc, image)?;

    let mut gs = Dictionary::new();
    gs.set("Type", Object::Name(b"ExtGState".to_vec()));
    gs.set("ca", Object::Real(transparency));
    gs.set("CA", Object::Real(transparency));
    let gs_id = doc.add_object(Object::Dictionary(gs));

    let content = generate_overlay_content(&placements);
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

    let mut xobjects = Dictionary::new();
    xobjects.set(IMAGE_RESOURCE, Object::Reference(image_id));
    let mut ext_gstates = Dictionary::new();
    ext_gstates.set(ALPHA_RESOURCE, Object::Reference(gs_id));
    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));
    resources.set("ExtGState", Object::Dictionary(ext_gstates));

    let pages_id = doc.new_object_id();

    let mut page = Dictionary::new();
    page.set("Type", Object::Name(b"Page".to_vec()));
    page.set("Parent", Object::Reference(pages_id));
    page.set("MediaBox", Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Real(dimensions.width.pt() as f32),
        Object::Real(dimensions.height.pt() as f32),
    ]));
    page.set("Contents", Object::Reference(content_id));
    page.set("Resources", Object::Dictionary(resources));
    let page_id = doc.add_object(Object::Dictionary(page));

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(1));
    pages.set("Kids", Object::Array(vec![Object::Reference(page_id)]));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    Ok(OverlayPage {
        document: doc,
        page_id,
        content_id,
        dimensions,
        transparency,
        placements,
    })
}

/// Content stream drawing the image at every placement
///
/// The alpha state is selected before anything is drawn.
fn generate_overlay_content(placements: &[Placement]) -> String {
    let mut content = String::from("q\n");
    content.push_str(&format!("/{} gs\n", ALPHA_RESOURCE));

    for p in placements {
        // Image space is the unit square; scale it to the placement box
        content.push_str(&format!(
            "q {} 0 0 {} {} {} cm /{} Do Q\n",
            fmt_num(p.width),
            fmt_num(p.height),
            fmt_num(p.x),
            fmt_num(p.y),
            IMAGE_RESOURCE,
        ));
    }

    content.push_str("Q\n");
    content
}

/// Format a coordinate for a content stream (at most 4 decimals, no trailing zeros)
fn fmt_num(value: f64) -> String {
    let s = format!("{:.4}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Embed the image as an RGB Image XObject, with its alpha channel as an SMask
fn add_image_xobject(doc: &mut Document, image: &WatermarkImage) -> Result<ObjectId> {
    let rgba = image.image().to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::Render(format!("image has no pixels ({}x{})", width, height)));
    }

    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| Error::Render(format!("image too large ({}x{})", width, height)))?;

    let raw = rgba.into_raw();
    if raw.len() != pixel_count * 4 {
        return Err(Error::Render(format!(
            "decoded buffer holds {} bytes, expected {}",
            raw.len(),
            pixel_count * 4
        )));
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    let mut alpha = Vec::with_capacity(pixel_count);
    for chunk in raw.chunks_exact(4) {
        rgb.extend_from_slice(&chunk[..3]);
        alpha.push(chunk[3]);
    }

    let mut dict = image_dict(width, height, "DeviceRGB");

    if image.image().color().has_alpha() {
        let smask_dict = image_dict(width, height, "DeviceGray");
        let smask_id = doc.add_object(flate_stream(smask_dict, &alpha)?);
        dict.set("SMask", Object::Reference(smask_id));
    }

    let image_id = doc.add_object(flate_stream(dict, &rgb)?);
    debug!(width, height, "embedded watermark image");
    Ok(image_id)
}

fn image_dict(width: u32, height: u32, color_space: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict
}

/// Deflate `data` into a stream that later compression passes leave alone
fn flate_stream(mut dict: Dictionary, data: &[u8]) -> Result<Stream> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Render(format!("failed to compress image data: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::Render(format!("failed to compress image data: {}", e)))?;

    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    let mut stream = Stream::new(dict, compressed);
    stream.allows_compression = false;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb, Rgba};

    fn rgba_image(width: u32, height: u32) -> WatermarkImage {
        let img = ImageBuffer::from_pixel(width, height, Rgba([0u8, 0, 255, 100]));
        WatermarkImage::from_image(DynamicImage::ImageRgba8(img)).unwrap()
    }

    fn rgb_image(width: u32, height: u32) -> WatermarkImage {
        let img = ImageBuffer::from_pixel(width, height, Rgb([10u8, 20, 30]));
        WatermarkImage::from_image(DynamicImage::ImageRgb8(img)).unwrap()
    }

    fn content_of(overlay: &OverlayPage) -> String {
        let stream = overlay
            .document()
            .get_object(overlay.content_id())
            .unwrap()
            .as_stream()
            .unwrap();
        String::from_utf8(stream.content.clone()).unwrap()
    }

    #[test]
    fn test_centered_overlay_has_one_placement() {
        let overlay = render_overlay(&rgba_image(200, 100), 0.5, PlacementStyle::Centered).unwrap();

        assert_eq!(overlay.placements().len(), 1);
        let p = overlay.placements()[0];
        assert_eq!((p.x, p.y, p.width, p.height), (252.0, 369.0, 108.0, 54.0));

        let content = content_of(&overlay);
        assert!(content.contains("q 108 0 0 54 252 369 cm /WmImage Do Q"));
        assert_eq!(content.matches(" Do").count(), 1);
    }

    #[test]
    fn test_alpha_selected_before_drawing() {
        let overlay = render_overlay(&rgba_image(10, 10), 0.25, PlacementStyle::Mosaic).unwrap();
        let content = content_of(&overlay);

        let gs_pos = content.find("/WmAlpha gs").unwrap();
        let first_draw = content.find("Do").unwrap();
        assert!(gs_pos < first_draw);
        assert_eq!(content.matches(" Do").count(), overlay.placements().len());
    }

    #[test]
    fn test_extgstate_carries_transparency() {
        let overlay = render_overlay(&rgba_image(10, 10), 0.3, PlacementStyle::Centered).unwrap();
        let resources = overlay.resources().unwrap();
        let gs_ref = resources
            .get(b"ExtGState").unwrap()
            .as_dict().unwrap()
            .get(ALPHA_RESOURCE.as_bytes()).unwrap()
            .as_reference().unwrap();
        let gs = overlay.document().get_object(gs_ref).unwrap().as_dict().unwrap();

        for key in [b"ca".as_slice(), b"CA".as_slice()] {
            match gs.get(key).unwrap() {
                Object::Real(value) => assert!((value - 0.3).abs() < 1e-6),
                other => panic!("unexpected alpha value {:?}", other),
            }
        }
    }

    #[test]
    fn test_alpha_channel_becomes_smask() {
        let with_alpha = render_overlay(&rgba_image(4, 2), 1.0, PlacementStyle::Centered).unwrap();
        let without_alpha = render_overlay(&rgb_image(4, 2), 1.0, PlacementStyle::Centered).unwrap();

        let image_of = |overlay: &OverlayPage| {
            let id = overlay
                .resources().unwrap()
                .get(b"XObject").unwrap()
                .as_dict().unwrap()
                .get(IMAGE_RESOURCE.as_bytes()).unwrap()
                .as_reference().unwrap();
            overlay.document().get_object(id).unwrap().as_stream().unwrap().dict.clone()
        };

        let dict = image_of(&with_alpha);
        assert_eq!(dict.get(b"Width").unwrap().as_i64().unwrap(), 4);
        assert_eq!(dict.get(b"Height").unwrap().as_i64().unwrap(), 2);
        assert!(dict.get(b"SMask").is_ok());
        assert!(image_of(&without_alpha).get(b"SMask").is_err());
    }

    #[test]
    fn test_rejects_out_of_range_transparency() {
        let image = rgba_image(10, 10);
        assert!(matches!(
            render_overlay(&image, 1.5, PlacementStyle::Centered),
            Err(Error::InvalidTransparency(_))
        ));
        assert!(matches!(
            render_overlay(&image, -0.1, PlacementStyle::Centered),
            Err(Error::InvalidTransparency(_))
        ));
        assert!(matches!(
            render_overlay(&image, f32::NAN, PlacementStyle::Centered),
            Err(Error::InvalidTransparency(_))
        ));
    }

    #[test]
    fn test_overlay_serialises_as_one_page_pdf() {
        let overlay = render_overlay(&rgba_image(50, 50), 0.5, PlacementStyle::Mosaic).unwrap();
        let bytes = overlay.to_bytes().unwrap();
        assert!(bytes.starts_with(b"%PDF-"));

        let reloaded = Document::load_mem(&bytes).unwrap();
        assert_eq!(reloaded.get_pages().len(), 1);
    }

    #[test]
    fn test_page_tree_ids_cover_page_pages_and_catalog() {
        let overlay = render_overlay(&rgba_image(5, 5), 0.5, PlacementStyle::Centered).unwrap();
        assert_eq!(overlay.page_tree_ids().len(), 3);
        assert!(!overlay.page_tree_ids().contains(&overlay.content_id()));
    }

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(108.0), "108");
        assert_eq!(fmt_num(75.6), "75.6");
        assert_eq!(fmt_num(0.0), "0");
        assert_eq!(fmt_num(-0.00001), "0");
        assert_eq!(fmt_num(1.0 / 3.0), "0.3333");
    }
}
