//! Page geometry and watermark placement calculations

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A length measured in PDF points (1/72 inch)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Length(pub f64);

impl Length {
    /// Create a length from points
    pub fn from_pt(pt: f64) -> Self {
        Length(pt)
    }

    /// Create a length from inches
    pub fn from_inches(inches: f64) -> Self {
        Length(inches * 72.0)
    }

    /// Create a length from millimeters
    pub fn from_mm(mm: f64) -> Self {
        Length(mm * 72.0 / 25.4)
    }

    /// Get the value in points
    pub fn pt(&self) -> f64 {
        self.0
    }

    /// Get the value in inches
    pub fn inches(&self) -> f64 {
        self.0 / 72.0
    }
}

/// Page dimensions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    pub width: Length,
    pub height: Length,
}

impl PageDimensions {
    /// US Letter size (8.5" × 11"), the only target size supported
    pub fn letter() -> Self {
        Self {
            width: Length::from_inches(8.5),
            height: Length::from_inches(11.0),
        }
    }

    /// Whether two page sizes agree within `tolerance` points on both axes
    pub fn matches(&self, other: &PageDimensions, tolerance: f64) -> bool {
        (self.width.pt() - other.width.pt()).abs() <= tolerance
            && (self.height.pt() - other.height.pt()).abs() <= tolerance
    }
}

impl Default for PageDimensions {
    fn default() -> Self {
        Self::letter()
    }
}

/// A page's MediaBox: lower-left corner plus size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x: Length,
    pub y: Length,
    pub dimensions: PageDimensions,
}

impl PageBox {
    /// Letter-size box anchored at the origin
    pub fn letter() -> Self {
        Self {
            x: Length(0.0),
            y: Length(0.0),
            dimensions: PageDimensions::letter(),
        }
    }

    /// Box spanning two opposite corners, in either order
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x: Length::from_pt(x0.min(x1)),
            y: Length::from_pt(y0.min(y1)),
            dimensions: PageDimensions {
                width: Length::from_pt((x1 - x0).abs()),
                height: Length::from_pt((y1 - y0).abs()),
            },
        }
    }

    pub fn is_at_origin(&self) -> bool {
        self.x.pt() == 0.0 && self.y.pt() == 0.0
    }
}

/// Drawn width of every watermark instance (1.5 inches)
pub fn watermark_draw_width() -> Length {
    Length::from_inches(1.5)
}

/// How the watermark is laid out on the overlay page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementStyle {
    /// Tile the image across the page on a fixed grid
    #[default]
    Mosaic,
    /// One instance at the page center
    Centered,
}

impl fmt::Display for PlacementStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementStyle::Mosaic => f.write_str("mosaic"),
            PlacementStyle::Centered => f.write_str("centered"),
        }
    }
}

impl FromStr for PlacementStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mosaic" => Ok(PlacementStyle::Mosaic),
            "centered" | "centred" => Ok(PlacementStyle::Centered),
            other => Err(Error::Config(format!(
                "Unknown watermark style '{}', expected 'mosaic' or 'centered'",
                other
            ))),
        }
    }
}

/// One drawn instance of the watermark, in points from the page's bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Compute where the watermark is drawn on a page
///
/// Every instance is `draw_width` wide with a height that preserves the image's
/// aspect ratio (`aspect` = pixel height / pixel width).
///
/// Mosaic tiling starts at the origin and steps by the *truncated* integer
/// width and height, emitting tiles while the tile origin is still on the page.
/// Tiles in the last row or column may run off the page. With a non-integer
/// draw height the rows overlap slightly instead of leaving gaps.
pub fn compute_placements(
    style: PlacementStyle,
    page: &PageDimensions,
    draw_width: Length,
    aspect: f64,
) -> Result<Vec<Placement>> {
    if !aspect.is_finite() || aspect <= 0.0 {
        return Err(Error::Render(format!("Invalid image aspect ratio: {}", aspect)));
    }

    let width = draw_width.pt();
    let height = width * aspect;
    let page_width = page.width.pt();
    let page_height = page.height.pt();

    match style {
        PlacementStyle::Centered => Ok(vec![Placement {
            x: (page_width - width) / 2.0,
            y: (page_height - height) / 2.0,
            width,
            height,
        }]),
        PlacementStyle::Mosaic => {
            let step_x = width.trunc();
            let step_y = height.trunc();
            if step_x < 1.0 || step_y < 1.0 {
                return Err(Error::Render(format!(
                    "Watermark tile {:.2}x{:.2}pt is too small to tile",
                    width, height
                )));
            }

            let mut placements = Vec::new();
            let mut y = 0.0;
            while y < page_height.trunc() {
                let mut x = 0.0;
                while x < page_width.trunc() {
                    placements.push(Placement { x, y, width, height });
                    x += step_x;
                }
                y += step_y;
            }
            Ok(placements)
        }
    }
}
