//! Raster resolution arithmetic and per-page DPI planning.
//!
//! A page is rasterized at the smallest resolution that loses no detail from
//! any raster image drawn on it, with floors for vector content and the
//! user's `--oversample` request.

use serde::{Deserialize, Serialize};

use crate::options::PipelineOptions;
use crate::pdfinfo::PageInfo;

/// Pages containing vector marks are rasterized at this floor DPI.
pub const VECTOR_PAGE_DPI: f64 = 400.0;

/// A horizontal/vertical dots-per-inch pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

impl Resolution {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn square(v: f64) -> Self {
        Self { x: v, y: v }
    }

    pub fn is_square(&self) -> bool {
        (self.x - self.y).abs() < f64::EPSILON
    }

    /// Componentwise maximum with another resolution.
    pub fn take_max(self, other: Resolution) -> Resolution {
        Resolution {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
        }
    }

    /// Swap the axes, as happens when an image is rotated by 90 or 270.
    pub fn flip_axis(self) -> Resolution {
        Resolution {
            x: self.y,
            y: self.x,
        }
    }

    /// Round both axes to `digits` decimal places.
    pub fn round(self, digits: u32) -> Resolution {
        let p = 10f64.powi(digits as i32);
        Resolution {
            x: (self.x * p).round() / p,
            y: (self.y * p).round() / p,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}x{:.2}", self.x, self.y)
    }
}

/// DPI for output where non-square resolution is tolerable.
///
/// Each axis independently takes the maximum of the page's raster content,
/// the vector floor, and the oversample request.
pub fn page_dpi(pageinfo: &PageInfo, options: &PipelineOptions) -> Resolution {
    let content = pageinfo.dpi();
    let vector = if pageinfo.has_vector.is_yes() {
        VECTOR_PAGE_DPI
    } else {
        0.0
    };
    let oversample = options.oversample.unwrap_or(0.0);
    Resolution {
        x: or_floor(content.x, VECTOR_PAGE_DPI).max(vector).max(oversample),
        y: or_floor(content.y, VECTOR_PAGE_DPI).max(vector).max(oversample),
    }
}

/// DPI when square pixels are required, scaled to physical units.
///
/// UserUnit scales the page's physical size, so a page with UserUnit 2 needs
/// double the DPI to preserve its content at the same pixel density.
pub fn page_square_dpi(pageinfo: &PageInfo, options: &PipelineOptions) -> f64 {
    let content = pageinfo.dpi();
    let userunit = pageinfo.user_unit;
    let mut dpi = or_floor(content.x * userunit, VECTOR_PAGE_DPI)
        .max(or_floor(content.y * userunit, VECTOR_PAGE_DPI));
    if pageinfo.has_vector.is_yes() {
        dpi = dpi.max(VECTOR_PAGE_DPI);
    }
    if let Some(oversample) = options.oversample {
        dpi = dpi.max(oversample);
    }
    dpi
}

/// DPI when square pixels are required, in PostScript canvas units.
///
/// Same as [`page_square_dpi`] but without the UserUnit factor; this is the
/// resolution handed to the rasterizer, which works in canvas units.
pub fn canvas_square_dpi(pageinfo: &PageInfo, options: &PipelineOptions) -> f64 {
    let content = pageinfo.dpi();
    let mut dpi = or_floor(content.x, VECTOR_PAGE_DPI).max(or_floor(content.y, VECTOR_PAGE_DPI));
    if pageinfo.has_vector.is_yes() {
        dpi = dpi.max(VECTOR_PAGE_DPI);
    }
    if let Some(oversample) = options.oversample {
        dpi = dpi.max(oversample);
    }
    dpi
}

// A zero axis means "no raster content found"; fall back to the vector floor
// so a blank or vector-only page still rasterizes at a usable resolution.
fn or_floor(value: f64, floor: f64) -> f64 {
    if value > 0.0 { value } else { floor }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_max() {
        let a = Resolution::new(100.0, 300.0);
        let b = Resolution::new(200.0, 150.0);
        assert_eq!(a.take_max(b), Resolution::new(200.0, 300.0));
    }

    #[test]
    fn test_flip_axis() {
        let r = Resolution::new(96.0, 200.0);
        assert_eq!(r.flip_axis(), Resolution::new(200.0, 96.0));
    }

    #[test]
    fn test_round() {
        let r = Resolution::new(300.1234567, 299.9999999);
        let rounded = r.round(6);
        assert!((rounded.x - 300.123457).abs() < 1e-9);
        assert!((rounded.y - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_square_detection() {
        assert!(Resolution::square(300.0).is_square());
        assert!(!Resolution::new(300.0, 200.0).is_square());
    }

    fn pageinfo_with_image(shorthand: [f64; 6]) -> PageInfo {
        use crate::pdfinfo::{Colorspace, Encoding, ImageInfo, ImageKind, Tristate};
        PageInfo {
            page_index: 0,
            mediabox: [0.0, 0.0, 612.0, 792.0],
            user_unit: 1.0,
            rotation: 0,
            has_text: Tristate::No,
            has_vector: Tristate::No,
            images: vec![ImageInfo {
                name: "Im0".into(),
                kind: ImageKind::Image,
                width: 1700,
                height: 1100,
                bits_per_component: 8,
                colorspace: Colorspace::Gray,
                encoding: Encoding::Jpeg,
                shorthand,
            }],
            text_boxes: Vec::new(),
        }
    }

    #[test]
    fn test_page_dpi_keeps_nonsquare_axes() {
        // 1700x1100 px drawn into 612x792 pt: 200 x 100 DPI.
        let page = pageinfo_with_image([612.0, 0.0, 0.0, 792.0, 0.0, 0.0]);
        let options = PipelineOptions::default();
        let dpi = page_dpi(&page, &options);
        assert!((dpi.x - 200.0).abs() < 0.01);
        assert!((dpi.y - 100.0).abs() < 0.01);
        assert!(!dpi.is_square());
    }

    #[test]
    fn test_square_dpi_takes_max_axis() {
        let page = pageinfo_with_image([612.0, 0.0, 0.0, 792.0, 0.0, 0.0]);
        let options = PipelineOptions::default();
        let square = page_square_dpi(&page, &options);
        assert!((square - 200.0).abs() < 0.01);
    }
}
