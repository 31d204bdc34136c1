//! Skew detection and correction.
//!
//! Finds the text skew angle with a sheared projection profile: for each
//! candidate angle, project dark pixels onto rows along that angle and score
//! the profile by the sum of squared differences between adjacent rows. Text
//! lines produce the spikiest profile when the shear exactly cancels the
//! skew. A coarse sweep brackets the angle, a fine sweep refines it.

use std::path::Path;

use image::{DynamicImage, GrayImage};
use tracing::{debug, info};

use super::{load, rotate_small_angle, save};
use crate::error::Result;

/// Largest skew we attempt to correct, degrees either way.
const SWEEP_RANGE: f64 = 4.5;
const SWEEP_COARSE_STEP: f64 = 0.5;
const SWEEP_FINE_STEP: f64 = 0.1;
/// Below this detected angle the page is considered straight.
const MIN_CORRECTABLE: f64 = 0.05;
/// Pixels darker than this count as ink.
const INK_THRESHOLD: u8 = 128;

/// Deskew `input_file` into `output_file`; returns the corrected angle in
/// degrees (counterclockwise positive).
pub fn deskew(input_file: &Path, output_file: &Path, dpi: f64) -> Result<f64> {
    let image = load(input_file)?;
    let gray = image.to_luma8();

    // Higher-resolution scans are downsampled for detection; the angle is
    // applied to the full-resolution image either way.
    let reduction = if dpi < 150.0 { 1 } else { 2 };
    let detect = if reduction > 1 {
        downsample(&gray, reduction)
    } else {
        gray.clone()
    };

    let angle = find_skew(&detect);
    if angle.abs() < MIN_CORRECTABLE {
        debug!("no skew detected ({angle:.3} deg)");
        save(&image, output_file)?;
        return Ok(0.0);
    }

    info!("deskewing by {angle:.2} degrees");
    let rotated = match image {
        DynamicImage::ImageLuma8(ref buf) => {
            DynamicImage::ImageLuma8(rotate_small_angle(buf, angle))
        }
        ref other => {
            // Rotate channels independently to stay in the source color model.
            let rgb = other.to_rgb8();
            let mut planes = Vec::with_capacity(3);
            for c in 0..3 {
                let plane = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                    image::Luma([rgb.get_pixel(x, y).0[c]])
                });
                planes.push(rotate_small_angle(&plane, angle));
            }
            let merged = image::RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                image::Rgb([
                    planes[0].get_pixel(x, y).0[0],
                    planes[1].get_pixel(x, y).0[0],
                    planes[2].get_pixel(x, y).0[0],
                ])
            });
            DynamicImage::ImageRgb8(merged)
        }
    };
    save(&rotated, output_file)?;
    Ok(angle)
}

/// Detected skew of the text in degrees; positive means the text runs
/// uphill and a counterclockwise correction of the same size fixes it.
pub fn find_skew(gray: &GrayImage) -> f64 {
    let coarse = best_angle(
        gray,
        -SWEEP_RANGE,
        SWEEP_RANGE,
        SWEEP_COARSE_STEP,
    );
    best_angle(
        gray,
        coarse - SWEEP_COARSE_STEP,
        coarse + SWEEP_COARSE_STEP,
        SWEEP_FINE_STEP,
    )
}

fn best_angle(gray: &GrayImage, from: f64, to: f64, step: f64) -> f64 {
    let mut best = 0.0;
    let mut best_score = f64::NEG_INFINITY;
    let mut angle = from;
    while angle <= to + 1e-9 {
        let score = projection_score(gray, angle);
        if score > best_score {
            best_score = score;
            best = angle;
        }
        angle += step;
    }
    best
}

fn projection_score(gray: &GrayImage, degrees: f64) -> f64 {
    let (w, h) = gray.dimensions();
    let shear = degrees.to_radians().tan();
    let mut bins = vec![0u32; (h as usize) + (w as f64 * shear.abs()).ceil() as usize + 2];
    let offset = if shear < 0.0 {
        (w as f64 * shear.abs()).ceil()
    } else {
        0.0
    };

    for y in 0..h {
        for x in 0..w {
            if gray.get_pixel(x, y).0[0] < INK_THRESHOLD {
                let row = (y as f64 + x as f64 * shear + offset) as usize;
                if row < bins.len() {
                    bins[row] += 1;
                }
            }
        }
    }

    let mut score = 0.0;
    for pair in bins.windows(2) {
        let diff = pair[1] as f64 - pair[0] as f64;
        score += diff * diff;
    }
    score
}

fn downsample(gray: &GrayImage, factor: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let (dw, dh) = ((w / factor).max(1), (h / factor).max(1));
    GrayImage::from_fn(dw, dh, |x, y| *gray.get_pixel(x * factor, y * factor))
}
