//! Background removal for scanned pages.
//!
//! Estimates the paper background per tile, normalizes it to white, then
//! applies a contrast-stretching tone curve. Mono images pass through
//! unchanged; there is no background to remove from 1-bit scans.

use std::path::Path;

use image::{DynamicImage, GrayImage};

use super::{load, save};
use crate::error::Result;

/// Tile edge for background estimation, in pixels.
const TILE: u32 = 16;
/// Target background level after normalization.
const TARGET_BG: f64 = 200.0;
/// Tone curve black point.
const TRC_MIN: f64 = 70.0;
/// Tone curve white point.
const TRC_MAX: f64 = 190.0;

/// Normalize the page background to white and stretch contrast.
pub fn remove_background(input_file: &Path, output_file: &Path) -> Result<()> {
    let image = load(input_file)?;
    let result = match image {
        DynamicImage::ImageRgb8(rgb) => {
            let mut channels: Vec<GrayImage> = Vec::with_capacity(3);
            for c in 0..3 {
                let chan = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                    image::Luma([rgb.get_pixel(x, y).0[c]])
                });
                channels.push(normalize_channel(&chan));
            }
            let merged = image::RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                image::Rgb([
                    channels[0].get_pixel(x, y).0[0],
                    channels[1].get_pixel(x, y).0[0],
                    channels[2].get_pixel(x, y).0[0],
                ])
            });
            DynamicImage::ImageRgb8(merged)
        }
        other => {
            let gray = other.to_luma8();
            DynamicImage::ImageLuma8(normalize_channel(&gray))
        }
    };
    save(&result, output_file)
}

fn normalize_channel(gray: &GrayImage) -> GrayImage {
    let background = estimate_background(gray);
    let (w, h) = gray.dimensions();
    let tiles_x = w.div_ceil(TILE).max(1);

    GrayImage::from_fn(w, h, |x, y| {
        let tx = (x / TILE).min(tiles_x - 1);
        let ty = y / TILE;
        let bg = background[(ty * tiles_x + tx) as usize].max(1.0);
        let value = gray.get_pixel(x, y).0[0] as f64;
        let normalized = value * TARGET_BG / bg;
        image::Luma([tone_curve(normalized)])
    })
}

/// Per-tile background estimate: a high percentile of tile brightness,
/// smoothed over the 3x3 tile neighborhood.
fn estimate_background(gray: &GrayImage) -> Vec<f64> {
    let (w, h) = gray.dimensions();
    let tiles_x = w.div_ceil(TILE).max(1);
    let tiles_y = h.div_ceil(TILE).max(1);
    let mut raw = vec![255.0f64; (tiles_x * tiles_y) as usize];

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut values: Vec<u8> = Vec::with_capacity((TILE * TILE) as usize);
            for y in (ty * TILE)..((ty + 1) * TILE).min(h) {
                for x in (tx * TILE)..((tx + 1) * TILE).min(w) {
                    values.push(gray.get_pixel(x, y).0[0]);
                }
            }
            if values.is_empty() {
                continue;
            }
            values.sort_unstable();
            // 90th percentile approximates paper, robust to ink coverage.
            let ix = (values.len() - 1) * 9 / 10;
            raw[(ty * tiles_x + tx) as usize] = values[ix] as f64;
        }
    }

    // Smooth so tile boundaries do not become visible bands.
    let mut smoothed = raw.clone();
    for ty in 0..tiles_y as i64 {
        for tx in 0..tiles_x as i64 {
            let mut sum = 0.0;
            let mut count = 0.0;
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let ny = ty + dy;
                    let nx = tx + dx;
                    if ny >= 0 && ny < tiles_y as i64 && nx >= 0 && nx < tiles_x as i64 {
                        sum += raw[(ny * tiles_x as i64 + nx) as usize];
                        count += 1.0;
                    }
                }
            }
            smoothed[(ty * tiles_x as i64 + tx) as usize] = sum / count;
        }
    }
    smoothed
}

/// Linear tone curve clipping below `TRC_MIN` and above `TRC_MAX`.
fn tone_curve(value: f64) -> u8 {
    let scaled = (value - TRC_MIN) * 255.0 / (TRC_MAX - TRC_MIN);
    scaled.round().clamp(0.0, 255.0) as u8
}
