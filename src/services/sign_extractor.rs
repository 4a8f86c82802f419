//! Sign region extraction and enhancement
//!
//! The route placard sits at the top front of the vehicle, so the sign region
//! is the top 35% of the vehicle box. Enhancement is deterministic and
//! parameter-fixed to keep the OCR input distribution stable across lighting:
//! grayscale → CLAHE (8×8 tiles, clip 2.0) → Gaussian adaptive threshold
//! (block 11, C = 2).

use crate::domain::types::BoundingBox;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;
use tracing::debug;

/// Fraction of the vehicle height that holds the sign
pub const SIGN_REGION_FRACTION: f32 = 0.35;

const CLAHE_TILE_GRID: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 2.0;
const THRESHOLD_BLOCK_SIZE: usize = 11;
const THRESHOLD_C: f32 = 2.0;

/// Binarized sign image ready for OCR
#[derive(Debug, Clone)]
pub struct EnhancedRegion {
    image: GrayImage,
}

impl EnhancedRegion {
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// PNG encoding for remote OCR backends
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Cursor::new(Vec::new());
        self.image.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}

/// Stateless sign extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct SignExtractor;

impl SignExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Crop the sign region of a vehicle box and enhance it.
    ///
    /// Returns `None` when the crop has no area, which tells the caller to
    /// move on to the next candidate box.
    pub fn extract(&self, image: &DynamicImage, bbox: &BoundingBox) -> Option<EnhancedRegion> {
        let Some((x, y, width, height)) = pixel_rect(image.width(), image.height(), bbox) else {
            debug!(bbox = ?bbox, "sign_crop_empty");
            return None;
        };

        let sign_height = (height as f32 * SIGN_REGION_FRACTION) as u32;
        if sign_height == 0 {
            debug!(bbox = ?bbox, vehicle_height = %height, "sign_crop_empty");
            return None;
        }

        let gray = image.crop_imm(x, y, width, sign_height).to_luma8();
        let equalized = equalize_clahe(&gray, CLAHE_TILE_GRID, CLAHE_CLIP_LIMIT);
        let binary = adaptive_threshold_gaussian(&equalized, THRESHOLD_BLOCK_SIZE, THRESHOLD_C);

        debug!(x = %x, y = %y, width = %width, height = %sign_height, "sign_region_extracted");
        Some(EnhancedRegion { image: binary })
    }
}

/// Clamp a float box to the image and truncate to whole pixels.
/// Returns `(x, y, width, height)` or `None` for an empty intersection.
fn pixel_rect(img_w: u32, img_h: u32, bbox: &BoundingBox) -> Option<(u32, u32, u32, u32)> {
    if bbox.is_degenerate() {
        return None;
    }

    let clamp = |v: f32, max: u32| (v as i64).clamp(0, max as i64) as u32;
    let x1 = clamp(bbox.x1, img_w);
    let x2 = clamp(bbox.x2, img_w);
    let y1 = clamp(bbox.y1, img_h);
    let y2 = clamp(bbox.y2, img_h);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into at most `grid × grid` tiles; each tile gets a
/// clipped-histogram LUT and pixels blend the four nearest tile LUTs bilinearly.
pub fn equalize_clahe(gray: &GrayImage, grid: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 || grid == 0 {
        return gray.clone();
    }

    let tile_w = w.div_ceil(grid.min(w));
    let tile_h = h.div_ceil(grid.min(h));
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, y0) = (tx * tile_w, ty * tile_h);
            let (x1, y1) = ((x0 + tile_w).min(w), (y0 + tile_h).min(h));

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            luts.push(clipped_lut(&mut hist, (x1 - x0) * (y1 - y0), clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32, v: usize| luts[(ty * tiles_x + tx) as usize][v] as f32;

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let (ty0, ty1, wy) = tile_neighbors(y, tile_h, tiles_y);
        for x in 0..w {
            let (tx0, tx1, wx) = tile_neighbors(x, tile_w, tiles_x);
            let v = gray.get_pixel(x, y).0[0] as usize;

            let top = lut_at(tx0, ty0, v) * (1.0 - wx) + lut_at(tx1, ty0, v) * wx;
            let bottom = lut_at(tx0, ty1, v) * (1.0 - wx) + lut_at(tx1, ty1, v) * wx;
            let value = top * (1.0 - wy) + bottom * wy;

            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Clip the histogram, redistribute the excess evenly, and build the CDF lookup table
fn clipped_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }

    let bonus = excess / 256;
    let residual = (excess % 256) as usize;
    for (i, count) in hist.iter_mut().enumerate() {
        *count += bonus + u32::from(i < residual);
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = (cdf as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Neighboring tile indices along one axis and the blend weight toward the second
#[inline]
fn tile_neighbors(pos: u32, tile: u32, tiles: u32) -> (u32, u32, f32) {
    let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let i0 = f.floor() as u32;
    if i0 + 1 >= tiles {
        return (tiles - 1, tiles - 1, 0.0);
    }
    (i0, i0 + 1, f - i0 as f32)
}

/// Gaussian-weighted adaptive threshold: a pixel becomes 255 when it is brighter
/// than its weighted neighborhood mean minus `c`, otherwise 0. Borders replicate.
pub fn adaptive_threshold_gaussian(gray: &GrayImage, block_size: usize, c: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }

    let kernel = gaussian_kernel(block_size);
    let radius = (kernel.len() / 2) as i64;
    let (wi, hi) = (w as i64, h as i64);

    // Horizontal pass
    let mut horizontal = vec![0f32; (w * h) as usize];
    for y in 0..h {
        for x in 0..wi {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x + k as i64 - radius).clamp(0, wi - 1) as u32;
                acc += weight * gray.get_pixel(sx, y).0[0] as f32;
            }
            horizontal[(y as i64 * wi + x) as usize] = acc;
        }
    }

    // Vertical pass and threshold
    let mut out = GrayImage::new(w, h);
    for y in 0..hi {
        for x in 0..wi {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y + k as i64 - radius).clamp(0, hi - 1);
                acc += weight * horizontal[(sy * wi + x) as usize];
            }
            let mean = acc.round();
            let src = gray.get_pixel(x as u32, y as u32).0[0] as f32;
            let value = if src > mean - c { 255 } else { 0 };
            out.put_pixel(x as u32, y as u32, Luma([value]));
        }
    }
    out
}

/// Normalized 1-D Gaussian kernel with the sigma OpenCV derives from the size
fn gaussian_kernel(size: usize) -> Vec<f32> {
    let size = if size % 2 == 0 { size + 1 } else { size.max(1) };
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size / 2) as f32;

    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}
