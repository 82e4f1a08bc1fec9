//! Content-kind classification for the image optimiser's full path
//! (spec §4.E step 3). No direct teacher precedent — grounded on
//! `MogensenJesse-image-optimizer`'s executor, which also classifies
//! inputs before choosing a save profile, generalised here into edge
//! density / unique-colour ratio / whitespace / luminance-variance /
//! alpha-presence heuristics as the spec enumerates them.

use image::{DynamicImage, GenericImageView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Photograph,
    Graphic,
    Document,
}

#[derive(Debug, Clone, Copy)]
pub struct ContentMetrics {
    pub edge_density: f64,
    pub unique_colour_ratio: f64,
    pub whitespace_ratio: f64,
    pub luminance_variance: f64,
    pub has_alpha: bool,
}

const EDGE_DENSITY_PHOTO_THRESHOLD: f64 = 0.12;
const UNIQUE_COLOUR_RATIO_GRAPHIC_THRESHOLD: f64 = 0.02;
const WHITESPACE_DOCUMENT_THRESHOLD: f64 = 0.82;
const LUMINANCE_VARIANCE_PHOTO_THRESHOLD: f64 = 900.0;

pub fn analyse(image: &DynamicImage) -> ContentMetrics {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let pixel_count = (width as u64 * height as u64).max(1);

    let mut luminances = Vec::with_capacity(pixel_count as usize);
    let mut colour_set = std::collections::HashSet::new();
    let mut whitespace_count: u64 = 0;
    let mut has_alpha = false;

    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a < 255 {
            has_alpha = true;
        }
        let luminance = 0.2126 * r as f64 + 0.7152 * g as f64 + 0.0722 * b as f64;
        luminances.push(luminance);
        if r as u32 > 245 && g as u32 > 245 && b as u32 > 245 {
            whitespace_count += 1;
        }
        // Quantise to a coarse palette so near-identical photographic
        // noise doesn't inflate the unique-colour count.
        let key = (r >> 3, g >> 3, b >> 3);
        if colour_set.len() < 1 << 20 {
            colour_set.insert(key);
        }
    }

    let mean = luminances.iter().sum::<f64>() / pixel_count as f64;
    let variance = luminances.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / pixel_count as f64;

    let edge_density = estimate_edge_density(&rgba);
    let unique_colour_ratio = colour_set.len() as f64 / pixel_count as f64;
    let whitespace_ratio = whitespace_count as f64 / pixel_count as f64;

    ContentMetrics {
        edge_density,
        unique_colour_ratio,
        whitespace_ratio,
        luminance_variance: variance,
        has_alpha,
    }
}

/// Sobel-ish gradient magnitude average over a luminance-only downsample,
/// cheap enough to run on every image (no external dependency needed: the
/// `image` crate's `GrayImage` buffer already gives us random pixel access).
fn estimate_edge_density(rgba: &image::RgbaImage) -> f64 {
    let gray = DynamicImage::ImageRgba8(rgba.clone()).to_luma8();
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }
    let mut total = 0f64;
    let mut count = 0u64;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = gray.get_pixel(x + 1, y).0[0] as i32 - gray.get_pixel(x - 1, y).0[0] as i32;
            let gy = gray.get_pixel(x, y + 1).0[0] as i32 - gray.get_pixel(x, y - 1).0[0] as i32;
            let magnitude = ((gx * gx + gy * gy) as f64).sqrt();
            total += magnitude;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (total / count as f64) / 255.0
    }
}

pub fn classify(metrics: &ContentMetrics) -> ContentKind {
    if metrics.whitespace_ratio >= WHITESPACE_DOCUMENT_THRESHOLD
        && metrics.unique_colour_ratio < UNIQUE_COLOUR_RATIO_GRAPHIC_THRESHOLD
    {
        return ContentKind::Document;
    }
    if metrics.edge_density >= EDGE_DENSITY_PHOTO_THRESHOLD
        && metrics.luminance_variance >= LUMINANCE_VARIANCE_PHOTO_THRESHOLD
        && metrics.unique_colour_ratio >= UNIQUE_COLOUR_RATIO_GRAPHIC_THRESHOLD
    {
        return ContentKind::Photograph;
    }
    ContentKind::Graphic
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn flat_white_image_classifies_as_document() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 64, Rgba([250, 250, 250, 255])));
        let metrics = analyse(&img);
        assert_eq!(classify(&metrics), ContentKind::Document);
    }

    #[test]
    fn noisy_high_variance_image_classifies_as_photograph() {
        let mut img = RgbaImage::new(64, 64);
        for (i, pixel) in img.pixels_mut().enumerate() {
            let v = ((i * 97) % 256) as u8;
            *pixel = Rgba([v, (v / 2).wrapping_add(30), (v / 3).wrapping_add(60), 255]);
        }
        let metrics = analyse(&DynamicImage::ImageRgba8(img));
        assert_eq!(classify(&metrics), ContentKind::Photograph);
    }

    #[test]
    fn transparent_pixel_sets_alpha_flag() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 10, 10, 0])));
        let metrics = analyse(&img);
        assert!(metrics.has_alpha);
    }
}
