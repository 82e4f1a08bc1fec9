//! Single-scale luma SSIM perceptual guard (spec §4.E step 6). Constants
//! and normalisation are pinned by the spec itself (`C1=6.5025,
//! C2=58.5225`, values normalised to `[0,255]`); no teacher precedent for
//! SSIM specifically, so this follows the textbook sliding-window
//! definition the spec's constants are drawn from.

use image::{DynamicImage, GenericImageView};

const C1: f64 = 6.5025;
const C2: f64 = 58.5225;
const WINDOW: u32 = 8;

fn luma_buffer(image: &DynamicImage) -> (Vec<f64>, u32, u32) {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    let data = gray.pixels().map(|p| p.0[0] as f64).collect();
    (data, width, height)
}

/// Computes mean SSIM over non-overlapping `WINDOW x WINDOW` blocks shared
/// between `original` and `candidate`, after resizing `candidate` to
/// `original`'s dimensions if they differ (a retina-downscaled candidate is
/// still compared against the pre-downscale source at the source's scale).
pub fn compute_ssim(original: &DynamicImage, candidate: &DynamicImage) -> f64 {
    let candidate = if original.dimensions() == candidate.dimensions() {
        candidate.clone()
    } else {
        candidate.resize_exact(
            original.width(),
            original.height(),
            image::imageops::FilterType::Triangle,
        )
    };

    let (a, width, height) = luma_buffer(original);
    let (b, _, _) = luma_buffer(&candidate);

    let mut scores = Vec::new();
    let mut y = 0;
    while y + WINDOW <= height {
        let mut x = 0;
        while x + WINDOW <= width {
            scores.push(window_ssim(&a, &b, width, x, y));
            x += WINDOW;
        }
        y += WINDOW;
    }

    if scores.is_empty() {
        return 1.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn window_ssim(a: &[f64], b: &[f64], stride: u32, x0: u32, y0: u32) -> f64 {
    let mut sum_a = 0.0;
    let mut sum_b = 0.0;
    let n = (WINDOW * WINDOW) as f64;

    for dy in 0..WINDOW {
        for dx in 0..WINDOW {
            let idx = ((y0 + dy) * stride + (x0 + dx)) as usize;
            sum_a += a[idx];
            sum_b += b[idx];
        }
    }
    let mean_a = sum_a / n;
    let mean_b = sum_b / n;

    let mut var_a = 0.0;
    let mut var_b = 0.0;
    let mut covar = 0.0;
    for dy in 0..WINDOW {
        for dx in 0..WINDOW {
            let idx = ((y0 + dy) * stride + (x0 + dx)) as usize;
            let da = a[idx] - mean_a;
            let db = b[idx] - mean_b;
            var_a += da * da;
            var_b += db * db;
            covar += da * db;
        }
    }
    var_a /= n;
    var_b /= n;
    covar /= n;

    let numerator = (2.0 * mean_a * mean_b + C1) * (2.0 * covar + C2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + C1) * (var_a + var_b + C2);
    numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn identical_images_have_ssim_near_one() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 64, Rgba([120, 80, 40, 255])));
        let score = compute_ssim(&img, &img);
        assert!(score > 0.999, "expected near-1.0 SSIM, got {score}");
    }

    #[test]
    fn very_different_images_score_lower() {
        let mut noisy = RgbaImage::new(64, 64);
        for (i, pixel) in noisy.pixels_mut().enumerate() {
            let v = ((i * 251) % 256) as u8;
            *pixel = Rgba([v, 255 - v, v / 2, 255]);
        }
        let flat = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 64, Rgba([120, 80, 40, 255])));
        let score = compute_ssim(&flat, &DynamicImage::ImageRgba8(noisy));
        assert!(score < 0.9, "expected SSIM well below 1.0, got {score}");
    }
}
