//! Image Optimiser (component E). Grounded on
//! `MogensenJesse-image-optimizer`'s `NativeExecutor::optimize_single` for
//! the overall load/transform/save/measure shape, generalised with the
//! content-analysis → save-profile selection, retina downscale, metadata
//! policy, perceptual guard and JPEG bisection spec §4.E requires.

pub mod advanced;
pub mod content;
pub mod metadata;
pub mod ssim;

use std::io::Cursor;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, GenericImageView, ImageEncoder, ImageFormat};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ClopError, ClopResult};
use crate::optimiser::{BoxFuture, Optimiser, OptimiserContext};
use crate::output_planner::{plan_output, requires_source_deletion};
use crate::request::{ItemType, OptimiseOutcome, Request};

use content::{analyse, classify, ContentKind};
use metadata::MetadataPolicy;

const WIC_FAST_PATH_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff"];
const MAX_BISECTION_PROBES: u32 = 8;

pub struct ImageOptimiser;

impl Optimiser for ImageOptimiser {
    fn item_type(&self) -> ItemType {
        ItemType::Image
    }

    fn optimise<'a>(
        &'a self,
        request: &'a Request,
        context: &'a OptimiserContext,
        cancellation: CancellationToken,
    ) -> BoxFuture<'a, ClopResult<OptimiseOutcome>> {
        Box::pin(async move { run(request, context, cancellation).await })
    }
}

async fn run(
    request: &Request,
    context: &OptimiserContext,
    cancellation: CancellationToken,
) -> ClopResult<OptimiseOutcome> {
    let started_at = Instant::now();
    let source = &request.source_path;

    if !source.exists() {
        return Err(ClopError::SourceNotFound(source.value().to_path_buf()));
    }
    let extension = source
        .extension()
        .ok_or_else(|| ClopError::UnsupportedType(source.value().to_path_buf()))?;
    if !WIC_FAST_PATH_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ClopError::UnsupportedType(source.value().to_path_buf()));
    }

    let settings = &context.settings;
    let (width, height) = image::image_dimensions(source.value()).map_err(|e| ClopError::Other(e.into()))?;
    let max_dimension = settings.get(crate::settings::keys::MAX_IMAGE_DIMENSION_PIXELS) as u32;
    let max_pixels = settings.get(crate::settings::keys::MAX_IMAGE_PIXEL_COUNT) as u64;
    if width.max(height) > max_dimension || (width as u64 * height as u64) > max_pixels {
        return Err(ClopError::InputDimensionExceeded { width, height });
    }

    if cancellation.is_cancelled() {
        return Err(ClopError::Cancelled);
    }

    let source_bytes = std::fs::metadata(source.value())
        .map(|m| m.len())
        .map_err(ClopError::Io)?;

    let policy = MetadataPolicy {
        preserve_metadata: request
            .metadata
            .get_bool("PreserveMetadata", settings.get(crate::settings::keys::PRESERVE_METADATA)),
        strip_gps: settings.get(crate::settings::keys::STRIP_GPS),
        preserve_color_profiles: settings.get(crate::settings::keys::PRESERVE_COLOR_PROFILES),
    };

    let downscale_retina = request
        .metadata
        .get_bool("DownscaleRetina", settings.get(crate::settings::keys::DOWNSCALE_RETINA));
    let retina_long_edge = settings.get(crate::settings::keys::RETINA_LONG_EDGE_PIXELS) as u32;
    let needs_retina = downscale_retina && width.max(height) > retina_long_edge;

    let fast_path_enabled = settings.get(crate::settings::keys::ENABLE_WIC_FAST_PATH);
    let wants_full_metadata_path = policy.preserve_metadata && policy.strip_gps;

    let original = image::open(source.value()).map_err(|e| ClopError::Other(e.into()))?;
    let orientation = metadata::read_orientation(source.value());
    let original = normalise_orientation(original, orientation);

    let candidate_bytes;
    let mut target_extension;

    if fast_path_enabled && !needs_retina && !wants_full_metadata_path {
        debug!(path = %source, "attempting WIC-style fast path");
        if let Some((bytes, ext)) = try_fast_path(&original, &extension, source_bytes, settings)? {
            if !perceptual_guard_rejects(&original, &bytes, &ext, settings)? {
                candidate_bytes = bytes;
                target_extension = ext;
                return finish(
                    request,
                    context,
                    source,
                    source_bytes,
                    candidate_bytes,
                    target_extension,
                    policy,
                    started_at,
                )
                .await;
            }
            debug!("fast-path candidate rejected by perceptual guard, falling back to full path");
        }
    }

    debug!(path = %source, "running full image optimisation path");
    let metrics = analyse(&original);
    let kind = classify(&metrics);
    target_extension = choose_save_profile(&extension, kind, metrics.has_alpha);

    let mut working = original.clone();
    if needs_retina {
        working = downscale_lanczos(&working, retina_long_edge);
    }

    let target_quality = request
        .metadata
        .get_i64("TargetJpegQuality", settings.get(crate::settings::keys::TARGET_JPEG_QUALITY))
        .clamp(1, 100) as u8;
    let mut candidate = encode(&working, &target_extension, target_quality)?;

    let require_size_improvement = request.metadata.get_bool(
        "RequireSizeImprovement",
        settings.get(crate::settings::keys::REQUIRE_SIZE_IMPROVEMENT),
    );
    if require_size_improvement && candidate.len() as u64 >= source_bytes && target_extension == "jpg" {
        let min_quality = settings.get(crate::settings::keys::MIN_JPEG_QUALITY_FALLBACK).clamp(1, 100) as u8;
        if let Some(bisected) = bisect_jpeg_quality(&working, min_quality, target_quality, source_bytes) {
            candidate = bisected;
        }
    }

    if let Some((advanced_bytes, advanced_extension)) = advanced::try_advanced_codecs(
        &working,
        kind,
        metrics.has_alpha,
        &policy,
        candidate.len(),
        settings,
        cancellation.clone(),
    )
    .await?
    {
        debug!(path = %source, tool_extension = %advanced_extension, "advanced codec candidate beat full-path candidate");
        candidate = advanced_bytes;
        target_extension = advanced_extension;
    }

    if require_size_improvement && candidate.len() as u64 >= source_bytes {
        info!(path = %source, "original already optimal, no candidate beat source size");
        return Ok(OptimiseOutcome::succeeded(
            request.request_id.clone(),
            source,
            "Original already optimal",
            started_at.elapsed(),
        ));
    }

    // avifenc/cwebp output formats the `image` crate's enabled codec set
    // can't decode back, so the perceptual guard only covers the jpg/png/gif
    // candidates produced by this crate's own encoder.
    let guard_decodable = matches!(target_extension.as_str(), "jpg" | "jpeg" | "png" | "gif");
    if guard_decodable && perceptual_guard_rejects(&original, &candidate, &target_extension, settings)? {
        info!(path = %source, "candidate rejected by perceptual guard, keeping source");
        return Ok(OptimiseOutcome::succeeded(
            request.request_id.clone(),
            source,
            "Original already optimal",
            started_at.elapsed(),
        ));
    }

    candidate_bytes = candidate;
    finish(
        request,
        context,
        source,
        source_bytes,
        candidate_bytes,
        target_extension,
        policy,
        started_at,
    )
    .await
}

async fn finish(
    request: &Request,
    _context: &OptimiserContext,
    source: &crate::path::FilePath,
    source_bytes: u64,
    candidate_bytes: Vec<u8>,
    target_extension: String,
    policy: MetadataPolicy,
    started_at: Instant,
) -> ClopResult<OptimiseOutcome> {
    let plan = plan_output(source, &target_extension, &request.metadata);
    tokio::fs::write(plan.destination.value(), &candidate_bytes)
        .await
        .map_err(ClopError::Io)?;

    metadata::apply_policy(source.value(), plan.destination.value(), policy);

    if requires_source_deletion(&plan, source) {
        let _ = tokio::fs::remove_file(source.value()).await;
    }

    let message = format!(
        "Optimised {} -> {} bytes ({:.1}% smaller)",
        source_bytes,
        candidate_bytes.len(),
        100.0 * (1.0 - candidate_bytes.len() as f64 / source_bytes.max(1) as f64)
    );
    Ok(OptimiseOutcome::succeeded(
        request.request_id.clone(),
        &plan.destination,
        message,
        started_at.elapsed(),
    ))
}

/// Re-encodes the original at its own format/default quality without a
/// full content-analysis pass, accepting the result only if it beats
/// `MinFastPathSavingsPercent`.
fn try_fast_path(
    original: &DynamicImage,
    extension: &str,
    source_bytes: u64,
    settings: &crate::settings::SettingsStore,
) -> ClopResult<Option<(Vec<u8>, String)>> {
    let target_extension = extension.to_string();
    let default_quality = settings.get(crate::settings::keys::TARGET_JPEG_QUALITY).clamp(1, 100) as u8;
    let candidate = encode(original, &target_extension, default_quality)?;
    let min_savings_percent = settings.get(crate::settings::keys::MIN_FAST_PATH_SAVINGS_PERCENT);
    let savings_percent = 100.0 * (1.0 - candidate.len() as f64 / source_bytes.max(1) as f64);
    if savings_percent >= min_savings_percent {
        Ok(Some((candidate, target_extension)))
    } else {
        Ok(None)
    }
}

fn choose_save_profile(source_extension: &str, kind: ContentKind, has_alpha: bool) -> String {
    if source_extension == "gif" {
        return "gif".to_string();
    }
    if source_extension == "jpg" || source_extension == "jpeg" {
        return "jpg".to_string();
    }
    match (kind, has_alpha, source_extension) {
        (ContentKind::Photograph, false, _) => "jpg".to_string(),
        (_, _, "bmp") | (_, _, "tif") | (_, _, "tiff") => "png".to_string(),
        _ => "png".to_string(),
    }
}

fn downscale_lanczos(image: &DynamicImage, long_edge: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let scale = long_edge as f64 / width.max(height) as f64;
    let mut new_width = (width as f64 * scale).round() as u32;
    let mut new_height = (height as f64 * scale).round() as u32;
    new_width -= new_width % 2;
    new_height -= new_height % 2;
    image.resize(
        new_width.max(2),
        new_height.max(2),
        image::imageops::FilterType::Lanczos3,
    )
}

/// Applies the pixel transform for EXIF orientation values 2..8 (spec §4.E
/// step 3) so the decoded buffer is always upright before analysis/encode;
/// values outside that range (1, 0/unset) pass through untouched.
fn normalise_orientation(image: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.fliph().rotate270(),
        6 => image.rotate90(),
        7 => image.fliph().rotate90(),
        8 => image.rotate270(),
        _ => image,
    }
}

fn encode(image: &DynamicImage, target_extension: &str, jpeg_quality: u8) -> ClopResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    match target_extension {
        "jpg" | "jpeg" => {
            let rgb = image.to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut buffer, jpeg_quality);
            encoder
                .write_image(&rgb, rgb.width(), rgb.height(), image::ColorType::Rgb8)
                .map_err(|e| ClopError::Other(e.into()))?;
        }
        "gif" => {
            image
                .write_to(&mut buffer, ImageFormat::Gif)
                .map_err(|e| ClopError::Other(e.into()))?;
        }
        _ => {
            let rgba = image.to_rgba8();
            let encoder = PngEncoder::new_with_quality(
                &mut buffer,
                CompressionType::Default,
                PngFilterType::Adaptive,
            );
            encoder
                .write_image(&rgba, rgba.width(), rgba.height(), image::ColorType::Rgba8)
                .map_err(|e| ClopError::Other(e.into()))?;
        }
    }
    Ok(buffer.into_inner())
}

/// Binary-searches JPEG quality in `[min_quality, max_quality]` for the
/// smallest encoding that still beats `source_bytes`, bounded to
/// `MAX_BISECTION_PROBES` probes.
fn bisect_jpeg_quality(
    image: &DynamicImage,
    min_quality: u8,
    max_quality: u8,
    source_bytes: u64,
) -> Option<Vec<u8>> {
    let mut low = min_quality;
    let mut high = max_quality;
    let mut best: Option<Vec<u8>> = None;
    for _ in 0..MAX_BISECTION_PROBES {
        if low >= high {
            break;
        }
        let mid = low + (high - low) / 2;
        let Ok(candidate) = encode(image, "jpg", mid) else {
            break;
        };
        if (candidate.len() as u64) < source_bytes {
            let improved = best.as_ref().map(|b| candidate.len() < b.len()).unwrap_or(true);
            if improved {
                best = Some(candidate);
            }
            low = mid + 1;
        } else {
            if mid == 0 {
                break;
            }
            high = mid - 1;
        }
    }
    best
}

fn perceptual_guard_rejects(
    original: &DynamicImage,
    candidate_bytes: &[u8],
    target_extension: &str,
    settings: &crate::settings::SettingsStore,
) -> ClopResult<bool> {
    if !settings.get(crate::settings::keys::ENABLE_PERCEPTUAL_GUARD) {
        return Ok(false);
    }
    if !settings.get(crate::settings::keys::REJECT_WHEN_BELOW_SSIM_THRESHOLD) {
        return Ok(false);
    }
    let format = match target_extension {
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        "gif" => ImageFormat::Gif,
        _ => ImageFormat::Png,
    };
    let candidate_image = image::load_from_memory_with_format(candidate_bytes, format)
        .map_err(|e| ClopError::Other(e.into()))?;
    let score = ssim::compute_ssim(original, &candidate_image);
    let threshold = settings.get(crate::settings::keys::SSIM_REJECTION_THRESHOLD);
    Ok(score < threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimiser::OptimiserRegistry;
    use crate::request::Metadata;
    use crate::settings::SettingsStore;
    use image::{Rgba, RgbaImage};
    use std::sync::Arc;

    fn write_test_png(path: &std::path::Path) {
        let mut img = RgbaImage::new(256, 256);
        for (i, pixel) in img.pixels_mut().enumerate() {
            let v = ((i * 37) % 256) as u8;
            *pixel = Rgba([v, v.wrapping_add(40), v.wrapping_add(80), 255]);
        }
        DynamicImage::ImageRgba8(img)
            .save_with_format(path, ImageFormat::Png)
            .unwrap();
    }

    #[tokio::test]
    async fn optimises_png_photograph_into_smaller_output() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("photo.png");
        write_test_png(&source_path);

        let settings = SettingsStore::in_memory();
        let registry = Arc::new(OptimiserRegistry::new());
        let context = OptimiserContext {
            settings: settings.clone(),
            registry,
        };
        let request = Request {
            request_id: "r1".to_string(),
            item_type: ItemType::Image,
            source_path: crate::path::FilePath::from_path(&source_path).unwrap(),
            metadata: Metadata::new(),
        };

        let outcome = run(&request, &context, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, crate::request::Status::Succeeded);
    }

    #[tokio::test]
    async fn missing_source_yields_source_not_found() {
        let settings = SettingsStore::in_memory();
        let registry = Arc::new(OptimiserRegistry::new());
        let context = OptimiserContext { settings, registry };
        let request = Request {
            request_id: "r2".to_string(),
            item_type: ItemType::Image,
            source_path: crate::path::FilePath::from_str("/tmp/clop/does-not-exist.png").unwrap(),
            metadata: Metadata::new(),
        };
        let err = run(&request, &context, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClopError::SourceNotFound(_)));
    }

    #[test]
    fn save_profile_keeps_jpeg_as_jpeg() {
        assert_eq!(choose_save_profile("jpeg", ContentKind::Photograph, false), "jpg");
    }

    #[test]
    fn save_profile_routes_non_alpha_photograph_to_jpeg() {
        assert_eq!(choose_save_profile("bmp", ContentKind::Photograph, false), "jpg");
    }

    #[test]
    fn save_profile_keeps_gif_as_gif() {
        assert_eq!(choose_save_profile("gif", ContentKind::Graphic, false), "gif");
    }

    #[test]
    fn normalise_orientation_swaps_dimensions_for_90_and_270() {
        let image = DynamicImage::new_rgb8(40, 20);
        assert_eq!(normalise_orientation(image.clone(), 6).dimensions(), (20, 40));
        assert_eq!(normalise_orientation(image.clone(), 8).dimensions(), (20, 40));
        assert_eq!(normalise_orientation(image.clone(), 3).dimensions(), (40, 20));
        assert_eq!(normalise_orientation(image, 1).dimensions(), (40, 20));
    }
}
