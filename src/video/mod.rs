//! Video Optimiser (component F, the largest single component by weight).
//! Grounded on the teacher's `engine::ffmpeg_args` module family for
//! argument construction and progress scraping, generalised from a single
//! user-authored `FFmpegPreset` into the planner-driven
//! `Preparing -> {Remux|OnePassEncode|TwoPassEncode|Animated} ->
//! [HardwareRetry|SoftwareFallback] -> Finalising` state machine spec §4.F
//! describes.

pub mod args;
pub mod plan;
pub mod progress;

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClopError, ClopResult};
use crate::optimiser::{BoxFuture, Optimiser, OptimiserContext};
use crate::output_planner::{plan_output, requires_source_deletion};
use crate::path::FilePath;
use crate::probe;
use crate::process::{self, ProcessOptions};
use crate::request::{ItemType, OptimiseOutcome, Request};
use crate::settings::keys;

use args::{build_animated_args, build_remux_args, build_transcode_args, TwoPassStage};
use plan::{build_plan, VideoMode, VideoPlan};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi", "m4v", "wmv", "flv"];
const FFMPEG_TOOL: &str = "ffmpeg";
const FFPROBE_TOOL: &str = "ffprobe";

pub struct VideoOptimiser;

impl Optimiser for VideoOptimiser {
    fn item_type(&self) -> ItemType {
        ItemType::Video
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
    let settings = &context.settings;

    if !source.exists() {
        return Err(ClopError::SourceNotFound(source.value().to_path_buf()));
    }
    let extension = source
        .extension()
        .ok_or_else(|| ClopError::UnsupportedType(source.value().to_path_buf()))?;
    if !VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ClopError::UnsupportedType(source.value().to_path_buf()));
    }

    let source_bytes = std::fs::metadata(source.value()).map(|m| m.len()).map_err(ClopError::Io)?;
    let max_size_bytes = settings.get(keys::MAX_VIDEO_SIZE_MB) as u64 * 1024 * 1024;
    if source_bytes > max_size_bytes {
        return Err(ClopError::SizeLimitExceeded(source_bytes));
    }

    if cancellation.is_cancelled() {
        return Err(ClopError::Cancelled);
    }

    let probe_result = probe::probe(FFPROBE_TOOL, source).await;
    let plan = build_plan(request, probe_result.as_ref(), settings);
    debug!(path = %source, mode = ?plan.mode, "video plan built");

    let temp_output = FilePath::temp_file("clop-video", &plan.container_extension, true);
    if let Some(parent) = temp_output.parent() {
        tokio::fs::create_dir_all(parent.value()).await.map_err(ClopError::Io)?;
    }

    let total_duration = probe_result.as_ref().and_then(|p| p.container.duration_seconds);
    let request_id = request.request_id.clone();

    match plan.mode {
        VideoMode::Animated(_) => {
            run_animated(source, &temp_output, &plan, cancellation.clone()).await?;
        }
        VideoMode::Transcode if plan.remux => {
            let remux_result = run_remux(source, &temp_output, &request_id, total_duration, cancellation.clone()).await;
            if remux_result.is_err() {
                warn!(path = %source, "remux failed, falling back to transcode");
                run_transcode_with_fallback(
                    source,
                    &temp_output,
                    &plan,
                    settings,
                    &request_id,
                    total_duration,
                    source_bytes,
                    cancellation.clone(),
                )
                .await?;
            }
        }
        VideoMode::Transcode => {
            run_transcode_with_fallback(
                source,
                &temp_output,
                &plan,
                settings,
                &request_id,
                total_duration,
                source_bytes,
                cancellation.clone(),
            )
            .await?;
        }
    }

    let candidate_bytes = tokio::fs::metadata(temp_output.value())
        .await
        .map(|m| m.len())
        .map_err(ClopError::Io)?;

    let require_size_reduction = request.metadata.get_bool(
        "RequireSizeReduction",
        settings.get(keys::REQUIRE_SIZE_REDUCTION),
    );
    if require_size_reduction && candidate_bytes >= source_bytes && !matches!(plan.mode, VideoMode::Animated(_)) {
        let _ = tokio::fs::remove_file(temp_output.value()).await;
        info!(path = %source, "original already optimal, no candidate beat source size");
        return Ok(OptimiseOutcome::succeeded(
            request.request_id.clone(),
            source,
            "Original already optimal",
            started_at.elapsed(),
        ));
    }

    finish(
        request,
        source,
        &temp_output,
        source_bytes,
        candidate_bytes,
        &plan,
        settings,
        started_at,
    )
    .await
}

async fn finish(
    request: &Request,
    source: &FilePath,
    temp_output: &FilePath,
    source_bytes: u64,
    candidate_bytes: u64,
    plan: &VideoPlan,
    settings: &crate::settings::SettingsStore,
    started_at: Instant,
) -> ClopResult<OptimiseOutcome> {
    let output_plan = plan_output(source, &plan.container_extension, &request.metadata);

    if let Some(parent) = output_plan.destination.parent() {
        tokio::fs::create_dir_all(parent.value()).await.map_err(ClopError::Io)?;
    }
    tokio::fs::rename(temp_output.value(), output_plan.destination.value())
        .await
        .map_err(ClopError::Io)?;

    let preserve_times = request
        .metadata
        .get_bool("PreserveFileTimes", settings.get(keys::PRESERVE_FILE_TIMES));
    if preserve_times && output_plan.destination != *source {
        if let Ok(source_metadata) = std::fs::metadata(source.value()) {
            if let (Ok(accessed), Ok(modified)) = (source_metadata.accessed(), source_metadata.modified()) {
                let atime = filetime::FileTime::from_system_time(accessed);
                let mtime = filetime::FileTime::from_system_time(modified);
                if let Err(e) = filetime::set_file_times(output_plan.destination.value(), atime, mtime) {
                    warn!(error = %e, "failed to preserve file times on optimised output");
                }
            }
        }
    }

    if requires_source_deletion(&output_plan, source) {
        let _ = tokio::fs::remove_file(source.value()).await;
    }

    let message = format!(
        "Optimised {} -> {} bytes ({:.1}% smaller)",
        source_bytes,
        candidate_bytes,
        100.0 * (1.0 - candidate_bytes as f64 / source_bytes.max(1) as f64)
    );
    Ok(OptimiseOutcome::succeeded(
        request.request_id.clone(),
        &output_plan.destination,
        message,
        started_at.elapsed(),
    ))
}

/// Builds the stderr line sink that scrapes ffmpeg's `-progress pipe:2`
/// output into a percentage, logged at debug level (spec §4.F: "progress
/// tracking"). Not yet wired to `CoordinatorEvent::ProgressChanged` — the
/// optimiser context carries no event sender today, only settings and the
/// registry.
fn progress_sink(request_id: String, total_duration: Option<f64>) -> process::LineSink {
    let mut known_duration = total_duration;
    Box::new(move |line: &str| {
        if known_duration.is_none() {
            if let Some(d) = progress::parse_ffmpeg_duration_from_metadata_line(line) {
                known_duration = Some(d);
            }
        }
        if progress::is_ffmpeg_progress_end(line) {
            debug!(request_id = %request_id, percent = 99.0, "ffmpeg progress");
            return;
        }
        if let Some((elapsed, speed)) = progress::parse_ffmpeg_progress_line(line) {
            let percent = progress::compute_progress_percent(known_duration, elapsed);
            debug!(request_id = %request_id, percent, speed = ?speed, "ffmpeg progress");
        }
    })
}

async fn run_remux(
    source: &FilePath,
    temp_output: &FilePath,
    request_id: &str,
    total_duration: Option<f64>,
    cancellation: CancellationToken,
) -> ClopResult<()> {
    let args = build_remux_args(source, temp_output);
    process::run(
        FFMPEG_TOOL,
        &args,
        &ProcessOptions {
            fail_on_nonzero: true,
            ..Default::default()
        },
        cancellation,
        None,
        Some(progress_sink(request_id.to_string(), total_duration)),
    )
    .await?;
    Ok(())
}

async fn run_animated(
    source: &FilePath,
    temp_output: &FilePath,
    plan: &VideoPlan,
    cancellation: CancellationToken,
) -> ClopResult<()> {
    let args = build_animated_args(source, temp_output, plan);
    process::run(
        FFMPEG_TOOL,
        &args,
        &ProcessOptions {
            fail_on_nonzero: true,
            ..Default::default()
        },
        cancellation,
        None,
        None,
    )
    .await?;
    Ok(())
}

/// Attempts the hardware encoder first (spec §4.F: "retries at a reduced
/// bitrate before falling back to software"), retrying up to
/// `HardwareBitrateRetryLimit` times, then falls back to the software
/// encoder (two-pass when the plan calls for it) on persistent failure or
/// when hardware acceleration is disabled.
#[allow(clippy::too_many_arguments)]
async fn run_transcode_with_fallback(
    source: &FilePath,
    temp_output: &FilePath,
    plan: &VideoPlan,
    settings: &crate::settings::SettingsStore,
    request_id: &str,
    total_duration: Option<f64>,
    source_bytes: u64,
    cancellation: CancellationToken,
) -> ClopResult<()> {
    if plan.hardware_encoder.is_some() {
        let retry_limit = settings.get(keys::HARDWARE_BITRATE_RETRY_LIMIT).max(0) as u32;
        let retry_ratio = settings.get(keys::HARDWARE_BITRATE_RETRY_REDUCTION_RATIO);
        let require_size_reduction = settings.get(keys::REQUIRE_SIZE_REDUCTION);
        let minimum_savings_percent = settings.get(keys::HARDWARE_MINIMUM_SAVINGS_PERCENT);
        let mut attempt_plan = plan.clone();

        for attempt in 0..=retry_limit {
            let args = build_transcode_args(source, temp_output, &attempt_plan, None);
            let result = process::run(
                FFMPEG_TOOL,
                &args,
                &ProcessOptions {
                    fail_on_nonzero: true,
                    ..Default::default()
                },
                cancellation.clone(),
                None,
                Some(progress_sink(request_id.to_string(), total_duration)),
            )
            .await;

            match result {
                Ok(_) if !require_size_reduction => return Ok(()),
                Ok(_) => {
                    let candidate_bytes = tokio::fs::metadata(temp_output.value())
                        .await
                        .map(|m| m.len())
                        .unwrap_or(u64::MAX);
                    let savings_percent = 100.0 * (1.0 - candidate_bytes as f64 / source_bytes.max(1) as f64);
                    if savings_percent >= minimum_savings_percent {
                        return Ok(());
                    }
                    if attempt == retry_limit {
                        warn!(path = %source, savings_percent, "hardware encode below minimum savings after exhausting retries");
                        break;
                    }
                    warn!(attempt, savings_percent, "hardware encode savings below threshold, retrying at reduced bitrate");
                    attempt_plan.bitrate_kbps = attempt_plan.bitrate_kbps.map(|b| ((b as f64) * retry_ratio) as u32);
                    attempt_plan.maxrate_kbps = attempt_plan.maxrate_kbps.map(|b| ((b as f64) * retry_ratio) as u32);
                }
                Err(ClopError::Cancelled) => return Err(ClopError::Cancelled),
                Err(e) => {
                    warn!(attempt, error = %e, "hardware encode attempt failed");
                    attempt_plan.bitrate_kbps = attempt_plan.bitrate_kbps.map(|b| ((b as f64) * retry_ratio) as u32);
                    attempt_plan.maxrate_kbps = attempt_plan.maxrate_kbps.map(|b| ((b as f64) * retry_ratio) as u32);
                }
            }
        }
        warn!(path = %source, "hardware encoder exhausted retries, falling back to software");
    }

    run_software_transcode(source, temp_output, plan, request_id, total_duration, cancellation).await
}

async fn run_software_transcode(
    source: &FilePath,
    temp_output: &FilePath,
    plan: &VideoPlan,
    request_id: &str,
    total_duration: Option<f64>,
    cancellation: CancellationToken,
) -> ClopResult<()> {
    let mut software_plan = plan.clone();
    software_plan.hardware_encoder = None;
    software_plan.bitrate_kbps = None;
    software_plan.maxrate_kbps = None;
    software_plan.bufsize_kbps = None;

    if software_plan.two_pass {
        let first_pass_args = build_transcode_args(source, temp_output, &software_plan, Some(TwoPassStage::First));
        process::run(
            FFMPEG_TOOL,
            &first_pass_args,
            &ProcessOptions {
                fail_on_nonzero: true,
                ..Default::default()
            },
            cancellation.clone(),
            None,
            Some(progress_sink(request_id.to_string(), total_duration)),
        )
        .await?;

        let second_pass_args = build_transcode_args(source, temp_output, &software_plan, Some(TwoPassStage::Second));
        process::run(
            FFMPEG_TOOL,
            &second_pass_args,
            &ProcessOptions {
                fail_on_nonzero: true,
                ..Default::default()
            },
            cancellation,
            None,
            Some(progress_sink(request_id.to_string(), total_duration)),
        )
        .await?;
    } else {
        let args = build_transcode_args(source, temp_output, &software_plan, None);
        process::run(
            FFMPEG_TOOL,
            &args,
            &ProcessOptions {
                fail_on_nonzero: true,
                ..Default::default()
            },
            cancellation,
            None,
            Some(progress_sink(request_id.to_string(), total_duration)),
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimiser::OptimiserRegistry;
    use crate::request::Metadata;
    use crate::settings::SettingsStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_source_yields_source_not_found() {
        let settings = SettingsStore::in_memory();
        let registry = Arc::new(OptimiserRegistry::new());
        let context = OptimiserContext { settings, registry };
        let request = Request {
            request_id: "r1".to_string(),
            item_type: ItemType::Video,
            source_path: FilePath::from_str("/tmp/clop/does-not-exist.mp4").unwrap(),
            metadata: Metadata::new(),
        };
        let err = run(&request, &context, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClopError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.txt");
        std::fs::write(&path, b"not a video").unwrap();

        let settings = SettingsStore::in_memory();
        let registry = Arc::new(OptimiserRegistry::new());
        let context = OptimiserContext { settings, registry };
        let request = Request {
            request_id: "r2".to_string(),
            item_type: ItemType::Video,
            source_path: FilePath::from_path(&path).unwrap(),
            metadata: Metadata::new(),
        };
        let err = run(&request, &context, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClopError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn oversized_source_is_rejected_before_any_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![0u8; 16]).unwrap();

        let settings = SettingsStore::in_memory();
        settings.set(keys::MAX_VIDEO_SIZE_MB, 0);
        let registry = Arc::new(OptimiserRegistry::new());
        let context = OptimiserContext { settings, registry };
        let request = Request {
            request_id: "r3".to_string(),
            item_type: ItemType::Video,
            source_path: FilePath::from_path(&path).unwrap(),
            metadata: Metadata::new(),
        };
        let err = run(&request, &context, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClopError::SizeLimitExceeded(_)));
    }
}
