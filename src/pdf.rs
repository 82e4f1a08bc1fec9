//! PDF Optimiser (component H). No sibling example ships a PostScript-
//! interpreter integration, so this module is grounded on the same
//! argument-list-construction idiom `video::args` and `process::run` already
//! establish in this crate, applied to the byte-scanning heuristics and
//! interpreter invocation spec §4.H prescribes.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClopError, ClopResult};
use crate::optimiser::{BoxFuture, Optimiser, OptimiserContext};
use crate::output_planner::{plan_output, requires_source_deletion};
use crate::path::FilePath;
use crate::process::{self, LineSink, ProcessOptions};
use crate::request::{ItemType, OptimiseOutcome, Request};
use crate::settings::keys;

const INTERPRETER_TOOL: &str = "gs";
const LINEARISE_TOOL: &str = "qpdf";
const PROBE_WINDOW_BYTES: usize = 1_572_864; // 1.5 MiB
const HEADER_WINDOW_BYTES: usize = 8192;
const HIGH_DPI_THRESHOLD: f64 = 250.0;
const HIGH_IMAGE_DENSITY_THRESHOLD: f64 = 0.6;
const LARGE_IMAGE_LONG_EDGE_PX: u32 = 3200;
const LONG_DOCUMENT_PAGE_THRESHOLD: u32 = 40;
const TEXT_IMAGE_DENSITY_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfPreset {
    Graphics,
    Text,
    Mixed,
}

impl PdfPreset {
    fn pdf_settings_flag(self) -> &'static str {
        match self {
            PdfPreset::Graphics => "-dPDFSETTINGS=/printer",
            PdfPreset::Text => "-dPDFSETTINGS=/ebook",
            PdfPreset::Mixed => "-dPDFSETTINGS=/ebook",
        }
    }

    fn image_downsample_dpi(self) -> u32 {
        match self {
            PdfPreset::Graphics => 300,
            PdfPreset::Text => 150,
            PdfPreset::Mixed => 200,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PageScan {
    page_count: u32,
    image_count: u32,
    max_image_long_edge: u32,
    estimated_dpi: f64,
}

pub struct PdfOptimiser;

impl Optimiser for PdfOptimiser {
    fn item_type(&self) -> ItemType {
        ItemType::Pdf
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
    if extension != "pdf" {
        return Err(ClopError::UnsupportedType(source.value().to_path_buf()));
    }

    let bytes = tokio::fs::read(source.value()).await.map_err(ClopError::Io)?;
    validate_header(&bytes, source)?;
    reject_if_encrypted(&bytes, source)?;

    let max_size_bytes = settings.get(keys::MAX_PDF_SIZE_MB) as u64 * 1024 * 1024;
    if bytes.len() as u64 > max_size_bytes {
        return Err(ClopError::SizeLimitExceeded(bytes.len() as u64));
    }

    if cancellation.is_cancelled() {
        return Err(ClopError::Cancelled);
    }

    let aggressive = request.metadata.get_bool("aggressive", false);
    let scan = scan_pages(&bytes);
    let preset = choose_preset(&scan, aggressive);
    debug!(path = %source, ?preset, scan.page_count, scan.image_count, "pdf plan built");

    let mut interpreter_input = source.clone();
    let linearised = try_linearise(source, &cancellation).await;
    if let Some(linearised_path) = &linearised {
        interpreter_input = linearised_path.clone();
    }

    let temp_output = FilePath::temp_file("clop-pdf", "pdf", true);
    if let Some(parent) = temp_output.parent() {
        tokio::fs::create_dir_all(parent.value()).await.map_err(ClopError::Io)?;
    }

    let strip_metadata = request.metadata.get_bool("StripMetadata", true);
    let args = build_interpreter_args(&interpreter_input, &temp_output, preset, strip_metadata);

    let total_pages = scan.page_count.max(1);
    let request_id = request.request_id.clone();
    let on_stdout: LineSink = Box::new(move |line: &str| {
        if let Some(n) = parse_page_progress(line) {
            let percent = (n as f64 / total_pages as f64 * 100.0).min(99.0);
            debug!(request_id = %request_id, percent, "gs progress");
        }
    });

    process::run(
        INTERPRETER_TOOL,
        &args,
        &ProcessOptions {
            fail_on_nonzero: true,
            ..Default::default()
        },
        cancellation,
        Some(on_stdout),
        None,
    )
    .await
    .map_err(|e| match e {
        ClopError::ToolNotFound(_) | ClopError::NonZeroExit(_, _) => e,
        other => other,
    })?;

    if let Some(linearised_path) = linearised {
        let _ = tokio::fs::remove_file(linearised_path.value()).await;
    }

    let candidate_bytes = tokio::fs::metadata(temp_output.value())
        .await
        .map(|m| m.len())
        .map_err(ClopError::Io)?;

    let require_size_improvement = request.metadata.get_bool("RequireSizeImprovement", true);
    if require_size_improvement && candidate_bytes >= bytes.len() as u64 {
        let _ = tokio::fs::remove_file(temp_output.value()).await;
        info!(path = %source, "original already optimal, no candidate beat source size");
        return Ok(OptimiseOutcome::succeeded(
            request.request_id.clone(),
            source,
            "Original already optimal",
            started_at.elapsed(),
        ));
    }

    finish(request, source, &temp_output, bytes.len() as u64, candidate_bytes, started_at).await
}

async fn finish(
    request: &Request,
    source: &FilePath,
    temp_output: &FilePath,
    source_bytes: u64,
    candidate_bytes: u64,
    started_at: Instant,
) -> ClopResult<OptimiseOutcome> {
    let output_plan = plan_output(source, "pdf", &request.metadata);
    if let Some(parent) = output_plan.destination.parent() {
        tokio::fs::create_dir_all(parent.value()).await.map_err(ClopError::Io)?;
    }
    tokio::fs::rename(temp_output.value(), output_plan.destination.value())
        .await
        .map_err(ClopError::Io)?;

    if let Ok(source_metadata) = std::fs::metadata(source.value()) {
        if let (Ok(accessed), Ok(modified)) = (source_metadata.accessed(), source_metadata.modified()) {
            let atime = filetime::FileTime::from_system_time(accessed);
            let mtime = filetime::FileTime::from_system_time(modified);
            let _ = filetime::set_file_times(output_plan.destination.value(), atime, mtime);
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

fn validate_header(bytes: &[u8], source: &FilePath) -> ClopResult<()> {
    let header = &bytes[..bytes.len().min(5)];
    if header != b"%PDF-" {
        return Err(ClopError::InvalidFormat(format!("{source} is not a PDF")));
    }
    Ok(())
}

fn reject_if_encrypted(bytes: &[u8], source: &FilePath) -> ClopResult<()> {
    let window = &bytes[..bytes.len().min(HEADER_WINDOW_BYTES)];
    if window.windows(b"/Encrypt".len()).any(|w| w == b"/Encrypt") {
        return Err(ClopError::EncryptedInput(source.value().to_path_buf()));
    }
    Ok(())
}

/// Scans the first `PROBE_WINDOW_BYTES` for `/Count N` (page count) and
/// `/Subtype /Image` objects with `/Width`/`/Height` pairs, estimating DPI
/// as pixels-per-inch against an 8.5x11 page (spec §4.H "Planning").
fn scan_pages(bytes: &[u8]) -> PageScan {
    let window_len = bytes.len().min(PROBE_WINDOW_BYTES);
    let text = String::from_utf8_lossy(&bytes[..window_len]);

    let page_count = find_first_number_after(&text, "/Count").unwrap_or(1).max(1);

    let mut image_count = 0u32;
    let mut max_long_edge = 0u32;
    let mut max_dpi = 0f64;

    for (idx, _) in text.match_indices("/Subtype /Image") {
        image_count += 1;
        let tail = &text[idx..text.len().min(idx + 512)];
        let width = find_first_number_after(tail, "/Width");
        let height = find_first_number_after(tail, "/Height");
        if let (Some(w), Some(h)) = (width, height) {
            max_long_edge = max_long_edge.max(w.max(h));
            let dpi = (w as f64 / 8.5).max(h as f64 / 11.0);
            max_dpi = max_dpi.max(dpi);
        }
    }

    PageScan {
        page_count,
        image_count,
        max_image_long_edge: max_long_edge,
        estimated_dpi: max_dpi,
    }
}

fn find_first_number_after(text: &str, marker: &str) -> Option<u32> {
    let idx = text.find(marker)?;
    let rest = &text[idx + marker.len()..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn choose_preset(scan: &PageScan, aggressive: bool) -> PdfPreset {
    let image_density = scan.image_count as f64 / scan.page_count.max(1) as f64;

    if scan.estimated_dpi >= HIGH_DPI_THRESHOLD
        || image_density >= HIGH_IMAGE_DENSITY_THRESHOLD
        || scan.max_image_long_edge >= LARGE_IMAGE_LONG_EDGE_PX
    {
        return PdfPreset::Graphics;
    }
    if scan.page_count >= LONG_DOCUMENT_PAGE_THRESHOLD && image_density < TEXT_IMAGE_DENSITY_THRESHOLD {
        return PdfPreset::Text;
    }
    if aggressive {
        return PdfPreset::Graphics;
    }
    PdfPreset::Mixed
}

/// Best-effort pre-pass through `qpdf --linearize`; failures degrade
/// silently and the interpreter runs on the original input (spec §4.H
/// "Linearisation").
async fn try_linearise(source: &FilePath, cancellation: &CancellationToken) -> Option<FilePath> {
    let linearised = FilePath::temp_file("clop-pdf-linearised", "pdf", true);
    if let Some(parent) = linearised.parent() {
        tokio::fs::create_dir_all(parent.value()).await.ok()?;
    }
    let args = vec![
        "--linearize".to_string(),
        "--object-streams=generate".to_string(),
        "--stream-data=compress".to_string(),
        source.to_string(),
        linearised.to_string(),
    ];
    let result = process::run(
        LINEARISE_TOOL,
        &args,
        &ProcessOptions {
            fail_on_nonzero: true,
            ..Default::default()
        },
        cancellation.clone(),
        None,
        None,
    )
    .await;
    match result {
        Ok(_) if linearised.exists() => Some(linearised),
        _ => {
            warn!(path = %source, "linearisation unavailable, continuing with original input");
            None
        }
    }
}

/// Metadata-strip pre/post PostScript snippets neutralise then restore the
/// `/DOCINFO pdfmark` operator so Ghostscript writes a cleared `/DOCINFO`
/// (spec §4.H "Interpreter invocation"). Each is pushed as its own `-c`
/// flag followed by the bare PostScript body as a separate argv element —
/// `process::run` has no shell to strip quoting, so the body must never
/// carry embedded quote characters.
const METADATA_STRIP_PRE: &str = "/pdfmark {cleartomark} bind def";
const METADATA_STRIP_POST: &str = "[/DOCINFO pdfmark";

/// Base arguments fixed per spec §6 "tool argument invariants", followed by
/// the lossy/lossless switch, the preset switches, device/output, optional
/// metadata-strip pre-snippet, optional system ICC profile args, input, and
/// the metadata-strip post-snippet.
fn build_interpreter_args(input: &FilePath, output: &FilePath, preset: PdfPreset, strip_metadata: bool) -> Vec<String> {
    let mut args = vec![
        "-dBATCH".to_string(),
        "-dNOPAUSE".to_string(),
        "-dSAFER".to_string(),
        preset.pdf_settings_flag().to_string(),
        format!("-r{}", preset.image_downsample_dpi()),
        "-dDetectDuplicateImages=true".to_string(),
        "-dColorConversionStrategy=/sRGB".to_string(),
        "-dEmbedAllFonts=true".to_string(),
        "-dSubsetFonts=true".to_string(),
    ];

    if strip_metadata {
        args.push("-c".to_string());
        args.push(METADATA_STRIP_PRE.to_string());
    }

    args.push("-sDEVICE=pdfwrite".to_string());
    args.push(format!("-sFONTPATH={}", system_font_path()));
    args.push(format!("-o{output}", output = output));

    if let Some(icc_args) = system_icc_args() {
        args.extend(icc_args);
    }

    args.push(input.to_string());

    if strip_metadata {
        args.push("-c".to_string());
        args.push(METADATA_STRIP_POST.to_string());
    }

    args
}

fn system_font_path() -> &'static str {
    if cfg!(windows) {
        "C:\\Windows\\Fonts"
    } else if cfg!(target_os = "macos") {
        "/Library/Fonts:/System/Library/Fonts"
    } else {
        "/usr/share/fonts"
    }
}

/// Returns `-sOutputICCProfile=<path>` when a system sRGB profile is present
/// on disk; absent profiles degrade silently per spec §4.H.
fn system_icc_args() -> Option<Vec<String>> {
    const CANDIDATES: &[&str] = &[
        "/usr/share/color/icc/sRGB.icc",
        "/usr/share/color/icc/colord/sRGB.icc",
        "C:\\Windows\\System32\\spool\\drivers\\color\\sRGB Color Space Profile.icm",
    ];
    CANDIDATES
        .iter()
        .find(|path| std::path::Path::new(path).exists())
        .map(|path| vec![format!("-sOutputICCProfile={path}")])
}

fn parse_page_progress(line: &str) -> Option<u32> {
    if let Some(rest) = line.strip_prefix("Page ") {
        return rest.trim().split_whitespace().next()?.parse().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_header() {
        let err = validate_header(b"not a pdf", &FilePath::from_str("/tmp/clop/x.pdf").unwrap()).unwrap_err();
        assert!(matches!(err, ClopError::InvalidFormat(_)));
    }

    #[test]
    fn accepts_valid_pdf_header() {
        validate_header(b"%PDF-1.7\n...", &FilePath::from_str("/tmp/clop/x.pdf").unwrap()).unwrap();
    }

    #[test]
    fn detects_encrypted_marker() {
        let bytes = b"%PDF-1.7\n/Encrypt 5 0 R\n".to_vec();
        let err = reject_if_encrypted(&bytes, &FilePath::from_str("/tmp/clop/x.pdf").unwrap()).unwrap_err();
        assert!(matches!(err, ClopError::EncryptedInput(_)));
    }

    #[test]
    fn scan_counts_pages_and_images() {
        let text = b"/Count 12 /Subtype /Image /Width 4000 /Height 3000".to_vec();
        let scan = scan_pages(&text);
        assert_eq!(scan.page_count, 12);
        assert_eq!(scan.image_count, 1);
        assert_eq!(scan.max_image_long_edge, 4000);
    }

    #[test]
    fn preset_selects_graphics_for_large_images() {
        let scan = PageScan {
            page_count: 5,
            image_count: 3,
            max_image_long_edge: 4000,
            estimated_dpi: 100.0,
        };
        assert_eq!(choose_preset(&scan, false), PdfPreset::Graphics);
    }

    #[test]
    fn preset_selects_text_for_long_sparse_documents() {
        let scan = PageScan {
            page_count: 50,
            image_count: 5,
            max_image_long_edge: 600,
            estimated_dpi: 72.0,
        };
        assert_eq!(choose_preset(&scan, false), PdfPreset::Text);
    }

    #[test]
    fn parses_page_progress_lines() {
        assert_eq!(parse_page_progress("Page 7"), Some(7));
        assert_eq!(parse_page_progress("Processing pages 1 through 40"), None);
    }

    #[test]
    fn metadata_strip_flags_are_separate_argv_elements_with_no_embedded_quotes() {
        let input = FilePath::from_str("/tmp/clop/in.pdf").unwrap();
        let output = FilePath::from_str("/tmp/clop/out.pdf").unwrap();
        let args = build_interpreter_args(&input, &output, PdfPreset::Mixed, true);

        let pre_idx = args.iter().position(|a| a == "-c").unwrap();
        assert_eq!(args[pre_idx + 1], METADATA_STRIP_PRE);
        assert!(!args[pre_idx + 1].contains('"'));

        let post_idx = args.iter().rposition(|a| a == "-c").unwrap();
        assert_eq!(args[post_idx + 1], METADATA_STRIP_POST);
        assert!(!args[post_idx + 1].contains('"'));
        assert_ne!(pre_idx, post_idx);
    }
}
