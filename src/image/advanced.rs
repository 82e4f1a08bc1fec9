//! Advanced codec stage (spec §4.E step 4, optional): stages a PNG snapshot
//! of the working image and tries external encoders in content-appropriate
//! order, keeping the first whose output beats the current candidate.
//! Grounded on `process::run`'s subprocess shape — the same one `pdf.rs`
//! and `video/mod.rs` use to shell out to their own tools.

use std::path::Path;

use image::DynamicImage;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClopError, ClopResult};
use crate::process::{self, ProcessOptions};
use crate::settings::{keys, SettingsStore};

use super::content::ContentKind;
use super::metadata::MetadataPolicy;

struct CodecTool {
    executable: &'static str,
    extension: &'static str,
}

const PHOTOGRAPH_ORDER: &[CodecTool] = &[
    CodecTool { executable: "avifenc", extension: "avif" },
    CodecTool { executable: "cwebp", extension: "webp" },
    CodecTool { executable: "cjpeg", extension: "jpg" },
];

const GRAPHIC_ORDER: &[CodecTool] = &[
    CodecTool { executable: "cwebp", extension: "webp" },
    CodecTool { executable: "avifenc", extension: "avif" },
    CodecTool { executable: "cjpeg", extension: "jpg" },
];

/// Tries each tool in content-kind order against a staged PNG snapshot,
/// returning the first output smaller than `current_best_len`. `cjpeg` is
/// skipped when the image has an alpha channel since JPEG has none to
/// encode. A missing binary (`ClopError::ToolNotFound`) or nonzero exit is
/// treated as "try the next tool", not a hard failure of the whole stage.
/// Metadata-preserving requests skip this stage entirely: none of these
/// external encoders carry EXIF/ICC data through.
pub async fn try_advanced_codecs(
    working: &DynamicImage,
    kind: ContentKind,
    has_alpha: bool,
    policy: &MetadataPolicy,
    current_best_len: usize,
    settings: &SettingsStore,
    cancellation: CancellationToken,
) -> ClopResult<Option<(Vec<u8>, String)>> {
    if !settings.get(keys::ENABLE_ADVANCED_CODECS) {
        return Ok(None);
    }
    if policy.preserve_metadata {
        return Ok(None);
    }

    let order = match kind {
        ContentKind::Photograph => PHOTOGRAPH_ORDER,
        ContentKind::Graphic | ContentKind::Document => GRAPHIC_ORDER,
    };

    let work_dir = tempfile::tempdir().map_err(ClopError::Io)?;
    let snapshot_path = work_dir.path().join("snapshot.png");
    working
        .save_with_format(&snapshot_path, image::ImageFormat::Png)
        .map_err(|e| ClopError::Other(e.into()))?;

    for tool in order {
        if tool.executable == "cjpeg" && has_alpha {
            continue;
        }
        if cancellation.is_cancelled() {
            return Err(ClopError::Cancelled);
        }

        let output_path = work_dir.path().join(format!("candidate.{}", tool.extension));
        let args = build_args(tool, &snapshot_path, &output_path, settings);
        let result = process::run(
            tool.executable,
            &args,
            &ProcessOptions { fail_on_nonzero: true, ..Default::default() },
            cancellation.clone(),
            None,
            None,
        )
        .await;

        if let Err(e) = result {
            debug!(tool = tool.executable, error = %e, "advanced codec tool unavailable, trying next");
            continue;
        }

        let Ok(bytes) = tokio::fs::read(&output_path).await else {
            continue;
        };
        if bytes.len() < current_best_len {
            debug!(tool = tool.executable, bytes = bytes.len(), "advanced codec candidate accepted");
            return Ok(Some((bytes, tool.extension.to_string())));
        }
    }

    Ok(None)
}

fn build_args(tool: &CodecTool, input: &Path, output: &Path, settings: &SettingsStore) -> Vec<String> {
    let quality = settings.get(keys::TARGET_JPEG_QUALITY).clamp(1, 100).to_string();
    let input = input.display().to_string();
    let output = output.display().to_string();
    match tool.executable {
        "avifenc" => vec!["-q".to_string(), quality, input, output],
        "cwebp" => vec!["-q".to_string(), quality, input, "-o".to_string(), output],
        _ => vec!["-quality".to_string(), quality, "-outfile".to_string(), output, input],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_args_places_output_flag_per_tool() {
        let settings = SettingsStore::in_memory();
        let avif = build_args(&PHOTOGRAPH_ORDER[0], Path::new("in.png"), Path::new("out.avif"), &settings);
        assert!(avif.contains(&"in.png".to_string()));
        assert!(avif.contains(&"out.avif".to_string()));

        let cwebp = build_args(&PHOTOGRAPH_ORDER[1], Path::new("in.png"), Path::new("out.webp"), &settings);
        assert!(cwebp.contains(&"-o".to_string()));

        let cjpeg = build_args(&PHOTOGRAPH_ORDER[2], Path::new("in.png"), Path::new("out.jpg"), &settings);
        assert!(cjpeg.contains(&"-outfile".to_string()));
    }

    #[tokio::test]
    async fn disabled_by_default_returns_none() {
        let settings = SettingsStore::in_memory();
        let image = DynamicImage::new_rgb8(4, 4);
        let policy = MetadataPolicy { preserve_metadata: false, strip_gps: true, preserve_color_profiles: true };
        let result = try_advanced_codecs(
            &image,
            ContentKind::Photograph,
            false,
            &policy,
            usize::MAX,
            &settings,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }
}
