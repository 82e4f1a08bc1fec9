//! ffmpeg argument-list construction (spec §6, "tool argument invariants").
//! Grounded on the teacher's `engine::ffmpeg_args::builder`, which already
//! assembles argv as a flat `Vec<String>` rather than a shell string;
//! generalised here from a single user preset to the planner's `VideoPlan`.

use crate::path::FilePath;
use crate::video::plan::{AnimatedFormatTag, Codec, VideoMode, VideoPlan};

const PROGRESS_FLAGS: &[&str] = &["-nostats", "-hide_banner", "-progress", "pipe:2"];

const MP4_FAMILY_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov"];

/// Moves the moov atom to the front of an mp4-family container so playback
/// can start before the whole file downloads (spec §6 "tool argument
/// invariants").
fn push_faststart_if_mp4_family(args: &mut Vec<String>, container_extension: &str) {
    if MP4_FAMILY_EXTENSIONS.contains(&container_extension) {
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
    }
}

pub fn build_remux_args(source: &FilePath, destination: &FilePath) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-i".to_string(), source.to_string()];
    args.extend(PROGRESS_FLAGS.iter().map(|s| s.to_string()));
    args.extend([
        "-map".to_string(),
        "0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
    ]);
    let container_extension = destination.extension().unwrap_or_default();
    push_faststart_if_mp4_family(&mut args, &container_extension);
    args.push(destination.to_string());
    args
}

pub fn build_transcode_args(
    source: &FilePath,
    destination: &FilePath,
    plan: &VideoPlan,
    pass: Option<TwoPassStage>,
) -> Vec<String> {
    let codec = plan.codec.expect("transcode plan always carries a codec");
    let mut args = vec!["-y".to_string(), "-i".to_string(), source.to_string()];
    args.extend(PROGRESS_FLAGS.iter().map(|s| s.to_string()));

    if !plan.filters.is_empty() {
        args.push("-vf".to_string());
        args.push(plan.filters.join(","));
    }

    let encoder = plan.hardware_encoder.clone().unwrap_or_else(|| codec.software_encoder().to_string());
    args.push("-c:v".to_string());
    args.push(encoder);

    match (plan.bitrate_kbps, plan.hardware_encoder.is_some()) {
        (Some(target), true) => {
            args.push("-b:v".to_string());
            args.push(format!("{target}k"));
            if let Some(maxrate) = plan.maxrate_kbps {
                args.push("-maxrate".to_string());
                args.push(format!("{maxrate}k"));
            }
            if let Some(bufsize) = plan.bufsize_kbps {
                args.push("-bufsize".to_string());
                args.push(format!("{bufsize}k"));
            }
        }
        _ => {
            if let Some(crf) = plan.crf {
                args.push("-crf".to_string());
                args.push(crf.to_string());
            }
        }
    }

    if let Some(preset) = &plan.preset {
        args.push("-preset".to_string());
        args.push(preset.clone());
    }

    if let Some(lookahead) = plan.scene_cut_lookahead {
        if matches!(codec, Codec::H264 | Codec::Hevc) && plan.hardware_encoder.is_none() {
            args.push("-x264-params".to_string());
            args.push(format!("rc-lookahead={lookahead}"));
        }
    }

    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());

    if let Some(stage) = pass {
        args.push("-pass".to_string());
        args.push(stage.pass_number().to_string());
        args.push("-passlogfile".to_string());
        args.push(passlog_base(destination));
        match stage {
            TwoPassStage::First => {
                args.push("-an".to_string());
                args.push("-f".to_string());
                args.push("null".to_string());
            }
            TwoPassStage::Second => {
                append_audio_args(&mut args, plan);
            }
        }
    } else {
        append_audio_args(&mut args, plan);
    }

    match pass {
        Some(TwoPassStage::First) => args.push(null_sink().to_string()),
        _ => {
            push_faststart_if_mp4_family(&mut args, &plan.container_extension);
            args.push(destination.to_string());
        }
    }

    args
}

pub fn build_animated_args(source: &FilePath, destination: &FilePath, plan: &VideoPlan) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-i".to_string(), source.to_string()];
    args.extend(PROGRESS_FLAGS.iter().map(|s| s.to_string()));

    let VideoMode::Animated(AnimatedFormatTag(format)) = plan.mode else {
        panic!("build_animated_args called with a non-animated plan");
    };

    let fps_filter = plan
        .filters
        .iter()
        .find(|f| f.starts_with("fps="))
        .cloned()
        .unwrap_or_else(|| "fps=15".to_string());

    match format {
        crate::video::plan::AnimatedFormat::Gif => {
            let filter = format!(
                "[0:v]{fps_filter},split[a][b];[a]palettegen=stats_mode=full[p];[b][p]paletteuse=dither=bayer"
            );
            args.push("-filter_complex".to_string());
            args.push(filter);
        }
        crate::video::plan::AnimatedFormat::Apng => {
            args.push("-vf".to_string());
            args.push(fps_filter);
            args.push("-plays".to_string());
            args.push("0".to_string());
        }
        crate::video::plan::AnimatedFormat::WebP => {
            args.push("-vf".to_string());
            args.push(fps_filter);
            args.push("-loop".to_string());
            args.push("0".to_string());
            args.push("-lossless".to_string());
            args.push("0".to_string());
            args.push("-quality".to_string());
            args.push("70".to_string());
        }
    }

    args.push(destination.to_string());
    args
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoPassStage {
    First,
    Second,
}

impl TwoPassStage {
    fn pass_number(self) -> u8 {
        match self {
            TwoPassStage::First => 1,
            TwoPassStage::Second => 2,
        }
    }
}

/// Shared two-pass log base (spec §4.F, §6): derived from `destination`
/// rather than randomly generated so both passes of the same encode agree
/// on it, while still living in the destination's own temp directory
/// rather than ffmpeg's default `ffmpeg2pass-0.log` in the process CWD —
/// the default collides across the worker pool's concurrent encodes.
fn passlog_base(destination: &FilePath) -> String {
    let stem = destination.stem().unwrap_or("clop2pass");
    destination.with_file_name(&format!("{stem}-2pass")).to_string()
}

fn null_sink() -> &'static str {
    if cfg!(windows) {
        "NUL"
    } else {
        "/dev/null"
    }
}

fn append_audio_args(args: &mut Vec<String>, plan: &VideoPlan) {
    if plan.remove_audio {
        args.push("-an".to_string());
    } else if plan.audio_copy {
        args.push("-c:a".to_string());
        args.push("copy".to_string());
    } else if let Some(codec) = &plan.audio_codec {
        args.push("-c:a".to_string());
        args.push(codec.clone());
        args.push("-b:a".to_string());
        args.push("128k".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ItemType, Metadata, Request};
    use crate::settings::SettingsStore;
    use crate::video::plan::build_plan;

    fn request() -> Request {
        Request {
            request_id: "r1".to_string(),
            item_type: ItemType::Video,
            source_path: FilePath::from_str("/tmp/clop/in.mp4").unwrap(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn remux_args_copy_streams_without_reencoding() {
        let source = FilePath::from_str("/tmp/clop/in.mp4").unwrap();
        let destination = FilePath::from_str("/tmp/clop/out.mp4").unwrap();
        let args = build_remux_args(&source, &destination);
        assert!(args.contains(&"copy".to_string()));
        assert!(!args.iter().any(|a| a == "-crf"));
    }

    #[test]
    fn remux_args_add_faststart_for_mp4_family_only() {
        let source = FilePath::from_str("/tmp/clop/in.mp4").unwrap();
        let mp4_dest = FilePath::from_str("/tmp/clop/out.mp4").unwrap();
        assert!(build_remux_args(&source, &mp4_dest).contains(&"-movflags".to_string()));

        let mkv_dest = FilePath::from_str("/tmp/clop/out.mkv").unwrap();
        assert!(!build_remux_args(&source, &mkv_dest).contains(&"-movflags".to_string()));
    }

    #[test]
    fn two_pass_args_share_a_passlogfile_base_across_passes() {
        let settings = SettingsStore::in_memory();
        let plan = build_plan(&request(), None, &settings);
        let source = FilePath::from_str("/tmp/clop/in.mp4").unwrap();
        let destination = FilePath::from_str("/tmp/clop/out.mp4").unwrap();
        let first = build_transcode_args(&source, &destination, &plan, Some(TwoPassStage::First));
        let second = build_transcode_args(&source, &destination, &plan, Some(TwoPassStage::Second));

        let base_of = |args: &[String]| {
            let idx = args.iter().position(|a| a == "-passlogfile").unwrap();
            args[idx + 1].clone()
        };
        assert_eq!(base_of(&first), base_of(&second));
    }

    #[test]
    fn transcode_args_add_faststart_for_mp4_family_final_output() {
        let settings = SettingsStore::in_memory();
        let plan = build_plan(&request(), None, &settings);
        let source = FilePath::from_str("/tmp/clop/in.mp4").unwrap();
        let destination = FilePath::from_str("/tmp/clop/out.mp4").unwrap();
        let args = build_transcode_args(&source, &destination, &plan, None);
        assert!(args.contains(&"-movflags".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn transcode_args_include_crf_and_preset_for_software_encode() {
        let settings = SettingsStore::in_memory();
        let plan = build_plan(&request(), None, &settings);
        let source = FilePath::from_str("/tmp/clop/in.mp4").unwrap();
        let destination = FilePath::from_str("/tmp/clop/out.mp4").unwrap();
        let args = build_transcode_args(&source, &destination, &plan, None);
        assert!(args.contains(&"-crf".to_string()));
        assert!(args.contains(&"-preset".to_string()));
        assert_eq!(args.last(), Some(&destination.to_string()));
    }

    #[test]
    fn first_pass_redirects_to_null_sink_and_drops_audio() {
        let settings = SettingsStore::in_memory();
        let plan = build_plan(&request(), None, &settings);
        let source = FilePath::from_str("/tmp/clop/in.mp4").unwrap();
        let destination = FilePath::from_str("/tmp/clop/out.mp4").unwrap();
        let args = build_transcode_args(&source, &destination, &plan, Some(TwoPassStage::First));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last(), Some(&null_sink().to_string()));
    }

    #[test]
    fn animated_gif_plan_builds_palette_filter_complex() {
        let mut metadata = Metadata::new();
        metadata.set("video.mode", "gif");
        let request = Request { metadata, ..request() };
        let settings = SettingsStore::in_memory();
        let plan = build_plan(&request, None, &settings);
        let source = FilePath::from_str("/tmp/clop/in.mp4").unwrap();
        let destination = FilePath::from_str("/tmp/clop/out.gif").unwrap();
        let args = build_animated_args(&source, &destination, &plan);
        assert!(args.iter().any(|a| a.contains("palettegen=stats_mode=full")));
    }
}
