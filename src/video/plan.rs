//! Video planning decisions (spec §4.F). No single teacher file owns this
//! whole decision tree; the encoder-priority / hardware-then-software
//! shape is grounded on `FFmpegPreset`'s `EncoderType`/`RateControlMode`
//! fields in the teacher's domain module, generalised from a
//! user-authored preset into a planner that derives the same decisions
//! from probe facts and request metadata.

use crate::probe::ProbeResult;
use crate::request::{Metadata, Request};
use crate::settings::{keys, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Hevc,
    Vp9,
    Av1,
}

impl Codec {
    pub fn software_encoder(self) -> &'static str {
        match self {
            Codec::H264 => "libx264",
            Codec::Hevc => "libx265",
            Codec::Vp9 => "libvpx-vp9",
            Codec::Av1 => "libsvtav1",
        }
    }

    pub fn hardware_encoder_candidates(self) -> &'static [&'static str] {
        match self {
            Codec::H264 => &["h264_nvenc", "h264_amf", "h264_qsv"],
            Codec::Hevc => &["hevc_nvenc", "hevc_amf", "hevc_qsv"],
            Codec::Av1 => &["av1_nvenc", "av1_qsv"],
            Codec::Vp9 => &[],
        }
    }

    pub fn base_crf(self) -> u32 {
        match self {
            Codec::H264 => 23,
            Codec::Hevc => 26,
            Codec::Vp9 => 32,
            Codec::Av1 => 30,
        }
    }

    pub fn default_preset(self, aggressive: bool) -> &'static str {
        match (self, aggressive) {
            (Codec::H264 | Codec::Hevc, true) => "slow",
            (Codec::H264 | Codec::Hevc, false) => "medium",
            (Codec::Vp9 | Codec::Av1, true) => "4",
            (Codec::Vp9 | Codec::Av1, false) => "6",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatedFormat {
    Gif,
    Apng,
    WebP,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoMode {
    Transcode,
    Animated(AnimatedFormatTag),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimatedFormatTag(pub AnimatedFormat);

#[derive(Debug, Clone)]
pub struct VideoPlan {
    pub mode: VideoMode,
    pub container_extension: String,
    pub remux: bool,
    pub codec: Option<Codec>,
    pub hardware_encoder: Option<String>,
    pub two_pass: bool,
    pub crf: Option<u32>,
    pub preset: Option<String>,
    pub bitrate_kbps: Option<u32>,
    pub maxrate_kbps: Option<u32>,
    pub bufsize_kbps: Option<u32>,
    pub filters: Vec<String>,
    pub remove_audio: bool,
    pub audio_copy: bool,
    pub audio_codec: Option<String>,
    pub scene_cut_lookahead: Option<u32>,
}

const ANIMATED_TRIGGERS: &[&str] = &["gif", "animated"];

pub fn build_plan(request: &Request, probe: Option<&ProbeResult>, settings: &SettingsStore) -> VideoPlan {
    let metadata = &request.metadata;
    let aggressive = metadata.get_bool("aggressive", false);

    if let Some(mode) = metadata.get_str("video.mode") {
        if ANIMATED_TRIGGERS.contains(&mode) {
            let format = choose_animated_format(metadata, aggressive);
            return animated_plan(format);
        }
    }

    let source_codec = probe.and_then(|p| p.video.as_ref()).map(|v| v.codec.as_str());
    let is_webm_source = probe
        .map(|p| p.container.format.contains("webm") || p.container.format.contains("matroska"))
        .unwrap_or(false);

    let force_mp4 = metadata.get_bool("force_mp4", settings.get(keys::FORCE_MP4));
    let codec = choose_codec(source_codec, is_webm_source, aggressive);
    let container_extension = if force_mp4 {
        "mp4".to_string()
    } else {
        match codec {
            Codec::Vp9 | Codec::Av1 if is_webm_source => "webm".to_string(),
            _ => "mp4".to_string(),
        }
    };

    let use_hardware = metadata.get_bool(
        "use_hardware_acceleration",
        settings.get(keys::USE_HARDWARE_ACCELERATION),
    );
    let hardware_encoder = if use_hardware {
        codec.hardware_encoder_candidates().first().map(|s| s.to_string())
    } else {
        None
    };

    let remove_audio = metadata.get_bool("remove_audio", false);
    let has_speed_change = metadata.get_f64("playback_speed_factor", 1.0) != 1.0;
    let has_explicit_filters = metadata.get_str("video.filters").is_some();

    let audio_copy = !remove_audio
        && !has_speed_change
        && !has_explicit_filters
        && !force_mp4
        && probe
            .and_then(|p| p.audio.as_ref())
            .map(|a| a.codec == "aac" || a.codec == "opus")
            .unwrap_or(false);

    let duration = probe.and_then(|p| p.container.duration_seconds).unwrap_or(0.0);
    let two_pass_minimum = settings.get(keys::TWO_PASS_MINIMUM_DURATION_SECONDS) as f64;
    let two_pass = hardware_encoder.is_none() && (duration >= two_pass_minimum || aggressive);

    let filters = build_filters(metadata, aggressive, has_speed_change, settings);

    let remux = filters.is_empty()
        && !has_speed_change
        && audio_copy
        && source_codec.map(|c| codec_matches(codec, c)).unwrap_or(false)
        && !force_mp4_requires_remux_skip(force_mp4, &container_extension, source_codec);

    let (bitrate_kbps, maxrate_kbps, bufsize_kbps) = if hardware_encoder.is_some() {
        estimate_hardware_bitrate(probe, settings)
    } else {
        (None, None, None)
    };

    let scene_cut_lookahead = if settings.get(keys::ENABLE_SCENE_CUT_LOOKAHEAD) {
        Some(settings.get(keys::SCENE_CUT_LOOKAHEAD_FRAMES) as u32)
    } else {
        None
    };

    VideoPlan {
        mode: VideoMode::Transcode,
        container_extension,
        remux,
        codec: Some(codec),
        hardware_encoder,
        two_pass,
        crf: Some(crf_for(codec, aggressive)),
        preset: Some(codec.default_preset(aggressive).to_string()),
        bitrate_kbps,
        maxrate_kbps,
        bufsize_kbps,
        filters,
        remove_audio,
        audio_copy,
        audio_codec: if audio_copy { None } else { Some(default_audio_codec(&container_extension)) },
        scene_cut_lookahead,
    }
}

fn choose_animated_format(metadata: &Metadata, aggressive: bool) -> AnimatedFormat {
    match metadata.get_str("video.animated_format") {
        Some("apng") => AnimatedFormat::Apng,
        Some("webp") => AnimatedFormat::WebP,
        Some("gif") => AnimatedFormat::Gif,
        _ if aggressive => AnimatedFormat::WebP,
        _ => AnimatedFormat::Gif,
    }
}

fn animated_plan(format: AnimatedFormat) -> VideoPlan {
    let container_extension = match format {
        AnimatedFormat::Gif => "gif",
        AnimatedFormat::Apng => "apng",
        AnimatedFormat::WebP => "webp",
    }
    .to_string();
    VideoPlan {
        mode: VideoMode::Animated(AnimatedFormatTag(format)),
        container_extension,
        remux: false,
        codec: None,
        hardware_encoder: None,
        two_pass: false,
        crf: None,
        preset: None,
        bitrate_kbps: None,
        maxrate_kbps: None,
        bufsize_kbps: None,
        filters: Vec::new(),
        remove_audio: true,
        audio_copy: false,
        audio_codec: None,
        scene_cut_lookahead: None,
    }
}

fn choose_codec(source_codec: Option<&str>, is_webm_source: bool, aggressive: bool) -> Codec {
    if aggressive {
        return Codec::Av1;
    }
    if is_webm_source && matches!(source_codec, Some("vp9")) {
        return Codec::Vp9;
    }
    match source_codec {
        Some("prores") | Some("dnxhd") => Codec::Hevc,
        Some("hevc") | Some("h265") => Codec::Hevc,
        _ => Codec::H264,
    }
}

fn codec_matches(target: Codec, source: &str) -> bool {
    matches!(
        (target, source),
        (Codec::H264, "h264")
            | (Codec::Hevc, "hevc")
            | (Codec::Hevc, "h265")
            | (Codec::Vp9, "vp9")
            | (Codec::Av1, "av1")
    )
}

fn force_mp4_requires_remux_skip(force_mp4: bool, container_extension: &str, source_codec: Option<&str>) -> bool {
    force_mp4 && container_extension == "mp4" && matches!(source_codec, Some("vp9") | Some("av1"))
}

fn crf_for(codec: Codec, aggressive: bool) -> u32 {
    let base = codec.base_crf();
    if aggressive {
        base + 4
    } else {
        base
    }
}

fn default_audio_codec(container_extension: &str) -> String {
    if container_extension == "webm" {
        "libopus".to_string()
    } else {
        "aac".to_string()
    }
}

fn build_filters(metadata: &Metadata, aggressive: bool, has_speed_change: bool, settings: &SettingsStore) -> Vec<String> {
    let mut filters = Vec::new();

    if aggressive {
        let threshold = settings.get(keys::MPDECIMATE_HI_THRESHOLD);
        filters.push(format!("mpdecimate=hi={threshold}"));
    }

    let max_width = metadata.get_i64("video.maxWidth", 0);
    if max_width > 0 {
        filters.push(format!("scale='min({max_width},iw)':-2"));
    }

    if has_speed_change {
        let factor = metadata.get_f64("playback_speed_factor", 1.0);
        filters.push(format!("setpts={:.4}*PTS", 1.0 / factor));
    }

    if let Some(fps) = metadata.get_str("video.fps").and_then(|s| s.parse::<f64>().ok()) {
        filters.push(format!("fps={fps}"));
    }

    filters
}

fn estimate_hardware_bitrate(
    probe: Option<&ProbeResult>,
    settings: &SettingsStore,
) -> (Option<u32>, Option<u32>, Option<u32>) {
    let source_bitrate_bps = probe
        .and_then(|p| p.video.as_ref().and_then(|v| v.bitrate).or(p.container.bitrate))
        .unwrap_or(4_000_000);
    let source_kbps = (source_bitrate_bps / 1000) as f64;
    let reduction = settings.get(keys::HARDWARE_BITRATE_REDUCTION_RATIO);
    let floor = settings.get(keys::HARDWARE_BITRATE_FLOOR_KBPS) as f64;
    let ceiling = settings.get(keys::HARDWARE_BITRATE_CEILING_KBPS) as f64;
    let target = (source_kbps * reduction).clamp(floor, ceiling);

    let headroom = settings.get(keys::BITRATE_HEADROOM_MULTIPLIER);
    let buffer_multiplier = settings.get(keys::BITRATE_BUFFER_MULTIPLIER);
    (
        Some(target as u32),
        Some((target * headroom) as u32),
        Some((target * buffer_multiplier) as u32),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::FilePath;
    use crate::request::ItemType;

    fn request_with_metadata(metadata: Metadata) -> Request {
        Request {
            request_id: "r1".to_string(),
            item_type: ItemType::Video,
            source_path: FilePath::from_str("/tmp/clop/clip.mp4").unwrap(),
            metadata,
        }
    }

    #[test]
    fn animated_mode_trigger_produces_animated_plan() {
        let mut metadata = Metadata::new();
        metadata.set("video.mode", "gif");
        let request = request_with_metadata(metadata);
        let settings = SettingsStore::in_memory();
        let plan = build_plan(&request, None, &settings);
        assert_eq!(plan.container_extension, "gif");
        assert!(matches!(plan.mode, VideoMode::Animated(_)));
    }

    #[test]
    fn default_plan_targets_h264_mp4() {
        let request = request_with_metadata(Metadata::new());
        let settings = SettingsStore::in_memory();
        let plan = build_plan(&request, None, &settings);
        assert_eq!(plan.codec, Some(Codec::H264));
        assert_eq!(plan.container_extension, "mp4");
    }

    #[test]
    fn aggressive_flag_selects_av1_and_raises_crf() {
        let mut metadata = Metadata::new();
        metadata.set("aggressive", true);
        let request = request_with_metadata(metadata);
        let settings = SettingsStore::in_memory();
        let plan = build_plan(&request, None, &settings);
        assert_eq!(plan.codec, Some(Codec::Av1));
        assert_eq!(plan.crf, Some(Codec::Av1.base_crf() + 4));
    }
}
