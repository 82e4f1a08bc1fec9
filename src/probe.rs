//! Media Probe (component G). Grounded on the teacher's ffprobe JSON
//! parsing in `engine::ffmpeg_args::progress` (duration parsing) and the
//! `-print_format json` convention visible in `tool argument invariants`
//! (spec §6); this module owns the typed result, `progress.rs` owns only
//! the stderr scraping.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::path::FilePath;
use crate::process::{self, ProcessOptions};

#[derive(Debug, Clone, Default)]
pub struct VideoStreamInfo {
    pub codec: String,
    pub profile: Option<String>,
    pub pixel_format: Option<String>,
    pub colour_space: Option<String>,
    pub width: u32,
    pub height: u32,
    pub bitrate: Option<u64>,
    pub framerate: Option<f64>,
    pub is_hdr: bool,
    pub is_interlaced: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AudioStreamInfo {
    pub codec: String,
    pub profile: Option<String>,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub format: String,
    pub duration_seconds: Option<f64>,
    pub bitrate: Option<u64>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub video: Option<VideoStreamInfo>,
    pub audio: Option<AudioStreamInfo>,
    pub container: ContainerInfo,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    profile: Option<String>,
    pix_fmt: Option<String>,
    color_space: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
    r_frame_rate: Option<String>,
    field_order: Option<String>,
    color_transfer: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
}

/// Parses an ffprobe-style rational framerate string (`"30000/1001"`) into
/// its floating-point value.
pub fn parse_rational_framerate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

/// Invokes `<probe_tool> -v quiet -print_format json -show_streams
/// -show_format <input>` and parses the typed facts out of it. Returns
/// `None` on tool absence or parse failure — probing is advisory, never a
/// hard failure for the caller (spec §4.G).
pub async fn probe(probe_tool: &str, input: &FilePath) -> Option<ProbeResult> {
    let args = vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_streams".to_string(),
        "-show_format".to_string(),
        input.to_string(),
    ];
    let output = process::run(
        probe_tool,
        &args,
        &ProcessOptions {
            fail_on_nonzero: false,
            ..Default::default()
        },
        CancellationToken::new(),
        None,
        None,
    )
    .await
    .ok()?;

    let parsed: FfprobeOutput = serde_json::from_str(&output.stdout)
        .inspect_err(|e| debug!(error = %e, "failed to parse probe JSON"))
        .ok()?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(|s| VideoStreamInfo {
            codec: s.codec_name.clone().unwrap_or_default(),
            profile: s.profile.clone(),
            pixel_format: s.pix_fmt.clone(),
            colour_space: s.color_space.clone(),
            width: s.width.unwrap_or(0),
            height: s.height.unwrap_or(0),
            bitrate: s.bit_rate.as_deref().and_then(|b| b.parse().ok()),
            framerate: s
                .r_frame_rate
                .as_deref()
                .and_then(parse_rational_framerate),
            is_hdr: s
                .color_transfer
                .as_deref()
                .map(|t| t.contains("smpte2084") || t.contains("arib-std-b67"))
                .unwrap_or(false),
            is_interlaced: s
                .field_order
                .as_deref()
                .map(|f| f != "progressive")
                .unwrap_or(false),
        });

    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|s| AudioStreamInfo {
            codec: s.codec_name.clone().unwrap_or_default(),
            profile: s.profile.clone(),
            channels: s.channels,
            sample_rate: s.sample_rate.as_deref().and_then(|r| r.parse().ok()),
            bitrate: s.bit_rate.as_deref().and_then(|b| b.parse().ok()),
        });

    let container = parsed
        .format
        .map(|f| ContainerInfo {
            format: f.format_name.unwrap_or_default(),
            duration_seconds: f.duration.as_deref().and_then(|d| d.parse().ok()),
            bitrate: f.bit_rate.as_deref().and_then(|b| b.parse().ok()),
            size_bytes: f.size.as_deref().and_then(|s| s.parse().ok()),
        })
        .unwrap_or_default();

    Some(ProbeResult {
        video,
        audio,
        container,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rational_framerate() {
        assert_eq!(parse_rational_framerate("30000/1001"), Some(30000.0 / 1001.0));
        assert_eq!(parse_rational_framerate("25/1"), Some(25.0));
        assert_eq!(parse_rational_framerate("0/0"), None);
        assert_eq!(parse_rational_framerate("garbage"), None);
    }

    #[test]
    fn parses_full_ffprobe_json() {
        let json = r#"{
            "streams": [
                {"codec_type":"video","codec_name":"h264","width":1920,"height":1080,"r_frame_rate":"30/1","pix_fmt":"yuv420p","field_order":"progressive"},
                {"codec_type":"audio","codec_name":"aac","channels":2,"sample_rate":"48000"}
            ],
            "format": {"format_name":"mov,mp4,m4a,3gp,3g2,mj2","duration":"12.5","bit_rate":"4000000","size":"6000000"}
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.streams.len(), 2);
        assert_eq!(parsed.format.unwrap().duration.as_deref(), Some("12.5"));
    }
}
