//! ffmpeg stderr progress scraping (spec §4.F "Progress tracking"). Ported
//! from the teacher's `engine::ffmpeg_args::progress`, unchanged in
//! substance — this is exactly the parsing behaviour the spec prescribes.

pub fn compute_progress_percent(total_duration: Option<f64>, elapsed_seconds: f64) -> f64 {
    match total_duration {
        Some(total) if total.is_finite() && total > 0.0 => {
            let elapsed = if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
                elapsed_seconds
            } else {
                0.0
            };
            let ratio = elapsed / total;
            let value = (ratio * 100.0).clamp(0.0, 99.0);
            if value.is_finite() {
                value
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

pub fn parse_ffmpeg_progress_line(line: &str) -> Option<(f64, Option<f64>)> {
    let mut elapsed: Option<f64> = None;
    let mut speed: Option<f64> = None;

    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("out_time_us=") {
            if let Ok(us) = rest.parse::<f64>() {
                elapsed = Some(us / 1_000_000.0);
            }
        } else if let Some(rest) = token.strip_prefix("out_time_ms=") {
            if let Ok(us) = rest.parse::<f64>() {
                elapsed = Some(us / 1_000_000.0);
            }
        } else if let Some(rest) = token.strip_prefix("out_time=") {
            elapsed = Some(parse_ffmpeg_time_to_seconds(rest));
        } else if let Some(rest) = token.strip_prefix("time=") {
            elapsed = Some(parse_ffmpeg_time_to_seconds(rest));
        } else if let Some(rest) = token.strip_prefix("speed=") {
            let value = rest.trim_end_matches('x');
            if let Ok(v) = value.parse::<f64>() {
                speed = Some(v);
            }
        }
    }

    elapsed.map(|e| (e, speed))
}

pub fn is_ffmpeg_progress_end(line: &str) -> bool {
    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("progress=") {
            if rest.eq_ignore_ascii_case("end") {
                return true;
            }
        }
    }
    false
}

pub fn parse_ffmpeg_time_to_seconds(s: &str) -> f64 {
    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h = parts[0].parse::<f64>().unwrap_or(0.0);
            let m = parts[1].parse::<f64>().unwrap_or(0.0);
            let sec = parts[2].parse::<f64>().unwrap_or(0.0);
            return h * 3600.0 + m * 60.0 + sec;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

pub fn parse_ffmpeg_duration_from_metadata_line(line: &str) -> Option<f64> {
    let idx = line.find("Duration:")?;
    let rest = &line[idx + "Duration:".len()..];
    let time_str = rest.trim().split(',').next().unwrap_or("").trim();
    if time_str.is_empty() {
        return None;
    }
    let seconds = parse_ffmpeg_time_to_seconds(time_str);
    if seconds > 0.0 {
        Some(seconds)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_from_metadata_line() {
        let line = "  Duration: 00:02:15.32, start: 0.000000, bitrate: 4000 kb/s";
        assert_eq!(parse_ffmpeg_duration_from_metadata_line(line), Some(135.32));
    }

    #[test]
    fn parses_progress_line_with_out_time_us() {
        let (elapsed, speed) = parse_ffmpeg_progress_line("out_time_us=45000000 speed=2.5x").unwrap();
        assert!((elapsed - 45.0).abs() < 1e-6);
        assert_eq!(speed, Some(2.5));
    }

    #[test]
    fn detects_progress_end_marker() {
        assert!(is_ffmpeg_progress_end("progress=end"));
        assert!(!is_ffmpeg_progress_end("progress=continue"));
    }

    #[test]
    fn percent_clamped_to_99_until_explicit_end() {
        assert_eq!(compute_progress_percent(Some(100.0), 100.0), 99.0);
        assert_eq!(compute_progress_percent(Some(100.0), 50.0), 50.0);
        assert_eq!(compute_progress_percent(None, 50.0), 0.0);
    }
}
