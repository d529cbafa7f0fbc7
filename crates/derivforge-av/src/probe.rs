//! FFprobe-based stream probing.
//!
//! Only the facts derivative generation needs: frame rate (for HLS keyframe
//! spacing), duration (for multi-frame thumbnail timelines), and the video
//! dimensions.

use crate::command::ToolCommand;
use crate::input::MediaInput;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Facts about the primary video stream of a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamInfo {
    /// Frames per second, if the container reports a usable rate.
    pub frame_rate: Option<f64>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Probe a source with ffprobe.
pub fn probe_stream(ffprobe: &Path, input: &MediaInput, timeout: Duration) -> Result<StreamInfo> {
    let output = ToolCommand::new(ffprobe.to_path_buf())
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .args(input.to_args())
        .timeout(timeout)
        .execute()?;

    parse_ffprobe_json(&output.stdout)
}

/// Parse ffprobe's `-print_format json` output.
pub fn parse_ffprobe_json(json: &str) -> Result<StreamInfo> {
    if json.trim().is_empty() {
        return Err(Error::parse_error("ffprobe", "empty output"));
    }
    let parsed: FfprobeOutput = serde_json::from_str(json)?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let duration = parsed
        .format
        .as_ref()
        .and_then(|f| positive_float(f.duration.as_deref()))
        .or_else(|| video.and_then(|v| positive_float(v.duration.as_deref())));

    Ok(StreamInfo {
        frame_rate: video.and_then(|v| {
            v.avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| v.r_frame_rate.as_deref().and_then(parse_frame_rate))
        }),
        duration,
        width: video.and_then(|v| v.width).filter(|w| *w > 0),
        height: video.and_then(|v| v.height).filter(|h| *h > 0),
    })
}

fn positive_float(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Parse an ffprobe rate such as `24000/1001`. Zero rates (`0/0`) are `None`.
pub fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    let parts: Vec<&str> = rate_str.split('/').collect();
    let rate = if parts.len() == 2 {
        let num: f64 = parts[0].trim().parse().ok()?;
        let den: f64 = parts[1].trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        num / den
    } else {
        rate_str.trim().parse().ok()?
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("24000/1001"), Some(23.976023976023978));
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("invalid"), None);
    }

    #[test]
    fn test_parse_ffprobe_json() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "avg_frame_rate": "0/0"},
                {"codec_type": "video", "width": 1920, "height": 1080,
                 "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}
            ],
            "format": {"duration": "61.500000"}
        }"#;
        let info = parse_ffprobe_json(json).unwrap();
        assert_eq!(info.frame_rate, Some(25.0));
        assert_eq!(info.duration, Some(61.5));
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
    }

    #[test]
    fn test_parse_ffprobe_json_without_video() {
        let info = parse_ffprobe_json(r#"{"streams": [], "format": {"duration": "N/A"}}"#).unwrap();
        assert_eq!(info, StreamInfo::default());
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(matches!(
            parse_ffprobe_json("  "),
            Err(Error::ParseError { .. })
        ));
    }
}
