//! Per-rendition HLS encodes.

use crate::actions::{base_args, stream_mapping};
use crate::input::MediaInput;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Audio bitrate used when a ladder entry omits one.
pub const DEFAULT_AUDIO_KBPS: u32 = 96;

/// Frame rate assumed when the source does not report one.
const FALLBACK_FPS: f64 = 30.0;

/// Bounds on the GOP length in frames.
const MIN_GOP: u32 = 24;
const MAX_GOP: u32 = 300;

/// One variant of an adaptive package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rendition {
    /// Output height in pixels; width follows the source aspect.
    pub height: u32,
    pub video_kbps: u32,
    pub audio_kbps: u32,
}

impl Rendition {
    pub fn new(height: u32, video_kbps: u32, audio_kbps: u32) -> Self {
        Self {
            height,
            video_kbps,
            audio_kbps,
        }
    }

    /// Advertised bandwidth in bits per second.
    pub fn bandwidth(&self) -> u64 {
        (u64::from(self.video_kbps) + u64::from(self.audio_kbps)) * 1000
    }

    /// Sub-directory holding this rendition's playlist and segments.
    pub fn dir_name(&self) -> String {
        format!("v{}", self.height)
    }

    /// Display name, e.g. `720p`.
    pub fn name(&self) -> String {
        format!("{}p", self.height)
    }

    /// Canonical `height:video:audio` form.
    pub fn spec(&self) -> String {
        format!("{}:{}:{}", self.height, self.video_kbps, self.audio_kbps)
    }
}

/// Keyframe interval in frames so every segment starts on a keyframe.
pub fn keyframe_interval(frame_rate: Option<f64>, segment_seconds: u32) -> u32 {
    let fps = frame_rate
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(FALLBACK_FPS);
    let gop = (fps * f64::from(segment_seconds.max(1))).round();
    (gop as u32).clamp(MIN_GOP, MAX_GOP)
}

/// Build arguments encoding one rendition into `out_dir`
/// (`stream.m3u8` plus `seg_%04d.ts`).
#[allow(clippy::too_many_arguments)]
pub fn hls_rendition_args(
    input: &MediaInput,
    rendition: &Rendition,
    preset: &str,
    crf: u32,
    segment_seconds: u32,
    gop: u32,
    out_dir: &Path,
) -> Vec<String> {
    let mut args = base_args();
    args.push("-y".to_string());
    args.extend(input.to_args());
    args.extend(stream_mapping());

    let video_kbps = rendition.video_kbps;
    let owned: Vec<String> = vec![
        "-vf".into(),
        format!(
            "scale=w=-2:h={}:force_original_aspect_ratio=decrease",
            rendition.height
        ),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        preset.into(),
        "-crf".into(),
        crf.to_string(),
        "-maxrate".into(),
        format!("{video_kbps}k"),
        "-bufsize".into(),
        format!("{}k", u64::from(video_kbps) * 3 / 2),
        "-g".into(),
        gop.to_string(),
        "-keyint_min".into(),
        gop.to_string(),
        "-sc_threshold".into(),
        "0".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", rendition.audio_kbps),
        "-ac".into(),
        "2".into(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        segment_seconds.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_list_size".into(),
        "0".into(),
        "-hls_flags".into(),
        "independent_segments".into(),
        "-hls_segment_filename".into(),
        out_dir.join("seg_%04d.ts").to_string_lossy().to_string(),
        out_dir.join("stream.m3u8").to_string_lossy().to_string(),
    ];
    args.extend(owned);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_keyframe_interval() {
        assert_eq!(keyframe_interval(Some(25.0), 6), 150);
        assert_eq!(keyframe_interval(None, 6), 180);
        assert_eq!(keyframe_interval(Some(23.976), 2), 48);
        // Clamped on both ends.
        assert_eq!(keyframe_interval(Some(10.0), 1), 24);
        assert_eq!(keyframe_interval(Some(60.0), 10), 300);
        // Zero segment length is treated as one second.
        assert_eq!(keyframe_interval(Some(30.0), 0), 30);
    }

    #[test]
    fn test_rendition_bandwidth() {
        let r = Rendition::new(720, 1600, 128);
        assert_eq!(r.bandwidth(), 1_728_000);
        assert_eq!(r.dir_name(), "v720");
        assert_eq!(r.name(), "720p");
        assert_eq!(r.spec(), "720:1600:128");
    }

    #[test]
    fn test_rendition_args() {
        let out = PathBuf::from("/cache/hls/key/v360");
        let args = hls_rendition_args(
            &MediaInput::new("src.mp4"),
            &Rendition::new(360, 800, 96),
            "veryfast",
            23,
            6,
            180,
            &out,
        );
        let joined = args.join(" ");
        assert!(joined.contains("scale=w=-2:h=360:force_original_aspect_ratio=decrease"));
        assert!(joined.contains("-maxrate 800k -bufsize 1200k -g 180 -keyint_min 180"));
        assert!(joined.contains("-hls_time 6 -hls_playlist_type vod"));
        assert!(joined.ends_with(
            "-hls_segment_filename /cache/hls/key/v360/seg_%04d.ts /cache/hls/key/v360/stream.m3u8"
        ));
    }

    #[test]
    fn test_rendition_args_huge_bitrate() {
        let out = PathBuf::from("/cache/hls/key/v360");
        let args = hls_rendition_args(
            &MediaInput::new("src.mp4"),
            &Rendition::new(360, 3_000_000_000, 96),
            "veryfast",
            23,
            6,
            180,
            &out,
        );
        let joined = args.join(" ");
        assert!(joined.contains("-maxrate 3000000000k -bufsize 4500000000k"));
    }
}
