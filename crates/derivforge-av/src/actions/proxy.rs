//! Progressive MP4 proxies.

use crate::actions::{base_args, longest_edge_scale, stream_mapping};
use crate::input::MediaInput;
use std::path::Path;

/// H.264/AAC settings for one proxy class.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    /// Longer-edge cap in pixels; `0` keeps the source size.
    pub max_dimension: u32,
    pub preset: String,
    pub crf: u32,
    /// AAC bitrate as ffmpeg expects it, e.g. `128k`.
    pub audio_bitrate: String,
}

fn prologue(input: &MediaInput) -> Vec<String> {
    let mut args = base_args();
    args.push("-y".to_string());
    args.extend(input.to_args());
    args.extend(stream_mapping());
    args
}

fn mp4_epilogue(args: &mut Vec<String>, output: &Path) {
    args.extend([
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
        output.to_string_lossy().to_string(),
    ]);
}

fn x264_args(settings: &EncodeSettings, profile: &str) -> Vec<String> {
    vec![
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        settings.preset.clone(),
        "-crf".into(),
        settings.crf.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-profile:v".into(),
        profile.into(),
        "-g".into(),
        "60".into(),
        "-keyint_min".into(),
        "60".into(),
        "-sc_threshold".into(),
        "0".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        settings.audio_bitrate.clone(),
    ]
}

/// Scaled re-encode bounding the longer edge (H.264 main profile).
pub fn fast_proxy_args(
    input: &MediaInput,
    settings: &EncodeSettings,
    output: &Path,
) -> Vec<String> {
    let mut args = prologue(input);
    if settings.max_dimension > 0 {
        args.push("-vf".to_string());
        args.push(longest_edge_scale(settings.max_dimension));
    }
    args.extend(x264_args(settings, "main"));
    mp4_epilogue(&mut args, output);
    args
}

/// Container remux with stream copy; no re-encoding at all.
pub fn hd_remux_args(input: &MediaInput, output: &Path) -> Vec<String> {
    let mut args = prologue(input);
    args.extend(["-c".to_string(), "copy".to_string()]);
    mp4_epilogue(&mut args, output);
    args
}

/// Copy the video stream, re-encode audio to AAC.
pub fn hd_copy_video_args(input: &MediaInput, audio_bitrate: &str, output: &Path) -> Vec<String> {
    let mut args = prologue(input);
    args.extend([
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        audio_bitrate.to_string(),
    ]);
    mp4_epilogue(&mut args, output);
    args
}

/// Full re-encode (H.264 high profile), scaled only when a cap is set.
pub fn hd_transcode_args(
    input: &MediaInput,
    settings: &EncodeSettings,
    output: &Path,
) -> Vec<String> {
    let mut args = prologue(input);
    if settings.max_dimension > 0 {
        args.push("-vf".to_string());
        args.push(longest_edge_scale(settings.max_dimension));
    }
    args.extend(x264_args(settings, "high"));
    mp4_epilogue(&mut args, output);
    args
}
