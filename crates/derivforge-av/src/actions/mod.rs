//! ffmpeg argument builders for each derivative kind.
//!
//! Builders return the argument vector (without the program name) so the
//! caller decides how and under which timeout the tool is run:
//! - Still-frame thumbnails in AVIF, WebP, or JPEG
//! - Fast proxies and the HD proxy ladder (remux, copy-video, transcode)
//! - Per-rendition HLS encodes

mod hls;
mod proxy;
mod thumbnail;

pub use hls::{hls_rendition_args, keyframe_interval, Rendition, DEFAULT_AUDIO_KBPS};
pub use proxy::{
    fast_proxy_args, hd_copy_video_args, hd_remux_args, hd_transcode_args, EncodeSettings,
};
pub use thumbnail::{format_seek, thumbnail_args, ThumbnailSettings};

/// Arguments every invocation starts with.
pub(crate) fn base_args() -> Vec<String> {
    ["-hide_banner", "-nostdin", "-loglevel", "error"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Scale filter capping the longer edge at `max_dimension`, keeping aspect.
pub(crate) fn longest_edge_scale(max_dimension: u32) -> String {
    format!(
        "scale='if(gt(iw,ih),min({m},iw),-2)':'if(gt(iw,ih),-2,min({m},ih))'",
        m = max_dimension
    )
}

/// Video stream, optional audio, no subtitles.
pub(crate) fn stream_mapping() -> Vec<String> {
    ["-map", "0:v:0", "-map", "0:a?", "-sn"]
        .into_iter()
        .map(String::from)
        .collect()
}
