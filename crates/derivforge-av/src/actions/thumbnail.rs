//! Single-frame extraction.

use crate::actions::base_args;
use crate::input::MediaInput;
use derivforge_common::ImageFormat;
use std::path::Path;

/// Encoder settings for still frames.
#[derive(Debug, Clone)]
pub struct ThumbnailSettings {
    pub jpeg_quality: u32,
    pub webp_quality: u32,
    pub avif_crf: u32,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 6,
            webp_quality: 80,
            avif_crf: 35,
        }
    }
}

/// Render a seek offset the way ffmpeg accepts it (`1`, `12.5`).
pub fn format_seek(seconds: f64) -> String {
    format!("{}", seconds)
}

/// Build arguments extracting one frame scaled to at most `width` pixels.
///
/// `seek` is applied as an input option so ffmpeg seeks before decoding.
pub fn thumbnail_args(
    input: &MediaInput,
    format: ImageFormat,
    width: u32,
    seek: Option<f64>,
    settings: &ThumbnailSettings,
    output: &Path,
) -> Vec<String> {
    let mut args = base_args();
    args.extend(["-threads".to_string(), "1".to_string()]);
    if let Some(seconds) = seek {
        args.push("-ss".to_string());
        args.push(format_seek(seconds));
    }
    args.extend(input.to_args());
    args.extend([
        "-vframes".to_string(),
        "1".to_string(),
        "-vf".to_string(),
        format!("scale='min({width},iw)':-2"),
    ]);

    let codec: Vec<String> = match format {
        ImageFormat::Webp => vec![
            "-c:v".into(),
            "libwebp".into(),
            "-q:v".into(),
            settings.webp_quality.to_string(),
            "-preset".into(),
            "picture".into(),
            "-f".into(),
            "webp".into(),
        ],
        ImageFormat::Avif => vec![
            "-c:v".into(),
            "libaom-av1".into(),
            "-crf".into(),
            settings.avif_crf.to_string(),
            "-b:v".into(),
            "0".into(),
            "-still-picture".into(),
            "1".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-f".into(),
            "avif".into(),
        ],
        ImageFormat::Jpeg => vec![
            "-q:v".into(),
            settings.jpeg_quality.to_string(),
            "-f".into(),
            "image2".into(),
            "-update".into(),
            "1".into(),
        ],
    };
    args.extend(codec);
    args.push("-y".to_string());
    args.push(output.to_string_lossy().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_jpeg_with_seek() {
        let input = MediaInput::new("http://origin/v.mp4");
        let args = thumbnail_args(
            &input,
            ImageFormat::Jpeg,
            480,
            Some(1.0),
            &ThumbnailSettings::default(),
            &PathBuf::from("/tmp/out.jpg"),
        );
        let joined = args.join(" ");
        assert!(joined.starts_with("-hide_banner -nostdin -loglevel error -threads 1 -ss 1 -i"));
        assert!(joined.contains("-vf scale='min(480,iw)':-2"));
        assert!(joined.contains("-q:v 6 -f image2 -update 1"));
        assert_eq!(args.last().unwrap(), "/tmp/out.jpg");
    }

    #[test]
    fn test_image_source_has_no_seek() {
        let input = MediaInput::new("/photos/p.png");
        let args = thumbnail_args(
            &input,
            ImageFormat::Webp,
            320,
            None,
            &ThumbnailSettings::default(),
            &PathBuf::from("/tmp/out.webp"),
        );
        assert!(!args.contains(&"-ss".to_string()));
        assert!(args.join(" ").contains("-c:v libwebp -q:v 80 -preset picture -f webp"));
    }

    #[test]
    fn test_avif_codec() {
        let args = thumbnail_args(
            &MediaInput::new("a.mp4"),
            ImageFormat::Avif,
            800,
            Some(12.5),
            &ThumbnailSettings::default(),
            &PathBuf::from("o.avif"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-ss 12.5"));
        assert!(joined.contains("-c:v libaom-av1 -crf 35 -b:v 0 -still-picture 1"));
    }

    #[test]
    fn test_format_seek() {
        assert_eq!(format_seek(0.0), "0");
        assert_eq!(format_seek(3.25), "3.25");
    }
}
