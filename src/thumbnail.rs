//! Thumbnail request parameters: format negotiation, seek parsing, and
//! multi-frame timelines.

use derivforge_common::ImageFormat;

use crate::profile::ThumbnailProfile;

/// Upper bound on a preview seek offset, in seconds.
pub const MAX_PREVIEW_SECONDS: f64 = 3600.0;

/// Seek used for video sources when the caller gives no hint.
pub const DEFAULT_VIDEO_SEEK: f64 = 1.0;

/// Outcome of format negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub format: ImageFormat,
    /// The choice depended on the `Accept` header; responses must vary on it.
    pub vary_accept: bool,
}

impl Negotiated {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Pick the output format for a request.
///
/// `requested` is the caller's `format` parameter: `auto` (or anything
/// unrecognized) negotiates against `accept`; explicit formats degrade to
/// the best allowed one.
pub fn negotiate_format(
    profile: &ThumbnailProfile,
    requested: Option<&str>,
    accept: Option<&str>,
) -> Negotiated {
    let explicit = requested
        .map(str::trim)
        .filter(|r| !r.is_empty() && !r.eq_ignore_ascii_case("auto"))
        .and_then(|r| r.parse::<ImageFormat>().ok());

    let Some(format) = explicit else {
        let accept = accept.unwrap_or_default().to_ascii_lowercase();
        let format = if profile.allow_avif && accept.contains("image/avif") {
            ImageFormat::Avif
        } else if profile.allow_webp && accept.contains("image/webp") {
            ImageFormat::Webp
        } else {
            ImageFormat::Jpeg
        };
        return Negotiated {
            format,
            vary_accept: true,
        };
    };

    let format = match format {
        ImageFormat::Avif if !profile.allow_avif => {
            if profile.allow_webp {
                ImageFormat::Webp
            } else {
                ImageFormat::Jpeg
            }
        }
        ImageFormat::Webp if !profile.allow_webp => ImageFormat::Jpeg,
        other => other,
    };
    Negotiated {
        format,
        vary_accept: false,
    }
}

/// Cheaper formats to try, in order, when `format` fails.
pub fn fallback_formats(profile: &ThumbnailProfile, format: ImageFormat) -> Vec<ImageFormat> {
    match format {
        ImageFormat::Avif if profile.allow_webp => vec![ImageFormat::Webp, ImageFormat::Jpeg],
        ImageFormat::Avif => vec![ImageFormat::Jpeg],
        ImageFormat::Webp => vec![ImageFormat::Jpeg],
        ImageFormat::Jpeg => Vec::new(),
    }
}

/// Parse a seek offset: non-negative seconds, clamped to an hour.
pub fn parse_preview_time(value: Option<&str>) -> Option<f64> {
    let seconds: f64 = value?.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(seconds.min(MAX_PREVIEW_SECONDS))
}

/// Seek offsets for a multi-frame strip.
///
/// Explicit `times` (comma separated) win. Otherwise `count` frames
/// (default and maximum from config) are spread across `duration`, or
/// placed two seconds apart from the one-second mark when the duration is
/// unknown. Offsets are rounded to hundredths, deduplicated, and sorted.
pub fn thumbnail_timeline(
    duration: Option<f64>,
    times: Option<&str>,
    count: Option<usize>,
    default_count: usize,
    max_count: usize,
) -> Vec<f64> {
    let mut offsets: Vec<f64> = Vec::new();

    if let Some(times) = times.filter(|t| !t.trim().is_empty()) {
        offsets.extend(times.split(',').filter_map(|part| parse_preview_time(Some(part))));
    } else {
        let total = count.unwrap_or(default_count).clamp(1, max_count.max(1));
        match duration.filter(|d| d.is_finite() && *d > 0.0) {
            Some(duration) => {
                let fractions: Vec<f64> = if total == 3 {
                    vec![0.1, 0.5, 0.9]
                } else {
                    let step = 1.0 / (total as f64 + 1.0);
                    (1..=total).map(|i| step * i as f64).collect()
                };
                offsets.extend(fractions.iter().map(|f| (duration * f).clamp(0.0, duration)));
            }
            None => offsets.extend((0..total).map(|i| 1.0 + 2.0 * i as f64)),
        }
    }

    let mut rounded: Vec<f64> = offsets
        .into_iter()
        .map(|t| (t * 100.0).round() / 100.0)
        .collect();
    rounded.sort_by(|a, b| a.total_cmp(b));
    rounded.dedup();
    rounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThumbnailConfig;

    fn profile(allow_webp: bool, allow_avif: bool) -> ThumbnailProfile {
        ThumbnailProfile::from_config(&ThumbnailConfig {
            allow_webp,
            allow_avif,
            ..ThumbnailConfig::default()
        })
    }

    #[test]
    fn test_auto_without_next_gen_support_is_jpeg() {
        let n = negotiate_format(&profile(true, true), Some("auto"), Some("image/png,*/*"));
        assert_eq!(n.format, ImageFormat::Jpeg);
        assert!(n.vary_accept);
        assert_eq!(n.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_auto_prefers_avif_then_webp() {
        let accept = Some("image/avif,image/webp,*/*");
        assert_eq!(
            negotiate_format(&profile(true, true), None, accept).format,
            ImageFormat::Avif
        );
        assert_eq!(
            negotiate_format(&profile(true, false), None, accept).format,
            ImageFormat::Webp
        );
        assert_eq!(
            negotiate_format(&profile(false, false), None, accept).format,
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_explicit_formats_degrade() {
        let n = negotiate_format(&profile(true, false), Some("avif"), None);
        assert_eq!(n.format, ImageFormat::Webp);
        assert!(!n.vary_accept);

        assert_eq!(
            negotiate_format(&profile(false, false), Some("avif"), None).format,
            ImageFormat::Jpeg
        );
        assert_eq!(
            negotiate_format(&profile(false, false), Some("webp"), None).format,
            ImageFormat::Jpeg
        );
        assert_eq!(
            negotiate_format(&profile(true, true), Some("JPEG"), None).format,
            ImageFormat::Jpeg
        );
        // Unknown values negotiate like auto.
        assert!(negotiate_format(&profile(true, true), Some("png"), None).vary_accept);
    }

    #[test]
    fn test_fallback_chain() {
        assert_eq!(
            fallback_formats(&profile(true, true), ImageFormat::Avif),
            vec![ImageFormat::Webp, ImageFormat::Jpeg]
        );
        assert_eq!(
            fallback_formats(&profile(false, true), ImageFormat::Avif),
            vec![ImageFormat::Jpeg]
        );
        assert_eq!(
            fallback_formats(&profile(true, true), ImageFormat::Webp),
            vec![ImageFormat::Jpeg]
        );
        assert!(fallback_formats(&profile(true, true), ImageFormat::Jpeg).is_empty());
    }

    #[test]
    fn test_parse_preview_time() {
        assert_eq!(parse_preview_time(Some(" 12.5 ")), Some(12.5));
        assert_eq!(parse_preview_time(Some("99999")), Some(3600.0));
        assert_eq!(parse_preview_time(Some("-1")), None);
        assert_eq!(parse_preview_time(Some("abc")), None);
        assert_eq!(parse_preview_time(Some("NaN")), None);
        assert_eq!(parse_preview_time(None), None);
    }

    #[test]
    fn test_timeline_with_duration() {
        assert_eq!(thumbnail_timeline(Some(100.0), None, None, 3, 8), vec![10.0, 50.0, 90.0]);
        assert_eq!(thumbnail_timeline(Some(10.0), None, Some(4), 3, 8), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_timeline_without_duration() {
        assert_eq!(thumbnail_timeline(None, None, Some(3), 3, 8), vec![1.0, 3.0, 5.0]);
        // Count clamped to the configured maximum.
        assert_eq!(thumbnail_timeline(None, None, Some(50), 3, 2), vec![1.0, 3.0]);
        assert_eq!(thumbnail_timeline(None, None, Some(0), 3, 8), vec![1.0]);
    }

    #[test]
    fn test_timeline_explicit_times() {
        assert_eq!(
            thumbnail_timeline(Some(100.0), Some("5,1.234,bad,5.001,-3"), None, 3, 8),
            vec![1.23, 5.0]
        );
    }
}
