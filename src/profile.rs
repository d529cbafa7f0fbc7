//! Versioned encoding profiles, one per derivative class.
//!
//! A profile is the resolved, validated form of a config section: the
//! settings the escalation ladders encode with, plus the fingerprint that
//! feeds the cache key.

use std::time::Duration;

use derivforge_av::actions::{EncodeSettings, Rendition, ThumbnailSettings};
use derivforge_common::DerivativeClass;

use crate::config::{
    parse_renditions, FastProxyConfig, HdProxyConfig, HlsConfig, ThumbnailConfig,
};

/// Parameters of one derivative class that affect the produced bytes.
pub trait EncodingProfile: Send + Sync {
    fn class(&self) -> DerivativeClass;

    /// Operator-controlled version string; bumping it invalidates every
    /// derivative of the class.
    fn version(&self) -> &str;

    /// Canonical rendering of every output-affecting setting.
    fn fingerprint(&self) -> String;

    /// Budget for one strategy attempt.
    fn timeout(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct ThumbnailProfile {
    pub version: String,
    pub max_width: u32,
    /// Sorted, deduplicated, capped at `max_width`.
    pub widths: Vec<u32>,
    pub settings: ThumbnailSettings,
    pub allow_webp: bool,
    pub allow_avif: bool,
    pub timeout: Duration,
}

impl ThumbnailProfile {
    pub fn from_config(config: &ThumbnailConfig) -> Self {
        Self {
            version: config.profile_version.trim().to_string(),
            max_width: config.max_width,
            widths: config.normalized_widths(),
            settings: ThumbnailSettings {
                jpeg_quality: config.jpeg_quality,
                webp_quality: config.webp_quality,
                avif_crf: config.avif_crf,
            },
            allow_webp: config.allow_webp,
            allow_avif: config.allow_avif,
            timeout: config.timeout(),
        }
    }

    /// Snap a requested width onto the allowed set.
    ///
    /// The smallest allowed width at least as large as the request wins;
    /// oversized requests get the largest allowed width, and no request
    /// gets `max_width`.
    pub fn normalize_width(&self, requested: Option<u32>) -> u32 {
        let Some(requested) = requested.filter(|w| *w > 0) else {
            return self.max_width;
        };
        let requested = requested.min(self.max_width);
        self.widths
            .iter()
            .copied()
            .find(|w| *w >= requested)
            .or_else(|| self.widths.last().copied())
            .unwrap_or(self.max_width)
    }
}

impl EncodingProfile for ThumbnailProfile {
    fn class(&self) -> DerivativeClass {
        DerivativeClass::Thumbnail
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn fingerprint(&self) -> String {
        format!(
            "jpeg_q={};webp_q={};avif_crf={}",
            self.settings.jpeg_quality, self.settings.webp_quality, self.settings.avif_crf
        )
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Settings shared by the fast and HD proxy classes.
#[derive(Debug, Clone)]
pub struct ProxyProfile {
    pub class: DerivativeClass,
    pub version: String,
    pub settings: EncodeSettings,
    pub timeout: Duration,
}

impl ProxyProfile {
    pub fn fast(config: &FastProxyConfig) -> Self {
        Self {
            class: DerivativeClass::FastProxy,
            version: config.profile_version.trim().to_string(),
            settings: EncodeSettings {
                max_dimension: config.max_dimension,
                preset: config.preset.clone(),
                crf: config.crf,
                audio_bitrate: config.audio_bitrate.clone(),
            },
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn hd(config: &HdProxyConfig) -> Self {
        Self {
            class: DerivativeClass::HdProxy,
            version: config.profile_version.trim().to_string(),
            settings: EncodeSettings {
                max_dimension: config.max_dimension,
                preset: config.preset.clone(),
                crf: config.crf,
                audio_bitrate: config.audio_bitrate.clone(),
            },
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl EncodingProfile for ProxyProfile {
    fn class(&self) -> DerivativeClass {
        self.class
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn fingerprint(&self) -> String {
        format!(
            "max_dim={};crf={};preset={};audio={}",
            self.settings.max_dimension,
            self.settings.crf,
            self.settings.preset,
            self.settings.audio_bitrate
        )
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Clone)]
pub struct HlsProfile {
    pub version: String,
    pub segment_seconds: u32,
    pub preset: String,
    pub crf: u32,
    /// Sorted by height.
    pub ladder: Vec<Rendition>,
    pub timeout: Duration,
}

impl HlsProfile {
    pub fn from_config(config: &HlsConfig) -> Self {
        Self {
            version: config.profile_version.trim().to_string(),
            segment_seconds: config.segment_seconds.max(1),
            preset: config.preset.clone(),
            crf: config.crf,
            ladder: parse_renditions(&config.renditions),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl EncodingProfile for HlsProfile {
    fn class(&self) -> DerivativeClass {
        DerivativeClass::Hls
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn fingerprint(&self) -> String {
        let ladder: Vec<String> = self.ladder.iter().map(Rendition::spec).collect();
        format!(
            "seg={};preset={};crf={};ladder={}",
            self.segment_seconds,
            self.preset,
            self.crf,
            ladder.join(";")
        )
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_width() {
        let profile = ThumbnailProfile::from_config(&ThumbnailConfig::default());
        assert_eq!(profile.normalize_width(None), 800);
        assert_eq!(profile.normalize_width(Some(0)), 800);
        assert_eq!(profile.normalize_width(Some(480)), 480);
        assert_eq!(profile.normalize_width(Some(300)), 320);
        assert_eq!(profile.normalize_width(Some(1)), 32);
        assert_eq!(profile.normalize_width(Some(5000)), 800);
    }

    #[test]
    fn test_normalize_width_with_sparse_set() {
        let config = ThumbnailConfig {
            max_width: 600,
            allowed_widths: vec![640, 100, 100, 300],
            ..ThumbnailConfig::default()
        };
        let profile = ThumbnailProfile::from_config(&config);
        assert_eq!(profile.widths, vec![100, 300]);
        assert_eq!(profile.normalize_width(Some(500)), 300);
        assert_eq!(profile.normalize_width(Some(150)), 300);
    }

    #[test]
    fn test_hls_profile_ladder_sorted() {
        let profile = HlsProfile::from_config(&HlsConfig {
            renditions: "1080:3000:160,360:800".to_string(),
            ..HlsConfig::default()
        });
        assert_eq!(
            profile.ladder.iter().map(|r| r.height).collect::<Vec<_>>(),
            vec![360, 1080]
        );
        assert!(profile.fingerprint().contains("ladder=360:800:96;1080:3000:160"));
    }

    #[test]
    fn test_proxy_profiles_carry_class() {
        let fast = ProxyProfile::fast(&FastProxyConfig::default());
        let hd = ProxyProfile::hd(&HdProxyConfig::default());
        assert_eq!(fast.class(), DerivativeClass::FastProxy);
        assert_eq!(hd.class(), DerivativeClass::HdProxy);
        assert_eq!(fast.timeout(), Duration::from_secs(900));
        assert_eq!(hd.settings.max_dimension, 0);
    }
}
