//! Core type definitions for sources and derivatives.
//!
//! All enums serialize in kebab-case so task envelopes and status reports
//! read the same as log output.

use crate::paths::{is_image_file, is_video_file, safe_rel_path};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Maximum length of a share identifier.
pub const MAX_SHARE_ID_LENGTH: usize = 64;

/// Immutable logical reference to an asset held by the origin file service.
///
/// The byte size and modification token are part of every cache key, so a
/// replaced file never hits a derivative generated from its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Share the file is published under.
    pub share: String,
    /// Normalized relative path inside the share.
    pub path: String,
    /// Size of the origin file in bytes.
    pub size: u64,
    /// Opaque modification token (usually an mtime).
    pub modified: String,
}

impl SourceDescriptor {
    /// Create a descriptor, validating the share identifier and relative path.
    pub fn new(
        share: impl Into<String>,
        path: &str,
        size: u64,
        modified: impl Into<String>,
    ) -> Result<Self> {
        let share = share.into();
        if !is_valid_share_id(&share) {
            return Err(Error::invalid_input(format!("invalid share identifier: {share:?}")));
        }
        let path = safe_rel_path(path)
            .ok_or_else(|| Error::invalid_input(format!("invalid relative path: {path:?}")))?;

        Ok(Self {
            share,
            path,
            size,
            modified: modified.into(),
        })
    }

    /// Whether the source looks like a video by extension.
    pub fn is_video(&self) -> bool {
        is_video_file(Path::new(&self.path))
    }

    /// Whether the source looks like a still image by extension.
    pub fn is_image(&self) -> bool {
        is_image_file(Path::new(&self.path))
    }

    /// Final path component, used in log lines.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.share, self.path)
    }
}

/// Share identifiers are short URL-safe tokens.
pub fn is_valid_share_id(share: &str) -> bool {
    !share.is_empty()
        && share.len() <= MAX_SHARE_ID_LENGTH
        && share
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Workload class of a derivative.
///
/// Each class has its own encoding profile, timeout, and concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DerivativeClass {
    /// Single still frame.
    Thumbnail,
    /// Scaled, quick H.264 re-encode.
    FastProxy,
    /// Full-quality streamable MP4.
    HdProxy,
    /// Adaptive-bitrate segmented package.
    Hls,
}

impl DerivativeClass {
    /// All classes, in ascending encode cost.
    pub const ALL: [DerivativeClass; 4] = [
        DerivativeClass::Thumbnail,
        DerivativeClass::FastProxy,
        DerivativeClass::HdProxy,
        DerivativeClass::Hls,
    ];

    /// Short tag used in canonical key strings and task ids.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Thumbnail => "thumb",
            Self::FastProxy => "fast",
            Self::HdProxy => "hd",
            Self::Hls => "hls",
        }
    }
}

impl fmt::Display for DerivativeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thumbnail => write!(f, "thumbnail"),
            Self::FastProxy => write!(f, "fast-proxy"),
            Self::HdProxy => write!(f, "hd-proxy"),
            Self::Hls => write!(f, "hls"),
        }
    }
}

impl FromStr for DerivativeClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thumbnail" | "thumb" => Ok(Self::Thumbnail),
            "fast-proxy" | "fast" | "proxy" => Ok(Self::FastProxy),
            "hd-proxy" | "hd" => Ok(Self::HdProxy),
            "hls" | "adaptive" => Ok(Self::Hls),
            other => Err(Error::invalid_input(format!("unknown derivative class: {other}"))),
        }
    }
}

/// Thumbnail output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Avif,
    Webp,
    Jpeg,
}

impl ImageFormat {
    /// File extension (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Avif => "avif",
            Self::Webp => "webp",
            Self::Jpeg => "jpg",
        }
    }

    /// MIME type served for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Avif => "image/avif",
            Self::Webp => "image/webp",
            Self::Jpeg => "image/jpeg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avif" => Ok(Self::Avif),
            "webp" => Ok(Self::Webp),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            other => Err(Error::invalid_input(format!("unknown image format: {other}"))),
        }
    }
}
