use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub origin: OriginConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub fast_proxy: FastProxyConfig,

    #[serde(default)]
    pub hd_proxy: HdProxyConfig,

    #[serde(default)]
    pub hls: HlsConfig,

    #[serde(default)]
    pub offload: OffloadConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Local cache roots. Each root is shared by every process on the host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_thumbnail_dir")]
    pub thumbnail_dir: PathBuf,

    #[serde(default = "default_proxy_dir")]
    pub proxy_dir: PathBuf,

    #[serde(default = "default_hls_dir")]
    pub hls_dir: PathBuf,
}

fn default_thumbnail_dir() -> PathBuf {
    PathBuf::from("/tmp/thumbnails")
}
fn default_proxy_dir() -> PathBuf {
    PathBuf::from("/tmp/proxy-cache")
}
fn default_hls_dir() -> PathBuf {
    PathBuf::from("/tmp/hls-cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            thumbnail_dir: default_thumbnail_dir(),
            proxy_dir: default_proxy_dir(),
            hls_dir: default_hls_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Budget for a single ffprobe call.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_probe_timeout() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

/// Where source bytes come from.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OriginConfig {
    /// Public download endpoint of the origin file service,
    /// e.g. `http://files:8080/api/public/dl`.
    #[serde(default)]
    pub public_dl_base: Option<String>,

    /// Read sources straight from disk at `<local_root>/<share>/<path>`.
    /// Takes precedence over `public_dl_base`.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumb_max_width")]
    pub max_width: u32,

    #[serde(default = "default_allowed_widths")]
    pub allowed_widths: Vec<u32>,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u32,

    #[serde(default = "default_webp_quality")]
    pub webp_quality: u32,

    #[serde(default = "default_true")]
    pub allow_webp: bool,

    #[serde(default)]
    pub allow_avif: bool,

    #[serde(default = "default_avif_crf")]
    pub avif_crf: u32,

    #[serde(default = "default_thumb_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_thumb_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_profile_version")]
    pub profile_version: String,

    /// Frames in a multi-frame strip when the caller does not say.
    #[serde(default = "default_multi_default")]
    pub multi_default: usize,

    #[serde(default = "default_multi_max")]
    pub multi_max: usize,
}

fn default_thumb_max_width() -> u32 {
    800
}
fn default_allowed_widths() -> Vec<u32> {
    vec![32, 240, 320, 480, 640, 800]
}
fn default_jpeg_quality() -> u32 {
    6
}
fn default_webp_quality() -> u32 {
    80
}
fn default_avif_crf() -> u32 {
    35
}
fn default_thumb_timeout() -> u64 {
    25
}
fn default_thumb_concurrency() -> usize {
    2
}
fn default_multi_default() -> usize {
    3
}
fn default_multi_max() -> usize {
    8
}
fn default_true() -> bool {
    true
}
fn default_profile_version() -> String {
    "1".to_string()
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: default_thumb_max_width(),
            allowed_widths: default_allowed_widths(),
            jpeg_quality: default_jpeg_quality(),
            webp_quality: default_webp_quality(),
            allow_webp: true,
            allow_avif: false,
            avif_crf: default_avif_crf(),
            timeout_secs: default_thumb_timeout(),
            max_concurrency: default_thumb_concurrency(),
            profile_version: default_profile_version(),
            multi_default: default_multi_default(),
            multi_max: default_multi_max(),
        }
    }
}

impl ThumbnailConfig {
    /// Allowed widths, deduplicated, sorted, and capped at `max_width`.
    pub fn normalized_widths(&self) -> Vec<u32> {
        let mut widths: Vec<u32> = self
            .allowed_widths
            .iter()
            .copied()
            .filter(|w| *w > 0 && *w <= self.max_width)
            .collect();
        widths.sort_unstable();
        widths.dedup();
        if widths.is_empty() {
            widths.push(self.max_width);
        }
        widths
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FastProxyConfig {
    #[serde(default = "default_fast_max_dimension")]
    pub max_dimension: u32,

    #[serde(default = "default_fast_preset")]
    pub preset: String,

    #[serde(default = "default_fast_crf")]
    pub crf: u32,

    #[serde(default = "default_fast_audio_bitrate")]
    pub audio_bitrate: String,

    #[serde(default = "default_fast_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_one")]
    pub max_concurrency: usize,

    #[serde(default = "default_profile_version")]
    pub profile_version: String,
}

fn default_fast_max_dimension() -> u32 {
    1280
}
fn default_fast_preset() -> String {
    "veryfast".to_string()
}
fn default_fast_crf() -> u32 {
    28
}
fn default_fast_audio_bitrate() -> String {
    "128k".to_string()
}
fn default_fast_timeout() -> u64 {
    900
}
fn default_one() -> usize {
    1
}

impl Default for FastProxyConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_fast_max_dimension(),
            preset: default_fast_preset(),
            crf: default_fast_crf(),
            audio_bitrate: default_fast_audio_bitrate(),
            timeout_secs: default_fast_timeout(),
            max_concurrency: 1,
            profile_version: default_profile_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HdProxyConfig {
    /// `0` keeps the source resolution on the transcode fallback.
    #[serde(default)]
    pub max_dimension: u32,

    #[serde(default = "default_hd_preset")]
    pub preset: String,

    #[serde(default = "default_hd_crf")]
    pub crf: u32,

    #[serde(default = "default_hd_audio_bitrate")]
    pub audio_bitrate: String,

    #[serde(default = "default_long_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_one")]
    pub max_concurrency: usize,

    #[serde(default = "default_profile_version")]
    pub profile_version: String,
}

fn default_hd_preset() -> String {
    "slow".to_string()
}
fn default_hd_crf() -> u32 {
    20
}
fn default_hd_audio_bitrate() -> String {
    "192k".to_string()
}
fn default_long_timeout() -> u64 {
    1800
}

impl Default for HdProxyConfig {
    fn default() -> Self {
        Self {
            max_dimension: 0,
            preset: default_hd_preset(),
            crf: default_hd_crf(),
            audio_bitrate: default_hd_audio_bitrate(),
            timeout_secs: default_long_timeout(),
            max_concurrency: 1,
            profile_version: default_profile_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HlsConfig {
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,

    #[serde(default = "default_fast_preset")]
    pub preset: String,

    #[serde(default = "default_hls_crf")]
    pub crf: u32,

    /// `height:video-kbps[:audio-kbps]`, comma separated.
    #[serde(default = "default_renditions")]
    pub renditions: String,

    /// Applies to each rendition encode separately.
    #[serde(default = "default_long_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_one")]
    pub max_concurrency: usize,

    #[serde(default = "default_profile_version")]
    pub profile_version: String,
}

fn default_segment_seconds() -> u32 {
    6
}
fn default_hls_crf() -> u32 {
    23
}
pub(crate) fn default_renditions() -> String {
    "360:800:96,720:1600:128,1080:3000:160".to_string()
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_seconds: default_segment_seconds(),
            preset: default_fast_preset(),
            crf: default_hls_crf(),
            renditions: default_renditions(),
            timeout_secs: default_long_timeout(),
            max_concurrency: 1,
            profile_version: default_profile_version(),
        }
    }
}

/// S3-compatible remote tier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OffloadConfig {
    /// Master switch. Ignored (treated as off) until credentials are set.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub access_key_id: String,

    #[serde(default)]
    pub secret_access_key: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Public (CDN) base; redirects use `<base>/<key>` when set.
    #[serde(default)]
    pub public_base_url: Option<String>,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_true")]
    pub upload_enabled: bool,

    #[serde(default = "default_true")]
    pub redirect_enabled: bool,

    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,

    #[serde(default = "default_presence_ttl")]
    pub presence_ttl_secs: u64,

    #[serde(default = "default_cache_control")]
    pub cache_control: String,
}

/// Lower bound on the presence cache TTL.
pub const MIN_PRESENCE_TTL_SECS: u64 = 30;

fn default_region() -> String {
    "auto".to_string()
}
fn default_prefix() -> String {
    "derivforge-cache".to_string()
}
fn default_presign_ttl() -> u64 {
    3600
}
fn default_presence_ttl() -> u64 {
    300
}
fn default_cache_control() -> String {
    "public, max-age=86400".to_string()
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            bucket: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: default_region(),
            public_base_url: None,
            prefix: default_prefix(),
            upload_enabled: true,
            redirect_enabled: true,
            presign_ttl_secs: default_presign_ttl(),
            presence_ttl_secs: default_presence_ttl(),
            cache_control: default_cache_control(),
        }
    }
}

impl OffloadConfig {
    pub fn has_credentials(&self) -> bool {
        !self.endpoint.trim().is_empty()
            && !self.bucket.trim().is_empty()
            && !self.access_key_id.trim().is_empty()
            && !self.secret_access_key.trim().is_empty()
    }

    /// Enabled and fully configured.
    pub fn is_active(&self) -> bool {
        self.enabled && self.has_credentials()
    }

    /// Prefix without leading or trailing slashes.
    pub fn normalized_prefix(&self) -> String {
        self.prefix.trim().trim_matches('/').to_string()
    }

    /// Public base without a trailing slash; empty values are `None`.
    pub fn normalized_public_base(&self) -> Option<String> {
        self.public_base_url
            .as_deref()
            .map(|b| b.trim().trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty())
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs.max(MIN_PRESENCE_TTL_SECS))
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }
}

/// Asynchronous task routing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// External queue endpoint accepting JSON task envelopes. Local
    /// background threads are used when unset.
    #[serde(default)]
    pub queue_url: Option<String>,

    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// How long an externally submitted id blocks resubmission.
    #[serde(default = "default_long_timeout")]
    pub dedup_ttl_secs: u64,
}

fn default_submit_timeout() -> u64 {
    10
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            submit_timeout_secs: default_submit_timeout(),
            dedup_ttl_secs: default_long_timeout(),
        }
    }
}
