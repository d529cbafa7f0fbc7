//! Durable offload tier: best-effort replication of ready artifacts to an
//! object store, and remote delivery decisions.
//!
//! The local artifact is always authoritative. Replication runs off the
//! request path and its failures are logged, never returned to readers.

mod presence;
mod s3;
mod store;

pub use presence::{PresenceCache, SWEEP_INTERVAL};
pub use s3::{S3ObjectStore, SigningKey};
pub use store::{MemoryObjectStore, ObjectStore, StoredObject};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use derivforge_av::playlist::MASTER_PLAYLIST;
use derivforge_common::{DerivativeClass, Error, Result};
use walkdir::WalkDir;

use crate::config::OffloadConfig;
use crate::coordinator::Artifact;
use crate::fingerprint::CacheKey;

/// Content type for an artifact file, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "m3u8" => "application/vnd.apple.mpegurl",
        "ts" => "video/mp2t",
        "mp4" => "video/mp4",
        "avif" => "image/avif",
        "webp" => "image/webp",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

pub struct OffloadTier {
    store: Arc<dyn ObjectStore>,
    presence: PresenceCache,
    prefix: String,
    public_base: Option<String>,
    cache_control: String,
    upload_enabled: bool,
    redirect_enabled: bool,
    presign_ttl: Duration,
}

impl OffloadTier {
    pub fn new(store: Arc<dyn ObjectStore>, config: &OffloadConfig) -> Self {
        Self::with_presence(store, config, PresenceCache::new(config.presence_ttl()))
    }

    /// Tier using a caller-supplied presence cache instead of one sized
    /// from `[offload] presence_ttl_secs`.
    pub fn with_presence(
        store: Arc<dyn ObjectStore>,
        config: &OffloadConfig,
        presence: PresenceCache,
    ) -> Self {
        Self {
            store,
            presence,
            prefix: config.normalized_prefix(),
            public_base: config.normalized_public_base(),
            cache_control: config.cache_control.trim().to_string(),
            upload_enabled: config.upload_enabled,
            redirect_enabled: config.redirect_enabled,
            presign_ttl: config.presign_ttl(),
        }
    }

    /// S3-backed tier, or `None` when offload is off or incomplete.
    pub fn from_config(config: &OffloadConfig) -> Result<Option<Self>> {
        if !config.is_active() {
            if config.enabled {
                tracing::warn!(
                    "offload enabled without endpoint/bucket/credentials; staying local"
                );
            }
            return Ok(None);
        }
        let store = S3ObjectStore::from_config(config)?;
        Ok(Some(Self::new(Arc::new(store), config)))
    }

    fn join(&self, rest: &str) -> String {
        if self.prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{rest}", self.prefix)
        }
    }

    /// `<prefix>/thumbs/<hash>.<ext>`
    pub fn thumbnail_key(&self, key: &CacheKey, ext: &str) -> String {
        self.join(&format!("thumbs/{key}.{ext}"))
    }

    /// `<prefix>/proxy/<key>.mp4`
    pub fn proxy_key(&self, key: &CacheKey) -> String {
        self.join(&format!("proxy/{key}.mp4"))
    }

    /// `<prefix>/hls/<key>/<relative path>`
    pub fn hls_key(&self, key: &CacheKey, relative: &str) -> String {
        self.join(&format!("hls/{key}/{}", relative.trim_start_matches('/')))
    }

    /// Object key readers are redirected to for an artifact.
    pub fn object_key_for(&self, class: DerivativeClass, key: &CacheKey, path: &Path) -> String {
        match class {
            DerivativeClass::Thumbnail => {
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
                self.thumbnail_key(key, ext)
            }
            DerivativeClass::FastProxy | DerivativeClass::HdProxy => self.proxy_key(key),
            DerivativeClass::Hls => self.hls_key(key, MASTER_PLAYLIST),
        }
    }

    pub fn uploads_enabled(&self) -> bool {
        self.upload_enabled
    }

    pub fn presence(&self) -> &PresenceCache {
        &self.presence
    }

    /// Whether `object_key` exists remotely, consulting the presence cache
    /// first. Store errors count as absent and are not cached.
    pub fn is_present(&self, object_key: &str) -> bool {
        if let Some(exists) = self.presence.get(object_key) {
            return exists;
        }
        match self.store.exists(object_key) {
            Ok(exists) => {
                self.presence.record(object_key, exists);
                exists
            }
            Err(e) => {
                tracing::warn!("existence check for {object_key} failed: {e}");
                false
            }
        }
    }

    /// Upload one file unless it is already present. Returns whether an
    /// upload happened.
    pub fn upload_file(&self, object_key: &str, path: &Path) -> Result<bool> {
        if self.is_present(object_key) {
            tracing::debug!("{object_key} already offloaded");
            return Ok(false);
        }
        self.store
            .put_file(object_key, path, content_type_for(path), &self.cache_control)?;
        self.presence.record(object_key, true);
        tracing::info!("offloaded {} to {object_key}", path.display());
        Ok(true)
    }

    /// Upload an HLS package. The master playlist goes last, so its
    /// presence implies a complete remote package.
    pub fn upload_tree(&self, key: &CacheKey, dir: &Path) -> Result<usize> {
        let master_key = self.hls_key(key, MASTER_PLAYLIST);
        if self.is_present(&master_key) {
            tracing::debug!("{master_key} already offloaded");
            return Ok(0);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry
                .map_err(|e| Error::offload_failed(format!("walk {}: {e}", dir.display())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| Error::internal(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if relative != MASTER_PLAYLIST {
                files.push((relative, entry.into_path()));
            }
        }

        let master = dir.join(MASTER_PLAYLIST);
        if !master.is_file() {
            return Err(Error::cache_corruption(dir));
        }

        for (relative, path) in &files {
            self.store.put_file(
                &self.hls_key(key, relative),
                path,
                content_type_for(path),
                &self.cache_control,
            )?;
        }
        self.store
            .put_file(&master_key, &master, content_type_for(&master), &self.cache_control)?;
        self.presence.record(&master_key, true);

        tracing::info!("offloaded {} files of {} to {master_key}", files.len() + 1, dir.display());
        Ok(files.len() + 1)
    }

    /// Replicate a ready artifact.
    pub fn replicate(&self, artifact: &Artifact) -> Result<()> {
        if !self.upload_enabled {
            return Ok(());
        }
        match artifact.class {
            DerivativeClass::Hls => self.upload_tree(&artifact.key, &artifact.path).map(|_| ()),
            class => {
                let object_key = self.object_key_for(class, &artifact.key, &artifact.path);
                self.upload_file(&object_key, &artifact.path).map(|_| ())
            }
        }
    }

    /// Where to redirect a reader, if the remote copy can serve them.
    ///
    /// Requires redirects to be enabled and the object to be present.
    /// With a public base the URL is `<base>/<object key>`; otherwise a
    /// presigned URL, unless `require_public` is set.
    pub fn remote_url(&self, object_key: &str, require_public: bool) -> Option<String> {
        if !self.redirect_enabled {
            return None;
        }
        if require_public && self.public_base.is_none() {
            return None;
        }
        if !self.is_present(object_key) {
            return None;
        }
        match &self.public_base {
            Some(base) => Some(format!("{base}/{object_key}")),
            None => match self.store.presigned_get(object_key, self.presign_ttl) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!("presigning {object_key} failed: {e}");
                    None
                }
            },
        }
    }
}
