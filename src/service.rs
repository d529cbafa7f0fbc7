//! The derivative service: one owned object wiring key derivation,
//! single-flight generation, offload, and task dispatch.
//!
//! Construct it once at startup with [`MediaService::builder`] and share it
//! by cloning; clones share every registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use derivforge_av::actions::Rendition;
use derivforge_av::playlist::MASTER_PLAYLIST;
use derivforge_av::{MediaInput, ToolPaths};
use derivforge_common::{DerivativeClass, Error, ImageFormat, Result, SourceDescriptor};
use serde::{Deserialize, Serialize};

use crate::config::{CacheConfig, Config};
use crate::coordinator::{readiness, Artifact, GenerationCoordinator, Readiness, Target};
use crate::dispatch::{Enqueued, HttpTaskQueue, Job, TaskDispatcher, TaskEnvelope, TaskQueue};
use crate::encoder::{Encoder, FfmpegEncoder, FfprobeProber, Prober};
use crate::escalation::{fast_proxy_ladder, hd_proxy_ladder, hls_ladder, thumbnail_ladder};
use crate::fingerprint::{derive_key, CacheKey, KeyParams};
use crate::governor::ConcurrencyGovernor;
use crate::offload::{ObjectStore, OffloadTier};
use crate::profile::{HlsProfile, ProxyProfile, ThumbnailProfile};
use crate::source::{LocalLocator, NoSigner, OriginLocator, SourceLocator};
use crate::thumbnail::{
    fallback_formats, negotiate_format, thumbnail_timeline, Negotiated, DEFAULT_VIDEO_SEEK,
};

/// Task names understood by [`MediaService::execute`].
pub const TASK_GENERATE: &str = "generate";
pub const TASK_OFFLOAD: &str = "offload";

/// How a reader should receive a derivative.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    /// Redirect to the replicated copy.
    Remote { url: String },
    /// Serve the local artifact.
    Local { artifact: Artifact },
}

impl Delivery {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Delivery::Local { artifact } => Some(artifact),
            Delivery::Remote { .. } => None,
        }
    }
}

/// Parameters of a single thumbnail request.
#[derive(Debug, Clone)]
pub struct ThumbnailRequest {
    pub source: SourceDescriptor,
    /// `auto`, `avif`, `webp`, `jpg`/`jpeg`; unknown values mean `auto`.
    pub format: Option<String>,
    /// The reader's `Accept` header.
    pub accept: Option<String>,
    pub width: Option<u32>,
    /// Seek offset for video sources.
    pub time: Option<f64>,
}

impl ThumbnailRequest {
    pub fn new(source: SourceDescriptor) -> Self {
        Self {
            source,
            format: None,
            accept: None,
            width: None,
            time: None,
        }
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn time(mut self, seconds: f64) -> Self {
        self.time = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Thumbnail {
    /// Format actually delivered; a fallback when the negotiated one failed.
    pub format: ImageFormat,
    pub mime_type: &'static str,
    /// Responses must carry `Vary: Accept`.
    pub vary_accept: bool,
    pub delivery: Delivery,
}

/// One frame of a multi-frame strip.
#[derive(Debug, Clone, Serialize)]
pub struct ThumbnailFrame {
    pub time: f64,
    pub thumbnail: Thumbnail,
}

/// Readiness of one derivative class for a source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub key: CacheKey,
    pub ready: bool,
    pub path: Option<PathBuf>,
    pub size: Option<u64>,
    /// Remote URL, when the replicated copy can serve readers.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourcesReport {
    pub share: String,
    pub path: String,
    pub size: u64,
    pub fast: SourceStatus,
    pub hd: SourceStatus,
    pub hls: SourceStatus,
    pub variants: Vec<Rendition>,
}

/// Per-target outcome of [`MediaService::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepareStatus {
    /// Already generated locally or replicated.
    Ready,
    Started,
    Queued,
    AlreadyRunning,
}

impl From<Enqueued> for PrepareStatus {
    fn from(value: Enqueued) -> Self {
        match value {
            Enqueued::Started => PrepareStatus::Started,
            Enqueued::Queued => PrepareStatus::Queued,
            Enqueued::AlreadyRunning => PrepareStatus::AlreadyRunning,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareReport {
    pub requested: Vec<DerivativeClass>,
    pub outcomes: BTreeMap<String, PrepareStatus>,
}

/// Payload of a `generate` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePayload {
    pub class: DerivativeClass,
    pub source: SourceDescriptor,
}

/// Payload of an `offload` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadPayload {
    pub class: DerivativeClass,
    pub key: CacheKey,
    pub path: PathBuf,
}

/// Parse prepare targets: comma separated, `adaptive` means `hls`,
/// thumbnails and unknown names are ignored, nothing means `hd`.
pub fn parse_targets(raw: &[String]) -> Vec<DerivativeClass> {
    let mut targets: Vec<DerivativeClass> = raw
        .iter()
        .flat_map(|r| r.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter_map(|t| match t.parse::<DerivativeClass>() {
            Ok(DerivativeClass::Thumbnail) | Err(_) => {
                tracing::debug!("ignoring prepare target {t:?}");
                None
            }
            Ok(class) => Some(class),
        })
        .collect();
    targets.sort_by_key(|c| DerivativeClass::ALL.iter().position(|a| a == c));
    targets.dedup();
    if targets.is_empty() {
        targets.push(DerivativeClass::HdProxy);
    }
    targets
}

struct Inner {
    cache: CacheConfig,
    thumbnails: ThumbnailProfile,
    multi_default: usize,
    multi_max: usize,
    fast: ProxyProfile,
    hd: ProxyProfile,
    hls: HlsProfile,
    coordinator: GenerationCoordinator,
    locator: Arc<dyn SourceLocator>,
    prober: Arc<dyn Prober>,
    offload: Option<OffloadTier>,
    dispatcher: TaskDispatcher,
}

/// Explicit construction of a [`MediaService`]; anything not injected is
/// built from the configuration.
pub struct ServiceBuilder {
    config: Config,
    encoder: Option<Arc<dyn Encoder>>,
    prober: Option<Arc<dyn Prober>>,
    locator: Option<Arc<dyn SourceLocator>>,
    store: Option<Arc<dyn ObjectStore>>,
    queue: Option<Arc<dyn TaskQueue>>,
}

impl ServiceBuilder {
    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn locator(mut self, locator: Arc<dyn SourceLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Use `store` for offload. An injected store enables the tier
    /// regardless of `[offload] enabled`.
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn task_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> Result<MediaService> {
        let config = self.config;
        let tools = ToolPaths::discover(
            config.tools.ffmpeg_path.as_deref(),
            config.tools.ffprobe_path.as_deref(),
        );

        let encoder = self
            .encoder
            .unwrap_or_else(|| Arc::new(FfmpegEncoder::new(&tools)));
        let prober = self.prober.unwrap_or_else(|| {
            Arc::new(FfprobeProber::new(
                &tools,
                Duration::from_secs(config.tools.probe_timeout_secs),
            ))
        });

        let locator: Arc<dyn SourceLocator> = match self.locator {
            Some(locator) => locator,
            None => match (&config.origin.local_root, &config.origin.public_dl_base) {
                (Some(root), _) => Arc::new(LocalLocator::new(root)),
                (None, Some(base)) => Arc::new(OriginLocator::new(base, Arc::new(NoSigner))?),
                (None, None) => Arc::new(Unconfigured),
            },
        };

        let offload = match self.store {
            Some(store) => Some(OffloadTier::new(store, &config.offload)),
            None => OffloadTier::from_config(&config.offload)?,
        };

        let queue: Option<Arc<dyn TaskQueue>> = match (self.queue, &config.dispatch.queue_url) {
            (Some(queue), _) => Some(queue),
            (None, Some(url)) => Some(Arc::new(HttpTaskQueue::new(
                url.as_str(),
                Duration::from_secs(config.dispatch.submit_timeout_secs),
            )?)),
            (None, None) => None,
        };
        let dispatcher = match queue {
            Some(queue) => TaskDispatcher::with_queue(
                queue,
                Duration::from_secs(config.dispatch.dedup_ttl_secs),
            ),
            None => TaskDispatcher::local(),
        };

        let governor = Arc::new(ConcurrencyGovernor::from_config(&config));

        Ok(MediaService {
            inner: Arc::new(Inner {
                thumbnails: ThumbnailProfile::from_config(&config.thumbnails),
                multi_default: config.thumbnails.multi_default,
                multi_max: config.thumbnails.multi_max,
                fast: ProxyProfile::fast(&config.fast_proxy),
                hd: ProxyProfile::hd(&config.hd_proxy),
                hls: HlsProfile::from_config(&config.hls),
                cache: config.cache,
                coordinator: GenerationCoordinator::new(governor, encoder),
                locator,
                prober,
                offload,
                dispatcher,
            }),
        })
    }
}

/// Locator used when no origin is configured.
struct Unconfigured;

impl SourceLocator for Unconfigured {
    fn locate(&self, source: &SourceDescriptor) -> Result<MediaInput> {
        Err(Error::source_unavailable(format!("{source}: no origin configured")))
    }
}

#[derive(Clone)]
pub struct MediaService {
    inner: Arc<Inner>,
}

impl MediaService {
    pub fn builder(config: Config) -> ServiceBuilder {
        ServiceBuilder {
            config,
            encoder: None,
            prober: None,
            locator: None,
            store: None,
            queue: None,
        }
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.inner.dispatcher
    }

    pub fn offload(&self) -> Option<&OffloadTier> {
        self.inner.offload.as_ref()
    }

    pub fn thumbnail_profile(&self) -> &ThumbnailProfile {
        &self.inner.thumbnails
    }

    /// Cache key and local path of a video derivative.
    pub fn target(&self, class: DerivativeClass, source: &SourceDescriptor) -> Result<Target> {
        let inner = &self.inner;
        let (key, path) = match class {
            DerivativeClass::FastProxy => {
                let key = derive_key(class, &inner.fast, source, &KeyParams::new());
                let path = inner.cache.proxy_dir.join(format!("{key}.mp4"));
                (key, path)
            }
            DerivativeClass::HdProxy => {
                let key = derive_key(class, &inner.hd, source, &KeyParams::new());
                let path = inner.cache.proxy_dir.join(format!("{key}.mp4"));
                (key, path)
            }
            DerivativeClass::Hls => {
                let key = derive_key(class, &inner.hls, source, &KeyParams::new());
                let path = inner.cache.hls_dir.join(key.as_str());
                (key, path)
            }
            DerivativeClass::Thumbnail => {
                return Err(Error::invalid_input("thumbnail targets depend on request parameters"))
            }
        };
        Ok(Target::new(class, key, path))
    }

    /// Deliver one thumbnail, generating it on a miss.
    pub fn thumbnail(&self, request: &ThumbnailRequest) -> Result<Thumbnail> {
        let inner = &self.inner;
        let source = &request.source;
        let is_video = source.is_video();
        if !is_video && !source.is_image() {
            return Err(Error::invalid_input(format!("unsupported preview type: {source}")));
        }

        let profile = &inner.thumbnails;
        let negotiated =
            negotiate_format(profile, request.format.as_deref(), request.accept.as_deref());
        let width = profile.normalize_width(request.width);
        let time = request.time.filter(|_| is_video);
        let seek = is_video.then(|| time.unwrap_or(DEFAULT_VIDEO_SEEK));

        let mut params = KeyParams::new().with("w", width);
        if let Some(time) = time {
            params = params.with("t", time);
        }
        let key = derive_key(DerivativeClass::Thumbnail, profile, source, &params);
        let path_for = |format: ImageFormat| {
            inner
                .cache
                .thumbnail_dir
                .join(format!("{key}.{}", format.extension()))
        };

        if let Some(url) = self.remote_url(
            DerivativeClass::Thumbnail,
            &key,
            &path_for(negotiated.format),
        ) {
            return Ok(thumbnail_response(negotiated, negotiated.format, Delivery::Remote { url }));
        }

        let target = Target::new(
            DerivativeClass::Thumbnail,
            key.clone(),
            path_for(negotiated.format),
        );
        let artifact = inner.coordinator.ensure(&target, || {
            let input = inner.locator.locate(source)?;
            let mut formats = vec![negotiated.format];
            formats.extend(fallback_formats(profile, negotiated.format));
            Ok(thumbnail_ladder(profile, &input, &formats, width, seek, path_for))
        })?;

        let format = artifact
            .path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse::<ImageFormat>().ok())
            .unwrap_or(negotiated.format);
        self.schedule_offload(&artifact);
        Ok(thumbnail_response(negotiated, format, Delivery::Local { artifact }))
    }

    /// Thumbnails along a video's timeline. Explicit `times` (comma
    /// separated seconds) win over `count`.
    pub fn thumbnail_strip(
        &self,
        request: &ThumbnailRequest,
        times: Option<&str>,
        count: Option<usize>,
    ) -> Result<Vec<ThumbnailFrame>> {
        let source = &request.source;
        if !source.is_video() {
            return Err(Error::invalid_input(format!("not a video: {source}")));
        }

        let explicit = times.is_some_and(|t| !t.trim().is_empty());
        let duration = if explicit {
            None
        } else {
            let input = self.inner.locator.locate(source)?;
            match self.inner.prober.probe(&input) {
                Ok(info) => info.duration,
                Err(e) => {
                    tracing::debug!("duration probe failed for {source}: {e}");
                    None
                }
            }
        };

        let offsets = thumbnail_timeline(
            duration,
            times,
            count,
            self.inner.multi_default,
            self.inner.multi_max,
        );
        offsets
            .into_iter()
            .map(|time| {
                let frame = ThumbnailRequest {
                    time: Some(time),
                    ..request.clone()
                };
                Ok(ThumbnailFrame {
                    time,
                    thumbnail: self.thumbnail(&frame)?,
                })
            })
            .collect()
    }

    pub fn fast_proxy(&self, source: &SourceDescriptor) -> Result<Delivery> {
        self.deliver(DerivativeClass::FastProxy, source)
    }

    pub fn hd_proxy(&self, source: &SourceDescriptor) -> Result<Delivery> {
        self.deliver(DerivativeClass::HdProxy, source)
    }

    pub fn hls(&self, source: &SourceDescriptor) -> Result<Delivery> {
        self.deliver(DerivativeClass::Hls, source)
    }

    fn deliver(&self, class: DerivativeClass, source: &SourceDescriptor) -> Result<Delivery> {
        require_video(source)?;
        let target = self.target(class, source)?;
        if let Some(url) = self.remote_url(class, &target.key, &target.path) {
            return Ok(Delivery::Remote { url });
        }
        let artifact = self.generate(&target, source)?;
        self.schedule_offload(&artifact);
        Ok(Delivery::Local { artifact })
    }

    /// Ensure a video derivative exists locally.
    pub fn ensure_local(
        &self,
        class: DerivativeClass,
        source: &SourceDescriptor,
    ) -> Result<Artifact> {
        require_video(source)?;
        let target = self.target(class, source)?;
        self.generate(&target, source)
    }

    fn generate(&self, target: &Target, source: &SourceDescriptor) -> Result<Artifact> {
        let inner = &self.inner;
        inner.coordinator.ensure(target, || {
            let input = inner.locator.locate(source)?;
            Ok(match target.class {
                DerivativeClass::FastProxy => fast_proxy_ladder(&inner.fast, &input, &target.path),
                DerivativeClass::HdProxy => hd_proxy_ladder(&inner.hd, &input, &target.path),
                DerivativeClass::Hls => {
                    hls_ladder(&inner.hls, &input, Arc::clone(&inner.prober), &target.path)
                }
                DerivativeClass::Thumbnail => {
                    return Err(Error::invalid_input("use thumbnail() for thumbnails"))
                }
            })
        })
    }

    fn remote_url(&self, class: DerivativeClass, key: &CacheKey, path: &Path) -> Option<String> {
        let offload = self.inner.offload.as_ref()?;
        let object_key = offload.object_key_for(class, key, path);
        offload.remote_url(&object_key, class == DerivativeClass::Hls)
    }

    /// Queue replication of a ready artifact. Never fails the caller.
    pub fn schedule_offload(&self, artifact: &Artifact) {
        let Some(offload) = self.inner.offload.as_ref() else {
            return;
        };
        if !offload.uploads_enabled() {
            return;
        }

        let id = match artifact.class {
            DerivativeClass::Thumbnail => {
                let ext = artifact
                    .path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default();
                format!("offload:thumb:{}:{ext}", artifact.key)
            }
            DerivativeClass::FastProxy | DerivativeClass::HdProxy => {
                format!("offload:proxy:{}", artifact.key)
            }
            DerivativeClass::Hls => format!("offload:hls:{}", artifact.key),
        };
        let payload = OffloadPayload {
            class: artifact.class,
            key: artifact.key.clone(),
            path: artifact.path.clone(),
        };
        let payload = match serde_json::to_value(&payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("{}", Error::offload_failed(format!("{id}: {e}")));
                return;
            }
        };

        let service = self.clone();
        let artifact = artifact.clone();
        let job = Job::new(id.clone(), TASK_OFFLOAD, payload, move || {
            service.replicate(&artifact)
        });
        if let Err(e) = self.inner.dispatcher.enqueue(job) {
            tracing::warn!("{}", Error::offload_failed(format!("{id}: {e}")));
        }
    }

    fn replicate(&self, artifact: &Artifact) -> Result<()> {
        match self.inner.offload.as_ref() {
            Some(offload) => offload.replicate(artifact),
            None => Ok(()),
        }
    }

    fn status(&self, class: DerivativeClass, source: &SourceDescriptor) -> Result<SourceStatus> {
        let target = self.target(class, source)?;
        let local = readiness(class, &target.path) == Readiness::Ready;
        let url = self.remote_url(class, &target.key, &target.path);
        let size = local
            .then(|| {
                let file = match class {
                    DerivativeClass::Hls => target.path.join(MASTER_PLAYLIST),
                    _ => target.path.clone(),
                };
                file.metadata().ok().map(|m| m.len())
            })
            .flatten();
        Ok(SourceStatus {
            key: target.key,
            ready: local || url.is_some(),
            path: local.then_some(target.path),
            size,
            url,
        })
    }

    /// Readiness of every video derivative of `source`.
    pub fn sources(&self, source: &SourceDescriptor) -> Result<SourcesReport> {
        require_video(source)?;
        Ok(SourcesReport {
            share: source.share.clone(),
            path: source.path.clone(),
            size: source.size,
            fast: self.status(DerivativeClass::FastProxy, source)?,
            hd: self.status(DerivativeClass::HdProxy, source)?,
            hls: self.status(DerivativeClass::Hls, source)?,
            variants: self.inner.hls.ladder.clone(),
        })
    }

    /// Pre-warm video derivatives in the background.
    pub fn prepare(
        &self,
        source: &SourceDescriptor,
        targets: &[DerivativeClass],
    ) -> Result<PrepareReport> {
        require_video(source)?;
        let mut outcomes = BTreeMap::new();

        for class in targets.iter().copied() {
            if class == DerivativeClass::Thumbnail {
                continue;
            }
            let status = self.status(class, source)?;
            if status.ready {
                outcomes.insert(class.tag().to_string(), PrepareStatus::Ready);
                continue;
            }

            let payload = serde_json::to_value(GeneratePayload {
                class,
                source: source.clone(),
            })
            .map_err(|e| Error::internal(format!("task payload: {e}")))?;
            let service = self.clone();
            let task_source = source.clone();
            let job = Job::new(
                format!("{}:{}", class.tag(), status.key),
                TASK_GENERATE,
                payload,
                move || service.generate_and_offload(class, &task_source),
            );
            let enqueued = self.inner.dispatcher.enqueue(job)?;
            outcomes.insert(class.tag().to_string(), enqueued.into());
        }

        Ok(PrepareReport {
            requested: targets.to_vec(),
            outcomes,
        })
    }

    fn generate_and_offload(
        &self,
        class: DerivativeClass,
        source: &SourceDescriptor,
    ) -> Result<()> {
        let artifact = self.ensure_local(class, source)?;
        self.schedule_offload(&artifact);
        Ok(())
    }

    /// Run a task envelope in this process (the external worker side).
    /// Replication runs inline so the work is done when this returns.
    pub fn execute(&self, envelope: &TaskEnvelope) -> Result<()> {
        tracing::info!(task = %envelope.id, name = %envelope.name, "executing task");
        match envelope.name.as_str() {
            TASK_GENERATE => {
                let payload: GeneratePayload = serde_json::from_value(envelope.payload.clone())
                    .map_err(|e| Error::invalid_input(format!("generate payload: {e}")))?;
                let artifact = self.ensure_local(payload.class, &payload.source)?;
                if let Err(e) = self.replicate(&artifact) {
                    tracing::warn!(task = %envelope.id, "{e}");
                }
                Ok(())
            }
            TASK_OFFLOAD => {
                let payload: OffloadPayload = serde_json::from_value(envelope.payload.clone())
                    .map_err(|e| Error::invalid_input(format!("offload payload: {e}")))?;
                if readiness(payload.class, &payload.path) != Readiness::Ready {
                    return Err(Error::cache_corruption(payload.path));
                }
                let artifact = Artifact {
                    size: 0,
                    key: payload.key,
                    class: payload.class,
                    path: payload.path,
                    strategy: None,
                    generated: false,
                };
                if let Err(e) = self.replicate(&artifact) {
                    tracing::warn!(task = %envelope.id, "{e}");
                }
                Ok(())
            }
            other => Err(Error::invalid_input(format!("unknown task: {other}"))),
        }
    }
}

fn thumbnail_response(
    negotiated: Negotiated,
    format: ImageFormat,
    delivery: Delivery,
) -> Thumbnail {
    Thumbnail {
        format,
        mime_type: format.mime_type(),
        vary_accept: negotiated.vary_accept,
        delivery,
    }
}

fn require_video(source: &SourceDescriptor) -> Result<()> {
    if source.is_video() {
        Ok(())
    } else {
        Err(Error::invalid_input(format!("not a video: {source}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert_eq!(parse_targets(&[]), vec![DerivativeClass::HdProxy]);
        assert_eq!(
            parse_targets(&["adaptive, FAST".to_string(), "hls".to_string()]),
            vec![DerivativeClass::FastProxy, DerivativeClass::Hls]
        );
        assert_eq!(
            parse_targets(&["thumb,bogus".to_string()]),
            vec![DerivativeClass::HdProxy]
        );
    }
}
