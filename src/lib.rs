//! Derivforge - media-derivative cache
//!
//! Generates thumbnails, streaming proxies, and HLS packages from files held
//! by an origin file service, with single-flight generation per cache key,
//! per-class encoder limits, escalating generation strategies, and
//! best-effort replication to an S3-compatible object store.
//!
//! The library crate exposes the components for embedding and integration
//! testing; the `derivforge` binary drives them from the command line.

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod encoder;
pub mod escalation;
pub mod fingerprint;
pub mod governor;
pub mod lock;
pub mod offload;
pub mod profile;
pub mod service;
pub mod source;
pub mod thumbnail;

pub use coordinator::{Artifact, GenerationCoordinator, Readiness, Target};
pub use derivforge_av::MediaInput;
pub use derivforge_common::{DerivativeClass, Error, ImageFormat, Result, SourceDescriptor};
pub use fingerprint::{derive_key, CacheKey, KeyParams};
pub use service::{Delivery, MediaService, ThumbnailRequest};
