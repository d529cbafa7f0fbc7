//! Deterministic cache keys for derivatives.
//!
//! A key is the SHA-256 of a canonical string built from the derivative
//! class, the encoding profile (including its version), the source
//! descriptor, and the per-request parameters. Every component is
//! length-prefixed, so no combination of field values can collide by
//! concatenation. Bumping a profile version changes every key of that
//! class; old derivatives are simply never looked up again.

use std::fmt;

use derivforge_common::{DerivativeClass, SourceDescriptor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::profile::EncodingProfile;

/// Hex-encoded SHA-256 identifying one derivative.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `value` has the shape of a key (64 lowercase hex chars).
    pub fn is_well_formed(value: &str) -> bool {
        value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Wrap a previously derived key, e.g. from a task envelope.
    pub fn parse(value: &str) -> Option<Self> {
        Self::is_well_formed(value).then(|| Self(value.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Request parameters that select a specific derivative, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyParams(Vec<(&'static str, String)>);

impl KeyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl fmt::Display) -> Self {
        self.0.push((name, value.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Derive the cache key for one derivative.
pub fn derive_key(
    class: DerivativeClass,
    profile: &dyn EncodingProfile,
    source: &SourceDescriptor,
    params: &KeyParams,
) -> CacheKey {
    let canonical = canonical_string(class, profile, source, params);
    CacheKey(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// The exact string hashed by [`derive_key`].
pub fn canonical_string(
    class: DerivativeClass,
    profile: &dyn EncodingProfile,
    source: &SourceDescriptor,
    params: &KeyParams,
) -> String {
    let fingerprint = profile.fingerprint();
    let size = source.size.to_string();
    let rendered: Vec<String> = params
        .0
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();

    let fields = [
        class.tag(),
        profile.version(),
        fingerprint.as_str(),
        source.share.as_str(),
        source.path.as_str(),
        size.as_str(),
        source.modified.as_str(),
    ];

    let mut canonical = String::new();
    for field in fields.into_iter().chain(rendered.iter().map(String::as_str)) {
        canonical.push_str(&field.len().to_string());
        canonical.push(':');
        canonical.push_str(field);
    }
    canonical
}
