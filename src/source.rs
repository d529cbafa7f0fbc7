//! Turning source descriptors into encoder inputs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use derivforge_av::MediaInput;
use derivforge_common::{Error, Result, SourceDescriptor};
use reqwest::Url;

/// Resolves a source to something the encoder can read.
pub trait SourceLocator: Send + Sync {
    fn locate(&self, source: &SourceDescriptor) -> Result<MediaInput>;
}

/// Supplies auth headers for origin fetches.
pub trait RequestSigner: Send + Sync {
    fn headers(&self, source: &SourceDescriptor) -> Vec<(String, String)>;
}

/// Signer that adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSigner;

impl RequestSigner for NoSigner {
    fn headers(&self, _source: &SourceDescriptor) -> Vec<(String, String)> {
        Vec::new()
    }
}

impl<F> RequestSigner for F
where
    F: Fn(&SourceDescriptor) -> Vec<(String, String)> + Send + Sync,
{
    fn headers(&self, source: &SourceDescriptor) -> Vec<(String, String)> {
        self(source)
    }
}

/// Streams sources from the origin's public download endpoint.
pub struct OriginLocator {
    base: Url,
    signer: Arc<dyn RequestSigner>,
}

impl OriginLocator {
    pub fn new(base: &str, signer: Arc<dyn RequestSigner>) -> Result<Self> {
        let base = Url::parse(base.trim())
            .map_err(|e| Error::invalid_input(format!("origin base {base:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::invalid_input(format!("origin base {base} cannot hold paths")));
        }
        Ok(Self { base, signer })
    }

    /// `<base>/<share>/<path>?inline=true`
    pub fn url_for(&self, source: &SourceDescriptor) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::internal("origin base cannot hold paths"))?
            .pop_if_empty()
            .push(&source.share)
            .extend(source.path.split('/'));
        url.query_pairs_mut().append_pair("inline", "true");
        Ok(url)
    }
}

impl SourceLocator for OriginLocator {
    fn locate(&self, source: &SourceDescriptor) -> Result<MediaInput> {
        let url = self.url_for(source)?;
        let input = self
            .signer
            .headers(source)
            .into_iter()
            .fold(MediaInput::new(url.as_str()), |input, (name, value)| {
                input.with_header(name, value)
            });
        Ok(input)
    }
}

/// Reads sources from a directory laid out as `<root>/<share>/<path>`.
#[derive(Debug, Clone)]
pub struct LocalLocator {
    root: PathBuf,
}

impl LocalLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, source: &SourceDescriptor) -> PathBuf {
        source
            .path
            .split('/')
            .fold(self.root.join(&source.share), |p, part| p.join(part))
    }

    /// Build a descriptor from the file on disk: its size and mtime
    /// (seconds since the epoch) become the fingerprint inputs.
    pub fn describe(&self, share: &str, path: &str) -> Result<SourceDescriptor> {
        let probe = SourceDescriptor::new(share, path, 0, "")?;
        let file = self.path_for(&probe);
        let meta = file
            .metadata()
            .map_err(|e| Error::source_unavailable(format!("{}: {e}", file.display())))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs().to_string())
            .unwrap_or_default();
        SourceDescriptor::new(share, &probe.path, meta.len(), modified)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceLocator for LocalLocator {
    fn locate(&self, source: &SourceDescriptor) -> Result<MediaInput> {
        let path = self.path_for(source);
        if !path.is_file() {
            return Err(Error::source_unavailable(format!(
                "{source} not found at {}",
                path.display()
            )));
        }
        Ok(MediaInput::new(path.to_string_lossy()))
    }
}
