//! Single-flight generation of local artifacts.
//!
//! [`GenerationCoordinator::ensure`] returns a ready artifact, generating it
//! at most once per cache key at a time across every thread and process
//! sharing the cache directory:
//!
//! 1. A ready artifact is returned without locking (its access time is
//!    refreshed for external eviction).
//! 2. Otherwise the [`GenerationLock`] for the target is taken, blocking
//!    behind any concurrent generation.
//! 3. Readiness is checked again under the lock.
//! 4. Still missing: an encoder slot is taken from the
//!    [`ConcurrencyGovernor`] and the escalation ladder runs.
//!
//! The lock and the slot are guards, so every exit path releases them.

use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use derivforge_av::playlist::MASTER_PLAYLIST;
use derivforge_common::{DerivativeClass, Error, Result};
use serde::Serialize;

use crate::encoder::Encoder;
use crate::escalation::EscalationLadder;
use crate::fingerprint::CacheKey;
use crate::governor::ConcurrencyGovernor;
use crate::lock::GenerationLock;

/// State of a target path on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Missing,
    Ready,
    /// Present but unusable: an empty file or a package without its
    /// master playlist.
    Corrupt,
}

/// A derivative the caller wants to exist locally.
#[derive(Debug, Clone)]
pub struct Target {
    pub class: DerivativeClass,
    pub key: CacheKey,
    pub path: PathBuf,
}

impl Target {
    pub fn new(class: DerivativeClass, key: CacheKey, path: PathBuf) -> Self {
        Self { class, key, path }
    }

    pub fn readiness(&self) -> Readiness {
        readiness(self.class, &self.path)
    }
}

/// A ready local artifact.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub key: CacheKey,
    pub class: DerivativeClass,
    /// File, or package directory for HLS.
    pub path: PathBuf,
    /// Strategy that produced it; `None` for cache hits.
    pub strategy: Option<String>,
    /// Bytes on disk (the master playlist for HLS).
    pub size: u64,
    /// Whether this call ran the encoder.
    pub generated: bool,
}

impl Artifact {
    fn existing(target: &Target, path: &Path) -> Self {
        Self {
            key: target.key.clone(),
            class: target.class,
            path: path.to_path_buf(),
            strategy: None,
            size: artifact_size(target.class, path),
            generated: false,
        }
    }
}

pub struct GenerationCoordinator {
    governor: Arc<ConcurrencyGovernor>,
    encoder: Arc<dyn Encoder>,
}

impl GenerationCoordinator {
    pub fn new(governor: Arc<ConcurrencyGovernor>, encoder: Arc<dyn Encoder>) -> Self {
        Self { governor, encoder }
    }

    /// Return the ready artifact for `target`, generating it if needed.
    ///
    /// `ladder` is only called on a miss, under the generation lock, so
    /// sources are resolved only when an encode will actually run.
    pub fn ensure(
        &self,
        target: &Target,
        ladder: impl FnOnce() -> Result<EscalationLadder>,
    ) -> Result<Artifact> {
        if target.readiness() == Readiness::Ready {
            tracing::debug!(class = %target.class, key = %target.key, "cache hit");
            touch(&target.path, target.class);
            return Ok(Artifact::existing(target, &target.path));
        }

        let _lock = GenerationLock::acquire(&target.path)?;

        match target.readiness() {
            Readiness::Ready => {
                tracing::debug!(
                    class = %target.class,
                    key = %target.key,
                    "generated by a concurrent caller"
                );
                return Ok(Artifact::existing(target, &target.path));
            }
            Readiness::Corrupt => discard_corrupt(&target.path)?,
            Readiness::Missing => {}
        }

        let ladder = ladder()?;
        let _permit = self.governor.acquire(target.class);
        tracing::info!(
            class = %target.class,
            key = %target.key,
            "generating {}",
            target.path.display()
        );

        let produced = ladder.run(self.encoder.as_ref())?;
        Ok(Artifact {
            key: target.key.clone(),
            class: target.class,
            size: artifact_size(target.class, &produced.path),
            strategy: Some(produced.label),
            generated: !produced.reused,
            path: produced.path,
        })
    }

    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.governor
    }
}

/// Readiness of a file derivative, or of an HLS package directory.
pub fn readiness(class: DerivativeClass, path: &Path) -> Readiness {
    let Ok(meta) = fs::metadata(path) else {
        return Readiness::Missing;
    };
    match class {
        DerivativeClass::Hls if meta.is_dir() => {
            if path.join(MASTER_PLAYLIST).is_file() {
                Readiness::Ready
            } else {
                Readiness::Corrupt
            }
        }
        DerivativeClass::Hls => Readiness::Corrupt,
        _ if meta.is_file() && meta.len() > 0 => Readiness::Ready,
        _ => Readiness::Corrupt,
    }
}

fn discard_corrupt(path: &Path) -> Result<()> {
    tracing::warn!("{}; regenerating", Error::cache_corruption(path));
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn marker(class: DerivativeClass, path: &Path) -> PathBuf {
    match class {
        DerivativeClass::Hls => path.join(MASTER_PLAYLIST),
        _ => path.to_path_buf(),
    }
}

fn artifact_size(class: DerivativeClass, path: &Path) -> u64 {
    fs::metadata(marker(class, path)).map(|m| m.len()).unwrap_or(0)
}

/// Refresh the access time so age-based eviction keeps hot artifacts.
fn touch(path: &Path, class: DerivativeClass) {
    let marker = marker(class, path);
    let result = File::open(&marker)
        .and_then(|f| f.set_times(FileTimes::new().set_accessed(SystemTime::now())));
    if let Err(e) = result {
        tracing::debug!("could not refresh access time of {}: {e}", marker.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        assert_eq!(readiness(DerivativeClass::Thumbnail, &path), Readiness::Missing);

        fs::write(&path, b"").unwrap();
        assert_eq!(readiness(DerivativeClass::Thumbnail, &path), Readiness::Corrupt);

        fs::write(&path, b"jpeg").unwrap();
        assert_eq!(readiness(DerivativeClass::Thumbnail, &path), Readiness::Ready);
    }

    #[test]
    fn test_package_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("key");
        assert_eq!(readiness(DerivativeClass::Hls, &package), Readiness::Missing);

        fs::create_dir_all(package.join("v360")).unwrap();
        assert_eq!(readiness(DerivativeClass::Hls, &package), Readiness::Corrupt);

        fs::write(package.join(MASTER_PLAYLIST), "#EXTM3U\n").unwrap();
        assert_eq!(readiness(DerivativeClass::Hls, &package), Readiness::Ready);
        assert_eq!(artifact_size(DerivativeClass::Hls, &package), 8);
    }

    #[test]
    fn test_discard_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("empty.mp4");
        fs::write(&file, b"").unwrap();
        discard_corrupt(&file).unwrap();
        assert!(!file.exists());

        let package = dir.path().join("pkg");
        fs::create_dir_all(package.join("v720")).unwrap();
        discard_corrupt(&package).unwrap();
        assert!(!package.exists());

        discard_corrupt(&dir.path().join("gone")).unwrap();
    }
}
