//! Staging areas for atomic publication.
//!
//! Tools write into a temporary file or directory created next to the
//! final destination (same filesystem), and [`Workspace::finalize`] renames
//! it into place. A workspace dropped without finalizing removes its
//! staging area, so a failed or interrupted write never appears at the
//! destination path.

use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};

enum Staging {
    File(NamedTempFile),
    Dir(TempDir),
}

/// Temporary output location bound to a final destination.
///
/// # Example
///
/// ```no_run
/// use derivforge_av::Workspace;
/// use std::path::Path;
///
/// let workspace = Workspace::file(Path::new("/cache/proxy/abc.mp4"))?;
/// // run ffmpeg writing to workspace.path()
/// workspace.finalize()?;
/// # Ok::<(), derivforge_av::Error>(())
/// ```
pub struct Workspace {
    staging: Staging,
    destination: PathBuf,
}

impl Workspace {
    /// Stage a single output file for `destination`.
    pub fn file(destination: &Path) -> Result<Self> {
        let (parent, name) = split_destination(destination)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| Error::Workspace(format!("failed to stage {name}: {e}")))?;

        Ok(Self {
            staging: Staging::File(staging),
            destination: destination.to_path_buf(),
        })
    }

    /// Stage an output directory tree for `destination`.
    pub fn dir(destination: &Path) -> Result<Self> {
        let (parent, name) = split_destination(destination)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempdir_in(parent)
            .map_err(|e| Error::Workspace(format!("failed to stage {name}: {e}")))?;

        Ok(Self {
            staging: Staging::Dir(staging),
            destination: destination.to_path_buf(),
        })
    }

    /// Where the tool should write.
    pub fn path(&self) -> &Path {
        match &self.staging {
            Staging::File(f) => f.path(),
            Staging::Dir(d) => d.path(),
        }
    }

    /// Final destination.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Atomically move the staged output to its destination.
    ///
    /// Files must be non-empty. A directory replaces any existing tree at
    /// the destination.
    pub fn finalize(self) -> Result<PathBuf> {
        match self.staging {
            Staging::File(file) => {
                let len = file.path().metadata()?.len();
                if len == 0 {
                    return Err(Error::EmptyOutput {
                        path: self.destination,
                    });
                }
                relax_permissions(file.path(), 0o644)?;
                file.persist(&self.destination)
                    .map_err(|e| Error::Workspace(format!("failed to publish: {}", e.error)))?;
            }
            Staging::Dir(dir) => {
                relax_permissions(dir.path(), 0o755)?;
                if self.destination.exists() {
                    fs::remove_dir_all(&self.destination)?;
                }
                fs::rename(dir.path(), &self.destination)
                    .map_err(|e| Error::Workspace(format!("failed to publish: {e}")))?;
                // The TempDir no longer owns anything; its cleanup is a no-op.
                drop(dir);
            }
        }

        Ok(self.destination)
    }

    /// Discard the staged output.
    pub fn cleanup(self) {
        drop(self.staging);
    }
}

/// Staging areas are created owner-only; published artifacts are shared.
#[cfg(unix)]
fn relax_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn relax_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn split_destination(destination: &Path) -> Result<(&Path, String)> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("no parent directory: {destination:?}")))?;
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::InvalidInput(format!("no file name: {destination:?}")))?;
    fs::create_dir_all(parent)?;
    Ok((parent, name))
}
