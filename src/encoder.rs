//! Seams around the external media tools.
//!
//! Strategies never spawn processes themselves; they describe an
//! [`Invocation`] and hand it to an [`Encoder`]. Production uses
//! [`FfmpegEncoder`]; tests substitute a recording fake.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derivforge_av::{probe_stream, MediaInput, StreamInfo, ToolCommand, ToolPaths};

/// One external encoder run.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Strategy label, e.g. `remux` or `jpg@seek`.
    pub label: String,
    /// Arguments after the program name.
    pub args: Vec<String>,
    /// Primary output the run is expected to produce.
    pub output: PathBuf,
    /// Hard limit; the process is killed when it passes.
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(
        label: impl Into<String>,
        args: Vec<String>,
        output: &Path,
        timeout: Duration,
    ) -> Self {
        Self {
            label: label.into(),
            args,
            output: output.to_path_buf(),
            timeout,
        }
    }
}

/// Runs encoder invocations to completion, failure, or timeout.
pub trait Encoder: Send + Sync {
    fn run(&self, invocation: &Invocation) -> derivforge_av::Result<()>;
}

/// Reads stream facts from a source.
pub trait Prober: Send + Sync {
    fn probe(&self, input: &MediaInput) -> derivforge_av::Result<StreamInfo>;
}

/// [`Encoder`] backed by the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(tools: &ToolPaths) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
        }
    }
}

impl Encoder for FfmpegEncoder {
    fn run(&self, invocation: &Invocation) -> derivforge_av::Result<()> {
        tracing::debug!(
            label = %invocation.label,
            output = %invocation.output.display(),
            timeout = ?invocation.timeout,
            "running ffmpeg"
        );
        ToolCommand::new(self.ffmpeg.clone())
            .args(invocation.args.iter().cloned())
            .timeout(invocation.timeout)
            .execute()?;
        Ok(())
    }
}

/// [`Prober`] backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(tools: &ToolPaths, timeout: Duration) -> Self {
        Self {
            ffprobe: tools.ffprobe.clone(),
            timeout,
        }
    }
}

impl Prober for FfprobeProber {
    fn probe(&self, input: &MediaInput) -> derivforge_av::Result<StreamInfo> {
        probe_stream(&self.ffprobe, input, self.timeout)
    }
}
