//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which lays out temporary cache roots and a
//! local origin, and wires a [`MediaService`] to a scriptable
//! [`FakeEncoder`] and an in-memory object store.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use derivforge::config::Config;
use derivforge::dispatch::TaskQueue;
use derivforge::encoder::{Encoder, Invocation, Prober};
use derivforge::offload::MemoryObjectStore;
use derivforge::{MediaInput, MediaService, SourceDescriptor};
use derivforge_av::StreamInfo;

/// What the fake encoder does with one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Write plausible output and succeed.
    Write,
    /// Exit non-zero.
    Fail,
    /// Get killed at the timeout.
    Timeout,
    /// Exit zero without writing anything.
    Empty,
    /// Write some bytes, then exit non-zero.
    Partial,
}

type Script = Box<dyn Fn(&Invocation) -> Outcome + Send + Sync>;

/// Encoder double recording every invocation.
pub struct FakeEncoder {
    calls: Mutex<Vec<Invocation>>,
    delay: Duration,
    script: Script,
}

impl FakeEncoder {
    pub fn succeeding() -> Self {
        Self::scripted(|_| Outcome::Write)
    }

    pub fn scripted(script: impl Fn(&Invocation) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            script: Box::new(script),
        }
    }

    /// Sleep this long inside every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.label.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Encoder for FakeEncoder {
    fn run(&self, invocation: &Invocation) -> derivforge_av::Result<()> {
        self.calls.lock().push(invocation.clone());
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        match (self.script)(invocation) {
            Outcome::Write => {
                write_output(&invocation.output)?;
                Ok(())
            }
            Outcome::Fail => Err(derivforge_av::Error::tool_failed(
                "ffmpeg",
                "exited with exit status: 1",
            )),
            Outcome::Timeout => Err(derivforge_av::Error::timeout("ffmpeg", invocation.timeout)),
            Outcome::Empty => Ok(()),
            Outcome::Partial => {
                fs::write(&invocation.output, b"trunc")?;
                Err(derivforge_av::Error::tool_failed("ffmpeg", "killed mid-write"))
            }
        }
    }
}

/// HLS variant playlists get a segment next to them.
fn write_output(output: &Path) -> std::io::Result<()> {
    if output.file_name().and_then(|n| n.to_str()) == Some("stream.m3u8") {
        let dir = output.parent().unwrap_or(Path::new("."));
        fs::write(dir.join("seg_0000.ts"), b"segment")?;
        fs::write(output, "#EXTM3U\n#EXTINF:6.0,\nseg_0000.ts\n#EXT-X-ENDLIST\n")
    } else {
        fs::write(output, b"derivative bytes")
    }
}

/// Prober returning fixed stream facts.
pub struct StubProber(pub StreamInfo);

impl Prober for StubProber {
    fn probe(&self, _input: &MediaInput) -> derivforge_av::Result<StreamInfo> {
        Ok(self.0.clone())
    }
}

pub struct TestHarness {
    pub dir: TempDir,
    pub config: Config,
    pub encoder: Arc<FakeEncoder>,
    pub store: Arc<MemoryObjectStore>,
    pub service: MediaService,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_encoder(FakeEncoder::succeeding())
    }

    pub fn with_encoder(encoder: FakeEncoder) -> Self {
        Self::build(encoder, |_| {}, false, None)
    }

    /// Harness whose tasks go to `queue` first.
    pub fn with_queue(encoder: FakeEncoder, queue: Arc<dyn TaskQueue>) -> Self {
        Self::build(encoder, |_| {}, false, Some(queue))
    }

    /// Harness whose service replicates to the in-memory store.
    pub fn with_offload(encoder: FakeEncoder, configure: impl FnOnce(&mut Config)) -> Self {
        Self::build(encoder, configure, true, None)
    }

    pub fn with_config(encoder: FakeEncoder, configure: impl FnOnce(&mut Config)) -> Self {
        Self::build(encoder, configure, false, None)
    }

    fn build(
        encoder: FakeEncoder,
        configure: impl FnOnce(&mut Config),
        offload: bool,
        queue: Option<Arc<dyn TaskQueue>>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = Config::default();
        config.cache.thumbnail_dir = dir.path().join("thumbnails");
        config.cache.proxy_dir = dir.path().join("proxy-cache");
        config.cache.hls_dir = dir.path().join("hls-cache");
        config.origin.local_root = Some(dir.path().join("origin"));
        configure(&mut config);

        let encoder = Arc::new(encoder);
        let store = Arc::new(MemoryObjectStore::new());
        let mut builder = MediaService::builder(config.clone())
            .encoder(encoder.clone())
            .prober(Arc::new(StubProber(StreamInfo {
                frame_rate: Some(25.0),
                duration: Some(100.0),
                width: Some(1920),
                height: Some(1080),
            })));
        if offload {
            builder = builder.object_store(store.clone());
        }
        if let Some(queue) = queue {
            builder = builder.task_queue(queue);
        }
        let service = builder.build().expect("failed to build service");

        Self {
            dir,
            config,
            encoder,
            store,
            service,
        }
    }

    /// Create an origin file and describe it.
    pub fn source(&self, path: &str) -> SourceDescriptor {
        let file = self.dir.path().join("origin/share01").join(path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"source media bytes").unwrap();
        SourceDescriptor::new("share01", path, 18, "1700000000").unwrap()
    }

    /// Wait for background uploads and pre-warm tasks.
    pub fn drain(&self) {
        assert!(self.service.dispatcher().wait_idle(Duration::from_secs(10)));
    }
}
