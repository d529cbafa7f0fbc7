//! Escalation ladders: ordered generation strategies per derivative class.
//!
//! A ladder walks its strategies in order. Each attempt writes into a
//! private staging area next to its destination and is published with an
//! atomic rename only when the encoder succeeds and produced output. A
//! non-zero exit, a timeout, or empty output moves on to the next strategy.

mod hls;
mod proxy;
mod thumbnail;

pub use hls::{hls_ladder, HlsPackage};
pub use proxy::{fast_proxy_ladder, hd_proxy_ladder, ProxyEncode, ProxyMode};
pub use thumbnail::{thumbnail_ladder, FrameGrab};

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use derivforge_av::Workspace;
use derivforge_common::{DerivativeClass, Error, Result};

use crate::encoder::Encoder;

/// Shape of a strategy's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staging {
    File,
    Dir,
}

/// What a strategy gets to work with for one attempt.
pub struct AttemptContext<'a> {
    pub encoder: &'a dyn Encoder,
    pub timeout: Duration,
    /// Staging path to write into; never the final destination.
    pub output: &'a Path,
}

/// One way of producing a derivative.
pub trait Strategy: Send + Sync {
    /// Short name used in logs and invocations.
    fn label(&self) -> String;

    /// Where the artifact lives once published.
    fn destination(&self) -> &Path;

    fn staging(&self) -> Staging {
        Staging::File
    }

    /// Accept an already published artifact at `destination` instead of
    /// encoding.
    fn reuse_existing(&self) -> bool {
        false
    }

    /// Whether to run given the previous attempt's failure, if any.
    fn applies_after(&self, _previous: Option<&derivforge_av::Error>) -> bool {
        true
    }

    fn attempt(&self, ctx: &AttemptContext<'_>) -> derivforge_av::Result<()>;
}

/// Result of a successful ladder run.
#[derive(Debug, Clone)]
pub struct Produced {
    pub label: String,
    pub path: PathBuf,
    /// Encoder attempts made, including failed ones.
    pub attempts: usize,
    /// An existing artifact was reused and nothing was encoded.
    pub reused: bool,
}

/// Ordered strategies for one derivative.
pub struct EscalationLadder {
    class: DerivativeClass,
    timeout: Duration,
    strategies: Vec<Box<dyn Strategy>>,
}

impl EscalationLadder {
    pub fn new(class: DerivativeClass, timeout: Duration) -> Self {
        Self {
            class,
            timeout,
            strategies: Vec::new(),
        }
    }

    pub fn push(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn class(&self) -> DerivativeClass {
        self.class
    }

    pub fn labels(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.label()).collect()
    }

    /// Try each strategy until one publishes an artifact.
    pub fn run(&self, encoder: &dyn Encoder) -> Result<Produced> {
        let mut attempts = 0;
        let mut last: Option<derivforge_av::Error> = None;

        for strategy in &self.strategies {
            let label = strategy.label();

            if strategy.reuse_existing() && is_published(strategy.destination()) {
                tracing::debug!(
                    class = %self.class,
                    strategy = %label,
                    path = %strategy.destination().display(),
                    "reusing existing artifact"
                );
                return Ok(Produced {
                    label,
                    path: strategy.destination().to_path_buf(),
                    attempts,
                    reused: true,
                });
            }

            if !strategy.applies_after(last.as_ref()) {
                continue;
            }

            attempts += 1;
            let started = Instant::now();
            match self.attempt(strategy.as_ref(), encoder) {
                Ok(path) => {
                    tracing::info!(
                        class = %self.class,
                        strategy = %label,
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "generated {}",
                        path.display()
                    );
                    return Ok(Produced {
                        label,
                        path,
                        attempts,
                        reused: false,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        class = %self.class,
                        strategy = %label,
                        attempt = attempts,
                        "strategy failed: {e}"
                    );
                    last = Some(e);
                }
            }
        }

        Err(match last {
            Some(e) if e.is_timeout() => Error::EncodeTimeout {
                class: self.class,
                timeout: self.timeout,
            },
            Some(e) => Error::encode_failed(self.class, attempts, e.to_string()),
            None => Error::encode_failed(self.class, 0, "no applicable strategy"),
        })
    }

    fn attempt(
        &self,
        strategy: &dyn Strategy,
        encoder: &dyn Encoder,
    ) -> derivforge_av::Result<PathBuf> {
        let workspace = match strategy.staging() {
            Staging::File => Workspace::file(strategy.destination())?,
            Staging::Dir => Workspace::dir(strategy.destination())?,
        };

        let outcome = strategy.attempt(&AttemptContext {
            encoder,
            timeout: self.timeout,
            output: workspace.path(),
        });

        match outcome {
            Ok(()) => workspace.finalize(),
            Err(e) => {
                workspace.cleanup();
                Err(e)
            }
        }
    }
}

fn is_published(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}
