//! Asynchronous task dispatch with deduplication by task id.
//!
//! A task goes to the external queue when one is configured, otherwise to a
//! local background thread. While a task id is outstanding, enqueueing the
//! same id again reports [`Enqueued::AlreadyRunning`]. Local ids clear when
//! their thread finishes; externally submitted ids clear after a TTL, since
//! completion happens in another process.

mod queue;

pub use queue::{HttpTaskQueue, TaskEnvelope, TaskQueue};

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use derivforge_common::{Error, Result};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

/// Work run by a local background thread.
pub type Work = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A unit of asynchronous work.
pub struct Job {
    pub id: String,
    pub name: String,
    /// Enough for an external worker to redo the work.
    pub payload: serde_json::Value,
    work: Work,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        work: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
            work: Box::new(work),
        }
    }

    pub fn envelope(&self) -> TaskEnvelope {
        TaskEnvelope {
            id: self.id.clone(),
            name: self.name.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// Outcome of [`TaskDispatcher::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Enqueued {
    /// Running on a local background thread.
    Started,
    /// Accepted by the external queue.
    Queued,
    /// The same id is still outstanding; nothing was scheduled.
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy)]
enum Outstanding {
    Local,
    External { expires_at: Instant },
}

#[derive(Default)]
struct Registry {
    outstanding: Mutex<HashMap<String, Outstanding>>,
    idle: Condvar,
}

impl Registry {
    fn finish(&self, id: &str) {
        let mut outstanding = self.outstanding.lock();
        outstanding.remove(id);
        if !outstanding.values().any(|o| matches!(o, Outstanding::Local)) {
            self.idle.notify_all();
        }
    }
}

/// Clears a local task id even if the work panics.
struct FinishGuard {
    registry: Arc<Registry>,
    id: String,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.registry.finish(&self.id);
    }
}

pub struct TaskDispatcher {
    queue: Option<Arc<dyn TaskQueue>>,
    external_ttl: Duration,
    registry: Arc<Registry>,
}

impl TaskDispatcher {
    /// Dispatcher running everything on local threads.
    pub fn local() -> Self {
        Self {
            queue: None,
            external_ttl: Duration::ZERO,
            registry: Arc::default(),
        }
    }

    /// Dispatcher submitting to `queue`; submitted ids block resubmission
    /// for `ttl`.
    pub fn with_queue(queue: Arc<dyn TaskQueue>, ttl: Duration) -> Self {
        Self {
            queue: Some(queue),
            external_ttl: ttl,
            registry: Arc::default(),
        }
    }

    /// Schedule `job` unless its id is already outstanding.
    pub fn enqueue(&self, job: Job) -> Result<Enqueued> {
        {
            let mut outstanding = self.registry.outstanding.lock();
            let now = Instant::now();
            outstanding.retain(|_, o| match o {
                Outstanding::External { expires_at } => *expires_at > now,
                Outstanding::Local => true,
            });
            if outstanding.contains_key(&job.id) {
                tracing::debug!(task = %job.id, "task already outstanding");
                return Ok(Enqueued::AlreadyRunning);
            }
            let placeholder = match self.queue {
                Some(_) => Outstanding::External {
                    expires_at: now + self.external_ttl,
                },
                None => Outstanding::Local,
            };
            outstanding.insert(job.id.clone(), placeholder);
        }

        if let Some(queue) = &self.queue {
            match queue.submit(&job.envelope()) {
                Ok(()) => {
                    tracing::debug!(task = %job.id, "submitted to external queue");
                    return Ok(Enqueued::Queued);
                }
                Err(e) => {
                    tracing::warn!(task = %job.id, "queue submission failed, running locally: {e}");
                    self.registry
                        .outstanding
                        .lock()
                        .insert(job.id.clone(), Outstanding::Local);
                }
            }
        }

        self.spawn_local(job)
    }

    fn spawn_local(&self, job: Job) -> Result<Enqueued> {
        let guard = FinishGuard {
            registry: Arc::clone(&self.registry),
            id: job.id.clone(),
        };
        let Job { id, name, work, .. } = job;

        thread::Builder::new()
            .name(format!("derivforge-{name}"))
            .spawn(move || {
                let _guard = guard;
                let started = Instant::now();
                match work() {
                    Ok(()) => tracing::debug!(
                        task = %id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "task finished"
                    ),
                    Err(e @ Error::OffloadFailed(_)) => tracing::warn!(task = %id, "{e}"),
                    Err(e) => tracing::error!(task = %id, "task failed: {e}"),
                }
            })
            .map_err(|e| Error::internal(format!("spawning task thread: {e}")))?;

        Ok(Enqueued::Started)
    }

    pub fn is_outstanding(&self, id: &str) -> bool {
        let outstanding = self.registry.outstanding.lock();
        match outstanding.get(id) {
            Some(Outstanding::External { expires_at }) => *expires_at > Instant::now(),
            Some(Outstanding::Local) => true,
            None => false,
        }
    }

    /// Number of local tasks still running.
    pub fn running(&self) -> usize {
        self.registry
            .outstanding
            .lock()
            .values()
            .filter(|o| matches!(o, Outstanding::Local))
            .count()
    }

    /// Block until no local task is running, or `timeout` passes.
    /// Returns whether the dispatcher went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.registry.outstanding.lock();
        while outstanding.values().any(|o| matches!(o, Outstanding::Local)) {
            if self
                .registry
                .idle
                .wait_until(&mut outstanding, deadline)
                .timed_out()
            {
                return !outstanding.values().any(|o| matches!(o, Outstanding::Local));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn blocking_job(id: &str, release: mpsc::Receiver<()>, runs: Arc<AtomicUsize>) -> Job {
        Job::new(id, "test", serde_json::Value::Null, move || {
            runs.fetch_add(1, Ordering::SeqCst);
            let _ = release.recv();
            Ok(())
        })
    }

    #[test]
    fn test_duplicate_id_reports_already_running() {
        let dispatcher = TaskDispatcher::local();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let (_tx2, rx2) = mpsc::channel();

        assert_eq!(
            dispatcher.enqueue(blocking_job("hd:k", rx, runs.clone())).unwrap(),
            Enqueued::Started
        );
        assert_eq!(
            dispatcher.enqueue(blocking_job("hd:k", rx2, runs.clone())).unwrap(),
            Enqueued::AlreadyRunning
        );
        assert!(dispatcher.is_outstanding("hd:k"));

        tx.send(()).unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!dispatcher.is_outstanding("hd:k"));
    }

    #[test]
    fn test_id_reusable_after_completion() {
        let dispatcher = TaskDispatcher::local();
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let runs = runs.clone();
            let outcome = dispatcher
                .enqueue(Job::new("fast:k", "test", serde_json::Value::Null, move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
            assert_eq!(outcome, Enqueued::Started);
            assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_task_clears_its_id() {
        let dispatcher = TaskDispatcher::local();
        dispatcher
            .enqueue(Job::new("boom", "test", serde_json::Value::Null, || {
                panic!("task panicked")
            }))
            .unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert!(!dispatcher.is_outstanding("boom"));
    }

    #[derive(Default)]
    struct RecordingQueue {
        submitted: Mutex<Vec<TaskEnvelope>>,
        fail: bool,
    }

    impl TaskQueue for RecordingQueue {
        fn submit(&self, envelope: &TaskEnvelope) -> Result<()> {
            if self.fail {
                return Err(Error::internal("queue down"));
            }
            self.submitted.lock().push(envelope.clone());
            Ok(())
        }
    }

    #[test]
    fn test_external_queue_dedups_within_ttl() {
        let queue = Arc::new(RecordingQueue::default());
        let dispatcher = TaskDispatcher::with_queue(queue.clone(), Duration::from_millis(50));
        let job = || Job::new("hls:k", "generate", serde_json::json!({"k": 1}), || Ok(()));

        assert_eq!(dispatcher.enqueue(job()).unwrap(), Enqueued::Queued);
        assert_eq!(dispatcher.enqueue(job()).unwrap(), Enqueued::AlreadyRunning);
        assert_eq!(queue.submitted.lock().len(), 1);
        assert_eq!(queue.submitted.lock()[0].payload["k"], 1);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(dispatcher.enqueue(job()).unwrap(), Enqueued::Queued);
        assert_eq!(queue.submitted.lock().len(), 2);
    }

    #[test]
    fn test_failed_submission_runs_locally() {
        let queue = Arc::new(RecordingQueue {
            fail: true,
            ..RecordingQueue::default()
        });
        let dispatcher = TaskDispatcher::with_queue(queue, Duration::from_secs(60));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let outcome = dispatcher
            .enqueue(Job::new("fast:k", "generate", serde_json::Value::Null, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        assert_eq!(outcome, Enqueued::Started);
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!dispatcher.is_outstanding("fast:k"));
    }
}
