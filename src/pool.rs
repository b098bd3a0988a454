//! Bounded worker pool for handlers that must not run on the I/O loop.
//!
//! The pool has a fixed number of lanes. Each lane runs its jobs one at a
//! time on tokio's blocking threads, so handlers may block (for example on a
//! NickServ status wait). Jobs submitted with the same key always land on the
//! same lane and therefore run in submission order.

use crate::error::DccError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, trace};

type JobFn = Box<dyn FnOnce() -> Result<(), DccError> + Send + 'static>;

struct Job {
    name: String,
    run: JobFn,
}

/// A job that returned an error or panicked.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: String,
    pub error: DccError,
}

#[derive(Clone)]
pub struct WorkerPool {
    lanes: Arc<Vec<mpsc::UnboundedSender<Job>>>,
    next_lane: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Start `size` lanes on the current tokio runtime.
    ///
    /// Failures are reported on the returned receiver; dropping it only
    /// silences reporting.
    pub fn new(size: usize) -> (Self, mpsc::UnboundedReceiver<TaskFailure>) {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let lanes: Vec<_> = (0..size.max(1))
            .map(|lane| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_lane(lane, rx, failure_tx.clone()));
                tx
            })
            .collect();
        let pool = Self {
            lanes: Arc::new(lanes),
            next_lane: Arc::new(AtomicUsize::new(0)),
        };
        (pool, failure_rx)
    }

    pub fn size(&self) -> usize {
        self.lanes.len()
    }

    /// Run `job` on the next lane.
    pub fn submit<F>(&self, name: impl Into<String>, job: F)
    where
        F: FnOnce() -> Result<(), DccError> + Send + 'static,
    {
        let lane = self.next_lane.fetch_add(1, Ordering::Relaxed) % self.lanes.len();
        self.enqueue(lane, name.into(), Box::new(job));
    }

    /// Run `job` after every earlier job submitted with the same `key`.
    pub fn submit_keyed<F>(&self, key: &str, name: impl Into<String>, job: F)
    where
        F: FnOnce() -> Result<(), DccError> + Send + 'static,
    {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let lane = (hasher.finish() % self.lanes.len() as u64) as usize;
        self.enqueue(lane, name.into(), Box::new(job));
    }

    fn enqueue(&self, lane: usize, name: String, run: JobFn) {
        if self.lanes[lane].send(Job { name, run }).is_err() {
            error!(lane, "worker lane is gone, job dropped");
        }
    }
}

async fn run_lane(
    lane: usize,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    failures: mpsc::UnboundedSender<TaskFailure>,
) {
    while let Some(Job { name, run }) = jobs.recv().await {
        trace!(lane, task = %name, "running job");
        let error = match tokio::task::spawn_blocking(run).await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(join) => DccError::HandlerFailure {
                handler: name.clone(),
                command: String::new(),
                reason: join.to_string(),
            },
        };
        error!(lane, task = %name, error = %error, "job failed");
        let _ = failures.send(TaskFailure { task: name, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failures_are_reported() {
        let (pool, mut failures) = WorkerPool::new(2);
        pool.submit("ok", || Ok(()));
        pool.submit("broken", || Err(DccError::NotConnected("bob".into())));

        let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failure.task, "broken");
        assert!(matches!(failure.error, DccError::NotConnected(ref n) if n == "bob"));
    }

    #[tokio::test]
    async fn test_panicking_job_is_reported() {
        let (pool, mut failures) = WorkerPool::new(1);
        pool.submit("explodes", || -> Result<(), DccError> { panic!("boom") });
        pool.submit("after", || Ok(()));

        let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failure.task, "explodes");
        assert!(matches!(failure.error, DccError::HandlerFailure { .. }));
    }

    #[tokio::test]
    async fn test_keyed_jobs_keep_order() {
        let (pool, _failures) = WorkerPool::new(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for i in 0..50 {
            let seen = seen.clone();
            let done_tx = done_tx.clone();
            pool.submit_keyed("alice", format!("line-{i}"), move || {
                if i % 7 == 0 {
                    std::thread::sleep(Duration::from_millis(2));
                }
                seen.lock().push(i);
                let _ = done_tx.send(());
                Ok(())
            });
        }
        for _ in 0..50 {
            tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }
}
