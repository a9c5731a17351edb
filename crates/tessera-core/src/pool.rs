//! Bounded worker pool used to stop environments in parallel at shutdown.

use crossbeam_channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool whose threads are spawned on demand.
///
/// Workers share one crossbeam job queue and report every finished job on a
/// completion channel, which [`StopPool::await_termination`] drains against a
/// deadline. After [`StopPool::shutdown`] no new jobs are accepted and idle
/// workers exit once the queue is empty. A running job cannot be
/// interrupted; if it outlives the caller's patience its worker is left
/// detached.
pub struct StopPool {
    size: usize,
    jobs: Option<Sender<Job>>,
    queue: Receiver<Job>,
    done_tx: Sender<()>,
    done: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
    accepted: usize,
    finished: usize,
}

impl StopPool {
    pub fn new(size: usize) -> Self {
        let (jobs, queue) = crossbeam_channel::unbounded();
        let (done_tx, done) = crossbeam_channel::unbounded();
        Self {
            size: size.max(1),
            jobs: Some(jobs),
            queue,
            done_tx,
            done,
            workers: Vec::new(),
            accepted: 0,
            finished: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Accepted jobs not yet seen finishing by `await_termination`.
    pub fn pending(&self) -> usize {
        self.accepted - self.finished
    }

    /// Queue a job, spawning another worker while below the pool size.
    ///
    /// Fails only when the job cannot be run at all: the pool was shut down,
    /// or no worker exists and none could be spawned.
    pub fn execute<F>(&mut self, job: F) -> std::io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(jobs) = &self.jobs else {
            return Err(std::io::Error::other("stop pool is shut down"));
        };

        if self.workers.len() < self.size {
            let index = self.workers.len();
            let queue = self.queue.clone();
            let done = self.done_tx.clone();
            match thread::Builder::new()
                .name(format!("stop-environment-{index}"))
                .spawn(move || worker_loop(&queue, &done))
            {
                Ok(handle) => self.workers.push(handle),
                Err(e) if self.workers.is_empty() => return Err(e),
                Err(e) => warn!("could not grow stop pool beyond {index} workers: {e}"),
            }
        }

        if jobs.send(Box::new(job)).is_err() {
            return Err(std::io::Error::other("stop pool workers are gone"));
        }
        self.accepted += 1;
        Ok(())
    }

    /// Stop accepting jobs; queued jobs still run.
    pub fn shutdown(&mut self) {
        self.jobs = None;
        debug!(
            "stop pool closed with {} workers and {} queued jobs",
            self.workers.len(),
            self.queue.len()
        );
    }

    /// Start every job still queued on a thread of its own.
    ///
    /// Returns once each moved job has begun running. Jobs whose thread
    /// cannot be spawned are dropped and no longer counted as pending.
    pub fn spill_queued(&mut self) -> usize {
        let (started_tx, started) = crossbeam_channel::unbounded();
        let mut moved = 0;
        for job in self.queue.try_iter() {
            let done = self.done_tx.clone();
            let started_tx = started_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("stop-environment-spill-{moved}"))
                .spawn(move || {
                    let _ = started_tx.send(());
                    run_job(job);
                    let _ = done.send(());
                });
            match spawned {
                Ok(_) => moved += 1,
                Err(e) => {
                    error!("could not spawn thread for queued stop, dropping it: {e}");
                    self.accepted -= 1;
                }
            }
        }
        drop(started_tx);
        for _ in 0..moved {
            if started.recv().is_err() {
                break;
            }
        }
        moved
    }

    /// Wait until every accepted job has finished.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn await_termination(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.finished < self.accepted {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // The pool keeps a completion sender, so only a timeout ends the wait early.
            if self.done.recv_timeout(remaining).is_err() {
                return false;
            }
            self.finished += 1;
        }
        true
    }
}

fn worker_loop(queue: &Receiver<Job>, done: &Sender<()>) {
    for job in queue.iter() {
        run_job(job);
        let _ = done.send(());
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("stop pool job panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn runs_all_jobs_and_terminates() {
        let mut pool = StopPool::new(4);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.execute(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();

        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert_eq!(pool.pending(), 0);
        assert!(pool.worker_count() <= 4);
    }

    #[test]
    fn jobs_run_in_parallel_up_to_size() {
        let mut pool = StopPool::new(3);
        let barrier = Arc::new(Barrier::new(3));
        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            pool.execute(move || {
                barrier.wait();
            })
            .unwrap();
        }
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(pool.worker_count(), 3);
    }

    #[test]
    fn empty_pool_terminates_immediately() {
        let mut pool = StopPool::new(2);
        pool.shutdown();
        assert!(pool.await_termination(Duration::ZERO));
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn spill_runs_queued_jobs_beside_busy_worker() {
        let mut pool = StopPool::new(1);
        let release = Arc::new(Barrier::new(2));
        let ran_second = Arc::new(AtomicBool::new(false));

        {
            let release = Arc::clone(&release);
            pool.execute(move || {
                release.wait();
            })
            .unwrap();
        }
        {
            let ran_second = Arc::clone(&ran_second);
            pool.execute(move || ran_second.store(true, Ordering::SeqCst))
                .unwrap();
        }
        pool.shutdown();

        assert!(!pool.await_termination(Duration::from_millis(50)));
        assert_eq!(pool.pending(), 2);
        // The only worker is parked, so the second job is still queued.
        assert_eq!(pool.spill_queued(), 1);
        assert!(!pool.await_termination(Duration::from_millis(50)));
        assert!(ran_second.load(Ordering::SeqCst));
        assert_eq!(pool.pending(), 1);

        release.wait();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(pool.spill_queued(), 0);
    }

    #[test]
    fn panicking_job_is_contained() {
        let mut pool = StopPool::new(1);
        pool.execute(|| panic!("engine exploded")).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        {
            let done = Arc::clone(&done);
            pool.execute(move || done.store(true, Ordering::SeqCst)).unwrap();
        }
        pool.shutdown();

        assert!(pool.await_termination(Duration::from_secs(5)));
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn execute_after_shutdown_fails() {
        let mut pool = StopPool::new(1);
        pool.shutdown();
        assert!(pool.execute(|| {}).is_err());
        assert_eq!(pool.pending(), 0);
    }
}
