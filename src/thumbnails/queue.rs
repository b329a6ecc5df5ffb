//! Thumbnail worker queue for off-thread video work.
//!
//! - Bounded worker pool (1-4 threads) for video thumbnails
//! - Workers load from the frame cache when asked, else decode
//! - Results are collected by polling from the owning thread
//! - Uses flume for communication between workers and the owner

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use tracing::{debug, error, trace, warn};

use super::cache::{CacheFileSet, ThumbnailCache};
use super::generator::{GenerateOptions, ThumbnailGenerator};
use super::FrameSet;
use crate::config::{DEFAULT_WORKERS, MAX_WORKERS};
use crate::models::VideoRange;
use crate::video::VideoBackend;

/// How long an idle worker waits before rechecking the shutdown flag.
const WORKER_POLL: Duration = Duration::from_millis(100);

/// How often shutdown checks whether workers have exited.
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// A request to produce a video thumbnail.
#[derive(Debug, Clone)]
pub struct ThumbnailJob {
    /// Path to the source video.
    pub path: PathBuf,
    /// Dispatch ticket; results carrying an older ticket are stale.
    pub ticket: u64,
    /// Target width in pixels.
    pub width: u32,
    /// Playback window to sample from.
    pub range: Option<VideoRange>,
    pub options: GenerateOptions,
    /// Frame files the thumbnail is cached under.
    pub cache_files: CacheFileSet,
    /// Try the frame files before decoding.
    pub prefer_cache: bool,
}

/// Where a job's frames came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Cache,
    Decoder,
}

/// Result of a job sent back to the owning thread.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub path: PathBuf,
    pub ticket: u64,
    pub source: FrameSource,
    /// The frames, or `None` when nothing could be produced.
    pub frames: Option<FrameSet>,
}

/// Worker pool for video thumbnail jobs.
pub struct ThumbnailQueue {
    /// Sender for new jobs.
    request_tx: Sender<ThumbnailJob>,
    /// Kept so queued jobs can be dropped before a worker takes them.
    request_rx: Receiver<ThumbnailJob>,
    /// Receiver for finished jobs.
    result_rx: Receiver<JobOutcome>,
    /// Worker thread handles.
    workers: Vec<JoinHandle<()>>,
    /// Flag to signal workers to stop.
    shutdown: Arc<AtomicBool>,
    /// Number of workers currently processing a job.
    active_workers: Arc<AtomicUsize>,
}

impl ThumbnailQueue {
    /// Start `workers` threads (clamped to 1..=4) sharing `backend` and `cache`.
    pub fn new(
        workers: usize,
        backend: Arc<dyn VideoBackend>,
        cache: ThumbnailCache,
    ) -> Result<Self> {
        let num_workers = workers.clamp(1, MAX_WORKERS);

        let (request_tx, request_rx) = flume::unbounded();
        let (result_tx, result_rx) = flume::unbounded();

        let shutdown = Arc::new(AtomicBool::new(false));
        let active_workers = Arc::new(AtomicUsize::new(0));

        let mut worker_handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let rx = request_rx.clone();
            let tx = result_tx.clone();
            let shutdown = Arc::clone(&shutdown);
            let active = Arc::clone(&active_workers);
            let backend = Arc::clone(&backend);
            let cache = cache.clone();

            let handle = thread::Builder::new()
                .name(format!("thumb-worker-{}", worker_id))
                .spawn(move || {
                    worker_loop(worker_id, rx, tx, shutdown, active, backend, cache);
                })
                .context("Failed to spawn thumbnail worker")?;

            worker_handles.push(handle);
        }

        debug!(num_workers, "Started thumbnail worker queue");

        Ok(Self {
            request_tx,
            request_rx,
            result_rx,
            workers: worker_handles,
            shutdown,
            active_workers,
        })
    }

    /// Queue a job. Returns false once the queue is shut down.
    pub fn submit(&self, job: ThumbnailJob) -> bool {
        if self.shutdown.load(Ordering::Relaxed) {
            trace!(?job.path, "Queue shut down, dropping job");
            return false;
        }
        match self.request_tx.send(job) {
            Ok(()) => true,
            Err(_) => {
                error!("Thumbnail queue disconnected");
                false
            }
        }
    }

    /// Drop jobs no worker has started yet. Returns how many were dropped.
    pub fn clear_queued(&self) -> usize {
        let dropped = self.request_rx.drain().count();
        if dropped > 0 {
            debug!(dropped, "Cleared queued thumbnail jobs");
        }
        dropped
    }

    /// Number of jobs waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.request_rx.len()
    }

    /// Poll for finished jobs (non-blocking).
    pub fn poll_results(&self) -> Vec<JobOutcome> {
        self.result_rx.try_iter().collect()
    }

    /// Block up to `timeout` for the next finished job.
    pub fn wait_result(&self, timeout: Duration) -> Option<JobOutcome> {
        self.result_rx.recv_timeout(timeout).ok()
    }

    /// Get the number of active workers currently processing.
    pub fn active_worker_count(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Stop accepting jobs, drop queued ones and wait up to `timeout` for
    /// running jobs to finish.
    ///
    /// Returns true if every worker exited in time. Workers still running
    /// after the deadline are detached; their results are never read.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        debug!("Shutting down thumbnail queue");

        self.shutdown.store(true, Ordering::SeqCst);
        self.clear_queued();

        let deadline = Instant::now() + timeout;
        while self.workers.iter().any(|h| !h.is_finished()) && Instant::now() < deadline {
            thread::sleep(SHUTDOWN_POLL);
        }

        let mut clean = true;
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                clean = false;
            }
        }

        if clean {
            debug!("Thumbnail queue shutdown complete");
        } else {
            warn!(
                ?timeout,
                busy = self.active_worker_count(),
                "Thumbnail workers still running after shutdown timeout"
            );
        }
        clean
    }
}

impl Drop for ThumbnailQueue {
    fn drop(&mut self) {
        // Signal only; never block on drop.
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Worker thread loop.
fn worker_loop(
    worker_id: usize,
    rx: Receiver<ThumbnailJob>,
    tx: Sender<JobOutcome>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    backend: Arc<dyn VideoBackend>,
    cache: ThumbnailCache,
) {
    debug!(worker_id, "Thumbnail worker started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match rx.recv_timeout(WORKER_POLL) {
            Ok(job) => {
                active.fetch_add(1, Ordering::Relaxed);

                let outcome = match catch_unwind(AssertUnwindSafe(|| {
                    process_job(&job, backend.as_ref(), &cache)
                })) {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(worker_id, ?job.path, "Thumbnail job panicked");
                        JobOutcome {
                            path: job.path.clone(),
                            ticket: job.ticket,
                            source: FrameSource::Decoder,
                            frames: None,
                        }
                    }
                };

                if let Err(e) = tx.send(outcome) {
                    warn!(worker_id, error = ?e, "Failed to send thumbnail result");
                }

                active.fetch_sub(1, Ordering::Relaxed);
            }
            Err(flume::RecvTimeoutError::Timeout) => continue,
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker_id, "Thumbnail worker stopped");
}

/// Process a single job: cached frames first if requested, else decode.
fn process_job(job: &ThumbnailJob, backend: &dyn VideoBackend, cache: &ThumbnailCache) -> JobOutcome {
    trace!(?job.path, ticket = job.ticket, "Processing thumbnail job");

    if job.prefer_cache {
        if let Some(frames) = cache.load_cached(&job.cache_files) {
            trace!(?job.path, "Disk cache hit");
            return JobOutcome {
                path: job.path.clone(),
                ticket: job.ticket,
                source: FrameSource::Cache,
                frames: Some(fit_width(frames, job.width)),
            };
        }
        debug!(?job.path, "Cached frames unusable, decoding");
    }

    let frames =
        ThumbnailGenerator::generate_video(backend, &job.path, job.width, job.range, &job.options);

    JobOutcome {
        path: job.path.clone(),
        ticket: job.ticket,
        source: FrameSource::Decoder,
        frames,
    }
}

/// Cached frames keep the width they were generated at.
fn fit_width(frames: FrameSet, width: u32) -> FrameSet {
    if frames.first().width() == width {
        return frames;
    }
    let scaled = frames
        .frames()
        .iter()
        .map(|frame| ThumbnailGenerator::scale_to_width(frame, width))
        .collect();
    FrameSet::new(scaled).unwrap_or(frames)
}

/// Builder for ThumbnailQueue with configuration options.
pub struct ThumbnailQueueBuilder {
    workers: usize,
    backend: Option<Arc<dyn VideoBackend>>,
}

impl ThumbnailQueueBuilder {
    pub fn new() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            backend: None,
        }
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn VideoBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the queue; without a backend the ffmpeg tools on `PATH` are used.
    pub fn build(self, cache: ThumbnailCache) -> Result<ThumbnailQueue> {
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(crate::video::FfmpegBackend::default()));
        ThumbnailQueue::new(self.workers, backend, cache)
    }
}

impl Default for ThumbnailQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}
