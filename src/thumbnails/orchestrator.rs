//! Population passes over the file list and reconciliation of worker results.
//!
//! The orchestrator lives on the owning thread. Images are thumbnailed
//! inline; videos go to the worker queue tagged with a ticket. Results only
//! take effect in [`ThumbnailOrchestrator::poll_results`], and only when the
//! ticket still matches the one tracked for that path.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, trace, warn};

use super::cache::ThumbnailCache;
use super::generator::{GenerateOptions, ThumbnailGenerator};
use super::queue::{FrameSource, JobOutcome, ThumbnailJob, ThumbnailQueue, ThumbnailQueueBuilder};
use super::FrameSet;
use crate::config::Config;
use crate::models::{is_video_path, VideoRange};
use crate::video::VideoBackend;

/// Interval between polls while draining.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Lifecycle of a path within a population pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailState {
    Pending,
    Dispatched,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Notifications for whoever renders the grid.
#[derive(Debug, Clone)]
pub enum ThumbnailEvent {
    Progress { completed: usize, total: usize },
    Ready { path: PathBuf, frames: FrameSet },
    Failed { path: PathBuf },
}

pub struct ThumbnailOrchestrator {
    queue: ThumbnailQueue,
    cache: ThumbnailCache,
    options: GenerateOptions,
    width: u32,
    next_ticket: u64,
    /// Current ticket per path with a job outstanding.
    in_flight: HashMap<PathBuf, u64>,
    states: HashMap<PathBuf, ThumbnailState>,
    /// Paths counted by the current pass.
    pass_paths: HashSet<PathBuf>,
    progress: Progress,
    /// Events produced on the owning thread, handed out by the next poll.
    events: Vec<ThumbnailEvent>,
    closing: bool,
    shutdown_timeout: Duration,
}

impl ThumbnailOrchestrator {
    pub fn new(config: &Config, backend: Arc<dyn VideoBackend>) -> Result<Self> {
        let cache = ThumbnailCache::from_config(config);
        let queue = ThumbnailQueueBuilder::new()
            .workers(config.workers)
            .backend(backend)
            .build(cache.clone())?;

        Ok(Self {
            queue,
            cache,
            options: GenerateOptions::from_config(config),
            width: config.thumb_width,
            next_ticket: 0,
            in_flight: HashMap::new(),
            states: HashMap::new(),
            pass_paths: HashSet::new(),
            progress: Progress::default(),
            events: Vec::new(),
            closing: false,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Change the target width. Realized frames at the old width are dropped;
    /// the caller starts a new pass.
    pub fn set_width(&mut self, width: u32) {
        if width != self.width {
            self.width = width;
            self.cache.clear_memory();
        }
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.cache
    }

    /// Start a population pass over `files`.
    ///
    /// Tracking from earlier passes is forgotten and their queued jobs are
    /// dropped; jobs already running finish but their results are ignored.
    pub fn populate<F>(&mut self, files: &[PathBuf], range_for: F)
    where
        F: Fn(&Path) -> Option<VideoRange>,
    {
        if self.closing {
            return;
        }

        self.in_flight.clear();
        self.states.clear();
        self.events.clear();
        self.queue.clear_queued();
        self.pass_paths = files.iter().cloned().collect();
        self.progress = Progress {
            completed: 0,
            total: files.len(),
        };

        info!(total = files.len(), width = self.width, "Populating thumbnails");
        self.push_progress();

        for path in files {
            self.states.insert(path.clone(), ThumbnailState::Pending);

            if let Some(frames) = self.cache.get_from_memory(path) {
                trace!(?path, "Memory cache hit");
                self.complete(path, frames);
                continue;
            }

            if is_video_path(path) {
                let prefer_cache = self.cache.is_cached(path);
                self.dispatch(path, range_for(path), prefer_cache);
            } else {
                self.generate_image(path);
            }
        }
    }

    /// Drop cached frames for `path` and decode it again.
    ///
    /// Runs outside the current pass: the pass total is unchanged, and a
    /// path already counted as completed is uncounted until the new frames
    /// arrive.
    pub fn invalidate(&mut self, path: &Path, range: Option<VideoRange>) {
        if self.closing {
            return;
        }

        self.cache.invalidate(path);
        if self.states.get(path) == Some(&ThumbnailState::Completed) && self.pass_paths.contains(path)
        {
            self.progress.completed = self.progress.completed.saturating_sub(1);
        }

        if is_video_path(path) {
            self.dispatch(path, range, false);
        } else {
            self.generate_image(path);
        }
    }

    fn dispatch(&mut self, path: &Path, range: Option<VideoRange>, prefer_cache: bool) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;

        let job = ThumbnailJob {
            path: path.to_path_buf(),
            ticket,
            width: self.width,
            range,
            options: self.options,
            cache_files: self.cache.resolve(path),
            prefer_cache,
        };

        if self.queue.submit(job) {
            trace!(?path, ticket, prefer_cache, "Dispatched thumbnail job");
            self.in_flight.insert(path.to_path_buf(), ticket);
            self.states.insert(path.to_path_buf(), ThumbnailState::Dispatched);
        } else {
            warn!(?path, "Failed to dispatch thumbnail job");
            self.fail(path);
        }
    }

    fn generate_image(&mut self, path: &Path) {
        match ThumbnailGenerator::generate_image(path, self.width) {
            Ok(frames) => self.complete(path, frames),
            Err(e) => {
                warn!(?path, error = ?e, "Failed to generate image thumbnail");
                self.fail(path);
            }
        }
    }

    /// Reconcile finished jobs and return all pending events.
    pub fn poll_results(&mut self) -> Vec<ThumbnailEvent> {
        if self.closing {
            return Vec::new();
        }

        for outcome in self.queue.poll_results() {
            self.reconcile(outcome);
        }
        std::mem::take(&mut self.events)
    }

    fn reconcile(&mut self, outcome: JobOutcome) {
        let JobOutcome {
            path,
            ticket,
            source,
            frames,
        } = outcome;

        match self.in_flight.get(&path) {
            Some(current) if *current == ticket => {}
            _ => {
                trace!(?path, ticket, "Discarding stale thumbnail result");
                return;
            }
        }
        self.in_flight.remove(&path);

        let Some(frames) = frames else {
            debug!(?path, "Video thumbnail failed");
            self.fail(&path);
            return;
        };

        if source == FrameSource::Decoder {
            let files = self.cache.resolve(&path);
            if let Err(e) = self.cache.store_frames(&files, &frames) {
                warn!(?path, error = ?e, "Failed to write thumbnail frames");
            }
        }
        self.complete(&path, frames);
    }

    fn complete(&mut self, path: &Path, frames: FrameSet) {
        self.cache.remember(path, frames.clone());
        let previous = self
            .states
            .insert(path.to_path_buf(), ThumbnailState::Completed);
        if previous != Some(ThumbnailState::Completed) && self.pass_paths.contains(path) {
            self.progress.completed = (self.progress.completed + 1).min(self.progress.total);
        }
        self.events.push(ThumbnailEvent::Ready {
            path: path.to_path_buf(),
            frames,
        });
        self.push_progress();
    }

    fn fail(&mut self, path: &Path) {
        self.states.insert(path.to_path_buf(), ThumbnailState::Failed);
        self.events.push(ThumbnailEvent::Failed {
            path: path.to_path_buf(),
        });
    }

    fn push_progress(&mut self) {
        self.events.push(ThumbnailEvent::Progress {
            completed: self.progress.completed,
            total: self.progress.total,
        });
    }

    /// Poll until no job is outstanding or `timeout` elapses.
    pub fn drain(&mut self, timeout: Duration) -> Vec<ThumbnailEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.poll_results();
        while !self.is_idle() && !self.closing && Instant::now() < deadline {
            thread::sleep(DRAIN_POLL);
            events.extend(self.poll_results());
        }
        events
    }

    pub fn state(&self, path: &Path) -> Option<ThumbnailState> {
        self.states.get(path).copied()
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Realized frames for `path`, if still in memory.
    pub fn frames(&self, path: &Path) -> Option<FrameSet> {
        self.cache.get_from_memory(path)
    }

    /// True when no tracked job is outstanding.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Stop the workers. Returns true if they all exited within the timeout.
    pub fn shutdown(&mut self) -> bool {
        if self.closing {
            return true;
        }
        self.closing = true;
        self.in_flight.clear();
        self.events.clear();
        debug!(
            busy = self.queue.active_worker_count(),
            "Shutting down thumbnail orchestrator"
        );
        self.queue.shutdown(self.shutdown_timeout)
    }
}
