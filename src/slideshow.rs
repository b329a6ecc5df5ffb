//! Random slideshow over the filtered media list.
//!
//! Playback itself belongs to whatever implements [`DisplaySurface`]. This
//! module decides what to show next and how a video fills the hold time: it
//! either plays once and pauses when the hold runs out, or rewinds to the
//! window start whenever the window has played through.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, trace};

use crate::error::{parse_seconds, ValidationError};
use crate::models::{is_video_path, VideoRange};

/// The window media is shown in. Times are in seconds.
pub trait DisplaySurface {
    /// Show `path`, for `hold` when it is part of a timed sequence.
    fn show_specific_media(&mut self, path: &Path, hold: Option<Duration>);

    fn current_media_path(&self) -> Option<PathBuf>;

    /// Playback position of the current video.
    fn position(&self) -> f64;

    /// Length of the current video; zero or less when not known yet.
    fn duration(&self) -> f64;

    fn set_position(&mut self, seconds: f64);

    fn play(&mut self);

    fn pause(&mut self);
}

/// How a slide fills its hold time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Playback {
    /// Images: nothing to drive.
    Still,
    /// Play from the start and pause after this long.
    PauseAfter(Duration),
    /// Seek back to the start every `interval`, `repeats` times.
    Loop { interval: Duration, repeats: u32 },
}

/// Windows shorter than this are played once instead of looped.
pub const MIN_LOOP_INTERVAL: Duration = Duration::from_millis(1);

/// What the driver showed and what it still has to schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidePlan {
    pub path: PathBuf,
    /// Position playback starts from, in seconds.
    pub start: f64,
    /// Time until the next slide.
    pub hold: Duration,
    pub playback: Playback,
}

impl SlidePlan {
    /// Offsets from slide start at which playback seeks back to `start`.
    pub fn rewind_times(&self) -> impl Iterator<Item = Duration> {
        let (interval, repeats) = match self.playback {
            Playback::Loop { interval, repeats } => (interval, repeats),
            _ => (Duration::ZERO, 0),
        };
        (1..=repeats).map(move |i| interval * i)
    }
}

/// A running slideshow over a snapshot of the filtered list.
#[derive(Debug, Clone)]
pub struct Slideshow {
    files: Vec<PathBuf>,
    hold: Duration,
    running: bool,
}

impl Slideshow {
    /// Start a slideshow showing each item for `input` seconds.
    pub fn start(input: &str, files: &[PathBuf]) -> Result<Self, ValidationError> {
        let hold_seconds = parse_seconds(input)?;
        if hold_seconds <= 0.0 {
            return Err(ValidationError::NonPositiveDuration(hold_seconds));
        }
        let hold = Duration::try_from_secs_f64(hold_seconds)
            .map_err(|_| ValidationError::DurationTooLong(hold_seconds))?;
        if files.is_empty() {
            return Err(ValidationError::NoSelection);
        }

        debug!(hold_seconds, files = files.len(), "Starting slideshow");
        Ok(Self {
            files: files.to_vec(),
            hold,
            running: true,
        })
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Show a random item other than the current one and start its playback.
    ///
    /// Returns `None` once stopped.
    pub fn next<R, F>(
        &self,
        display: &mut dyn DisplaySurface,
        range_for: F,
        rng: &mut R,
    ) -> Option<SlidePlan>
    where
        R: Rng + ?Sized,
        F: Fn(&Path) -> Option<VideoRange>,
    {
        if !self.running {
            return None;
        }

        let current = display.current_media_path();
        let path = pick_random(&self.files, current.as_deref(), rng)?;
        let hold = self.hold;
        display.show_specific_media(&path, Some(hold));

        if !is_video_path(&path) {
            trace!(?path, "Showing still");
            return Some(SlidePlan {
                path,
                start: 0.0,
                hold,
                playback: Playback::Still,
            });
        }

        let hold_seconds = hold.as_secs_f64();
        let (start, end) = match range_for(&path).filter(VideoRange::is_valid) {
            Some(range) => (range.start, range.end),
            None => {
                let duration = display.duration();
                (0.0, if duration > 0.0 { duration } else { hold_seconds })
            }
        };
        let segment = end - start;
        let segment = if segment > 0.0 { segment } else { hold_seconds };

        display.set_position(start);
        display.play();

        let playback = plan_video(segment, hold);
        trace!(?path, start, segment, ?playback, "Showing video");
        Some(SlidePlan {
            path,
            start,
            hold,
            playback,
        })
    }
}

/// Fill `hold` with a video window of `segment` seconds.
///
/// Windows longer than the hold, or too short to loop, play once.
pub fn plan_video(segment: f64, hold: Duration) -> Playback {
    let interval = match Duration::try_from_secs_f64(segment) {
        Ok(interval) if interval >= MIN_LOOP_INTERVAL && interval <= hold => interval,
        _ => return Playback::PauseAfter(hold),
    };
    let max_repeats = u32::try_from(hold.as_millis()).unwrap_or(u32::MAX);
    let repeats = (hold.as_secs_f64() / interval.as_secs_f64()).floor() as u32;
    Playback::Loop {
        interval,
        repeats: repeats.saturating_sub(1).min(max_repeats),
    }
}

/// Random item of `files` other than `current`.
///
/// Falls back to the whole list when it holds nothing else.
pub fn pick_random<R>(files: &[PathBuf], current: Option<&Path>, rng: &mut R) -> Option<PathBuf>
where
    R: Rng + ?Sized,
{
    let candidates: Vec<&PathBuf> = files
        .iter()
        .filter(|p| Some(p.as_path()) != current)
        .collect();
    if candidates.is_empty() {
        return files.choose(rng).cloned();
    }
    candidates.choose(rng).map(|p| (*p).clone())
}

/// Seek target when playback has run past the end of the window.
pub fn range_loop_check(position: f64, range: Option<VideoRange>, ignore_range: bool) -> Option<f64> {
    if ignore_range {
        return None;
    }
    let range = range.filter(VideoRange::is_valid)?;
    (position >= range.end).then_some(range.start)
}

/// Apply the range-loop guard to the video on `display`. Returns true if it
/// seeked back.
pub fn check_video_range(
    display: &mut dyn DisplaySurface,
    range: Option<VideoRange>,
    ignore_range: bool,
) -> bool {
    if !display.current_media_path().is_some_and(|p| is_video_path(&p)) {
        return false;
    }
    match range_loop_check(display.position(), range, ignore_range) {
        Some(start) => {
            trace!(start, "Looping video range");
            display.set_position(start);
            true
        }
        None => false,
    }
}
