//! `VideoBackend` built on the ffmpeg command line tools.
//!
//! Stream info comes from `ffprobe -of json`; single frames are grabbed with
//! `ffmpeg -ss <t> -i <file> -frames:v 1` piped out as PNG.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use serde::Deserialize;
use tracing::trace;

use super::{VideoBackend, VideoDecoder};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    nb_frames: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Frame count and rate of the first video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub frame_count: i64,
    pub fps: f64,
}

/// Parse a rational rate such as `30000/1001` or a plain number.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Turn ffprobe's JSON into stream info.
///
/// Containers such as Matroska carry no frame count; it is then estimated
/// from the stream (or container) duration.
fn parse_probe(json: &[u8]) -> Result<StreamInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json).context("Invalid ffprobe output")?;
    let stream = probe.streams.first().context("No video stream")?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    let counted = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.trim().parse::<i64>().ok())
        .filter(|n| *n > 0);

    let frame_count = match counted {
        Some(n) => n,
        None => {
            let duration = stream
                .duration
                .as_deref()
                .or_else(|| probe.format.as_ref().and_then(|f| f.duration.as_deref()))
                .and_then(|d| d.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            (duration * fps).floor() as i64
        }
    };

    Ok(StreamInfo { frame_count, fps })
}

/// Runs the `ffprobe`/`ffmpeg` executables found at the configured paths.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn probe(&self, path: &Path) -> Result<StreamInfo> {
        let output = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-select_streams")
            .arg("v:0")
            .arg("-show_entries")
            .arg("stream=nb_frames,r_frame_rate,avg_frame_rate,duration:format=duration")
            .arg("-of")
            .arg("json")
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run ffprobe on {:?}", path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ffprobe failed for {:?}: {}", path, stderr.trim());
        }

        parse_probe(&output.stdout).with_context(|| format!("Failed to probe {:?}", path))
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl VideoBackend for FfmpegBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>> {
        let info = self.probe(path)?;
        trace!(?path, frames = info.frame_count, fps = info.fps, "Probed video");
        Ok(Box::new(FfmpegDecoder {
            ffmpeg: self.ffmpeg.clone(),
            path: path.to_path_buf(),
            info,
        }))
    }
}

struct FfmpegDecoder {
    ffmpeg: PathBuf,
    path: PathBuf,
    info: StreamInfo,
}

impl VideoDecoder for FfmpegDecoder {
    fn frame_count(&self) -> i64 {
        self.info.frame_count
    }

    fn fps(&self) -> f64 {
        self.info.fps
    }

    fn read_frame(&mut self, index: u64) -> Result<DynamicImage> {
        if self.info.fps <= 0.0 {
            bail!("Unknown frame rate for {:?}", self.path);
        }
        let timestamp = index as f64 / self.info.fps;

        let output = Command::new(&self.ffmpeg)
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(format!("{:.3}", timestamp))
            .arg("-i")
            .arg(&self.path)
            .arg("-frames:v")
            .arg("1")
            .arg("-f")
            .arg("image2pipe")
            .arg("-vcodec")
            .arg("png")
            .arg("-")
            .output()
            .with_context(|| format!("Failed to run ffmpeg on {:?}", self.path))?;

        if !output.status.success() || output.stdout.is_empty() {
            bail!("No frame {} in {:?}", index, self.path);
        }

        image::load_from_memory(&output.stdout)
            .with_context(|| format!("Failed to decode frame {} of {:?}", index, self.path))
    }
}
