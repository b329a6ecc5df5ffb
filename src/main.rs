use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use mediadeck::config::SamplingPolicy;
use mediadeck::slideshow::{DisplaySurface, Playback};
use mediadeck::thumbnails::ThumbnailEvent;
use mediadeck::{App, Config};

/// Longest a command waits for thumbnail workers.
const THUMBNAIL_WAIT: Duration = Duration::from_secs(600);

#[derive(Parser, Debug)]
#[command(name = "mediadeck", version, about = "Browse, tag and thumbnail a folder of images and videos")]
struct Cli {
    /// Directory holding the settings documents and the thumbnail cache
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Thumbnail width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Frames sampled per video thumbnail
    #[arg(long)]
    frames: Option<usize>,

    /// Thumbnail worker threads (1-4)
    #[arg(long)]
    workers: Option<usize>,

    /// Frame sampling policy: spread or dense
    #[arg(long)]
    sampling: Option<SamplingPolicy>,

    /// ffmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe executable
    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate thumbnails for a folder
    Thumbs { folder: Option<PathBuf> },
    /// List tags of a folder with their counts
    Tags { folder: Option<PathBuf> },
    /// List files matching the tag filter
    Filter {
        folder: Option<PathBuf>,
        /// Tag to include (repeatable, any match)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Only files without tags
        #[arg(long)]
        untagged: bool,
    },
    /// Replace the tags of a file
    Tag { path: PathBuf, tags: Vec<String> },
    /// Add a single tag to a file
    AddTag { path: PathBuf, tag: String },
    /// Set the playback window of a video, in seconds
    Range {
        path: PathBuf,
        #[arg(allow_hyphen_values = true)]
        start: String,
        #[arg(allow_hyphen_values = true)]
        end: String,
    },
    /// Show or set the volume of a file
    Volume { path: PathBuf, value: Option<u8> },
    /// Delete a file
    Delete {
        path: PathBuf,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete duplicate files in a folder
    Dedup { folder: Option<PathBuf> },
    /// Print a slideshow schedule for a folder
    Slideshow {
        folder: Option<PathBuf>,
        /// Seconds per item
        #[arg(long, default_value = "5", allow_hyphen_values = true)]
        seconds: String,
        /// Number of slides to plan
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("mediadeck=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut app = App::open(config_from(&cli))?;
    let result = run(&mut app, cli.command);
    app.shutdown();
    result
}

fn config_from(cli: &Cli) -> Config {
    let mut config = Config::new()
        .data_dir(&cli.data_dir)
        .ffmpeg(&cli.ffmpeg, &cli.ffprobe);
    if let Some(width) = cli.width {
        config = config.thumb_width(width);
    }
    if let Some(frames) = cli.frames {
        config = config.frames_per_thumbnail(frames);
    }
    if let Some(workers) = cli.workers {
        config = config.workers(workers);
    }
    if let Some(sampling) = cli.sampling {
        config = config.sampling(sampling);
    }
    config
}

fn run(app: &mut App, command: Command) -> Result<()> {
    // Listing commands never need decoded thumbnails.
    app.set_auto_thumbnails(matches!(command, Command::Thumbs { .. }));

    match command {
        Command::Thumbs { folder } => {
            open_folder(app, folder.as_deref())?;
            let started = Instant::now();
            for event in app.wait_thumbnails(THUMBNAIL_WAIT) {
                match event {
                    ThumbnailEvent::Ready { path, frames } => {
                        println!("ok     {} ({} frames)", path.display(), frames.len())
                    }
                    ThumbnailEvent::Failed { path } => println!("failed {}", path.display()),
                    ThumbnailEvent::Progress { .. } => {}
                }
            }
            let progress = app.thumbnails().progress();
            info!(
                completed = progress.completed,
                total = progress.total,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Thumbnails done"
            );
            println!("{} / {} thumbnails", progress.completed, progress.total);
        }
        Command::Tags { folder } => {
            open_folder(app, folder.as_deref())?;
            for (tag, count) in app.tag_frequencies() {
                println!("{tag} ({count})");
            }
        }
        Command::Filter {
            folder,
            tags,
            untagged,
        } => {
            open_folder(app, folder.as_deref())?;
            app.select_tags(&tags);
            app.set_untagged_only(untagged);
            for path in app.filtered_files() {
                println!("{}", path.display());
            }
        }
        Command::Tag { path, tags } => {
            let path = absolute(&path)?;
            let tags = app.set_tags(&path, &tags.join(" "));
            println!("{}: {}", path.display(), tags);
        }
        Command::AddTag { path, tag } => {
            let path = absolute(&path)?;
            let tags = app.add_tag(&path, &tag);
            println!("{}: {}", path.display(), tags);
        }
        Command::Range { path, start, end } => {
            let path = absolute(&path)?;
            let range = app.set_video_range(&path, &start, &end)?;
            app.wait_thumbnails(THUMBNAIL_WAIT);
            println!("{}: {}s - {}s", path.display(), range.start, range.end);
        }
        Command::Volume { path, value } => {
            let path = absolute(&path)?;
            if let Some(value) = value {
                app.set_volume(&path, value);
            }
            println!("{}: {}", path.display(), app.volume(&path));
        }
        Command::Delete { path, yes } => {
            let path = absolute(&path)?;
            app.delete_media(&path, |p| yes || confirm(p))?;
            println!("deleted {}", path.display());
        }
        Command::Dedup { folder } => {
            open_folder(app, folder.as_deref())?;
            let removed = app.cleanup_duplicates();
            println!("{removed} duplicates removed");
        }
        Command::Slideshow {
            folder,
            seconds,
            count,
            tags,
        } => {
            open_folder(app, folder.as_deref())?;
            app.select_tags(&tags);
            let show = app.start_slideshow(&seconds)?;
            let mut display = PrintDisplay::default();
            let mut rng = rand::thread_rng();
            for _ in 0..count {
                let Some(plan) = show.next(&mut display, |p| app.store().video_range(p), &mut rng)
                else {
                    break;
                };
                let playback = match plan.playback {
                    Playback::Still => "still".to_string(),
                    Playback::PauseAfter(after) => format!("pause after {:.1}s", after.as_secs_f64()),
                    Playback::Loop { interval, repeats } => format!(
                        "rewind to {:.1}s every {:.1}s x{}",
                        plan.start,
                        interval.as_secs_f64(),
                        repeats
                    ),
                };
                println!(
                    "{:>6.1}s  {}  [{}]",
                    plan.hold.as_secs_f64(),
                    plan.path.display(),
                    playback
                );
            }
        }
    }
    Ok(())
}

/// Load `folder`, or the last folder when none is given.
fn open_folder(app: &mut App, folder: Option<&Path>) -> Result<()> {
    match folder {
        Some(folder) => app.choose_folder(&absolute(folder)?),
        None => {
            if !app.restore_last_folder()? {
                bail!("No folder given and no last folder saved");
            }
            Ok(())
        }
    }
}

/// Stored settings are keyed by absolute path.
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Failed to resolve {:?}", path))
}

fn confirm(path: &Path) -> bool {
    print!("Delete {}? [y/N] ", path.display());
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

/// Headless stand-in for the display window; only tracks what is shown.
#[derive(Default)]
struct PrintDisplay {
    current: Option<PathBuf>,
    position: f64,
}

impl DisplaySurface for PrintDisplay {
    fn show_specific_media(&mut self, path: &Path, _hold: Option<Duration>) {
        self.current = Some(path.to_path_buf());
        self.position = 0.0;
    }

    fn current_media_path(&self) -> Option<PathBuf> {
        self.current.clone()
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        0.0
    }

    fn set_position(&mut self, seconds: f64) {
        self.position = seconds;
    }

    fn play(&mut self) {}

    fn pause(&mut self) {}
}
