//! Command-line front end
//!
//! `record` drives a [`SessionController`] from a synthetic camera and face
//! tracker, `inspect` validates a telemetry file and `list` scans the storage
//! directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::{self, Config};
use crate::session;

pub const USAGE: &str = "\
Usage:
  facecap record [--seconds <n>] [--size <WxH>] [--mesh]
  facecap inspect <telemetry.json>
  facecap list

Options:
  --config <path>      Config file (default: platform config dir)
  --storage <dir>      Override the storage directory
  --verbose            Debug logging
";

/// Parsed command line
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub command: Command,
    pub config_path: Option<PathBuf>,
    pub storage_path: Option<PathBuf>,
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Record {
        seconds: u64,
        size: (u32, u32),
        mesh: bool,
    },
    Inspect {
        path: PathBuf,
    },
    List,
    Help,
}

impl Args {
    /// Parse `std::env::args()`-style input, program name included
    pub fn parse(args: &[String]) -> anyhow::Result<Self> {
        let flag = |name: &str| args.iter().any(|a| a == name);
        let value = |name: &str| {
            args.iter()
                .position(|a| a == name)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        let command = match args.get(1).map(String::as_str) {
            Some("record") => {
                let seconds = match value("--seconds") {
                    Some(s) => s.parse::<u64>().with_context(|| format!("Invalid --seconds '{}'", s))?,
                    None => 5,
                };
                let size = match value("--size") {
                    Some(s) => parse_size(&s)?,
                    None => (640, 480),
                };
                Command::Record {
                    seconds,
                    size,
                    mesh: flag("--mesh"),
                }
            }
            Some("inspect") => {
                let path = args
                    .get(2)
                    .filter(|a| !a.starts_with("--"))
                    .context("inspect needs a telemetry file")?;
                Command::Inspect {
                    path: PathBuf::from(path),
                }
            }
            Some("list") => Command::List,
            Some("help") | Some("--help") | Some("-h") | None => Command::Help,
            Some(other) => anyhow::bail!("Unknown command '{}'\n\n{}", other, USAGE),
        };

        Ok(Self {
            command,
            config_path: value("--config").map(PathBuf::from),
            storage_path: value("--storage").map(PathBuf::from),
            verbose: flag("--verbose"),
        })
    }

    /// Load the config file and apply command-line overrides
    pub fn load_config(&self) -> Config {
        let path = self.config_path.clone().unwrap_or_else(config::default_config_path);
        let mut config = Config::load_or_default(&path);
        if let Some(storage) = &self.storage_path {
            config.storage_path = storage.clone();
        }
        if let Command::Record { mesh: true, .. } = self.command {
            config.capture_mesh = true;
        }
        config
    }
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s
        .split_once('x')
        .with_context(|| format!("Invalid --size '{}', expected WxH", s))?;
    let width: u32 = w.parse().with_context(|| format!("Invalid width '{}'", w))?;
    let height: u32 = h.parse().with_context(|| format!("Invalid height '{}'", h))?;
    // NV12 needs even dimensions
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        anyhow::bail!("Frame size must be non-zero and even, got {}x{}", width, height);
    }
    Ok((width, height))
}

pub fn run(args: Args) -> anyhow::Result<()> {
    let config = args.load_config();
    match args.command {
        Command::Record { seconds, size, .. } => record(config, Duration::from_secs(seconds), size),
        Command::Inspect { path } => inspect(&path),
        Command::List => list(&config.storage_path),
        Command::Help => {
            print!("{}", USAGE);
            Ok(())
        }
    }
}

/// Validate a telemetry file and print its summary
pub fn inspect(path: &Path) -> anyhow::Result<()> {
    let document = session::read_telemetry(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let summary = document.validate()?;

    println!("{}", path.display());
    println!("  frames:          {}", summary.frames);
    println!("  with telemetry:  {}", summary.filled_frames);
    println!("  channels:        {}", summary.channels);
    println!("  with mesh:       {}", summary.mesh_frames);
    Ok(())
}

/// Print the sessions in a storage directory
pub fn list(storage: &Path) -> anyhow::Result<()> {
    let sessions = session::list_sessions(storage, crate::encoding::ContainerFormat::Mp4.extension())
        .with_context(|| format!("Failed to scan {}", storage.display()))?;

    if sessions.is_empty() {
        println!("No sessions in {}", storage.display());
        return Ok(());
    }

    for s in &sessions {
        let video = if s.video_path.is_some() { "video" } else { "no video" };
        match s.recorded_at {
            Some(at) => println!("{}  {}  ({})", s.id, at.format("%Y-%m-%d %H:%M:%S"), video),
            None => println!("{}  ({})", s.id, video),
        }
    }
    Ok(())
}

#[cfg(not(feature = "gstreamer"))]
fn record(_config: Config, _duration: Duration, _size: (u32, u32)) -> anyhow::Result<()> {
    anyhow::bail!("facecap was built without the `gstreamer` feature; recording is unavailable")
}

#[cfg(feature = "gstreamer")]
fn record(config: Config, duration: Duration, size: (u32, u32)) -> anyhow::Result<()> {
    use std::sync::Arc;

    use crate::encoding::GstEncoderFactory;
    use crate::recording::{ChannelSchema, SessionController};

    let factory = GstEncoderFactory::new(config.encoder.clone())?;
    let framerate = config.encoder.framerate.max(1);
    let controller = Arc::new(SessionController::new(
        config,
        ChannelSchema::arkit(),
        Arc::new(factory),
    ));

    let mut rig = synthetic::Rig::spawn(controller.clone(), size, framerate)?;
    // Let the camera report its size before the session picks one
    std::thread::sleep(Duration::from_millis(200));

    let info = controller.try_start()?;
    println!("Recording {} for {}s", info.id, duration.as_secs());
    std::thread::sleep(duration);

    let report = controller.stop().context("Session ended unexpectedly")?;
    rig.shutdown();

    let stats = report.finalize.wait()?;
    println!("Video:     {}", report.session.video_path.display());
    println!(
        "           {} frames encoded, {} dropped, {:.1}s",
        stats.frames_encoded,
        stats.frames_dropped,
        stats.encoding_duration.as_secs_f64()
    );
    match report.telemetry {
        Ok(bytes) => println!(
            "Telemetry: {} ({} of {} frames, {} bytes)",
            report.session.telemetry_path.display(),
            report.filled_frames,
            report.frames,
            bytes
        ),
        Err(e) => anyhow::bail!("Telemetry was not written: {}", e),
    }
    Ok(())
}

/// Synthetic camera and face tracker threads
#[cfg(feature = "gstreamer")]
mod synthetic {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};

    use crossbeam_channel::{bounded, Receiver};

    use crate::recording::{
        FaceGeometry, SessionController, Timestamp, TrackingUpdate, VideoFrame,
    };

    pub struct Rig {
        stop: Arc<AtomicBool>,
        threads: Vec<JoinHandle<()>>,
    }

    impl Rig {
        pub fn spawn(
            controller: Arc<SessionController>,
            (width, height): (u32, u32),
            framerate: u32,
        ) -> anyhow::Result<Self> {
            let stop = Arc::new(AtomicBool::new(false));
            // Tracker lags the camera by a few frames at most
            let (tx, rx) = bounded::<Timestamp>(8);

            let camera = {
                let controller = controller.clone();
                let stop = stop.clone();
                std::thread::Builder::new()
                    .name("facecap-camera".into())
                    .spawn(move || {
                        let period = Duration::from_secs(1) / framerate;
                        let started = Instant::now();
                        let mut n: u64 = 0;
                        while !stop.load(Ordering::SeqCst) {
                            let timestamp = Timestamp::from_duration(started.elapsed());
                            controller.ingest(VideoFrame {
                                data: nv12_frame(width, height, n),
                                width,
                                height,
                                pixel_format: "NV12".to_string(),
                                timestamp,
                            });
                            // Tracker falling behind is fine; skip rather than stall
                            let _ = tx.try_send(timestamp);
                            n += 1;

                            let next = period * (n as u32);
                            if let Some(wait) = next.checked_sub(started.elapsed()) {
                                std::thread::sleep(wait);
                            }
                        }
                    })?
            };

            let tracker = {
                let controller = controller.clone();
                std::thread::Builder::new()
                    .name("facecap-tracker".into())
                    .spawn(move || track(controller, rx))?
            };

            Ok(Self {
                stop,
                threads: vec![camera, tracker],
            })
        }

        pub fn shutdown(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            for handle in self.threads.drain(..) {
                if handle.join().is_err() {
                    log::error!("Synthetic capture thread panicked");
                }
            }
        }
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            self.shutdown();
        }
    }

    /// Ends when the camera thread drops its sender
    fn track(controller: Arc<SessionController>, frames: Receiver<Timestamp>) {
        let names = controller.schema().names().to_vec();
        for timestamp in frames {
            let t = timestamp.as_secs_f64();
            let blend_shapes: HashMap<String, f32> = names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let phase = i as f64 * 0.37;
                    (name.clone(), (0.5 + 0.5 * (t * 2.0 + phase).sin()) as f32)
                })
                .collect();

            let update = TrackingUpdate::new(blend_shapes, timestamp).with_geometry(FaceGeometry {
                vertices: vec![[0.0, 0.0, 0.0], [0.1, 0.0, 0.0], [0.0, 0.1, 0.0]],
                texture_coordinates: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
                triangle_indices: vec![0, 1, 2],
            });

            if let Err(e) = controller.sample(&update) {
                log::warn!("Tracking update rejected: {}", e);
            }
        }
    }

    /// Moving gradient in NV12
    fn nv12_frame(width: u32, height: u32, n: u64) -> Vec<u8> {
        let (w, h) = (width as usize, height as usize);
        let mut data = vec![128u8; w * h * 3 / 2];
        let shift = (n * 4) as usize;
        for y in 0..h {
            let row = &mut data[y * w..(y + 1) * w];
            for (x, px) in row.iter_mut().enumerate() {
                *px = ((x + y + shift) & 0xff) as u8;
            }
        }
        data
    }
}
