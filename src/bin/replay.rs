//! replay - run one source through the pipeline without the web UI
//!
//! Every processed frame is printed to stdout as one JSON line; the session
//! summary follows as the last line. Annotated frames can be written as JPEGs.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use zone_watch::detect::build_detector;
use zone_watch::session::{Session, SessionFrame, SessionSettings};
use zone_watch::{SourceSpec, ZoneWatchConfig};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Source to replay (camera:/dev/video0, file:clip.mp4, stub://scene).
    #[arg(long, value_name = "SOURCE")]
    source: String,
    /// Configuration file (TOML or JSON).
    #[arg(long, env = "ZONEWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Detector backend (cpu|stub|tract).
    #[arg(long)]
    backend: Option<String>,
    /// Model file for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,
    /// Directory for annotated JPEG frames.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Hold the source frame rate instead of running as fast as possible.
    #[arg(long)]
    realtime: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = ZoneWatchConfig::load_from(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        cfg.detector.backend = backend;
    }
    if let Some(model) = args.model {
        cfg.detector.model_path = Some(model);
    }
    if args.frames.is_some() {
        cfg.source.max_frames = args.frames;
    }
    cfg.validate()?;
    let spec = SourceSpec::parse(&args.source)?;

    let mut settings = SessionSettings::from_config(&cfg);
    settings.pace = args.realtime;
    settings.render = args.out.is_some();
    if let Some(dir) = &args.out {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create output dir {}", dir.display()))?;
    }

    let detector = {
        let _stage = ui.stage("Load detector");
        build_detector(&cfg.detector)?
    };
    let mut session = {
        let _stage = ui.stage("Open source");
        Session::new(spec, &settings, detector)?
    };

    let progress = ui.frames(cfg.source.max_frames);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut sink = |frame: &SessionFrame| -> Result<()> {
        serde_json::to_writer(&mut out, frame)?;
        writeln!(out)?;
        if let (Some(dir), Some(jpeg)) = (&args.out, &frame.jpeg) {
            let path = dir.join(format!("frame_{:06}.jpg", frame.index));
            std::fs::write(&path, jpeg)
                .with_context(|| format!("write {}", path.display()))?;
        }
        progress.tick(frame.outside_count());
        Ok(())
    };
    let summary = session.run(&mut sink, &|| false)?;
    drop(progress);

    serde_json::to_writer(&mut out, &summary)?;
    writeln!(out)?;
    Ok(())
}
