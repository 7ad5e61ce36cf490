//! zonewatchd - home zone monitoring daemon
//!
//! This daemon:
//! 1. Loads configuration and the person detector
//! 2. Serves the browser UI and control API on a loopback address
//! 3. Runs one monitoring session at a time as the UI requests them

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use zone_watch::api::{shared_snapshot, ApiConfig, ApiServer, Supervisor};
use zone_watch::detect::build_detector;
use zone_watch::ingest::{available_cameras, SourceSpec};
use zone_watch::session::{SessionCommand, SessionSettings};
use zone_watch::ZoneWatchConfig;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (TOML or JSON).
    #[arg(long, env = "ZONEWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address for the browser UI.
    #[arg(long)]
    addr: Option<String>,
    /// Detector backend (cpu|stub|tract).
    #[arg(long)]
    backend: Option<String>,
    /// Model file for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Start a session on this source right away (camera:/dev/video0, file:clip.mp4, stub://scene).
    #[arg(long, value_name = "SOURCE")]
    autostart: Option<String>,
    /// Print the detected cameras as JSON and exit.
    #[arg(long)]
    list_cameras: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_cameras {
        println!("{}", serde_json::to_string_pretty(&available_cameras())?);
        return Ok(());
    }

    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal(), false);
    let mut cfg = ZoneWatchConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.api_addr = addr;
    }
    if let Some(backend) = args.backend {
        cfg.detector.backend = backend;
    }
    if let Some(model) = args.model {
        cfg.detector.model_path = Some(model);
    }
    if let Some(source) = args.autostart.as_deref() {
        cfg.autostart = Some(SourceSpec::parse(source)?);
    }
    cfg.validate()?;

    let detector = {
        let _stage = ui.stage("Load detector");
        build_detector(&cfg.detector)?
    };

    let snapshot = shared_snapshot(&cfg.detector.backend);
    let (commands, inbox) = mpsc::channel();
    let api_handle = {
        let _stage = ui.stage("Start web server");
        ApiServer::new(ApiConfig::from_config(&cfg), snapshot.clone(), commands.clone()).spawn()?
    };
    log::info!("zonewatchd: open http://{} in a browser", api_handle.addr);

    if let Some(spec) = cfg.autostart.clone() {
        log::info!("zonewatchd: autostarting {}", spec);
        commands
            .send(SessionCommand::Start(spec))
            .map_err(|_| anyhow!("session supervisor is not running"))?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        signal.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let supervisor = Supervisor::new(
        SessionSettings::from_config(&cfg),
        detector,
        snapshot,
        inbox,
    );
    supervisor.run(&shutdown)?;

    log::info!("zonewatchd: shutdown signal received, stopping web server...");
    drop(commands);
    api_handle.stop()?;
    Ok(())
}
