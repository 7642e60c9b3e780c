//! markerd - marker tracker bridge daemon
//!
//! This daemon:
//! 1. Loads configuration, tracker definitions and the stored camera calibration
//! 2. Activates the configured trackers and connects to the VR driver
//! 3. Captures frames and runs the tracking session until Ctrl-C
//! 4. Optionally reads operator commands from stdin (`--console`)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use marker_bridge::{
    console::Console, open_source, preview, Bridge, BridgeConfig, Store, VisionRegistry,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "markerd", about = "Bridge fiducial-marker trackers to a VR driver")]
struct Args {
    /// JSON config file
    #[arg(long, env = "MARKER_BRIDGE_CONFIG")]
    config: Option<PathBuf>,
    /// Read operator commands from stdin
    #[arg(long)]
    console: bool,
    /// Do not connect to the driver at start-up
    #[arg(long)]
    no_link: bool,
}

enum Shutdown {
    Signal,
    ConsoleClosed,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = BridgeConfig::load_from(args.config.as_deref())?;
    let store = Store::new(&config.trackers_dir, &config.calibration_dir);
    store.ensure_dirs()?;

    let vision = VisionRegistry::with_builtin().select(&config.tracking.vision_backend)?;
    let (publisher, preview_handle) = preview::spawn_presenter(preview_sink(&config))?;
    let bridge = Bridge::new(
        vision,
        config.link.device_name.clone(),
        config.tracking.initial_mode,
        config.tracking.min_board_samples,
    )
    .with_preview(publisher);
    let bridge = Arc::new(bridge);

    if let Some(intrinsics) = store.load_calibration()? {
        bridge.apply_intrinsics(&intrinsics)?;
    } else {
        log::warn!(
            "no camera calibration in {}; poses use nominal intrinsics",
            config.calibration_dir.display()
        );
    }

    let registered = bridge.register_all(store.load_trackers()?);
    log::info!("{} trackers registered", registered);
    for id in &config.tracking.active_trackers {
        if let Err(err) = bridge.set_tracker_active(id, true) {
            log::warn!("not activating '{}': {}", id, err);
        }
    }

    if !args.no_link {
        bridge
            .connect_link(&config.link.host, config.link.port)
            .with_context(|| {
                format!("connect to driver at {}:{}", config.link.host, config.link.port)
            })?;
    }

    bridge.start_capture(open_source(&config.camera)?)?;
    log::info!(
        "markerd running. camera={} mode={} link={}:{}",
        config.camera.device,
        bridge.session().mode(),
        config.link.host,
        config.link.port
    );

    let (tx, rx) = mpsc::channel();
    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Shutdown::Signal);
    })
    .context("set Ctrl-C handler")?;

    if args.console {
        let console = Console::new(
            bridge.clone(),
            store.clone(),
            config.link.host.clone(),
            config.link.port,
        );
        std::thread::Builder::new()
            .name("console".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                if let Err(err) = console.run(stdin.lock(), std::io::stdout()) {
                    log::error!("console: {:#}", err);
                }
                let _ = tx.send(Shutdown::ConsoleClosed);
            })
            .context("spawn console thread")?;
    } else {
        drop(tx);
    }

    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(Shutdown::Signal) => {
                log::info!("shutdown signal received");
                break;
            }
            Ok(Shutdown::ConsoleClosed) => {
                log::info!("console closed");
                break;
            }
            Err(RecvTimeoutError::Timeout) => log_health(&bridge),
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if !bridge.capture_running() {
            log::error!("capture stopped unexpectedly");
            break;
        }
    }

    if let Some(stats) = bridge.stop_capture()? {
        log::info!(
            "capture stopped: {} frames captured, {} processed, {} dropped",
            stats.frames_captured,
            stats.frames_delivered,
            stats.frames_dropped
        );
    }
    bridge.disconnect_link();
    // The session holds the last preview publisher; the presenter exits once it is gone.
    match Arc::try_unwrap(bridge) {
        Ok(bridge) => {
            drop(bridge);
            let presented = preview_handle.join()?;
            log::info!("markerd stopped ({} previews presented)", presented);
        }
        Err(_) => log::info!("markerd stopped"),
    }
    Ok(())
}

fn log_health(bridge: &Bridge) {
    let session = bridge.session().stats();
    let capture = bridge.capture_stats().unwrap_or_default();
    let link = bridge
        .link()
        .lock()
        .map(|link| (link.state(), link.stats()))
        .ok();
    let (state, link_stats) = match link {
        Some((state, stats)) => (state.as_str(), stats),
        None => ("poisoned", Default::default()),
    };
    log::info!(
        "health: mode={} fps={:.1} captured={} dropped={} failed={} link={} updates={} send_failures={}",
        session.mode,
        session.fps,
        capture.frames_captured,
        capture.frames_dropped,
        session.frames_failed,
        state,
        link_stats.updates,
        link_stats.send_failures
    );
}

#[cfg(feature = "preview-jpeg")]
fn preview_sink(config: &BridgeConfig) -> Box<dyn preview::PreviewSink> {
    match &config.tracking.preview_path {
        Some(path) => Box::new(preview::JpegPreviewSink::new(path.clone())),
        None => Box::new(preview::LogPreviewSink::default()),
    }
}

#[cfg(not(feature = "preview-jpeg"))]
fn preview_sink(config: &BridgeConfig) -> Box<dyn preview::PreviewSink> {
    if let Some(path) = &config.tracking.preview_path {
        log::warn!(
            "preview_path {} ignored: built without the preview-jpeg feature",
            path.display()
        );
    }
    Box::new(preview::LogPreviewSink::default())
}
