//! Operator console: one command per line on stdin.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::bridge::Bridge;
use crate::pose::{rvec_from_euler, Pose, Vec3};
use crate::session::TrackingMode;
use crate::store::Store;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct Line {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Switch tracking mode (disabled, calibrate, markers, trackers)
    Mode { mode: TrackingMode },
    /// Save the next frame in which the calibration board is found
    Capture,
    /// Compute camera intrinsics from the captured boards and save them
    Calibrate,
    Activate { id: String },
    Deactivate { id: String },
    /// Re-send the active tracker set
    Advertise,
    /// Open a new link session (defaults to the configured peer)
    Connect { host: Option<String>, port: Option<u16> },
    Disconnect,
    /// Tell the driver where tracker <id> really is (meters, radians)
    #[command(allow_negative_numbers = true)]
    Place {
        id: String,
        x: f64,
        y: f64,
        z: f64,
        #[arg(default_value_t = 0.0)]
        pitch: f64,
        #[arg(default_value_t = 0.0)]
        yaw: f64,
        #[arg(default_value_t = 0.0)]
        roll: f64,
    },
    Status,
    Quit,
}

pub enum Reply {
    Continue(String),
    Quit,
}

pub struct Console {
    bridge: Arc<Bridge>,
    store: Store,
    link_host: String,
    link_port: u16,
}

impl Console {
    pub fn new(bridge: Arc<Bridge>, store: Store, link_host: String, link_port: u16) -> Self {
        Self {
            bridge,
            store,
            link_host,
            link_port,
        }
    }

    /// Read commands until EOF or `quit`. Command errors are printed, not returned.
    pub fn run(&self, input: impl BufRead, mut output: impl Write) -> Result<()> {
        for line in input.lines() {
            let line = line.context("read console input")?;
            if line.trim().is_empty() {
                continue;
            }
            match self.execute(&line) {
                Ok(Reply::Continue(text)) => writeln!(output, "{}", text)?,
                Ok(Reply::Quit) => break,
                Err(err) => writeln!(output, "error: {:#}", err)?,
            }
            output.flush()?;
        }
        Ok(())
    }

    pub fn execute(&self, line: &str) -> Result<Reply> {
        let parsed = Line::try_parse_from(line.split_whitespace())?;
        let bridge = &self.bridge;
        let text = match parsed.command {
            Command::Mode { mode } => {
                bridge.session().set_mode(mode);
                format!("mode {}", mode)
            }
            Command::Capture => {
                bridge.session().capture_board()?;
                "armed; hold the board in view".to_string()
            }
            Command::Calibrate => {
                let intrinsics = bridge.calibrate_camera(&self.store)?;
                format!(
                    "fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
                    intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy
                )
            }
            Command::Activate { id } => {
                bridge.set_tracker_active(&id, true)?;
                format!("{} active", id)
            }
            Command::Deactivate { id } => {
                bridge.set_tracker_active(&id, false)?;
                format!("{} inactive", id)
            }
            Command::Advertise => {
                bridge.advertise()?;
                "advertised".to_string()
            }
            Command::Connect { host, port } => {
                let host = host.unwrap_or_else(|| self.link_host.clone());
                let port = port.unwrap_or(self.link_port);
                bridge.connect_link(&host, port)?;
                format!("connected to {}:{}", host, port)
            }
            Command::Disconnect => {
                bridge.disconnect_link();
                "disconnected".to_string()
            }
            Command::Place {
                id,
                x,
                y,
                z,
                pitch,
                yaw,
                roll,
            } => {
                let target = Pose::new(rvec_from_euler(pitch, yaw, roll)?, Vec3::new(x, y, z));
                bridge.calibrate_pose(&id, &target)?;
                format!("placed {}", id)
            }
            Command::Status => self.status(),
            Command::Quit => return Ok(Reply::Quit),
        };
        Ok(Reply::Continue(text))
    }

    fn status(&self) -> String {
        let bridge = &self.bridge;
        let session = bridge.session().stats();
        let (state, link) = {
            let link = bridge.link().lock().map(|l| (l.state(), l.stats()));
            match link {
                Ok(pair) => pair,
                Err(_) => return "link lock poisoned".to_string(),
            }
        };
        let mut out = format!(
            "mode={} fps={:.1} boards={} failed={} link={} updates={} send_failures={}",
            session.mode,
            session.fps,
            session.board_samples,
            session.frames_failed,
            state.as_str(),
            link.updates,
            link.send_failures
        );
        if let Some(capture) = bridge.capture_stats() {
            out.push_str(&format!(
                " captured={} dropped={}",
                capture.frames_captured, capture.frames_dropped
            ));
        }
        for tracker in bridge.tracker_states() {
            let id = tracker.definition.id();
            let flag = if tracker.active {
                "on"
            } else if bridge.registry().can_activate(id) {
                "off"
            } else {
                "blocked"
            };
            let network = tracker
                .network_id
                .map_or_else(|| "-".to_string(), |n| n.to_string());
            out.push_str(&format!("\n  {} [{}] net={}", id, flag, network));
        }
        out
    }
}
