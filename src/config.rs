use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::ingest::CameraConfig;
use crate::session::{TrackingMode, DEFAULT_MIN_BOARD_SAMPLES};

const DEFAULT_LINK_HOST: &str = "192.168.1.22";
const DEFAULT_LINK_PORT: u16 = 8082;
const DEFAULT_CAMERA: &str = "stub://camera";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_TRACKERS_DIR: &str = "trackers";
const DEFAULT_CALIBRATION_DIR: &str = "calibration";
const DEFAULT_VISION_BACKEND: &str = "stub";

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    link: Option<LinkConfigFile>,
    camera: Option<CameraConfigFile>,
    storage: Option<StorageConfigFile>,
    tracking: Option<TrackingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct LinkConfigFile {
    host: Option<String>,
    port: Option<u16>,
    device_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    trackers_dir: Option<PathBuf>,
    calibration_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    mode: Option<String>,
    active_trackers: Option<Vec<String>>,
    min_board_samples: Option<usize>,
    vision_backend: Option<String>,
    preview_path: Option<PathBuf>,
}

/// Daemon configuration: JSON file (optional), then environment, then validation.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub link: LinkSettings,
    pub camera: CameraConfig,
    pub trackers_dir: PathBuf,
    pub calibration_dir: PathBuf,
    pub tracking: TrackingSettings,
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub host: String,
    pub port: u16,
    pub device_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub initial_mode: TrackingMode,
    /// Trackers activated at start-up, in order.
    pub active_trackers: Vec<String>,
    pub min_board_samples: usize,
    pub vision_backend: String,
    /// Where the JPEG preview sink writes, when built with `preview-jpeg`.
    pub preview_path: Option<PathBuf>,
}

impl BridgeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MARKER_BRIDGE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `MARKER_BRIDGE_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Result<Self> {
        let link = LinkSettings {
            host: file
                .link
                .as_ref()
                .and_then(|link| link.host.clone())
                .unwrap_or_else(|| DEFAULT_LINK_HOST.to_string()),
            port: file
                .link
                .as_ref()
                .and_then(|link| link.port)
                .unwrap_or(DEFAULT_LINK_PORT),
            device_name: file.link.and_then(|link| link.device_name),
        };
        let camera = CameraConfig {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_CAMERA_FPS),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        let trackers_dir = file
            .storage
            .as_ref()
            .and_then(|storage| storage.trackers_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TRACKERS_DIR));
        let calibration_dir = file
            .storage
            .and_then(|storage| storage.calibration_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CALIBRATION_DIR));

        let tracking_file = file.tracking.unwrap_or_default();
        let initial_mode = match tracking_file.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => TrackingMode::default(),
        };
        let tracking = TrackingSettings {
            initial_mode,
            active_trackers: tracking_file.active_trackers.unwrap_or_default(),
            min_board_samples: tracking_file
                .min_board_samples
                .unwrap_or(DEFAULT_MIN_BOARD_SAMPLES),
            vision_backend: tracking_file
                .vision_backend
                .unwrap_or_else(|| DEFAULT_VISION_BACKEND.to_string()),
            preview_path: tracking_file.preview_path,
        };
        Ok(Self {
            link,
            camera,
            trackers_dir,
            calibration_dir,
            tracking,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("MARKER_BRIDGE_LINK_HOST") {
            if !host.trim().is_empty() {
                self.link.host = host.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("MARKER_BRIDGE_LINK_PORT") {
            self.link.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("MARKER_BRIDGE_LINK_PORT must be a port number"))?;
        }
        if let Ok(name) = std::env::var("MARKER_BRIDGE_DEVICE_NAME") {
            if !name.trim().is_empty() {
                self.link.device_name = Some(name.trim().to_string());
            }
        }
        if let Ok(device) = std::env::var("MARKER_BRIDGE_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device.trim().to_string();
            }
        }
        if let Ok(mode) = std::env::var("MARKER_BRIDGE_MODE") {
            if !mode.trim().is_empty() {
                self.tracking.initial_mode = mode.parse()?;
            }
        }
        if let Ok(trackers) = std::env::var("MARKER_BRIDGE_ACTIVE_TRACKERS") {
            let parsed = split_csv(&trackers);
            if !parsed.is_empty() {
                self.tracking.active_trackers = parsed;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.link.host.trim().is_empty() {
            return Err(anyhow!("link host must not be empty"));
        }
        if self.link.port == 0 {
            return Err(anyhow!("link port must be greater than zero"));
        }
        if let Some(name) = &self.link.device_name {
            if !name.is_ascii() || name.contains('\0') {
                return Err(anyhow!("device name must be ASCII without NUL bytes"));
            }
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.tracking.min_board_samples == 0 {
            return Err(anyhow!("min_board_samples must be at least 1"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
