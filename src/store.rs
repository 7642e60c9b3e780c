//! Tracker definitions and camera calibrations as JSON files on disk.
//!
//! Tracker file:
//!
//! ```json
//! { "name": "left_foot", "markers": { "3": [[x, y, z], [x, y, z], [x, y, z], [x, y, z]] } }
//! ```
//!
//! Corners may be given as `[x, y]`; `z` is then 0. A missing or empty `name` means the
//! tracker is named after its file stem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::{MarkerCorners, TrackerDefinition};
use crate::vision::CameraIntrinsics;

pub const CALIBRATION_FILE: &str = "calib-0.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerRecord {
    #[serde(default)]
    pub name: String,
    pub markers: BTreeMap<i32, Vec<Vec<f64>>>,
}

impl TrackerRecord {
    pub fn from_definition(definition: &TrackerDefinition) -> Self {
        let markers = definition
            .markers()
            .iter()
            .map(|(id, corners)| (*id, corners.iter().map(|c| c.to_vec()).collect()))
            .collect();
        Self {
            name: definition.id().to_string(),
            markers,
        }
    }

    /// Build a definition, naming it `fallback_id` when the record has no name.
    pub fn into_definition(self, fallback_id: &str) -> Result<TrackerDefinition> {
        let id = if self.name.trim().is_empty() {
            fallback_id.to_string()
        } else {
            self.name
        };
        let mut markers = BTreeMap::new();
        for (marker_id, corners) in self.markers {
            markers.insert(marker_id, corners_from_record(&id, marker_id, &corners)?);
        }
        Ok(TrackerDefinition::new(id, markers)?)
    }
}

fn corners_from_record(id: &str, marker_id: i32, corners: &[Vec<f64>]) -> Result<MarkerCorners> {
    if corners.len() != 4 {
        return Err(anyhow!(
            "tracker '{}' marker {} has {} corners, expected 4",
            id,
            marker_id,
            corners.len()
        ));
    }
    let mut out = [[0.0; 3]; 4];
    for (slot, point) in out.iter_mut().zip(corners) {
        match point.as_slice() {
            [x, y] => *slot = [*x, *y, 0.0],
            [x, y, z] => *slot = [*x, *y, *z],
            _ => {
                return Err(anyhow!(
                    "tracker '{}' marker {} has a corner with {} coordinates",
                    id,
                    marker_id,
                    point.len()
                ))
            }
        }
    }
    Ok(out)
}

/// The trackers and calibration directories.
#[derive(Clone, Debug)]
pub struct Store {
    trackers_dir: PathBuf,
    calibration_dir: PathBuf,
}

impl Store {
    pub fn new(trackers_dir: impl Into<PathBuf>, calibration_dir: impl Into<PathBuf>) -> Self {
        Self {
            trackers_dir: trackers_dir.into(),
            calibration_dir: calibration_dir.into(),
        }
    }

    pub fn trackers_dir(&self) -> &Path {
        &self.trackers_dir
    }

    pub fn calibration_dir(&self) -> &Path {
        &self.calibration_dir
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.trackers_dir, &self.calibration_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Every readable tracker file, in file-name order. Bad files are logged and skipped.
    pub fn load_trackers(&self) -> Result<Vec<TrackerDefinition>> {
        let mut trackers = Vec::new();
        for path in json_files(&self.trackers_dir)? {
            match read_tracker(&path) {
                Ok(definition) => trackers.push(definition),
                Err(err) => log::warn!("store: skipping {}: {:#}", path.display(), err),
            }
        }
        log::info!(
            "store: loaded {} trackers from {}",
            trackers.len(),
            self.trackers_dir.display()
        );
        Ok(trackers)
    }

    /// Write `<id>.json` in the trackers directory.
    pub fn save_tracker(&self, definition: &TrackerDefinition) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.trackers_dir)
            .with_context(|| format!("create directory {}", self.trackers_dir.display()))?;
        let path = self.trackers_dir.join(format!("{}.json", definition.id()));
        let json = serde_json::to_string_pretty(&TrackerRecord::from_definition(definition))?;
        std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// First valid calibration profile in file-name order, if any.
    pub fn load_calibration(&self) -> Result<Option<CameraIntrinsics>> {
        for path in json_files(&self.calibration_dir)? {
            let parsed = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::new)
                .and_then(|raw| Ok(serde_json::from_str::<CameraIntrinsics>(&raw)?));
            match parsed {
                Ok(intrinsics) if intrinsics.is_valid() => {
                    log::info!("store: using calibration {}", path.display());
                    return Ok(Some(intrinsics));
                }
                Ok(_) => log::warn!("store: skipping {}: invalid intrinsics", path.display()),
                Err(err) => log::warn!("store: skipping {}: {:#}", path.display(), err),
            }
        }
        Ok(None)
    }

    /// Overwrite `calib-0.json`.
    pub fn save_calibration(&self, intrinsics: &CameraIntrinsics) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.calibration_dir)
            .with_context(|| format!("create directory {}", self.calibration_dir.display()))?;
        let path = self.calibration_dir.join(CALIBRATION_FILE);
        if path.exists() {
            log::info!("store: overwriting {}", path.display());
        }
        let json = serde_json::to_string_pretty(intrinsics)?;
        std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

fn read_tracker(path: &Path) -> Result<TrackerDefinition> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read tracker file {}: {}", path.display(), e))?;
    let record: TrackerRecord = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid tracker file {}: {}", path.display(), e))?;
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    record.into_definition(stem)
}

/// Sorted `*.json` files directly under `dir`. A missing directory has none.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(anyhow::Error::new(err).context(format!("list {}", dir.display())))
        }
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
        if is_json && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
