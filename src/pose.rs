//! Small numeric utilities shared by the session and the link.
//!
//! - `Vec3`: plain 3-vector of `f64` as it travels on the wire
//! - `quat_to_rvec` / `rvec_from_euler`: rotation conversions
//! - `remap_to_driver`: camera axis convention to VR driver convention
//! - `FpsEstimator`: 1-second sliding-window frame rate

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

const DEGENERATE_EPS: f64 = 1e-9;
const FPS_WINDOW_SECS: f64 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A rotation vector plus translation, in the vision collaborator's convention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rotation: Vec3,
    pub translation: Vec3,
}

impl Pose {
    pub const fn new(rotation: Vec3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }
}

/// Map a vector from camera axes to driver axes: `(x, y, z) -> (x, z, y)`.
///
/// The permutation is its own inverse.
pub fn remap_to_driver(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, v.y)
}

/// Convert a unit quaternion to the rotation vector the driver expects.
///
/// Computes `theta = 2 acos(w)`, `length = |(x, y, z)|` and returns
/// `(x, y, z) / (length * theta)`. Identity rotations (`|w| == 1`, no axis) map to the
/// zero vector. Any other input without a usable axis is rejected.
pub fn quat_to_rvec(w: f64, x: f64, y: f64, z: f64) -> Result<Vec3, BridgeError> {
    let degenerate = || BridgeError::DegenerateRotation { w, x, y, z };
    if !(w.is_finite() && x.is_finite() && y.is_finite() && z.is_finite()) {
        return Err(degenerate());
    }

    let length = (x * x + y * y + z * z).sqrt();
    let theta = 2.0 * w.clamp(-1.0, 1.0).acos();
    let divisor = length * theta;

    if divisor.abs() < DEGENERATE_EPS {
        let norm = (w * w + length * length).sqrt();
        if length < DEGENERATE_EPS && (norm - 1.0).abs() < 1e-6 {
            return Ok(Vec3::ZERO);
        }
        return Err(degenerate());
    }

    let rvec = Vec3::new(x / divisor, y / divisor, z / divisor);
    if !rvec.is_finite() {
        return Err(degenerate());
    }
    Ok(rvec)
}

/// Rotation vector for pitch/yaw/roll angles in radians (Z-Y-X order).
pub fn rvec_from_euler(pitch: f64, yaw: f64, roll: f64) -> Result<Vec3, BridgeError> {
    let (sr, cr) = (roll * 0.5).sin_cos();
    let (sp, cp) = (pitch * 0.5).sin_cos();
    let (sy, cy) = (yaw * 0.5).sin_cos();

    let w = cr * cp * cy + sr * sp * sy;
    let x = sr * cp * cy - cr * sp * sy;
    let y = cr * sp * cy + sr * cp * sy;
    let z = cr * cp * sy - sr * sp * cy;
    quat_to_rvec(w, x, y, z)
}

/// Frame rate over the last second of processed frames.
///
/// Each sample is `(start_time, duration)` in seconds on the caller's clock. Queries
/// evict stale samples and average the rest in a single pass, so nothing older than
/// the window contributes to the returned value.
#[derive(Debug, Default)]
pub struct FpsEstimator {
    samples: VecDeque<(f64, f64)>,
}

impl FpsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, start: f64, duration: f64) {
        self.samples.push_back((start, duration));
    }

    pub fn fps(&mut self, now: f64) -> f64 {
        let cutoff = now - FPS_WINDOW_SECS;
        let mut total = 0.0;
        let mut kept = 0usize;
        self.samples.retain(|&(start, duration)| {
            if start < cutoff {
                return false;
            }
            total += duration;
            kept += 1;
            true
        });
        if kept == 0 || total <= 0.0 {
            return 0.0;
        }
        kept as f64 / total
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
