use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::pose::Vec3;

/// Camera intrinsics as produced by calibration and stored on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub cx: f64,
    pub cy: f64,
    pub fx: f64,
    pub fy: f64,
    #[serde(rename = "distCoeffs")]
    pub dist_coeffs: [f64; 5],
}

impl CameraIntrinsics {
    /// Pinhole guess for an uncalibrated camera: focal length equal to the image width,
    /// principal point at the centre, no distortion.
    pub fn nominal(width: u32, height: u32) -> Self {
        Self {
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
            fx: width as f64,
            fy: width as f64,
            dist_coeffs: [0.0; 5],
        }
    }

    pub fn is_valid(&self) -> bool {
        let finite = [self.cx, self.cy, self.fx, self.fy]
            .iter()
            .chain(self.dist_coeffs.iter())
            .all(|v| v.is_finite());
        finite && self.fx > 0.0 && self.fy > 0.0
    }
}

/// Per-frame pose of one tracker, in the vision collaborator's axis convention.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseSample {
    /// Id of the tracker definition this pose belongs to.
    pub tracker_ref: String,
    pub rotation_vector: Vec3,
    pub translation_vector: Vec3,
    pub visible: bool,
}

impl PoseSample {
    pub fn visible(tracker_ref: impl Into<String>, rotation: Vec3, translation: Vec3) -> Self {
        Self {
            tracker_ref: tracker_ref.into(),
            rotation_vector: rotation,
            translation_vector: translation,
            visible: true,
        }
    }

    pub fn hidden(tracker_ref: impl Into<String>) -> Self {
        Self {
            tracker_ref: tracker_ref.into(),
            rotation_vector: Vec3::ZERO,
            translation_vector: Vec3::ZERO,
            visible: false,
        }
    }
}

/// Annotated image returned with every collaborator result. RGB24.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviewImage {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

impl PreviewImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Nearest-neighbour downscale of a frame by an integer factor.
    pub fn downscaled(frame: &Frame, factor: u32) -> Self {
        let factor = factor.max(1);
        let width = frame.width / factor;
        let height = frame.height / factor;
        let src = frame.pixels();
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for row in 0..height {
            for col in 0..width {
                let offset = (((row * factor) * frame.width + col * factor) * 3) as usize;
                match src.get(offset..offset + 3) {
                    Some(rgb) => pixels.extend_from_slice(rgb),
                    None => pixels.extend_from_slice(&[0, 0, 0]),
                }
            }
        }
        Self::new(width, height, pixels)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MarkerDetection {
    pub marker_id: i32,
    /// Image-space corners, clockwise from top-left.
    pub corners: [[f64; 2]; 4],
}

#[derive(Clone, Debug)]
pub struct MarkerOutput {
    pub preview: PreviewImage,
    pub detections: Vec<MarkerDetection>,
}

#[derive(Clone, Debug)]
pub struct BoardOutput {
    pub preview: PreviewImage,
    pub board_found: bool,
}

#[derive(Clone, Debug)]
pub struct PoseOutput {
    pub preview: PreviewImage,
    pub poses: Vec<PoseSample>,
}
