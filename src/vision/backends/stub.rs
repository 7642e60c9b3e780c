use std::sync::Arc;

use anyhow::{anyhow, Result};
use rand::Rng;

use crate::frame::Frame;
use crate::pose::{rvec_from_euler, Vec3};
use crate::registry::TrackerDefinition;
use crate::vision::backend::VisionBackend;
use crate::vision::result::{
    BoardOutput, CameraIntrinsics, MarkerOutput, PoseOutput, PoseSample, PreviewImage,
};

const PREVIEW_FACTOR: u32 = 8;
/// The stub "finds" the board on every n-th board frame.
const BOARD_EVERY: u64 = 5;
/// Each tracker drops out of view for one frame in this many.
const OCCLUSION_PERIOD: u64 = 30;
const NOISE_METERS: f64 = 0.001;

/// Stub collaborator for dry runs and tests.
///
/// Produces plausible, slowly orbiting poses for every requested tracker so the link
/// and session can be exercised without a native vision library.
pub struct StubBackend {
    board_frames: u64,
    saved_boards: usize,
    last_size: Option<(u32, u32)>,
    intrinsics: Option<CameraIntrinsics>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            board_frames: 0,
            saved_boards: 0,
            last_size: None,
            intrinsics: None,
        }
    }

    pub fn intrinsics(&self) -> Option<&CameraIntrinsics> {
        self.intrinsics.as_ref()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VisionBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn set_intrinsics(&mut self, intrinsics: &CameraIntrinsics) -> Result<()> {
        if !intrinsics.is_valid() {
            return Err(anyhow!("rejecting invalid camera intrinsics"));
        }
        self.intrinsics = Some(intrinsics.clone());
        Ok(())
    }

    fn detect_markers(&mut self, frame: &Frame) -> Result<MarkerOutput> {
        Ok(MarkerOutput {
            preview: PreviewImage::downscaled(frame, PREVIEW_FACTOR),
            detections: Vec::new(),
        })
    }

    fn detect_board(&mut self, frame: &Frame, save: bool) -> Result<BoardOutput> {
        self.board_frames += 1;
        self.last_size = Some((frame.width, frame.height));
        let board_found = self.board_frames % BOARD_EVERY == 0;
        if board_found && save {
            self.saved_boards += 1;
        }
        Ok(BoardOutput {
            preview: PreviewImage::downscaled(frame, PREVIEW_FACTOR),
            board_found,
        })
    }

    fn estimate_tracker_poses(
        &mut self,
        frame: &Frame,
        trackers: &[Arc<TrackerDefinition>],
    ) -> Result<PoseOutput> {
        let mut rng = rand::thread_rng();
        let mut poses = Vec::with_capacity(trackers.len());
        for (index, tracker) in trackers.iter().enumerate() {
            let phase = frame.sequence + index as u64;
            if phase % OCCLUSION_PERIOD == 0 {
                poses.push(PoseSample::hidden(tracker.id()));
                continue;
            }
            let yaw = frame.sequence as f64 * 0.01 + index as f64;
            let rotation = rvec_from_euler(0.0, yaw, 0.0)?;
            let mut noise = || rng.gen_range(-NOISE_METERS..NOISE_METERS);
            let translation = Vec3::new(
                0.25 * index as f64 + noise(),
                noise(),
                1.5 + noise(),
            );
            poses.push(PoseSample::visible(tracker.id(), rotation, translation));
        }
        Ok(PoseOutput {
            preview: PreviewImage::downscaled(frame, PREVIEW_FACTOR),
            poses,
        })
    }

    fn saved_boards(&self) -> usize {
        self.saved_boards
    }

    fn calibrate_from_saved_boards(&mut self) -> Result<CameraIntrinsics> {
        if self.saved_boards == 0 {
            return Err(anyhow!("no saved board views to calibrate from"));
        }
        let (width, height) = self
            .last_size
            .ok_or_else(|| anyhow!("no board frame seen yet"))?;
        Ok(CameraIntrinsics::nominal(width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::definition;

    fn frame(sequence: u64) -> Frame {
        Frame::new(vec![0u8; 16 * 16 * 3], 16, 16, sequence)
    }

    #[test]
    fn board_is_saved_only_when_requested() -> Result<()> {
        let mut stub = StubBackend::new();
        let mut found = 0;
        for seq in 1..=10 {
            let out = stub.detect_board(&frame(seq), seq > 5)?;
            if out.board_found {
                found += 1;
            }
        }
        assert_eq!(found, 2);
        assert_eq!(stub.saved_boards(), 1);

        let intrinsics = stub.calibrate_from_saved_boards()?;
        assert_eq!(intrinsics.cx, 8.0);
        stub.set_intrinsics(&intrinsics)?;
        assert!(stub.intrinsics().is_some());
        Ok(())
    }

    #[test]
    fn calibration_without_boards_fails() {
        let mut stub = StubBackend::new();
        assert!(stub.calibrate_from_saved_boards().is_err());
    }

    #[test]
    fn every_tracker_gets_a_pose() -> Result<()> {
        let mut stub = StubBackend::new();
        let trackers = vec![
            Arc::new(definition("a", &[1])),
            Arc::new(definition("b", &[2])),
        ];
        let out = stub.estimate_tracker_poses(&frame(29), &trackers)?;
        assert_eq!(out.poses.len(), 2);
        assert!(out.poses[0].visible);
        // 29 + 1 lands on the occlusion period.
        assert!(!out.poses[1].visible);
        assert_eq!(out.poses[1].tracker_ref, "b");
        assert_eq!(out.preview.width, 2);
        Ok(())
    }
}
