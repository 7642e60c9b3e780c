use std::sync::Arc;

use anyhow::Result;

use crate::frame::Frame;
use crate::registry::TrackerDefinition;

use super::result::{BoardOutput, CameraIntrinsics, MarkerOutput, PoseOutput};

/// The native vision collaborator.
///
/// Marker detection, board detection, pose estimation and intrinsics calibration live
/// behind this trait. Every call is synchronous and runs on the caller's thread; the
/// session calls it from the processing thread, one frame at a time.
///
/// Implementations must not keep references to the frame beyond the call.
pub trait VisionBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Replace the camera intrinsics used for pose estimation.
    fn set_intrinsics(&mut self, intrinsics: &CameraIntrinsics) -> Result<()>;

    /// Raw marker detection with an annotated preview.
    fn detect_markers(&mut self, frame: &Frame) -> Result<MarkerOutput>;

    /// Look for the calibration board; when `save` is set and the board is found the
    /// view is kept for a later `calibrate_from_saved_boards`.
    fn detect_board(&mut self, frame: &Frame, save: bool) -> Result<BoardOutput>;

    /// Pose of every given tracker in this frame. Trackers not seen are reported with
    /// `visible == false`.
    fn estimate_tracker_poses(
        &mut self,
        frame: &Frame,
        trackers: &[Arc<TrackerDefinition>],
    ) -> Result<PoseOutput>;

    /// Number of board views saved so far.
    fn saved_boards(&self) -> usize;

    /// Compute intrinsics from all saved board views.
    fn calibrate_from_saved_boards(&mut self) -> Result<CameraIntrinsics>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
