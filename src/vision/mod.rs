//! Boundary to the native vision collaborator.

use std::sync::{Arc, Mutex};

mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::VisionBackend;
pub use backends::StubBackend;
pub use registry::VisionRegistry;
pub use result::{
    BoardOutput, CameraIntrinsics, MarkerDetection, MarkerOutput, PoseOutput, PoseSample,
    PreviewImage,
};

/// Collaborator shared between the processing thread and operator actions.
pub type SharedVision = Arc<Mutex<dyn VisionBackend>>;
