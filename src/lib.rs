//! marker-bridge
//!
//! Bridges per-frame fiducial-marker pose estimates from a camera to a VR tracking
//! driver over UDP, so that tagged physical objects show up as tracked devices.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> capture loop -> TrackingSession -> VisionBackend
//!                                      |                 |
//!                               TrackerRegistry     PoseSamples
//!                                      \                 /
//!                                        LinkClient -> driver
//! ```
//!
//! # Module Structure
//!
//! - `ingest`: camera sources and the drop-on-busy capture loop
//! - `frame`: frames and the `FrameConsumer` seam
//! - `registry`: tracker definitions, marker ownership, activation
//! - `session`: tracking mode state machine
//! - `vision`: collaborator trait and the stub backend
//! - `link`: wire protocol and the UDP session
//! - `pose`: rotation conversions, axis remap, FPS estimation
//! - `bridge`: owns everything above and applies activation effects
//! - `store`, `config`, `preview`, `console`: files, settings, presentation, operator input

pub mod bridge;
pub mod config;
pub mod console;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod link;
pub mod pose;
pub mod preview;
pub mod registry;
pub mod session;
pub mod store;
pub mod vision;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use frame::{Frame, FrameConsumer};
pub use ingest::{open_source, CameraConfig, CaptureHandle, CaptureLoop, FrameSource};
pub use link::{LinkClient, LinkState, Packet};
pub use pose::{quat_to_rvec, remap_to_driver, rvec_from_euler, FpsEstimator, Pose, Vec3};
pub use registry::{Activation, Effect, TrackerDefinition, TrackerRegistry, TrackerRuntimeState};
pub use session::{FrameOutcome, TrackingMode, TrackingSession};
pub use store::Store;
pub use vision::{CameraIntrinsics, PoseSample, StubBackend, VisionBackend, VisionRegistry};
