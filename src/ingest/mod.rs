//! Frame ingestion.
//!
//! This module provides the camera side of the pipeline:
//! - `FrameSource`: a connected camera that yields frames at device rate
//! - Synthetic source for `stub://` devices (tests and dry runs)
//! - V4L2 devices (feature: ingest-v4l2)
//! - `capture`: the capture/processing thread pair with drop-based backpressure
//!
//! Sources never buffer more than the frame they are handing off. Backpressure is
//! applied by the capture loop, which drops frames while the consumer is busy.

pub mod capture;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::time::Duration;

use anyhow::Result;

use crate::frame::Frame;

pub use capture::{CaptureHandle, CaptureLoop, CaptureSnapshot};
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Camera selection and requested format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    /// Device path (e.g. "/dev/video0") or `stub://<name>` for the synthetic source.
    pub device: String,
    /// Frames per second requested from the device.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            target_fps: 30,
            width: 1280,
            height: 720,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// A camera that produces frames.
pub trait FrameSource: Send {
    /// Open the device. Failing here must leave nothing running.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Build the source named by `config.device`.
///
/// The source is returned unconnected; `CaptureLoop::spawn` connects it.
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    if config.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(config.clone())))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(crate::error::BridgeError::DeviceUnavailable {
            device: config.device.clone(),
            reason: "camera devices require the ingest-v4l2 feature".to_string(),
        }
        .into())
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(1_000_000 / target_fps as u64)
}

pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(not(feature = "ingest-v4l2"))]
    use crate::error::BridgeError;

    #[test]
    fn stub_devices_open_synthetic_source() -> Result<()> {
        let config = CameraConfig {
            device: "stub://test".to_string(),
            target_fps: 0,
            width: 4,
            height: 2,
        };
        let mut source = open_source(&config)?;
        source.connect()?;
        let frame = source.next_frame()?;
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(source.stats().device, "stub://test");
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_paths_need_v4l2_feature() {
        let config = CameraConfig {
            device: "/dev/video0".to_string(),
            ..CameraConfig::default()
        };
        let err = open_source(&config).err().expect("device source must fail");
        assert_eq!(
            err.downcast_ref::<BridgeError>().map(|e| e.code()),
            Some("DEVICE_UNAVAILABLE")
        );
    }

    #[test]
    fn frame_interval_matches_rate() {
        assert_eq!(frame_interval(0), Duration::ZERO);
        assert_eq!(frame_interval(50), Duration::from_millis(20));
        assert_eq!(health_grace(30), Duration::from_millis(2_000));
        assert_eq!(health_grace(1), Duration::from_millis(6_000));
    }
}
