//! V4L2 camera source.
//!
//! Opens a local device node (e.g. /dev/video0), memory-maps a small ring of capture
//! buffers and converts each dequeued buffer to RGB. Only the buffer being handed off
//! is copied; the driver ring is recycled immediately.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{health_grace, CameraConfig, FrameSource, SourceStats};
use crate::error::BridgeError;
use crate::frame::Frame;

/// Driver-side buffers. Kept small so a stalled consumer sees fresh frames.
const MMAP_BUFFERS: u32 = 2;

pub struct V4l2Source {
    config: CameraConfig,
    state: Option<DeviceState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    pixel_format: PixelFormat,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            pixel_format: PixelFormat::Rgb24,
        }
    }

    fn unavailable(&self, reason: impl ToString) -> BridgeError {
        BridgeError::DeviceUnavailable {
            device: self.config.device.clone(),
            reason: reason.to_string(),
        }
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device =
            v4l::Device::with_path(&self.config.device).map_err(|e| self.unavailable(e))?;
        let mut format = device.format().map_err(|e| self.unavailable(e))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            self.unavailable(format!("unsupported pixel format {}", format.fourcc))
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (width, height, format) = (self.active_width, self.active_height, self.pixel_format);
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))
                .and_then(|(buf, _meta)| normalize_to_rgb(buf, width, height, format))
        });
        let pixels = captured.map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Frame::new(pixels, width, height, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_unavailable() {
        let mut source = V4l2Source::new(CameraConfig {
            device: "/dev/does-not-exist-video".to_string(),
            ..CameraConfig::default()
        });
        let err = source.connect().unwrap_err();
        assert_eq!(
            err.downcast_ref::<BridgeError>().map(|e| e.code()),
            Some("DEVICE_UNAVAILABLE")
        );
        assert!(!source.is_healthy());
    }
}
