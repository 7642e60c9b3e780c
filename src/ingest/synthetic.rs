//! Synthetic frame source for `stub://` devices.
//!
//! Paces itself to the configured frame rate like a real camera and fills frames
//! with a drifting pattern plus a little sensor noise.

use std::time::Instant;

use anyhow::Result;
use rand::Rng;

use super::{frame_interval, health_grace, CameraConfig, FrameSource, SourceStats};
use crate::frame::Frame;

/// Noise bytes sprinkled into each frame.
const NOISE_SAMPLES: usize = 64;

pub struct SyntheticSource {
    config: CameraConfig,
    frame_count: u64,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    /// Simulated scene brightness, drifts every 50 frames.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            connected_at: None,
            last_frame_at: None,
            scene_state: 0,
        }
    }

    fn wait_for_next_slot(&self) {
        let Some(last) = self.last_frame_at else {
            return;
        };
        let interval = frame_interval(self.config.target_fps);
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width as usize) * (self.config.height as usize) * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(16);
        }
        let mut pixels = vec![self.scene_state; pixel_count];
        if pixel_count > 0 {
            let mut rng = rand::thread_rng();
            for _ in 0..NOISE_SAMPLES {
                let index = rng.gen_range(0..pixel_count);
                pixels[index] = rng.gen();
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{} @ {} fps)",
            self.config.device,
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        self.connected_at = Some(Instant::now());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.wait_for_next_slot();
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let pixels = self.generate_pixels();
        Ok(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        ))
    }

    fn is_healthy(&self) -> bool {
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        match self.last_frame_at {
            Some(last) => last.elapsed() <= health_grace(self.config.target_fps),
            None => connected_at.elapsed() <= health_grace(self.config.target_fps),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}
