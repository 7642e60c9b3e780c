//! Camera frames and the consumer seam.
//!
//! - `Frame`: one captured RGB image buffer with its capture metadata.
//! - `FrameConsumer`: the processing side of the capture loop. It receives exactly one
//!   frame at a time and runs it to completion before the next one is accepted.

use std::time::Instant;

/// One captured image, RGB24, row-major.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic per-source counter, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Create a frame. Called by ingestion sources and tests.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Time since capture, in seconds.
    pub fn age_secs(&self) -> f64 {
        self.captured_at.elapsed().as_secs_f64()
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Receives frames from the capture loop.
///
/// `on_frame` is called on the processing thread, one frame at a time. Frames that
/// arrive while it is running are dropped at the source, never queued.
pub trait FrameConsumer: Send {
    fn on_frame(&mut self, frame: &Frame);
}

impl<F> FrameConsumer for F
where
    F: FnMut(&Frame) + Send,
{
    fn on_frame(&mut self, frame: &Frame) {
        self(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_reports_metadata() {
        let frame = Frame::new(vec![0u8; 12], 2, 2, 7);
        assert_eq!(frame.width, 2);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.byte_len(), 12);
        assert!(frame.age_secs() >= 0.0);
        assert!(format!("{:?}", frame).contains("sequence: 7"));
    }

    #[test]
    fn closures_are_consumers() {
        let mut seen = Vec::new();
        {
            let mut consumer = |frame: &Frame| seen.push(frame.sequence);
            consumer.on_frame(&Frame::new(Vec::new(), 0, 0, 1));
            consumer.on_frame(&Frame::new(Vec::new(), 0, 0, 2));
        }
        assert_eq!(seen, vec![1, 2]);
    }
}
