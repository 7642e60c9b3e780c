//! Preview presentation.
//!
//! The processing thread offers every preview image to a presenter thread through a
//! one-slot channel. A presenter that is still busy with the previous image causes the
//! new one to be dropped; presentation never delays frame processing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};

use crate::vision::PreviewImage;

/// Something that can show a preview image.
pub trait PreviewSink: Send {
    fn present(&mut self, image: &PreviewImage) -> Result<()>;
}

/// Logs the preview dimensions at debug level.
#[derive(Debug, Default)]
pub struct LogPreviewSink {
    presented: u64,
}

impl PreviewSink for LogPreviewSink {
    fn present(&mut self, image: &PreviewImage) -> Result<()> {
        self.presented += 1;
        log::debug!(
            "preview #{}: {}x{} ({} bytes)",
            self.presented,
            image.width,
            image.height,
            image.pixels().len()
        );
        Ok(())
    }
}

/// Overwrites a single JPEG file with the latest preview.
#[cfg(feature = "preview-jpeg")]
pub struct JpegPreviewSink {
    path: std::path::PathBuf,
}

#[cfg(feature = "preview-jpeg")]
impl JpegPreviewSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(feature = "preview-jpeg")]
impl PreviewSink for JpegPreviewSink {
    fn present(&mut self, preview: &PreviewImage) -> Result<()> {
        let (width, height) = (preview.width, preview.height);
        let buffer = image::RgbImage::from_raw(width, height, preview.pixels().to_vec())
            .ok_or_else(|| anyhow!("preview buffer does not match {}x{}", width, height))?;
        buffer
            .save_with_format(&self.path, image::ImageFormat::Jpeg)
            .with_context(|| format!("write preview {}", self.path.display()))
    }
}

/// Sending half, held by the tracking session.
#[derive(Clone)]
pub struct PreviewPublisher {
    tx: mpsc::SyncSender<PreviewImage>,
    dropped: Arc<AtomicU64>,
}

impl PreviewPublisher {
    /// Offer an image; returns false if it was dropped.
    pub fn publish(&self, image: PreviewImage) -> bool {
        match self.tx.try_send(image) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Running presenter thread. It exits once every publisher has been dropped.
pub struct PreviewHandle {
    thread: Option<JoinHandle<u64>>,
}

impl PreviewHandle {
    /// Wait for the presenter to finish; returns how many images it presented.
    pub fn join(mut self) -> Result<u64> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| anyhow!("preview thread panicked")),
            None => Ok(0),
        }
    }
}

/// Start a presenter thread draining into `sink`.
pub fn spawn_presenter(
    mut sink: Box<dyn PreviewSink>,
) -> Result<(PreviewPublisher, PreviewHandle)> {
    let (tx, rx) = mpsc::sync_channel::<PreviewImage>(1);
    let thread = std::thread::Builder::new()
        .name("preview".to_string())
        .spawn(move || {
            let mut presented = 0u64;
            while let Ok(image) = rx.recv() {
                match sink.present(&image) {
                    Ok(()) => presented += 1,
                    Err(err) => log::warn!("preview: {:#}", err),
                }
            }
            presented
        })
        .context("spawn preview thread")?;
    Ok((
        PreviewPublisher {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        PreviewHandle {
            thread: Some(thread),
        },
    ))
}
