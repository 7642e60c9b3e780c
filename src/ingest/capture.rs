//! Capture loop: one capture thread, one processing thread.
//!
//! The capture thread owns the `FrameSource` and pulls frames at device rate. Each
//! frame is offered to the processing thread through a zero-capacity channel with
//! `try_send`, so a frame is only handed off when the consumer is idle and waiting.
//! Frames that arrive while the consumer is busy are dropped and counted. Latency is
//! bounded by one frame of processing; load shows up as skipped frames, not lag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::FrameSource;
use crate::frame::{Frame, FrameConsumer};

/// Consecutive source errors after which the capture thread gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct CaptureCounters {
    captured: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    source_errors: AtomicU64,
}

/// Point-in-time copy of the capture counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureSnapshot {
    pub frames_captured: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub source_errors: u64,
}

pub struct CaptureLoop;

impl CaptureLoop {
    /// Connect `source` and start the capture and processing threads.
    ///
    /// If the source fails to connect nothing is spawned and the error is returned.
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        consumer: Box<dyn FrameConsumer>,
    ) -> Result<CaptureHandle> {
        source.connect().context("connect frame source")?;

        let counters = Arc::new(CaptureCounters::default());
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::sync_channel::<Frame>(0);

        let processing = {
            let mut consumer = consumer;
            std::thread::Builder::new()
                .name("frame-processing".to_string())
                .spawn(move || {
                    while let Ok(frame) = rx.recv() {
                        consumer.on_frame(&frame);
                    }
                    log::debug!("processing thread stopped");
                })
                .context("spawn processing thread")?
        };

        let capture = {
            let counters = counters.clone();
            let running = running.clone();
            let spawned = std::thread::Builder::new()
                .name("frame-capture".to_string())
                .spawn(move || run_capture(source, tx, counters, running));
            match spawned {
                Ok(handle) => handle,
                Err(err) => {
                    // The sender moved into the failed closure and is gone, so the
                    // processing thread exits on its own.
                    let _ = processing.join();
                    return Err(anyhow::Error::new(err).context("spawn capture thread"));
                }
            }
        };

        Ok(CaptureHandle {
            counters,
            running,
            capture: Some(capture),
            processing: Some(processing),
        })
    }
}

fn run_capture(
    mut source: Box<dyn FrameSource>,
    tx: mpsc::SyncSender<Frame>,
    counters: Arc<CaptureCounters>,
    running: Arc<AtomicBool>,
) {
    let mut consecutive_errors = 0u32;
    while running.load(Ordering::SeqCst) {
        let frame = match source.next_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                frame
            }
            Err(err) => {
                counters.source_errors.fetch_add(1, Ordering::Relaxed);
                consecutive_errors += 1;
                log::warn!("capture: frame source error: {:#}", err);
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    log::error!(
                        "capture: giving up after {} consecutive source errors",
                        consecutive_errors
                    );
                    break;
                }
                std::thread::sleep(ERROR_BACKOFF);
                continue;
            }
        };
        counters.captured.fetch_add(1, Ordering::Relaxed);

        match tx.try_send(frame) {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(frame)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("capture: consumer busy, dropped frame {}", frame.sequence);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("capture: processing thread is gone, stopping");
                break;
            }
        }
    }
    running.store(false, Ordering::SeqCst);
    let stats = source.stats();
    log::info!(
        "capture: stopped {} after {} frames",
        stats.device,
        stats.frames_captured
    );
}

/// Running capture loop. Dropping the handle stops both threads.
pub struct CaptureHandle {
    counters: Arc<CaptureCounters>,
    running: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn snapshot(&self) -> CaptureSnapshot {
        CaptureSnapshot {
            frames_captured: self.counters.captured.load(Ordering::Relaxed),
            frames_delivered: self.counters.delivered.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            source_errors: self.counters.source_errors.load(Ordering::Relaxed),
        }
    }

    /// False once the capture thread has exited, on request or after source failure.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop capturing and wait for the in-flight frame to finish processing.
    pub fn stop(mut self) -> Result<CaptureSnapshot> {
        self.shutdown()?;
        Ok(self.snapshot())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(capture) = self.capture.take() {
            capture
                .join()
                .map_err(|_| anyhow!("capture thread panicked"))?;
        }
        if let Some(processing) = self.processing.take() {
            processing
                .join()
                .map_err(|_| anyhow!("processing thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("capture shutdown failed: {}", err);
        }
    }
}
