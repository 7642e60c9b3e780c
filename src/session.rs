//! Tracking session: the mode state machine that decides what each frame is for.
//!
//! The session runs on the processing thread as the capture loop's `FrameConsumer`.
//! Operator actions (`set_mode`, `capture_board`, `calibrate`) come from other threads
//! through clones of the same session; all shared state sits behind one `Arc`.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{anyhow, Result};

use crate::error::BridgeError;
use crate::frame::{Frame, FrameConsumer};
use crate::link::SharedLink;
use crate::pose::FpsEstimator;
use crate::preview::PreviewPublisher;
use crate::registry::TrackerRegistry;
use crate::vision::{CameraIntrinsics, PreviewImage, SharedVision};

/// Board views needed before intrinsics can be computed, unless configured otherwise.
pub const DEFAULT_MIN_BOARD_SAMPLES: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TrackingMode {
    Disabled,
    Calibrate,
    Markers,
    #[default]
    Trackers,
}

impl TrackingMode {
    pub const ALL: [TrackingMode; 4] = [
        TrackingMode::Disabled,
        TrackingMode::Calibrate,
        TrackingMode::Markers,
        TrackingMode::Trackers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrackingMode::Disabled => "disabled",
            TrackingMode::Calibrate => "calibrate",
            TrackingMode::Markers => "markers",
            TrackingMode::Trackers => "trackers",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        TrackingMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("unknown tracking mode '{}'", s))
    }
}

/// What happened to one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Mode is `Disabled`; the collaborator was not called.
    Skipped,
    Board { found: bool, saved: bool },
    Markers { detections: usize },
    Poses { visible: usize, total: usize },
    /// The collaborator failed on this frame; it was logged and skipped.
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionStats {
    pub mode: TrackingMode,
    /// Frames seen per mode, indexed like `TrackingMode::ALL`.
    pub frames_by_mode: [u64; 4],
    pub frames_failed: u64,
    pub board_samples: usize,
    pub previews_dropped: u64,
    pub fps: f64,
}

impl SessionStats {
    pub fn frames_in(&self, mode: TrackingMode) -> u64 {
        self.frames_by_mode[mode.index()]
    }
}

struct SessionState {
    mode: Mutex<TrackingMode>,
    armed: AtomicBool,
    board_samples: AtomicUsize,
    min_board_samples: usize,
    fps: Mutex<FpsEstimator>,
    epoch: Instant,
    frames_by_mode: [AtomicU64; 4],
    frames_failed: AtomicU64,
}

#[derive(Clone)]
pub struct TrackingSession {
    state: Arc<SessionState>,
    registry: Arc<TrackerRegistry>,
    vision: SharedVision,
    link: SharedLink,
    preview: Option<PreviewPublisher>,
}

impl TrackingSession {
    pub fn new(
        registry: Arc<TrackerRegistry>,
        vision: SharedVision,
        link: SharedLink,
        initial_mode: TrackingMode,
        min_board_samples: usize,
    ) -> Self {
        Self {
            state: Arc::new(SessionState {
                mode: Mutex::new(initial_mode),
                armed: AtomicBool::new(false),
                board_samples: AtomicUsize::new(0),
                min_board_samples: min_board_samples.max(1),
                fps: Mutex::new(FpsEstimator::new()),
                epoch: Instant::now(),
                frames_by_mode: Default::default(),
                frames_failed: AtomicU64::new(0),
            }),
            registry,
            vision,
            link,
            preview: None,
        }
    }

    /// Send previews to a presenter. Without one, previews are discarded.
    pub fn with_preview(mut self, publisher: PreviewPublisher) -> Self {
        self.preview = Some(publisher);
        self
    }

    pub fn mode(&self) -> TrackingMode {
        *self
            .state
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch modes. Changing mode disarms a pending board capture.
    pub fn set_mode(&self, mode: TrackingMode) {
        let mut current = self
            .state
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *current == mode {
            return;
        }
        log::info!("session: mode {} -> {}", *current, mode);
        *current = mode;
        self.state.armed.store(false, Ordering::SeqCst);
    }

    /// Save the next frame in which the board is found. Only valid in `Calibrate`.
    pub fn capture_board(&self) -> Result<(), BridgeError> {
        let mode = self.mode();
        if mode != TrackingMode::Calibrate {
            return Err(BridgeError::ModeMismatch {
                expected: TrackingMode::Calibrate.as_str(),
                actual: mode.as_str(),
            });
        }
        self.state.armed.store(true, Ordering::SeqCst);
        log::info!("session: armed for board capture");
        Ok(())
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed.load(Ordering::SeqCst)
    }

    pub fn board_samples(&self) -> usize {
        self.state.board_samples.load(Ordering::SeqCst)
    }

    pub fn can_calibrate(&self) -> bool {
        self.board_samples() >= self.state.min_board_samples
    }

    /// Compute intrinsics from the saved board views and install them in the
    /// collaborator. The caller persists the returned value.
    pub fn calibrate(&self) -> Result<CameraIntrinsics> {
        let have = self.board_samples();
        let need = self.state.min_board_samples;
        if have < need {
            return Err(BridgeError::NotEnoughSamples { have, need }.into());
        }
        let mut vision = self
            .vision
            .lock()
            .map_err(|_| anyhow!("vision backend lock poisoned"))?;
        let intrinsics = vision.calibrate_from_saved_boards()?;
        vision.set_intrinsics(&intrinsics)?;
        log::info!(
            "session: calibrated from {} boards (fx={:.1} fy={:.1} cx={:.1} cy={:.1})",
            have,
            intrinsics.fx,
            intrinsics.fy,
            intrinsics.cx,
            intrinsics.cy
        );
        Ok(intrinsics)
    }

    /// Tracking rate over the last second, from recorded tracker frames.
    pub fn fps(&self) -> f64 {
        let now = self.state.epoch.elapsed().as_secs_f64();
        self.state
            .fps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fps(now)
    }

    pub fn stats(&self) -> SessionStats {
        let mut frames_by_mode = [0u64; 4];
        for (slot, counter) in frames_by_mode.iter_mut().zip(&self.state.frames_by_mode) {
            *slot = counter.load(Ordering::Relaxed);
        }
        SessionStats {
            mode: self.mode(),
            frames_by_mode,
            frames_failed: self.state.frames_failed.load(Ordering::Relaxed),
            board_samples: self.board_samples(),
            previews_dropped: self.preview.as_ref().map_or(0, |p| p.dropped()),
            fps: self.fps(),
        }
    }

    /// Run one frame to completion under the mode current at its start.
    pub fn process_frame(&self, frame: &Frame) -> FrameOutcome {
        let mode = self.mode();
        self.state.frames_by_mode[mode.index()].fetch_add(1, Ordering::Relaxed);

        let result = match mode {
            TrackingMode::Disabled => return FrameOutcome::Skipped,
            TrackingMode::Calibrate => self.board_frame(frame),
            TrackingMode::Markers => self.marker_frame(frame),
            TrackingMode::Trackers => self.tracker_frame(frame),
        };
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.state.frames_failed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "session: {} frame {} skipped: {:#}",
                    mode,
                    frame.sequence,
                    err
                );
                FrameOutcome::Failed
            }
        }
    }

    fn board_frame(&self, frame: &Frame) -> Result<FrameOutcome> {
        let save = self.is_armed();
        let output = self
            .vision
            .lock()
            .map_err(|_| anyhow!("vision backend lock poisoned"))?
            .detect_board(frame, save)?;
        let saved = save && output.board_found;
        if saved {
            self.state.armed.store(false, Ordering::SeqCst);
            let samples = self.state.board_samples.fetch_add(1, Ordering::SeqCst) + 1;
            log::info!(
                "session: board captured ({}/{})",
                samples,
                self.state.min_board_samples
            );
        }
        self.present(output.preview);
        Ok(FrameOutcome::Board {
            found: output.board_found,
            saved,
        })
    }

    fn marker_frame(&self, frame: &Frame) -> Result<FrameOutcome> {
        let output = self
            .vision
            .lock()
            .map_err(|_| anyhow!("vision backend lock poisoned"))?
            .detect_markers(frame)?;
        let detections = output.detections.len();
        log::trace!("session: frame {} has {} markers", frame.sequence, detections);
        self.present(output.preview);
        Ok(FrameOutcome::Markers { detections })
    }

    fn tracker_frame(&self, frame: &Frame) -> Result<FrameOutcome> {
        let started = Instant::now();
        let start = started.duration_since(self.state.epoch).as_secs_f64();

        let active = self.registry.active_trackers();
        let output = self
            .vision
            .lock()
            .map_err(|_| anyhow!("vision backend lock poisoned"))?
            .estimate_tracker_poses(frame, &active)?;

        let total = output.poses.len();
        let visible = output.poses.iter().filter(|p| p.visible).count();
        {
            let mut link = self
                .link
                .lock()
                .map_err(|_| anyhow!("link client lock poisoned"))?;
            // Send failures are logged and counted by the link itself.
            if let Err(BridgeError::NotConnected) = link.update(&output.poses) {
                log::trace!("session: link down, {} poses not sent", total);
            }
        }
        self.present(output.preview);

        self.state
            .fps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(start, started.elapsed().as_secs_f64());
        Ok(FrameOutcome::Poses { visible, total })
    }

    fn present(&self, image: PreviewImage) {
        if let Some(preview) = &self.preview {
            preview.publish(image);
        }
    }
}

impl FrameConsumer for TrackingSession {
    fn on_frame(&mut self, frame: &Frame) {
        self.process_frame(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkClient;
    use crate::registry::tests::definition;
    use crate::vision::StubBackend;

    fn session(mode: TrackingMode, min: usize) -> (TrackingSession, Arc<TrackerRegistry>) {
        let registry = Arc::new(TrackerRegistry::new());
        let session = TrackingSession::new(
            registry.clone(),
            Arc::new(Mutex::new(StubBackend::new())),
            Arc::new(Mutex::new(LinkClient::new(None))),
            mode,
            min,
        );
        (session, registry)
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(vec![0u8; 8 * 8 * 3], 8, 8, sequence)
    }

    #[test]
    fn modes_parse_case_insensitively() {
        let parse = |s: &str| s.parse::<TrackingMode>().ok();
        assert_eq!(parse("Calibrate"), Some(TrackingMode::Calibrate));
        assert_eq!(parse(" trackers "), Some(TrackingMode::Trackers));
        assert_eq!(parse("off"), None);
        assert_eq!(TrackingMode::default(), TrackingMode::Trackers);
    }

    #[test]
    fn disabled_frames_are_skipped() {
        let (session, _) = session(TrackingMode::Disabled, 10);
        assert_eq!(session.process_frame(&frame(1)), FrameOutcome::Skipped);
        assert_eq!(session.stats().frames_in(TrackingMode::Disabled), 1);
    }

    #[test]
    fn capture_board_needs_calibrate_mode() {
        let (session, _) = session(TrackingMode::Markers, 10);
        assert_eq!(
            session.capture_board(),
            Err(BridgeError::ModeMismatch {
                expected: "calibrate",
                actual: "markers"
            })
        );
        session.set_mode(TrackingMode::Calibrate);
        session.capture_board().unwrap();
        assert!(session.is_armed());
        session.set_mode(TrackingMode::Markers);
        assert!(!session.is_armed());
    }

    #[test]
    fn armed_capture_saves_one_board() {
        let (session, _) = session(TrackingMode::Calibrate, 1);
        session.capture_board().unwrap();
        // The stub finds the board on its fifth board frame.
        let outcomes: Vec<FrameOutcome> =
            (1..=10).map(|s| session.process_frame(&frame(s))).collect();
        assert_eq!(
            outcomes[4],
            FrameOutcome::Board {
                found: true,
                saved: true
            }
        );
        assert_eq!(
            outcomes[9],
            FrameOutcome::Board {
                found: true,
                saved: false
            }
        );
        assert_eq!(session.board_samples(), 1);
        assert!(!session.is_armed());
        assert!(session.can_calibrate());
        let intrinsics = session.calibrate().unwrap();
        assert_eq!(intrinsics.fx, 8.0);
    }

    #[test]
    fn calibrate_refuses_too_few_samples() {
        let (session, _) = session(TrackingMode::Calibrate, 10);
        let err = session.calibrate().unwrap_err();
        assert_eq!(
            err.downcast_ref::<BridgeError>(),
            Some(&BridgeError::NotEnoughSamples { have: 0, need: 10 })
        );
    }

    #[test]
    fn tracker_frames_use_the_active_set_and_record_fps() {
        let (session, registry) = session(TrackingMode::Trackers, 10);
        registry.register(definition("a", &[1])).unwrap();
        registry.register(definition("b", &[2])).unwrap();
        registry.set_active("a", true).unwrap();

        assert_eq!(
            session.process_frame(&frame(1)),
            FrameOutcome::Poses {
                visible: 1,
                total: 1
            }
        );
        assert!(session.fps() > 0.0);
    }
}
