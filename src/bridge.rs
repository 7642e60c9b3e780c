//! Top-level owner of the tracker registry, tracking session and driver link.
//!
//! `Bridge` applies the effects that registry changes ask for: whenever the active
//! set changes while the link is up, the new set is advertised.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail, Result};

use crate::error::BridgeError;
use crate::ingest::{CaptureHandle, CaptureLoop, CaptureSnapshot, FrameSource};
use crate::link::{LinkClient, SharedLink};
use crate::pose::Pose;
use crate::preview::PreviewPublisher;
use crate::registry::{Activation, TrackerDefinition, TrackerRegistry, TrackerRuntimeState};
use crate::session::{TrackingMode, TrackingSession};
use crate::store::Store;
use crate::vision::{CameraIntrinsics, PoseSample, SharedVision};

pub struct Bridge {
    registry: Arc<TrackerRegistry>,
    link: SharedLink,
    vision: SharedVision,
    session: TrackingSession,
    capture: Mutex<Option<CaptureHandle>>,
}

impl Bridge {
    pub fn new(
        vision: SharedVision,
        device_name: Option<String>,
        initial_mode: TrackingMode,
        min_board_samples: usize,
    ) -> Self {
        let registry = Arc::new(TrackerRegistry::new());
        let link: SharedLink = Arc::new(Mutex::new(LinkClient::new(device_name)));
        let session = TrackingSession::new(
            registry.clone(),
            vision.clone(),
            link.clone(),
            initial_mode,
            min_board_samples,
        );
        Self {
            registry,
            link,
            vision,
            session,
            capture: Mutex::new(None),
        }
    }

    /// Route previews from the session to a presenter. Call before `start_capture`.
    pub fn with_preview(mut self, publisher: PreviewPublisher) -> Self {
        self.session = self.session.with_preview(publisher);
        self
    }

    pub fn registry(&self) -> &Arc<TrackerRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn link(&self) -> &SharedLink {
        &self.link
    }

    fn link_guard(&self) -> MutexGuard<'_, LinkClient> {
        // Link state stays consistent across a panic in another holder: every field
        // update is a single assignment.
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_tracker(&self, definition: TrackerDefinition) -> Result<(), BridgeError> {
        self.registry.register(definition)
    }

    /// Register every loaded definition, logging the ones that are refused.
    pub fn register_all(&self, definitions: Vec<TrackerDefinition>) -> usize {
        let mut registered = 0;
        for definition in definitions {
            match self.register_tracker(definition) {
                Ok(()) => registered += 1,
                Err(err) => log::warn!("bridge: {}", err),
            }
        }
        registered
    }

    /// Activate or deactivate a tracker and re-advertise if the link is up.
    ///
    /// Registry errors are returned. A failed advertise is logged by the link and does
    /// not undo the activation.
    pub fn set_tracker_active(&self, id: &str, active: bool) -> Result<Activation, BridgeError> {
        let activation = self.registry.set_active(id, active)?;
        if activation.requires_advertise() && self.link_guard().is_connected() {
            if let Err(err) = self.advertise() {
                log::debug!("bridge: advertise after activation failed: {}", err);
            }
        }
        Ok(activation)
    }

    /// Send the current active set to the driver.
    pub fn advertise(&self) -> Result<(), BridgeError> {
        let active = self.registry.active_trackers();
        self.link_guard().advertise(&active)
    }

    /// Open a new link session and advertise the active set.
    pub fn connect_link(&self, host: &str, port: u16) -> Result<()> {
        self.link_guard().connect(host, port)?;
        match self.advertise() {
            Ok(()) => {}
            Err(err @ BridgeError::LinkSendFailure { .. }) => {
                log::warn!("bridge: initial advertise failed: {}", err)
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    pub fn disconnect_link(&self) {
        self.link_guard().disconnect();
    }

    /// Registry state joined with the link's network ids.
    pub fn tracker_states(&self) -> Vec<TrackerRuntimeState> {
        let link = self.link_guard();
        self.registry
            .states()
            .into_iter()
            .map(|mut state| {
                state.network_id = link.network_id(state.definition.id());
                state
            })
            .collect()
    }

    /// Ask the driver to move tracker `id` from its last seen pose to `target`.
    ///
    /// A tracker that has not been seen in this link session is treated as not visible,
    /// so nothing is sent.
    pub fn calibrate_pose(&self, id: &str, target: &Pose) -> Result<(), BridgeError> {
        if self.registry.get(id).is_none() {
            return Err(BridgeError::UnknownTracker { id: id.to_string() });
        }
        let mut link = self.link_guard();
        let location = link
            .last_sample(id)
            .cloned()
            .unwrap_or_else(|| PoseSample::hidden(id));
        link.calibrate(&location, target)
    }

    /// Push intrinsics into the vision collaborator.
    pub fn apply_intrinsics(&self, intrinsics: &CameraIntrinsics) -> Result<()> {
        self.vision
            .lock()
            .map_err(|_| anyhow!("vision backend lock poisoned"))?
            .set_intrinsics(intrinsics)
    }

    /// Run a calibration pass and persist the result.
    pub fn calibrate_camera(&self, store: &Store) -> Result<CameraIntrinsics> {
        let intrinsics = self.session.calibrate()?;
        let path = store.save_calibration(&intrinsics)?;
        log::info!("bridge: calibration saved to {}", path.display());
        Ok(intrinsics)
    }

    /// Start feeding frames from `source` into the tracking session.
    pub fn start_capture(&self, source: Box<dyn FrameSource>) -> Result<()> {
        let mut capture = self
            .capture
            .lock()
            .map_err(|_| anyhow!("capture lock poisoned"))?;
        if capture.as_ref().is_some_and(CaptureHandle::is_running) {
            bail!("capture already running");
        }
        let handle = CaptureLoop::spawn(source, Box::new(self.session.clone()))?;
        *capture = Some(handle);
        Ok(())
    }

    pub fn capture_running(&self) -> bool {
        self.capture
            .lock()
            .map(|capture| capture.as_ref().is_some_and(CaptureHandle::is_running))
            .unwrap_or(false)
    }

    pub fn capture_stats(&self) -> Option<CaptureSnapshot> {
        self.capture
            .lock()
            .ok()
            .and_then(|capture| capture.as_ref().map(CaptureHandle::snapshot))
    }

    /// Stop the capture loop if one is running and return its final counters.
    pub fn stop_capture(&self) -> Result<Option<CaptureSnapshot>> {
        let handle = self
            .capture
            .lock()
            .map_err(|_| anyhow!("capture lock poisoned"))?
            .take();
        handle.map(CaptureHandle::stop).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::definition;
    use crate::vision::StubBackend;

    fn bridge() -> Bridge {
        Bridge::new(
            Arc::new(Mutex::new(StubBackend::new())),
            None,
            TrackingMode::Trackers,
            10,
        )
    }

    #[test]
    fn activation_without_link_still_applies() {
        let bridge = bridge();
        bridge.register_tracker(definition("a", &[1])).unwrap();
        let activation = bridge.set_tracker_active("a", true).unwrap();
        assert!(activation.requires_advertise());
        let states = bridge.tracker_states();
        assert!(states[0].active);
        assert_eq!(states[0].network_id, None);
        assert_eq!(bridge.advertise(), Err(BridgeError::NotConnected));
    }

    #[test]
    fn calibrate_pose_checks_the_registry() {
        let bridge = bridge();
        assert_eq!(
            bridge.calibrate_pose("ghost", &Pose::default()),
            Err(BridgeError::UnknownTracker {
                id: "ghost".to_string()
            })
        );
    }

    #[test]
    fn register_all_skips_duplicates() {
        let bridge = bridge();
        let count = bridge.register_all(vec![
            definition("a", &[1]),
            definition("a", &[2]),
            definition("b", &[3]),
        ]);
        assert_eq!(count, 2);
        assert_eq!(bridge.registry().len(), 2);
    }

    #[test]
    fn stop_without_capture_is_none() {
        let bridge = bridge();
        assert!(!bridge.capture_running());
        assert_eq!(bridge.stop_capture().unwrap(), None);
    }
}
