//! Tracker definitions and activation.
//!
//! The registry is the single owner of which trackers are active. A marker id may
//! belong to at most one active tracker at a time; the conflict check and the state
//! change happen under one lock so two concurrent activations cannot both pass.
//!
//! Activation does not talk to the network. It returns the effects the caller has to
//! apply (re-advertising the active set), which keeps the registry testable on its own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::BridgeError;

/// Four corners of one marker in the tracker's local frame.
pub type MarkerCorners = [[f64; 3]; 4];

/// A named rigid object and the markers attached to it.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerDefinition {
    id: String,
    markers: BTreeMap<i32, MarkerCorners>,
}

impl TrackerDefinition {
    pub fn new(
        id: impl Into<String>,
        markers: BTreeMap<i32, MarkerCorners>,
    ) -> Result<Self, BridgeError> {
        let id = id.into();
        let invalid = |reason: &str| BridgeError::InvalidDefinition {
            id: id.clone(),
            reason: reason.to_string(),
        };
        if id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if !id.is_ascii() || id.contains('\0') {
            return Err(invalid("id must be ASCII without NUL bytes"));
        }
        if markers.is_empty() {
            return Err(invalid("at least one marker is required"));
        }
        let non_finite = markers
            .values()
            .flat_map(|corners| corners.iter().flatten())
            .any(|c| !c.is_finite());
        if non_finite {
            return Err(invalid("marker corners must be finite"));
        }
        Ok(Self { id, markers })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn markers(&self) -> &BTreeMap<i32, MarkerCorners> {
        &self.markers
    }

    pub fn marker_ids(&self) -> BTreeSet<i32> {
        self.markers.keys().copied().collect()
    }

    /// Marker ids this definition shares with `other`, ascending.
    pub fn shared_markers(&self, other: &TrackerDefinition) -> Vec<i32> {
        self.markers
            .keys()
            .filter(|id| other.markers.contains_key(id))
            .copied()
            .collect()
    }

    pub fn conflicts_with(&self, other: &TrackerDefinition) -> bool {
        self.markers.keys().any(|id| other.markers.contains_key(id))
    }
}

/// Runtime view of one registered tracker.
///
/// `network_id` is owned by the link session; the registry always reports `None` and
/// `Bridge::tracker_states` fills it in.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerRuntimeState {
    pub definition: Arc<TrackerDefinition>,
    pub active: bool,
    pub network_id: Option<i8>,
}

/// Follow-up work produced by an activation change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Active set membership changed; the link must re-advertise.
    AdvertiseRequired,
}

/// Outcome of a successful `set_active` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Activation {
    pub id: String,
    pub active: bool,
    pub effects: Vec<Effect>,
}

impl Activation {
    pub fn requires_advertise(&self) -> bool {
        self.effects.contains(&Effect::AdvertiseRequired)
    }
}

struct Slot {
    definition: Arc<TrackerDefinition>,
    active: bool,
}

/// Thread-safe set of tracker definitions with their activation state.
pub struct TrackerRegistry {
    slots: Mutex<Vec<Slot>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    // Every mutation is a single field assignment, so a poisoned lock still holds
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a definition as inactive.
    pub fn register(&self, definition: TrackerDefinition) -> Result<(), BridgeError> {
        let mut slots = self.lock();
        if slots.iter().any(|s| s.definition.id() == definition.id()) {
            return Err(BridgeError::DuplicateId {
                id: definition.id().to_string(),
            });
        }
        log::debug!(
            "registry: registered tracker '{}' with markers {:?}",
            definition.id(),
            definition.marker_ids()
        );
        slots.push(Slot {
            definition: Arc::new(definition),
            active: false,
        });
        Ok(())
    }

    /// Activate or deactivate a tracker.
    ///
    /// Activation fails with `MarkerConflict` if another active tracker owns one of the
    /// same markers; state is left untouched in that case.
    pub fn set_active(&self, id: &str, want_active: bool) -> Result<Activation, BridgeError> {
        let mut slots = self.lock();
        let index = slots
            .iter()
            .position(|s| s.definition.id() == id)
            .ok_or_else(|| BridgeError::UnknownTracker { id: id.to_string() })?;

        if slots[index].active == want_active {
            return Ok(Activation {
                id: id.to_string(),
                active: want_active,
                effects: Vec::new(),
            });
        }

        if want_active {
            let candidate = &slots[index].definition;
            let conflict = slots
                .iter()
                .filter(|s| s.active && s.definition.id() != id)
                .find(|s| candidate.conflicts_with(&s.definition));
            if let Some(other) = conflict {
                return Err(BridgeError::MarkerConflict {
                    id: id.to_string(),
                    with: other.definition.id().to_string(),
                    markers: candidate.shared_markers(&other.definition),
                });
            }
        }

        slots[index].active = want_active;
        log::info!(
            "registry: tracker '{}' {}",
            id,
            if want_active { "activated" } else { "deactivated" }
        );
        Ok(Activation {
            id: id.to_string(),
            active: want_active,
            effects: vec![Effect::AdvertiseRequired],
        })
    }

    /// Whether `set_active(id, true)` would currently succeed.
    pub fn can_activate(&self, id: &str) -> bool {
        let slots = self.lock();
        let Some(candidate) = slots.iter().find(|s| s.definition.id() == id) else {
            return false;
        };
        candidate.active
            || !slots
                .iter()
                .filter(|s| s.active)
                .any(|s| candidate.definition.conflicts_with(&s.definition))
    }

    /// Snapshot of the active definitions in registration order.
    pub fn active_trackers(&self) -> Vec<Arc<TrackerDefinition>> {
        self.lock()
            .iter()
            .filter(|s| s.active)
            .map(|s| s.definition.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<TrackerDefinition>> {
        self.lock()
            .iter()
            .find(|s| s.definition.id() == id)
            .map(|s| s.definition.clone())
    }

    pub fn states(&self) -> Vec<TrackerRuntimeState> {
        self.lock()
            .iter()
            .map(|s| TrackerRuntimeState {
                definition: s.definition.clone(),
                active: s.active,
                network_id: None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn square(size: f64) -> MarkerCorners {
        let h = size / 2.0;
        [[-h, h, 0.0], [h, h, 0.0], [h, -h, 0.0], [-h, -h, 0.0]]
    }

    pub(crate) fn definition(id: &str, markers: &[i32]) -> TrackerDefinition {
        let markers = markers.iter().map(|&m| (m, square(0.04))).collect();
        TrackerDefinition::new(id, markers).expect("valid definition")
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = TrackerRegistry::new();
        registry.register(definition("hip", &[1])).unwrap();
        let err = registry.register(definition("hip", &[9])).unwrap_err();
        assert_eq!(
            err,
            BridgeError::DuplicateId {
                id: "hip".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflict_reports_other_tracker_and_shared_markers() {
        let registry = TrackerRegistry::new();
        registry.register(definition("a", &[1, 2, 3])).unwrap();
        registry.register(definition("b", &[3, 4, 2])).unwrap();
        registry.set_active("a", true).unwrap();

        let err = registry.set_active("b", true).unwrap_err();
        assert_eq!(
            err,
            BridgeError::MarkerConflict {
                id: "b".to_string(),
                with: "a".to_string(),
                markers: vec![2, 3],
            }
        );
        assert!(!registry.can_activate("b"));
        assert_eq!(registry.active_trackers().len(), 1);
    }

    #[test]
    fn repeated_toggle_has_no_effects() {
        let registry = TrackerRegistry::new();
        registry.register(definition("a", &[1])).unwrap();
        let first = registry.set_active("a", true).unwrap();
        assert!(first.requires_advertise());
        let again = registry.set_active("a", true).unwrap();
        assert!(again.effects.is_empty());
        let off = registry.set_active("a", false).unwrap();
        assert!(off.requires_advertise());
        assert!(registry.set_active("a", false).unwrap().effects.is_empty());
    }

    #[test]
    fn unknown_tracker_is_an_error() {
        let registry = TrackerRegistry::new();
        assert_eq!(
            registry.set_active("ghost", false).unwrap_err().code(),
            "UNKNOWN_TRACKER"
        );
        assert!(!registry.can_activate("ghost"));
    }

    #[test]
    fn definitions_are_validated() {
        assert!(TrackerDefinition::new("", BTreeMap::from([(1, square(1.0))])).is_err());
        assert!(TrackerDefinition::new("empty", BTreeMap::new()).is_err());
        let mut bad = square(1.0);
        bad[2][1] = f64::NAN;
        assert!(TrackerDefinition::new("nan", BTreeMap::from([(1, bad)])).is_err());
    }

    #[test]
    fn concurrent_activations_never_both_win() {
        for _ in 0..50 {
            let registry = Arc::new(TrackerRegistry::new());
            registry.register(definition("left", &[7, 8])).unwrap();
            registry.register(definition("right", &[8, 9])).unwrap();

            let handles: Vec<_> = ["left", "right"]
                .into_iter()
                .map(|id| {
                    let registry = registry.clone();
                    std::thread::spawn(move || registry.set_active(id, true).is_ok())
                })
                .collect();
            let wins = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(wins, 1);
            assert_eq!(registry.active_trackers().len(), 1);
        }
    }
}
