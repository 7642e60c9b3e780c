use std::collections::BTreeMap;
use std::sync::{Arc, Barrier, Mutex};

use marker_bridge::{
    Bridge, BridgeError, StubBackend, TrackerDefinition, TrackerRegistry, TrackingMode,
};

fn tracker(id: &str, markers: &[i32]) -> TrackerDefinition {
    let square = [
        [-0.02, 0.02, 0.0],
        [0.02, 0.02, 0.0],
        [0.02, -0.02, 0.0],
        [-0.02, -0.02, 0.0],
    ];
    let markers: BTreeMap<i32, _> = markers.iter().map(|&m| (m, square)).collect();
    TrackerDefinition::new(id, markers).expect("valid tracker")
}

fn bridge() -> Bridge {
    Bridge::new(
        Arc::new(Mutex::new(StubBackend::new())),
        None,
        TrackingMode::Trackers,
        10,
    )
}

#[test]
fn shared_marker_blocks_second_activation_then_swaps() {
    let bridge = bridge();
    bridge.register_tracker(tracker("T1", &[1, 2])).unwrap();
    bridge.register_tracker(tracker("T2", &[2, 3])).unwrap();

    bridge.set_tracker_active("T1", true).unwrap();
    let err = bridge.set_tracker_active("T2", true).unwrap_err();
    assert_eq!(
        err,
        BridgeError::MarkerConflict {
            id: "T2".to_string(),
            with: "T1".to_string(),
            markers: vec![2],
        }
    );

    bridge.set_tracker_active("T1", false).unwrap();
    bridge.set_tracker_active("T2", true).unwrap();

    let active: Vec<String> = bridge
        .registry()
        .active_trackers()
        .iter()
        .map(|def| def.id().to_string())
        .collect();
    assert_eq!(active, vec!["T2"]);
}

#[test]
fn conflict_is_symmetric() {
    let registry = TrackerRegistry::new();
    registry.register(tracker("T1", &[1, 2])).unwrap();
    registry.register(tracker("T2", &[2, 3])).unwrap();

    registry.set_active("T2", true).unwrap();
    match registry.set_active("T1", true) {
        Err(BridgeError::MarkerConflict { with, .. }) => assert_eq!(with, "T2"),
        other => panic!("expected conflict, got {:?}", other),
    }
    assert!(!registry.can_activate("T1"));
    assert!(registry.can_activate("T2"));
}

#[test]
fn unknown_and_duplicate_ids() {
    let bridge = bridge();
    bridge.register_tracker(tracker("hip", &[7])).unwrap();
    assert_eq!(
        bridge.register_tracker(tracker("hip", &[8])),
        Err(BridgeError::DuplicateId {
            id: "hip".to_string()
        })
    );
    assert!(matches!(
        bridge.set_tracker_active("chest", true),
        Err(BridgeError::UnknownTracker { .. })
    ));
    // Deactivating a known, inactive tracker is a no-op.
    let activation = bridge.set_tracker_active("hip", false).unwrap();
    assert!(!activation.requires_advertise());
}

#[test]
fn racing_activations_never_both_win() {
    for _ in 0..20 {
        let registry = Arc::new(TrackerRegistry::new());
        registry.register(tracker("A", &[1, 2])).unwrap();
        registry.register(tracker("B", &[2, 3])).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["A", "B"]
            .into_iter()
            .map(|id| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.set_active(id, true).is_ok()
                })
            })
            .collect();
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
        assert_eq!(registry.active_trackers().len(), 1);
    }
}
