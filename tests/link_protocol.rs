//! Driver link over a real loopback socket.

use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use marker_bridge::link::UpdateEntry;
use marker_bridge::vision::PoseSample;
use marker_bridge::{
    Bridge, LinkClient, LinkState, Packet, Pose, StubBackend, TrackerDefinition, TrackingMode,
    Vec3,
};

fn driver() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind driver socket");
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("read timeout");
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

fn recv(socket: &UdpSocket) -> (Vec<u8>, Packet) {
    let mut buf = [0u8; 4096];
    let n = socket.recv(&mut buf).expect("datagram");
    let bytes = buf[..n].to_vec();
    let packet = Packet::decode(&bytes).expect("decodable packet");
    (bytes, packet)
}

fn tracker(id: &str, marker: i32) -> TrackerDefinition {
    let corners = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]];
    TrackerDefinition::new(id, BTreeMap::from([(marker, corners)])).unwrap()
}

#[test]
fn connect_handshakes_then_advertises_active_set() {
    let (driver, port) = driver();
    let bridge = Bridge::new(
        Arc::new(Mutex::new(StubBackend::new())),
        Some("phone".to_string()),
        TrackingMode::Trackers,
        10,
    );
    bridge.register_tracker(tracker("left_foot", 1)).unwrap();
    bridge.register_tracker(tracker("right_foot", 2)).unwrap();
    bridge.register_tracker(tracker("hip", 3)).unwrap();
    bridge.set_tracker_active("left_foot", true).unwrap();
    bridge.set_tracker_active("hip", true).unwrap();

    bridge.connect_link("127.0.0.1", port).unwrap();

    let (bytes, handshake) = recv(&driver);
    assert_eq!(bytes, b"\x00phone\x00");
    assert_eq!(
        handshake,
        Packet::Handshake {
            device_name: Some("phone".to_string())
        }
    );

    let (_, advertise) = recv(&driver);
    assert_eq!(
        advertise,
        Packet::Advertise {
            trackers: vec![(1, "left_foot".to_string()), (2, "hip".to_string())]
        }
    );

    // Activation while connected re-advertises with a fresh id.
    bridge.set_tracker_active("right_foot", true).unwrap();
    let (_, advertise) = recv(&driver);
    assert_eq!(
        advertise,
        Packet::Advertise {
            trackers: vec![
                (1, "left_foot".to_string()),
                (2, "hip".to_string()),
                (3, "right_foot".to_string())
            ]
        }
    );

    let states = bridge.tracker_states();
    let right = states
        .iter()
        .find(|s| s.definition.id() == "right_foot")
        .unwrap();
    assert_eq!(right.network_id, Some(3));

    bridge.disconnect_link();
    assert!(bridge.tracker_states().iter().all(|s| s.network_id.is_none()));
}

#[test]
fn update_carries_visible_and_hidden_entries() {
    let (driver, port) = driver();
    let mut client = LinkClient::new(None);
    client.connect("127.0.0.1", port).unwrap();
    assert_eq!(client.state(), LinkState::Handshaken);
    let (bytes, _) = recv(&driver);
    assert_eq!(bytes, vec![0x00]);

    let trackers = vec![Arc::new(tracker("a", 1)), Arc::new(tracker("b", 2))];
    client.advertise(&trackers).unwrap();
    recv(&driver);

    let visible = PoseSample::visible("a", Vec3::new(0.1, 0.2, 0.3), Vec3::new(1.0, 2.0, 3.0));
    client
        .update(&[visible, PoseSample::hidden("b")])
        .unwrap();

    let (bytes, update) = recv(&driver);
    // tag + (id + 48 bytes) + negative id
    assert_eq!(bytes.len(), 1 + 49 + 1);
    assert_eq!(bytes[50] as i8, -2);
    assert_eq!(
        update,
        Packet::Update {
            entries: vec![
                UpdateEntry {
                    network_id: 1,
                    // y and z are swapped on the wire.
                    pose: Some(Pose::new(
                        Vec3::new(0.1, 0.3, 0.2),
                        Vec3::new(1.0, 3.0, 2.0)
                    )),
                },
                UpdateEntry {
                    network_id: 2,
                    pose: None
                },
            ]
        }
    );
    assert_eq!(client.stats().updates, 1);
}

#[test]
fn calibrate_uses_last_seen_pose() {
    let (driver, port) = driver();
    let bridge = Bridge::new(
        Arc::new(Mutex::new(StubBackend::new())),
        None,
        TrackingMode::Trackers,
        10,
    );
    bridge.register_tracker(tracker("hip", 3)).unwrap();
    bridge.set_tracker_active("hip", true).unwrap();
    bridge.connect_link("127.0.0.1", port).unwrap();
    recv(&driver);
    recv(&driver);

    let target = Pose::new(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0));

    // Never seen yet: nothing is sent.
    bridge.calibrate_pose("hip", &target).unwrap();
    assert_eq!(bridge.link().lock().unwrap().stats().calibrates, 0);

    {
        let mut link = bridge.link().lock().unwrap();
        link.update(&[PoseSample::visible(
            "hip",
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::new(0.2, 0.3, 1.4),
        )])
        .unwrap();
    }
    recv(&driver);

    bridge.calibrate_pose("hip", &target).unwrap();
    let (bytes, packet) = recv(&driver);
    assert_eq!(bytes.len(), 1 + 96);
    assert_eq!(
        packet,
        Packet::Calibrate {
            source: Pose::new(Vec3::new(0.0, 0.0, 0.5), Vec3::new(0.2, 1.4, 0.3)),
            target: Pose::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0)),
        }
    );
}

#[test]
fn unresolvable_peer_leaves_client_disconnected() {
    let mut client = LinkClient::new(None);
    assert!(client.connect("no-such-host.invalid", 8082).is_err());
    assert_eq!(client.state(), LinkState::Disconnected);
}
