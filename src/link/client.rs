use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use super::packet::{Packet, PacketType, UpdateEntry};
use crate::error::BridgeError;
use crate::pose::{remap_to_driver, Pose};
use crate::registry::TrackerDefinition;
use crate::vision::PoseSample;

/// Largest id that fits the positive half of an `i8`.
const MAX_NETWORK_ID: u8 = i8::MAX as u8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// Socket is up but the handshake could not be sent.
    Connected,
    Handshaken,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connected => "connected",
            LinkState::Handshaken => "handshaken",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub handshakes: u64,
    pub advertises: u64,
    pub calibrates: u64,
    pub updates: u64,
    pub send_failures: u64,
    pub bytes_sent: u64,
}

impl LinkStats {
    fn count(&mut self, kind: PacketType, bytes: usize) {
        match kind {
            PacketType::Handshake => self.handshakes += 1,
            PacketType::Advertise => self.advertises += 1,
            PacketType::Calibrate => self.calibrates += 1,
            PacketType::Update => self.updates += 1,
        }
        self.bytes_sent += bytes as u64;
    }
}

struct Session {
    socket: UdpSocket,
    peer: SocketAddr,
    state: LinkState,
    /// tracker id -> network id, for trackers currently advertised.
    ids: HashMap<String, i8>,
    next_id: u8,
    /// Last pose seen per tracker, kept for calibration requests.
    last_seen: HashMap<String, PoseSample>,
}

/// UDP session with the VR driver.
///
/// Network ids live for one session: `connect` and `disconnect` forget them and
/// restart numbering at 1. Within a session an id is never handed to a second tracker.
/// Every send is best-effort; failures are logged, counted and returned, never retried.
pub struct LinkClient {
    device_name: Option<String>,
    session: Option<Session>,
    stats: LinkStats,
}

impl LinkClient {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            session: None,
            stats: LinkStats::default(),
        }
    }

    /// Open a fresh session to `host:port` and send the handshake.
    ///
    /// A handshake send failure is logged and leaves the client `Connected`; resolution
    /// or socket errors leave it `Disconnected`.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect();

        let peer = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("resolve link peer {}:{}", host, port))?
            .next()
            .ok_or_else(|| anyhow!("link peer {}:{} resolved to no address", host, port))?;
        let bind_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).context("bind link socket")?;
        socket
            .connect(peer)
            .with_context(|| format!("connect link socket to {}", peer))?;

        self.session = Some(Session {
            socket,
            peer,
            state: LinkState::Connected,
            ids: HashMap::new(),
            next_id: 1,
            last_seen: HashMap::new(),
        });

        let handshake = Packet::Handshake {
            device_name: self.device_name.clone(),
        };
        match self.send(&handshake) {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.state = LinkState::Handshaken;
                }
                log::info!("link: handshake sent to {}", peer);
            }
            Err(err) => log::warn!("link: connected to {} without handshake: {}", peer, err),
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!(
                "link: closed session with {} ({} trackers advertised)",
                session.peer,
                session.ids.len()
            );
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn state(&self) -> LinkState {
        self.session
            .as_ref()
            .map_or(LinkState::Disconnected, |session| session.state)
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().map(|session| session.peer)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session
            .as_ref()
            .and_then(|session| session.socket.local_addr().ok())
    }

    pub fn network_id(&self, tracker_id: &str) -> Option<i8> {
        self.session
            .as_ref()
            .and_then(|session| session.ids.get(tracker_id).copied())
    }

    /// Currently advertised `(network_id, tracker_id)` pairs, by id.
    pub fn advertised(&self) -> Vec<(i8, String)> {
        let mut pairs: Vec<(i8, String)> = self
            .session
            .iter()
            .flat_map(|session| session.ids.iter().map(|(name, id)| (*id, name.clone())))
            .collect();
        pairs.sort();
        pairs
    }

    /// Most recent pose reported for `tracker_id` in this session.
    pub fn last_sample(&self, tracker_id: &str) -> Option<&PoseSample> {
        self.session
            .as_ref()
            .and_then(|session| session.last_seen.get(tracker_id))
    }

    /// Announce the active tracker set.
    ///
    /// Trackers without an id get the next one; trackers no longer active lose theirs.
    pub fn advertise(&mut self, active: &[Arc<TrackerDefinition>]) -> Result<(), BridgeError> {
        let session = self.session.as_mut().ok_or(BridgeError::NotConnected)?;

        session
            .ids
            .retain(|name, _| active.iter().any(|def| def.id() == name));
        session
            .last_seen
            .retain(|name, _| session.ids.contains_key(name));

        let mut exhausted = false;
        for definition in active {
            if session.ids.contains_key(definition.id()) {
                continue;
            }
            if session.next_id > MAX_NETWORK_ID {
                exhausted = true;
                continue;
            }
            let id = session.next_id as i8;
            session.next_id += 1;
            session.ids.insert(definition.id().to_string(), id);
            log::debug!("link: tracker '{}' is network id {}", definition.id(), id);
        }
        if exhausted {
            log::warn!(
                "link: {}; some active trackers were not advertised",
                BridgeError::NetworkIdsExhausted
            );
        }

        let mut trackers: Vec<(i8, String)> = session
            .ids
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        trackers.sort();
        self.send(&Packet::Advertise { trackers })
    }

    /// Send one update with every sample whose tracker has a network id.
    ///
    /// Samples for unknown trackers are skipped. Nothing is sent when no sample maps.
    pub fn update(&mut self, samples: &[PoseSample]) -> Result<(), BridgeError> {
        let session = self.session.as_mut().ok_or(BridgeError::NotConnected)?;

        let mut entries = Vec::with_capacity(samples.len());
        for sample in samples {
            let Some(&network_id) = session.ids.get(&sample.tracker_ref) else {
                continue;
            };
            let visible = sample.visible
                && sample.rotation_vector.is_finite()
                && sample.translation_vector.is_finite();
            if sample.visible && !visible {
                log::debug!(
                    "link: non-finite pose for '{}' sent as not visible",
                    sample.tracker_ref
                );
            }
            let pose = visible.then(|| to_driver(sample));
            session
                .last_seen
                .insert(sample.tracker_ref.clone(), sample.clone());
            entries.push(UpdateEntry { network_id, pose });
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.send(&Packet::Update { entries })
    }

    /// Tell the driver that `location` should be at `target`.
    ///
    /// Does nothing when `location` was not visible.
    pub fn calibrate(&mut self, location: &PoseSample, target: &Pose) -> Result<(), BridgeError> {
        if self.session.is_none() {
            return Err(BridgeError::NotConnected);
        }
        if !location.visible {
            log::debug!(
                "link: skipping calibration, '{}' is not visible",
                location.tracker_ref
            );
            return Ok(());
        }
        let packet = Packet::Calibrate {
            source: to_driver(location),
            target: Pose::new(
                remap_to_driver(target.rotation),
                remap_to_driver(target.translation),
            ),
        };
        self.send(&packet)
    }

    fn send(&mut self, packet: &Packet) -> Result<(), BridgeError> {
        let kind = packet.kind();
        let session = self.session.as_ref().ok_or(BridgeError::NotConnected)?;
        let result = packet
            .encode()
            .and_then(|bytes| session.socket.send(&bytes).map_err(anyhow::Error::new));
        match result {
            Ok(sent) => {
                self.stats.count(kind, sent);
                Ok(())
            }
            Err(err) => {
                self.stats.send_failures += 1;
                log::warn!("link: {} send to {} failed: {:#}", kind.name(), session.peer, err);
                Err(BridgeError::LinkSendFailure {
                    packet: kind.name(),
                    reason: format!("{:#}", err),
                })
            }
        }
    }
}

fn to_driver(sample: &PoseSample) -> Pose {
    Pose::new(
        remap_to_driver(sample.rotation_vector),
        remap_to_driver(sample.translation_vector),
    )
}
