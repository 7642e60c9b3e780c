//! Link to the VR tracking driver.

use std::sync::{Arc, Mutex};

mod client;
pub mod packet;

pub use client::{LinkClient, LinkState, LinkStats};
pub use packet::{Packet, PacketType, UpdateEntry};

/// Link client shared by the processing thread and operator actions. Each protocol
/// message is built and sent under the lock.
pub type SharedLink = Arc<Mutex<LinkClient>>;
