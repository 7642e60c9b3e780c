//! Driver wire format.
//!
//! Every datagram starts with a one-byte packet tag. Vectors are three little-endian
//! `f64`s. Names are ASCII, NUL-terminated. Network ids are signed bytes: positive
//! ids name a tracker, and in an update a negative id marks that tracker as not
//! visible in this frame (no vectors follow).

use anyhow::{anyhow, Result};

use crate::pose::{Pose, Vec3};

const VEC3_LEN: usize = 24;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    Handshake = 0x00,
    Advertise = 0x01,
    Calibrate = 0x02,
    Update = 0x03,
}

impl PacketType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(PacketType::Handshake),
            0x01 => Some(PacketType::Advertise),
            0x02 => Some(PacketType::Calibrate),
            0x03 => Some(PacketType::Update),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Handshake => "handshake",
            PacketType::Advertise => "advertise",
            PacketType::Calibrate => "calibrate",
            PacketType::Update => "update",
        }
    }
}

/// One tracker in an update. `pose == None` is encoded as the negated id.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateEntry {
    pub network_id: i8,
    pub pose: Option<Pose>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Handshake { device_name: Option<String> },
    Advertise { trackers: Vec<(i8, String)> },
    Calibrate { source: Pose, target: Pose },
    Update { entries: Vec<UpdateEntry> },
}

impl Packet {
    pub fn kind(&self) -> PacketType {
        match self {
            Packet::Handshake { .. } => PacketType::Handshake,
            Packet::Advertise { .. } => PacketType::Advertise,
            Packet::Calibrate { .. } => PacketType::Calibrate,
            Packet::Update { .. } => PacketType::Update,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.kind() as u8];
        match self {
            Packet::Handshake { device_name } => {
                if let Some(name) = device_name {
                    write_name(&mut out, name)?;
                }
            }
            Packet::Advertise { trackers } => {
                for (network_id, name) in trackers {
                    check_network_id(*network_id)?;
                    out.push(*network_id as u8);
                    write_name(&mut out, name)?;
                }
            }
            Packet::Calibrate { source, target } => {
                write_pose(&mut out, source);
                write_pose(&mut out, target);
            }
            Packet::Update { entries } => {
                for entry in entries {
                    check_network_id(entry.network_id)?;
                    match &entry.pose {
                        Some(pose) => {
                            out.push(entry.network_id as u8);
                            write_pose(&mut out, pose);
                        }
                        None => out.push((-entry.network_id) as u8),
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| anyhow!("empty packet"))?;
        let kind = PacketType::from_tag(tag)
            .ok_or_else(|| anyhow!("unknown packet tag {:#04x}", tag))?;
        let mut cursor = 0usize;
        let packet = match kind {
            PacketType::Handshake => {
                let device_name = if body.is_empty() {
                    None
                } else {
                    Some(read_name(body, &mut cursor)?)
                };
                Packet::Handshake { device_name }
            }
            PacketType::Advertise => {
                let mut trackers = Vec::new();
                while cursor < body.len() {
                    let network_id = read_i8(body, &mut cursor)?;
                    if network_id <= 0 {
                        return Err(anyhow!(
                            "advertised network id {} is not positive",
                            network_id
                        ));
                    }
                    trackers.push((network_id, read_name(body, &mut cursor)?));
                }
                Packet::Advertise { trackers }
            }
            PacketType::Calibrate => Packet::Calibrate {
                source: read_pose(body, &mut cursor)?,
                target: read_pose(body, &mut cursor)?,
            },
            PacketType::Update => {
                let mut entries = Vec::new();
                while cursor < body.len() {
                    let raw = read_i8(body, &mut cursor)?;
                    let entry = match raw {
                        0 | i8::MIN => {
                            return Err(anyhow!("invalid network id {} in update", raw))
                        }
                        id if id > 0 => UpdateEntry {
                            network_id: id,
                            pose: Some(read_pose(body, &mut cursor)?),
                        },
                        id => UpdateEntry {
                            network_id: -id,
                            pose: None,
                        },
                    };
                    entries.push(entry);
                }
                Packet::Update { entries }
            }
        };
        if cursor != body.len() {
            return Err(anyhow!(
                "{} trailing bytes after {} packet",
                body.len() - cursor,
                kind.name()
            ));
        }
        Ok(packet)
    }
}

fn check_network_id(network_id: i8) -> Result<()> {
    if network_id <= 0 {
        return Err(anyhow!("network id {} is not positive", network_id));
    }
    Ok(())
}

fn write_name(out: &mut Vec<u8>, name: &str) -> Result<()> {
    if !name.is_ascii() || name.bytes().any(|b| b == 0) {
        return Err(anyhow!("name {:?} is not NUL-free ASCII", name));
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    Ok(())
}

fn write_vec3(out: &mut Vec<u8>, v: &Vec3) {
    out.extend_from_slice(&v.x.to_le_bytes());
    out.extend_from_slice(&v.y.to_le_bytes());
    out.extend_from_slice(&v.z.to_le_bytes());
}

fn write_pose(out: &mut Vec<u8>, pose: &Pose) {
    write_vec3(out, &pose.rotation);
    write_vec3(out, &pose.translation);
}

fn read_i8(bytes: &[u8], cursor: &mut usize) -> Result<i8> {
    let out = *bytes
        .get(*cursor)
        .ok_or_else(|| anyhow!("truncated packet"))?;
    *cursor += 1;
    Ok(out as i8)
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *cursor + len > bytes.len() {
        return Err(anyhow!("truncated packet"));
    }
    let out = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok(out)
}

fn read_name(bytes: &[u8], cursor: &mut usize) -> Result<String> {
    let rest = &bytes[*cursor..];
    let end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| anyhow!("name is missing its NUL terminator"))?;
    let name = std::str::from_utf8(&rest[..end])
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| anyhow!("name is not ASCII"))?
        .to_string();
    *cursor += end + 1;
    Ok(name)
}

fn read_vec3(bytes: &[u8], cursor: &mut usize) -> Result<Vec3> {
    let slice = read_slice(bytes, cursor, VEC3_LEN)?;
    let mut parts = [0f64; 3];
    for (i, chunk) in slice.chunks_exact(8).enumerate() {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        parts[i] = f64::from_le_bytes(raw);
    }
    Ok(Vec3::new(parts[0], parts[1], parts[2]))
}

fn read_pose(bytes: &[u8], cursor: &mut usize) -> Result<Pose> {
    Ok(Pose::new(read_vec3(bytes, cursor)?, read_vec3(bytes, cursor)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(seed: f64) -> Pose {
        Pose::new(
            Vec3::new(seed, seed + 0.5, -seed),
            Vec3::new(1.0, 2.0, seed * 3.0),
        )
    }

    #[test]
    fn handshake_without_name_is_a_single_tag_byte() -> Result<()> {
        let bytes = Packet::Handshake { device_name: None }.encode()?;
        assert_eq!(bytes, vec![0x00]);
        let named = Packet::Handshake {
            device_name: Some("cam".into()),
        };
        assert_eq!(named.encode()?, b"\x00cam\x00".to_vec());
        assert_eq!(Packet::decode(&named.encode()?)?, named);
        Ok(())
    }

    #[test]
    fn advertise_layout() -> Result<()> {
        let packet = Packet::Advertise {
            trackers: vec![(1, "left".into()), (2, "hip".into())],
        };
        let bytes = packet.encode()?;
        assert_eq!(bytes, b"\x01\x01left\x00\x02hip\x00".to_vec());
        assert_eq!(Packet::decode(&bytes)?, packet);
        Ok(())
    }

    #[test]
    fn update_hides_invisible_entries() -> Result<()> {
        let packet = Packet::Update {
            entries: vec![
                UpdateEntry {
                    network_id: 3,
                    pose: Some(pose(0.25)),
                },
                UpdateEntry {
                    network_id: 5,
                    pose: None,
                },
            ],
        };
        let bytes = packet.encode()?;
        assert_eq!(bytes.len(), 1 + (1 + 48) + 1);
        assert_eq!(bytes[0], 0x03);
        assert_eq!(bytes[1], 3);
        assert_eq!(&bytes[2..10], &0.25f64.to_le_bytes());
        assert_eq!(bytes[50] as i8, -5);
        assert_eq!(Packet::decode(&bytes)?, packet);
        Ok(())
    }

    #[test]
    fn calibrate_is_four_vectors() -> Result<()> {
        let packet = Packet::Calibrate {
            source: pose(1.0),
            target: pose(2.0),
        };
        let bytes = packet.encode()?;
        assert_eq!(bytes.len(), 1 + 4 * VEC3_LEN);
        assert_eq!(Packet::decode(&bytes)?, packet);
        Ok(())
    }

    #[test]
    fn encode_rejects_bad_names_and_ids() {
        let bad_name = Packet::Advertise {
            trackers: vec![(1, "caf\u{e9}".into())],
        };
        assert!(bad_name.encode().is_err());
        let nul = Packet::Advertise {
            trackers: vec![(1, "a\0b".into())],
        };
        assert!(nul.encode().is_err());
        let zero = Packet::Update {
            entries: vec![UpdateEntry {
                network_id: 0,
                pose: None,
            }],
        };
        assert!(zero.encode().is_err());
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(Packet::decode(&[]).is_err());
        assert!(Packet::decode(&[0x09]).is_err());
        assert!(Packet::decode(b"\x01\x01left").is_err());
        assert!(Packet::decode(&[0x03, 0x01, 0, 0, 0]).is_err());
        assert!(Packet::decode(&[0x03, 0x00]).is_err());
        assert!(Packet::decode(&[0x03, 0x80]).is_err());
        assert!(Packet::decode(&[0x02; 10]).is_err());
    }
}
