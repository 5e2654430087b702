//! Datagrams for the per-room UDP input channel.
//!
//! Every datagram starts with a type byte and a slot byte. Counters and
//! input words are 32-bit big-endian. The server accepts types 0, 2 and 4;
//! it emits types 1 and 3.

use crate::constants::{KEY_INFO_MAX_FRAMES, MAX_PLAYERS, MAX_SYNC_BLOB};
use crate::error::ProtoError;

pub const KEY_INFO_CLIENT: u8 = 0;
pub const KEY_INFO_SERVER: u8 = 1;
pub const PLAYER_INPUT_REQUEST: u8 = 2;
pub const KEY_INFO_SERVER_GRATUITOUS: u8 = 3;
pub const CP0_INFO: u8 = 4;

/// A client-originated datagram, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPacket {
    /// The client executed frame `count` with input `keys`.
    KeyInfoClient {
        slot: u8,
        count: u32,
        keys: u32,
        plugin: u8,
    },
    /// The client wants slot `slot`'s input starting at frame `count`.
    PlayerInputRequest {
        slot: u8,
        reg_id: u32,
        count: u32,
        spectator: bool,
    },
    /// Desync probe: the CP0 sync blob observed at frame `count`.
    Cp0Info { slot: u8, count: u32, sync: Vec<u8> },
}

impl RelayPacket {
    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < 2 {
            return Err(ProtoError::TooShort);
        }
        let slot = buf[1];
        if slot as usize >= MAX_PLAYERS {
            return Err(ProtoError::BadSlot(slot));
        }
        match buf[0] {
            KEY_INFO_CLIENT => {
                if buf.len() < 11 {
                    return Err(ProtoError::TooShort);
                }
                Ok(RelayPacket::KeyInfoClient {
                    slot,
                    count: be_u32(buf, 2),
                    keys: be_u32(buf, 6),
                    plugin: buf[10],
                })
            }
            PLAYER_INPUT_REQUEST => {
                if buf.len() < 11 {
                    return Err(ProtoError::TooShort);
                }
                Ok(RelayPacket::PlayerInputRequest {
                    slot,
                    reg_id: be_u32(buf, 2),
                    count: be_u32(buf, 6),
                    spectator: buf[10] != 0,
                })
            }
            CP0_INFO => {
                if buf.len() < 7 {
                    return Err(ProtoError::TooShort);
                }
                let sync = &buf[6..];
                if sync.len() > MAX_SYNC_BLOB {
                    return Err(ProtoError::BlobTooLarge(sync.len()));
                }
                Ok(RelayPacket::Cp0Info {
                    slot,
                    count: be_u32(buf, 2),
                    sync: sync.to_vec(),
                })
            }
            other => Err(ProtoError::UnknownType(other)),
        }
    }
}

/// One `{count, keys, plugin}` entry in a server key-info reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfoEntry {
    pub count: u32,
    pub keys: u32,
    pub plugin: u8,
}

const ENTRY_LEN: usize = 9;

/// A server-originated input reply, either solicited (`KeyInfoServer`) or
/// opportunistic (`KeyInfoServerGratuitous`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfoServer {
    pub gratuitous: bool,
    pub slot: u8,
    pub status: u8,
    /// The slot's frame lag behind the lead, clamped to a byte.
    pub lag: u8,
    pub entries: Vec<KeyInfoEntry>,
}

impl KeyInfoServer {
    /// Layout: type, slot, status, lag, entry count, then 9-byte entries.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.entries.len() <= KEY_INFO_MAX_FRAMES);
        let mut out = Vec::with_capacity(5 + self.entries.len() * ENTRY_LEN);
        out.push(if self.gratuitous {
            KEY_INFO_SERVER_GRATUITOUS
        } else {
            KEY_INFO_SERVER
        });
        out.push(self.slot);
        out.push(self.status);
        out.push(self.lag);
        out.push(self.entries.len() as u8);
        for e in &self.entries {
            out.extend_from_slice(&e.count.to_be_bytes());
            out.extend_from_slice(&e.keys.to_be_bytes());
            out.push(e.plugin);
        }
        out
    }

    /// Client-side decode, used by tests and diagnostics.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < 5 {
            return Err(ProtoError::TooShort);
        }
        let gratuitous = match buf[0] {
            KEY_INFO_SERVER => false,
            KEY_INFO_SERVER_GRATUITOUS => true,
            other => return Err(ProtoError::UnknownType(other)),
        };
        let n = buf[4] as usize;
        if buf.len() < 5 + n * ENTRY_LEN {
            return Err(ProtoError::TooShort);
        }
        let mut entries = Vec::with_capacity(n);
        for i in 0..n {
            let at = 5 + i * ENTRY_LEN;
            entries.push(KeyInfoEntry {
                count: be_u32(buf, at),
                keys: be_u32(buf, at + 4),
                plugin: buf[at + 8],
            });
        }
        Ok(KeyInfoServer {
            gratuitous,
            slot: buf[1],
            status: buf[2],
            lag: buf[3],
            entries,
        })
    }
}

/// Build a `KeyInfoClient` datagram. Test clients use this.
pub fn encode_key_info_client(slot: u8, count: u32, keys: u32, plugin: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(11);
    out.push(KEY_INFO_CLIENT);
    out.push(slot);
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&keys.to_be_bytes());
    out.push(plugin);
    out
}

/// Build a `PlayerInputRequest` datagram. Test clients use this.
pub fn encode_player_input_request(slot: u8, reg_id: u32, count: u32, spectator: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(11);
    out.push(PLAYER_INPUT_REQUEST);
    out.push(slot);
    out.extend_from_slice(&reg_id.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.push(spectator as u8);
    out
}

/// Build a `CP0Info` datagram. Test clients use this.
pub fn encode_cp0_info(slot: u8, count: u32, sync: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + sync.len());
    out.push(CP0_INFO);
    out.push(slot);
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(sync);
    out
}

#[inline]
fn be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(buf[at..at + 4].try_into().expect("slice length is 4"))
}
