//! Records for the per-room TCP control channel.
//!
//! After accept the server writes a single seat byte. The client then sends
//! records: a one-byte opcode followed by an opcode-specific payload. All
//! integers are big-endian; strings and blobs carry a 32-bit big-endian
//! length prefix. The stream-side reads live in the server; this module owns
//! the opcode table and the fixed-layout pieces.

use crate::constants::{MAX_CONTROL_BLOB, MAX_PLAYERS};
use crate::error::ProtoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    SendRegistration = 1,
    RequestRegistration = 2,
    UploadSettings = 3,
    RequestSettings = 4,
    UploadFile = 5,
    RequestFile = 6,
    BufferChange = 7,
    DisconnectNotice = 8,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Result<Self, ProtoError> {
        Ok(match b {
            1 => Opcode::SendRegistration,
            2 => Opcode::RequestRegistration,
            3 => Opcode::UploadSettings,
            4 => Opcode::RequestSettings,
            5 => Opcode::UploadFile,
            6 => Opcode::RequestFile,
            7 => Opcode::BufferChange,
            8 => Opcode::DisconnectNotice,
            other => return Err(ProtoError::UnknownOpcode(other)),
        })
    }
}

/// A gameplay slot's registration, established once over TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub reg_id: u32,
    pub plugin: u8,
    pub raw: u8,
}

/// Bytes per entry in the registration table reply.
pub const REGISTRATION_ENTRY_LEN: usize = 6;

/// Encode the `RequestRegistration` reply: four 6-byte entries indexed by
/// slot, zeros for unfilled slots.
pub fn encode_registration_table(table: &[Option<Registration>; MAX_PLAYERS]) -> [u8; 24] {
    let mut out = [0u8; REGISTRATION_ENTRY_LEN * MAX_PLAYERS];
    for (i, reg) in table.iter().enumerate() {
        if let Some(reg) = reg {
            let at = i * REGISTRATION_ENTRY_LEN;
            out[at..at + 4].copy_from_slice(&reg.reg_id.to_be_bytes());
            out[at + 4] = reg.plugin;
            out[at + 5] = reg.raw;
        }
    }
    out
}

/// Decode a registration table reply. Zero entries decode as `None`.
pub fn decode_registration_table(buf: &[u8]) -> Result<[Option<Registration>; MAX_PLAYERS], ProtoError> {
    if buf.len() < REGISTRATION_ENTRY_LEN * MAX_PLAYERS {
        return Err(ProtoError::TooShort);
    }
    let mut table = [None; MAX_PLAYERS];
    for (i, entry) in table.iter_mut().enumerate() {
        let at = i * REGISTRATION_ENTRY_LEN;
        let chunk = &buf[at..at + REGISTRATION_ENTRY_LEN];
        if chunk.iter().any(|&b| b != 0) {
            *entry = Some(Registration {
                reg_id: u32::from_be_bytes(chunk[..4].try_into().expect("slice length is 4")),
                plugin: chunk[4],
                raw: chunk[5],
            });
        }
    }
    Ok(table)
}

/// Validate a declared blob length before allocating for it.
pub fn check_blob_len(len: u32) -> Result<usize, ProtoError> {
    let len = len as usize;
    if len > MAX_CONTROL_BLOB {
        return Err(ProtoError::BlobTooLarge(len));
    }
    Ok(len)
}

/// Frame a blob as `len u32 | bytes` for the wire.
pub fn encode_blob(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}
