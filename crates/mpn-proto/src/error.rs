use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("buffer too short")]
    TooShort,
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("unknown control opcode {0}")]
    UnknownOpcode(u8),
    #[error("slot {0} out of range")]
    BadSlot(u8),
    #[error("blob too large: {0} bytes")]
    BlobTooLarge(usize),
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
}
