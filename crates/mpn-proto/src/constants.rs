/// Lobby API version string. Clients advertising anything else are rejected
/// with `MismatchVersion`.
pub const NETPLAY_API_VERSION: &str = "MPN-4";

/// Seats and relay slots per room.
pub const MAX_PLAYERS: usize = 4;

/// Input frames retained per slot before the oldest counter is evicted.
pub const INPUT_DATA_MAX: usize = 5000;

/// Seat byte handed to a TCP control client when every slot is taken.
pub const NO_SEAT: u8 = 255;

/// Registration ID spectators put in `PlayerInputRequest`; it is never
/// checked against the slot's registration.
pub const SPECTATOR_REG_ID: u32 = u32::MAX;

/// Upper bound on entries in a `KeyInfoServer` reply.
pub const KEY_INFO_MAX_FRAMES: usize = 4;

/// Largest blob accepted on the TCP control channel (save states).
pub const MAX_CONTROL_BLOB: usize = 8 * 1024 * 1024;

/// Largest CP0 sync blob accepted per datagram.
pub const MAX_SYNC_BLOB: usize = 128;

/// Room status bit: a CP0 desync was detected. Sticky for the room's life.
pub const STATUS_DESYNC: u8 = 1;
