//! Wire formats shared by the MPN lobby server and its clients.
//!
//! Three transports, three codecs:
//! - [`lobby`]: JSON frames exchanged over the WebSocket lobby channel.
//! - [`control`]: big-endian records on the per-room TCP control channel.
//! - [`relay`]: big-endian datagrams on the per-room UDP input channel.
//!
//! [`frame`] holds the wraparound-aware frame-counter arithmetic that every
//! ordering decision in the relay goes through.

pub mod constants;
pub mod control;
pub mod error;
pub mod frame;
pub mod lobby;
pub mod relay;
