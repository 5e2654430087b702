//! MPN netplay server library. The binary in `main.rs` wires these modules
//! together; integration tests drive them directly.

pub mod broadcast;
pub mod discord;
pub mod lobby;
pub mod registry;
pub mod room;
pub mod stats;

/// Identity tag for a lobby connection. Seats are matched by this tag on
/// disconnect, never by socket-address equality.
pub type ConnId = u64;

/// Server build string reported by `request_version`.
pub fn version() -> &'static str {
    option_env!("MPN_BUILD_SHA").unwrap_or(env!("CARGO_PKG_VERSION"))
}
