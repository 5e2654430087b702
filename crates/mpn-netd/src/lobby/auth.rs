//! Shared-secret authentication for lobby requests.
//!
//! The client sends `authTime` (Unix millis as decimal ASCII) and
//! `auth = hex(sha256(authTime || secret))`, with the secret read from the
//! `<EMULATOR>_AUTH` environment variable. Time-bounded to limit replay.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::warn;

use mpn_proto::lobby::LobbyMessage;

/// Maximum tolerated clock skew between client and server.
const MAX_SKEW_MS: i64 = 15 * 60 * 1000;

/// Validate a request's auth fields. Always passes when auth is disabled.
pub fn validate(enable_auth: bool, msg: &LobbyMessage) -> bool {
    if !enable_auth {
        return true;
    }

    let client_ms: i64 = match msg.auth_time.parse() {
        Ok(ms) => ms,
        Err(e) => {
            warn!(error = %e, "could not parse auth time");
            return false;
        }
    };
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    if (now_ms - client_ms).abs() > MAX_SKEW_MS {
        warn!(server_ms = now_ms, client_ms, "bad time in auth request");
        return false;
    }

    let secret = match std::env::var(format!("{}_AUTH", msg.emulator.to_uppercase())) {
        Ok(secret) if !secret.is_empty() => secret,
        _ => return false,
    };

    let mut hasher = Sha256::new();
    hasher.update(msg.auth_time.as_bytes());
    hasher.update(secret.as_bytes());
    msg.auth == hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
    }

    fn signed_message(emulator: &str, auth_time: String, secret: &str) -> LobbyMessage {
        let mut hasher = Sha256::new();
        hasher.update(auth_time.as_bytes());
        hasher.update(secret.as_bytes());
        LobbyMessage {
            emulator: emulator.to_string(),
            auth: hex::encode(hasher.finalize()),
            auth_time,
            ..LobbyMessage::default()
        }
    }

    #[test]
    fn disabled_auth_always_passes() {
        assert!(validate(false, &LobbyMessage::default()));
    }

    #[test]
    fn valid_code_passes() {
        std::env::set_var("AUTHTEST1_AUTH", "topsecret");
        let msg = signed_message("authtest1", now_ms().to_string(), "topsecret");
        assert!(validate(true, &msg));
    }

    #[test]
    fn missing_secret_rejects() {
        let msg = signed_message("authtest2", now_ms().to_string(), "whatever");
        assert!(!validate(true, &msg));
    }

    #[test]
    fn wrong_digest_rejects() {
        std::env::set_var("AUTHTEST3_AUTH", "topsecret");
        let mut msg = signed_message("authtest3", now_ms().to_string(), "topsecret");
        msg.auth = "0".repeat(64);
        assert!(!validate(true, &msg));
    }

    #[test]
    fn stale_timestamp_rejects() {
        std::env::set_var("AUTHTEST4_AUTH", "topsecret");
        let stale = now_ms() - (MAX_SKEW_MS + 1000);
        let msg = signed_message("authtest4", stale.to_string(), "topsecret");
        assert!(!validate(true, &msg));
    }

    #[test]
    fn unparseable_timestamp_rejects() {
        std::env::set_var("AUTHTEST5_AUTH", "topsecret");
        let msg = signed_message("authtest5", "not-a-number".to_string(), "topsecret");
        assert!(!validate(true, &msg));
    }
}
