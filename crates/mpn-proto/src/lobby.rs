//! JSON frames for the WebSocket lobby channel.
//!
//! Every lobby frame is a single JSON object. Unknown fields are ignored on
//! read and absent fields decode as zero/empty, so old and new clients can
//! interoperate. The server always emits `type` and `accept`.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtoError;

/// Request/reply `type` strings.
pub mod msg_type {
    pub const REQUEST_PLAYERS: &str = "request_players";
    pub const REPLY_PLAYERS: &str = "reply_players";
    pub const REQUEST_GET_ROOMS: &str = "request_get_rooms";
    pub const REPLY_GET_ROOMS: &str = "reply_get_rooms";
    pub const REQUEST_CREATE_ROOM: &str = "request_create_room";
    pub const REPLY_CREATE_ROOM: &str = "reply_create_room";
    pub const REQUEST_JOIN_ROOM: &str = "request_join_room";
    pub const REPLY_JOIN_ROOM: &str = "reply_join_room";
    pub const REQUEST_CHAT_MESSAGE: &str = "request_chat_message";
    pub const REPLY_CHAT_MESSAGE: &str = "reply_chat_message";
    pub const REQUEST_BEGIN_GAME: &str = "request_begin_game";
    pub const REPLY_BEGIN_GAME: &str = "reply_begin_game";
    pub const REQUEST_MOTD: &str = "request_motd";
    pub const REPLY_MOTD: &str = "reply_motd";
    pub const REQUEST_VERSION: &str = "request_version";
    pub const REPLY_VERSION: &str = "reply_version";
}

/// Accept codes carried in every reply.
pub mod accept {
    pub const ACCEPTED: i32 = 0;
    pub const BAD_PASSWORD: i32 = 1;
    pub const MISMATCH_VERSION: i32 = 2;
    pub const ROOM_FULL: i32 = 3;
    pub const DUPLICATE_NAME: i32 = 4;
    pub const ROOM_DELETED: i32 = 5;
    pub const BAD_NAME: i32 = 6;
    pub const BAD_EMULATOR: i32 = 7;
    pub const BAD_AUTH: i32 = 8;
    pub const OTHER: i32 = 9;
}

/// One lobby frame, request or reply. A single struct covers the whole
/// protocol; which fields are meaningful depends on `kind`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LobbyMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub accept: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub netplay_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub emulator: String,
    #[serde(default)]
    pub room_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub game_name: String,
    #[serde(default)]
    pub player_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub player_names: Vec<String>,
    #[serde(rename = "MD5", default, skip_serializing_if = "String::is_empty")]
    pub md5: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_sha: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub port: u16,
    #[serde(
        default,
        deserialize_with = "de_features",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub features: HashMap<String, String>,
    #[serde(rename = "authTime", default, skip_serializing_if = "String::is_empty")]
    pub auth_time: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth: String,
}

/// Clients are allowed to put non-string values in the feature bag; they are
/// stringified on the way in rather than failing the whole frame.
fn de_features<'de, D>(de: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, serde_json::Value>> = Option::deserialize(de)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

impl LobbyMessage {
    /// A reply skeleton: `type` set, everything else zero/empty.
    pub fn reply(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }
}
