//! WebSocket lobby: the JSON request/reply state machine clients speak
//! before and alongside a game.
//!
//! Each connection is a task owning the read half; a writer task drains a
//! per-connection queue so JSON frames never interleave on the wire. A
//! connection starts unauthenticated; `request_create_room` and
//! `request_get_rooms` perform auth and promote it. Seats are tagged with
//! the connection's id and vacated when the socket goes away.

pub mod auth;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use mpn_proto::constants::{MAX_PLAYERS, NETPLAY_API_VERSION};
use mpn_proto::lobby::{accept, msg_type, LobbyMessage};

use crate::registry::{CreateError, Registry};
use crate::room::{self, host_ip, LobbyTx, Room, RoomMeta, Seat};
use crate::{discord, ConnId};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct LobbyServer {
    pub name: String,
    pub motd: String,
    pub base_port: u16,
    pub enable_auth: bool,
    pub registry: Arc<Registry>,
}

impl LobbyServer {
    /// Accept loop for the lobby listener.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.handle_connection(stream, peer, conn_id).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr, conn_id: ConnId) {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!(%peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };
        debug!(conn_id, %peer, "lobby connection opened");

        let (mut sink, mut source) = ws.split();
        let (tx, mut rx) = mpsc::channel::<LobbyMessage>(64);

        // Writer task: sole owner of the sink, serialises frames per
        // connection.
        let writer = tokio::spawn(async move {
            while let Some(reply) = rx.recv().await {
                let text = match reply.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "could not encode lobby reply");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        let mut authenticated = false;
        while let Some(frame) = source.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(conn_id, %peer, reason = %e, "could not read WS message");
                    break;
                }
            };
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let msg = match LobbyMessage::decode(text.as_str()) {
                Ok(msg) => msg,
                Err(e) => {
                    info!(conn_id, %peer, error = %e, "could not parse lobby message");
                    continue;
                }
            };

            self.registry.touch_activity(conn_id);
            self.dispatch(&msg, &tx, conn_id, peer, &mut authenticated)
                .await;
        }

        // Socket gone: vacate this connection's seats, possibly tearing the
        // room down.
        self.registry.handle_disconnect(conn_id).await;
        drop(tx);
        let _ = writer.await;
        debug!(conn_id, %peer, "lobby connection closed");
    }

    async fn dispatch(
        &self,
        msg: &LobbyMessage,
        tx: &LobbyTx,
        conn_id: ConnId,
        peer: SocketAddr,
        authenticated: &mut bool,
    ) {
        match msg.kind.as_str() {
            msg_type::REQUEST_CREATE_ROOM => {
                self.handle_create_room(msg, tx, conn_id, peer, authenticated)
                    .await
            }
            msg_type::REQUEST_GET_ROOMS => self.handle_get_rooms(msg, tx, authenticated).await,
            msg_type::REQUEST_JOIN_ROOM => {
                if !self.require_auth(*authenticated, msg, peer) {
                    return;
                }
                self.handle_join_room(msg, tx, conn_id, peer).await
            }
            msg_type::REQUEST_PLAYERS => {
                if !self.require_auth(*authenticated, msg, peer) {
                    return;
                }
                match self.registry.find_by_port(msg.port) {
                    Some(room) => broadcast_players(&room).await,
                    None => warn!(port = msg.port, %peer, "server not found"),
                }
            }
            msg_type::REQUEST_CHAT_MESSAGE => {
                if !self.require_auth(*authenticated, msg, peer) {
                    return;
                }
                self.handle_chat_message(msg, peer).await
            }
            msg_type::REQUEST_BEGIN_GAME => {
                if !self.require_auth(*authenticated, msg, peer) {
                    return;
                }
                self.handle_begin_game(msg, peer).await
            }
            msg_type::REQUEST_MOTD => {
                if !self.require_auth(*authenticated, msg, peer) {
                    return;
                }
                let mut reply = LobbyMessage::reply(msg_type::REPLY_MOTD);
                reply.message = self.motd.clone();
                let _ = tx.send(reply).await;
            }
            msg_type::REQUEST_VERSION => {
                let mut reply = LobbyMessage::reply(msg_type::REPLY_VERSION);
                reply.message = crate::version().to_string();
                let _ = tx.send(reply).await;
            }
            other => {
                info!(kind = %other, %peer, "not a valid lobby message type");
            }
        }
    }

    /// Requests other than version/auth ones are dropped (not replied to)
    /// until the connection has authenticated.
    fn require_auth(&self, authenticated: bool, msg: &LobbyMessage, peer: SocketAddr) -> bool {
        if !authenticated {
            warn!(kind = %msg.kind, %peer, "request from unauthenticated connection");
        }
        authenticated
    }

    async fn handle_create_room(
        &self,
        msg: &LobbyMessage,
        tx: &LobbyTx,
        conn_id: ConnId,
        peer: SocketAddr,
        authenticated: &mut bool,
    ) {
        let mut reply = LobbyMessage::reply(msg_type::REPLY_CREATE_ROOM);

        if self.registry.contains(&msg.room_name) {
            reply.accept = accept::DUPLICATE_NAME;
            reply.message = "Room with this name already exists".to_string();
        } else if msg.netplay_version != NETPLAY_API_VERSION {
            reply.accept = accept::MISMATCH_VERSION;
            reply.message =
                "Client and server not at same API version. Please update your emulator"
                    .to_string();
        } else if msg.room_name.is_empty() {
            reply.accept = accept::BAD_NAME;
            reply.message = "Room name cannot be empty".to_string();
        } else if msg.player_name.is_empty() {
            reply.accept = accept::BAD_NAME;
            reply.message = "Player name cannot be empty".to_string();
        } else if msg.emulator.is_empty() {
            reply.accept = accept::BAD_EMULATOR;
            reply.message = "Emulator name cannot be empty".to_string();
        } else if !auth::validate(self.enable_auth, msg) {
            reply.accept = accept::BAD_AUTH;
            reply.message = "Bad authentication code".to_string();
            info!(%peer, room = %msg.room_name, "bad auth code");
        } else {
            *authenticated = true;
            let meta = RoomMeta {
                room_name: msg.room_name.clone(),
                game_name: msg.game_name.clone(),
                md5: msg.md5.clone(),
                client_sha: msg.client_sha.clone(),
                emulator: msg.emulator.clone(),
                password: msg.password.clone(),
                features: msg.features.clone(),
                creator: msg.player_name.clone(),
            };
            match self.registry.create_room(meta).await {
                Err(CreateError::Duplicate) => {
                    reply.accept = accept::DUPLICATE_NAME;
                    reply.message = "Room with this name already exists".to_string();
                }
                Err(CreateError::NoPorts) => {
                    reply.accept = accept::OTHER;
                    reply.message = "Failed to create room".to_string();
                }
                Ok(room) => {
                    room.players.lock().insert(
                        msg.player_name.clone(),
                        Seat {
                            number: 0,
                            conn_id,
                            ip: host_ip(peer),
                            tx: tx.clone(),
                        },
                    );
                    info!(
                        room = %msg.room_name,
                        port = room.port,
                        game = %msg.game_name,
                        creator = %msg.player_name,
                        client_sha = %msg.client_sha,
                        creator_ip = %peer,
                        emulator = %msg.emulator,
                        "created new room"
                    );
                    reply.accept = accept::ACCEPTED;
                    reply.room_name = msg.room_name.clone();
                    reply.game_name = msg.game_name.clone();
                    reply.player_name = msg.player_name.clone();
                    reply.features = msg.features.clone();
                    reply.port = room.port;
                    discord::announce_room(&self.name, &room);
                }
            }
        }

        let _ = tx.send(reply).await;
    }

    async fn handle_get_rooms(&self, msg: &LobbyMessage, tx: &LobbyTx, authenticated: &mut bool) {
        let mut reply = LobbyMessage::reply(msg_type::REPLY_GET_ROOMS);

        if msg.netplay_version != NETPLAY_API_VERSION {
            reply.accept = accept::MISMATCH_VERSION;
            reply.message =
                "Client and server not at same API version. Please update your emulator"
                    .to_string();
            let _ = tx.send(reply).await;
            return;
        }
        if msg.emulator.is_empty() {
            reply.accept = accept::BAD_EMULATOR;
            reply.message = "Emulator name cannot be empty".to_string();
            let _ = tx.send(reply).await;
            return;
        }
        if !auth::validate(self.enable_auth, msg) {
            reply.accept = accept::BAD_AUTH;
            reply.message = "Bad authentication code".to_string();
            let _ = tx.send(reply).await;
            return;
        }

        *authenticated = true;
        for room in self.registry.snapshot() {
            if room.is_running() || room.meta.emulator != msg.emulator {
                continue;
            }
            let mut entry = LobbyMessage::reply(msg_type::REPLY_GET_ROOMS);
            entry.accept = accept::ACCEPTED;
            entry.protected = !room.meta.password.is_empty();
            entry.room_name = room.meta.room_name.clone();
            entry.game_name = room.meta.game_name.clone();
            entry.md5 = room.meta.md5.clone();
            entry.port = room.port;
            entry.features = room.meta.features.clone();
            entry.player_name = room.meta.creator.clone();
            let _ = tx.send(entry).await;
        }
    }

    async fn handle_join_room(
        &self,
        msg: &LobbyMessage,
        tx: &LobbyTx,
        conn_id: ConnId,
        peer: SocketAddr,
    ) {
        let mut reply = LobbyMessage::reply(msg_type::REPLY_JOIN_ROOM);

        let Some(room) = self.registry.find_by_port(msg.port) else {
            reply.accept = accept::ROOM_DELETED;
            reply.message = "room has been deleted".to_string();
            info!(port = msg.port, %peer, "server not found (room deleted)");
            let _ = tx.send(reply).await;
            return;
        };

        {
            let mut players = room.players.lock();
            if !room.meta.password.is_empty() && room.meta.password != msg.password {
                reply.accept = accept::BAD_PASSWORD;
                reply.message = "Incorrect password".to_string();
            } else if room.meta.client_sha != msg.client_sha {
                reply.accept = accept::MISMATCH_VERSION;
                reply.message = "Client versions do not match".to_string();
            } else if room.meta.md5 != msg.md5 {
                reply.accept = accept::MISMATCH_VERSION;
                reply.message = "ROM does not match room ROM".to_string();
            } else if players.len() >= MAX_PLAYERS {
                reply.accept = accept::ROOM_FULL;
                reply.message = "Room is full".to_string();
            } else if msg.player_name.is_empty() {
                reply.accept = accept::BAD_NAME;
                reply.message = "Player name cannot be empty".to_string();
            } else if players.contains_key(&msg.player_name) {
                reply.accept = accept::DUPLICATE_NAME;
                reply.message = "Player name already in use".to_string();
            } else {
                let number = (0..MAX_PLAYERS as u8)
                    .find(|n| !players.values().any(|seat| seat.number == *n))
                    .unwrap_or(0);
                players.insert(
                    msg.player_name.clone(),
                    Seat {
                        number,
                        conn_id,
                        ip: host_ip(peer),
                        tx: tx.clone(),
                    },
                );
                info!(
                    room = %room.meta.room_name,
                    player = %msg.player_name,
                    player_ip = %peer,
                    number,
                    "new player joining room"
                );
                reply.accept = accept::ACCEPTED;
                reply.room_name = room.meta.room_name.clone();
                reply.game_name = room.meta.game_name.clone();
                reply.player_name = msg.player_name.clone();
                reply.features = room.meta.features.clone();
                reply.port = room.port;
            }
        }

        let _ = tx.send(reply).await;
    }

    async fn handle_chat_message(&self, msg: &LobbyMessage, peer: SocketAddr) {
        let Some(room) = self.registry.find_by_port(msg.port) else {
            warn!(port = msg.port, %peer, "server not found");
            return;
        };
        let mut reply = LobbyMessage::reply(msg_type::REPLY_CHAT_MESSAGE);
        reply.message = format!("{}: {}", msg.player_name, msg.message);
        fanout(&room, reply).await;
    }

    async fn handle_begin_game(&self, msg: &LobbyMessage, peer: SocketAddr) {
        let Some(room) = self.registry.find_by_port(msg.port) else {
            warn!(port = msg.port, %peer, "server not found");
            return;
        };
        if !room.start() {
            warn!(room = %room.meta.room_name, %peer, "game already running");
            return;
        }
        info!(room = %room.meta.room_name, port = room.port, "starting game");
        room::spawn_game_supervisors(&room);

        let mut reply = LobbyMessage::reply(msg_type::REPLY_BEGIN_GAME);
        reply.port = room.port;
        fanout(&room, reply).await;
    }
}

/// Send one message to every seat in the room. Queue handles are cloned out
/// under the lock; the sends happen after it is released.
async fn fanout(room: &Arc<Room>, reply: LobbyMessage) {
    let txs: Vec<LobbyTx> = room.players.lock().values().map(|s| s.tx.clone()).collect();
    for tx in txs {
        let _ = tx.send(reply.clone()).await;
    }
}

/// Fan out the current seat map: a four-entry array indexed by seat number,
/// empty strings for unfilled seats.
pub async fn broadcast_players(room: &Arc<Room>) {
    let mut reply = LobbyMessage::reply(msg_type::REPLY_PLAYERS);
    reply.player_names = vec![String::new(); MAX_PLAYERS];
    let txs: Vec<LobbyTx> = {
        let players = room.players.lock();
        for (name, seat) in players.iter() {
            reply.player_names[seat.number as usize] = name.clone();
        }
        players.values().map(|s| s.tx.clone()).collect()
    };
    for tx in txs {
        let _ = tx.send(reply.clone()).await;
    }
}
