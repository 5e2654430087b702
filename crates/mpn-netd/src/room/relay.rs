//! Per-room UDP input relay. Datagrams carry per-frame controller state at
//! ~60 Hz; everything here is drop-tolerant and the GameData mutex is never
//! held across a socket send.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use mpn_proto::constants::SPECTATOR_REG_ID;
use mpn_proto::relay::{KeyInfoServer, RelayPacket};

use super::Room;

/// Read loop for one room's UDP socket. Exits on room shutdown.
pub async fn run_udp_loop(room: Arc<Room>) {
    let socket = Arc::clone(&room.udp);
    let mut shutdown = room.subscribe_shutdown();
    let mut buf = vec![0u8; 1500];
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(room = %room.meta.room_name, "UDP server closed");
                return;
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, from)) => handle_datagram(&room, &buf[..len], from).await,
                    Err(e) => {
                        if room.is_closed() {
                            return;
                        }
                        warn!(room = %room.meta.room_name, error = %e, "UDP read failed");
                    }
                }
            }
        }
    }
}

/// Dispatch one datagram. Malformed frames, unknown types and unregistered
/// slots are dropped without a reply.
async fn handle_datagram(room: &Arc<Room>, buf: &[u8], from: SocketAddr) {
    let packet = match RelayPacket::decode(buf) {
        Ok(p) => p,
        Err(e) => {
            trace!(room = %room.meta.room_name, %from, reason = %e, "dropped datagram");
            return;
        }
    };
    room.touch_udp();

    match packet {
        RelayPacket::KeyInfoClient {
            slot,
            count,
            keys,
            plugin,
        } => handle_key_info(room, slot, count, keys, plugin, from).await,
        RelayPacket::PlayerInputRequest {
            slot,
            reg_id,
            count,
            spectator,
        } => handle_input_request(room, slot, reg_id, count, spectator, from).await,
        RelayPacket::Cp0Info { slot, count, sync } => {
            if room.registration(slot).is_none() {
                return;
            }
            let conflict = {
                let mut game = room.game.lock();
                game.touch(slot, from);
                game.observe_sync(slot, count, sync)
            };
            if let Some((first, second)) = conflict {
                warn!(
                    room = %room.meta.room_name,
                    count,
                    slot_a = first,
                    slot_b = second,
                    "desync detected"
                );
            }
        }
    }
}

/// A client reports an executed frame: store it, advance the lead, and push
/// it to every other live peer so they learn it without polling.
async fn handle_key_info(
    room: &Arc<Room>,
    slot: u8,
    count: u32,
    keys: u32,
    plugin: u8,
    from: SocketAddr,
) {
    if room.registration(slot).is_none() {
        return;
    }

    let sends = {
        let mut game = room.game.lock();
        game.touch(slot, from);
        game.record_input(slot, count, keys, plugin);

        let entries = game.collect_frames(slot, count, true);
        let status = game.status();
        game.gratuitous_targets(slot)
            .into_iter()
            .map(|(target, addr)| {
                let packet = KeyInfoServer {
                    gratuitous: true,
                    slot,
                    status,
                    lag: game.lag_byte(target),
                    entries: entries.clone(),
                };
                (addr, packet.encode())
            })
            .collect::<Vec<_>>()
    };

    for (addr, bytes) in sends {
        let _ = room.udp.send_to(&bytes, addr).await;
    }
}

/// A client polls for slot `slot`'s input from `count` onward. Players
/// identify themselves by their registration ID and get synthesis for
/// not-yet-seen frames; spectators only ever get recorded frames.
async fn handle_input_request(
    room: &Arc<Room>,
    slot: u8,
    reg_id: u32,
    count: u32,
    spectator: bool,
    from: SocketAddr,
) {
    if room.registration(slot).is_none() {
        return;
    }
    let requester = if spectator || reg_id == SPECTATOR_REG_ID {
        None
    } else {
        match room.slot_for_reg_id(reg_id) {
            Some(requester) => Some(requester),
            None => {
                debug!(room = %room.meta.room_name, reg_id, "input request with unknown registration");
                return;
            }
        }
    };

    let reply = {
        let mut game = room.game.lock();
        if let Some(requester) = requester {
            game.touch(requester, from);
        }
        let entries = game.collect_frames(slot, count, spectator);
        if entries.is_empty() {
            None
        } else {
            if let Some(requester) = requester {
                game.note_request(requester, count);
            }
            let lag = requester.map(|r| game.lag_byte(r)).unwrap_or(0);
            Some(
                KeyInfoServer {
                    gratuitous: false,
                    slot,
                    status: game.status(),
                    lag,
                    entries,
                }
                .encode(),
            )
        }
    };

    if let Some(bytes) = reply {
        let _ = room.udp.send_to(&bytes, from).await;
    }
}
