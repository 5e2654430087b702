//! Per-room TCP control channel: registration, settings exchange, the file
//! store and buffer tuning. Large payloads travel here so the UDP path stays
//! small and per-frame.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use mpn_proto::constants::MAX_PLAYERS;
use mpn_proto::control::{
    check_blob_len, encode_blob, encode_registration_table, Opcode, Registration,
};

use super::Room;

/// Accept loop for one room's control listener. Exits on room shutdown.
pub async fn run_control_listener(room: Arc<Room>, listener: TcpListener) {
    let mut shutdown = room.subscribe_shutdown();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(room = %room.meta.room_name, "TCP server closed");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let seat = room.claim_control_seat();
                        tokio::spawn(handle_connection(Arc::clone(&room), stream, peer, seat));
                    }
                    Err(e) => {
                        warn!(room = %room.meta.room_name, error = %e, "TCP accept failed");
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_connection(room: Arc<Room>, mut stream: TcpStream, peer: SocketAddr, seat: u8) {
    if let Err(e) = connection_loop(&room, &mut stream, seat).await {
        debug!(room = %room.meta.room_name, %peer, seat, reason = %e, "control connection closed");
    }
    room.release_control_seat(seat);
}

/// Record loop: a one-byte opcode, then an opcode-specific payload, until
/// the peer hangs up, sends garbage, or the room shuts down. A failure here
/// drops the connection only; the room stays up.
async fn connection_loop(room: &Arc<Room>, stream: &mut TcpStream, seat: u8) -> anyhow::Result<()> {
    let _ = stream.set_nodelay(true);
    stream.write_u8(seat).await?;

    let mut shutdown = room.subscribe_shutdown();
    loop {
        let opcode = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            byte = stream.read_u8() => byte?,
        };

        match Opcode::from_byte(opcode)? {
            Opcode::SendRegistration => {
                let reg_id = stream.read_u32().await?;
                let plugin = stream.read_u8().await?;
                let raw = stream.read_u8().await?;
                if (seat as usize) < MAX_PLAYERS {
                    room.register(
                        seat,
                        Registration {
                            reg_id,
                            plugin,
                            raw,
                        },
                    );
                }
            }
            Opcode::RequestRegistration => {
                let table = room.control.lock().registrations;
                stream.write_all(&encode_registration_table(&table)).await?;
            }
            Opcode::UploadSettings => {
                let payload = read_blob(stream).await?;
                room.store_settings(payload);
            }
            Opcode::RequestSettings => {
                let reply = {
                    let control = room.control.lock();
                    encode_blob(control.settings.as_deref().unwrap_or(&[]))
                };
                stream.write_all(&reply).await?;
            }
            Opcode::UploadFile => {
                let name = read_name(stream).await?;
                let payload = read_blob(stream).await?;
                debug!(room = %room.meta.room_name, file = %name, len = payload.len(), "file stored");
                room.store_file(name, payload);
            }
            Opcode::RequestFile => {
                let name = read_name(stream).await?;
                let reply = {
                    let control = room.control.lock();
                    encode_blob(control.files.get(&name).map(Bytes::as_ref).unwrap_or(&[]))
                };
                stream.write_all(&reply).await?;
            }
            Opcode::BufferChange => {
                let buffer = stream.read_u32().await?;
                room.change_buffer(buffer);
            }
            Opcode::DisconnectNotice => {
                let slot = stream.read_u8().await?;
                room.mark_disconnect(slot);
            }
        }
    }
}

async fn read_blob(stream: &mut TcpStream) -> anyhow::Result<Bytes> {
    let len = check_blob_len(stream.read_u32().await?)?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Bytes::from(payload))
}

async fn read_name(stream: &mut TcpStream) -> anyhow::Result<String> {
    let blob = read_blob(stream).await?;
    Ok(String::from_utf8_lossy(&blob).into_owned())
}
