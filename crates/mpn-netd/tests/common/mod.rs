//! Shared test harness: an in-process server plus mock lobby/control/relay
//! clients speaking the real wire formats.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use mpn_netd::lobby::LobbyServer;
use mpn_netd::registry::Registry;
use mpn_proto::lobby::{msg_type, LobbyMessage};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Spawn a lobby server on an ephemeral loopback port. Room ports come out
/// of `base_port + 1 ..= base_port + max_games`; pick a distinct base per
/// test so concurrently running tests never contend.
pub async fn spawn_server(base_port: u16, max_games: u16, enable_auth: bool) -> SocketAddr {
    let registry = Arc::new(Registry::new(base_port, max_games));
    let lobby = Arc::new(LobbyServer {
        name: "TestServer".to_string(),
        motd: "MPN Beta".to_string(),
        base_port,
        enable_auth,
        registry,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = lobby.run(listener).await;
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    addr
}

/// Mock lobby client over a real WebSocket.
pub struct LobbyClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl LobbyClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{addr}/");
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .expect("lobby connect failed");
        Self { ws }
    }

    pub async fn send(&mut self, msg: &LobbyMessage) {
        let text = msg.encode().unwrap();
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    /// Next JSON frame, skipping anything that is not text.
    pub async fn recv(&mut self) -> LobbyMessage {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for lobby reply")
                .expect("lobby stream closed")
                .expect("lobby stream error");
            if let Message::Text(text) = frame {
                return LobbyMessage::decode(text.as_str()).unwrap();
            }
        }
    }

    /// Read frames until one of the given type arrives.
    pub async fn recv_kind(&mut self, kind: &str) -> LobbyMessage {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {kind}"
            );
            let msg = self.recv().await;
            if msg.kind == kind {
                return msg;
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

pub fn create_room_msg(room: &str, player: &str) -> LobbyMessage {
    LobbyMessage {
        kind: msg_type::REQUEST_CREATE_ROOM.to_string(),
        room_name: room.to_string(),
        player_name: player.to_string(),
        game_name: "Test Game".to_string(),
        emulator: "m64p".to_string(),
        netplay_version: "MPN-4".to_string(),
        md5: "deadbeef".to_string(),
        client_sha: "1111".to_string(),
        ..LobbyMessage::default()
    }
}

pub fn join_room_msg(port: u16, player: &str) -> LobbyMessage {
    LobbyMessage {
        kind: msg_type::REQUEST_JOIN_ROOM.to_string(),
        port,
        player_name: player.to_string(),
        md5: "deadbeef".to_string(),
        client_sha: "1111".to_string(),
        ..LobbyMessage::default()
    }
}

pub fn begin_game_msg(port: u16) -> LobbyMessage {
    LobbyMessage {
        kind: msg_type::REQUEST_BEGIN_GAME.to_string(),
        port,
        ..LobbyMessage::default()
    }
}

pub fn get_rooms_msg() -> LobbyMessage {
    LobbyMessage {
        kind: msg_type::REQUEST_GET_ROOMS.to_string(),
        emulator: "m64p".to_string(),
        netplay_version: "MPN-4".to_string(),
        ..LobbyMessage::default()
    }
}

/// Create a two-player room and start the game. Returns both lobby clients
/// and the room port.
pub async fn start_two_player_game(addr: SocketAddr) -> (LobbyClient, LobbyClient, u16) {
    let mut host = LobbyClient::connect(addr).await;
    host.send(&create_room_msg("relay-room", "pA")).await;
    let created = host.recv_kind(msg_type::REPLY_CREATE_ROOM).await;
    assert_eq!(created.accept, 0, "create failed: {}", created.message);
    let port = created.port;

    // The guest authenticates the way real clients do: by listing rooms.
    let mut guest = LobbyClient::connect(addr).await;
    guest.send(&get_rooms_msg()).await;
    let listing = guest.recv_kind(msg_type::REPLY_GET_ROOMS).await;
    assert_eq!(listing.accept, 0);

    guest.send(&join_room_msg(port, "pB")).await;
    let joined = guest.recv_kind(msg_type::REPLY_JOIN_ROOM).await;
    assert_eq!(joined.accept, 0, "join failed: {}", joined.message);

    host.send(&begin_game_msg(port)).await;
    let begin_host = host.recv_kind(msg_type::REPLY_BEGIN_GAME).await;
    assert_eq!(begin_host.port, port);
    let begin_guest = guest.recv_kind(msg_type::REPLY_BEGIN_GAME).await;
    assert_eq!(begin_guest.port, port);

    (host, guest, port)
}

/// Mock client for the per-room TCP control channel.
pub struct ControlClient {
    stream: TcpStream,
}

impl ControlClient {
    /// Connect and read the seat byte the server assigns.
    pub async fn connect(port: u16) -> (Self, u8) {
        let mut stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("control connect failed");
        let seat = stream.read_u8().await.expect("no seat byte");
        (Self { stream }, seat)
    }

    pub async fn send_registration(&mut self, reg_id: u32, plugin: u8, raw: u8) {
        self.stream.write_u8(1).await.unwrap();
        self.stream.write_u32(reg_id).await.unwrap();
        self.stream.write_u8(plugin).await.unwrap();
        self.stream.write_u8(raw).await.unwrap();
    }

    pub async fn request_registrations(&mut self) -> [u8; 24] {
        self.stream.write_u8(2).await.unwrap();
        let mut table = [0u8; 24];
        timeout(RECV_TIMEOUT, self.stream.read_exact(&mut table))
            .await
            .expect("timed out reading registrations")
            .unwrap();
        table
    }

    pub async fn upload_settings(&mut self, payload: &[u8]) {
        self.stream.write_u8(3).await.unwrap();
        self.stream.write_u32(payload.len() as u32).await.unwrap();
        self.stream.write_all(payload).await.unwrap();
    }

    pub async fn request_settings(&mut self) -> Vec<u8> {
        self.stream.write_u8(4).await.unwrap();
        self.read_blob().await
    }

    pub async fn upload_file(&mut self, name: &str, payload: &[u8]) {
        self.stream.write_u8(5).await.unwrap();
        self.write_blob(name.as_bytes()).await;
        self.write_blob(payload).await;
    }

    pub async fn request_file(&mut self, name: &str) -> Vec<u8> {
        self.stream.write_u8(6).await.unwrap();
        self.write_blob(name.as_bytes()).await;
        self.read_blob().await
    }

    pub async fn buffer_change(&mut self, buffer: u32) {
        self.stream.write_u8(7).await.unwrap();
        self.stream.write_u32(buffer).await.unwrap();
    }

    pub async fn disconnect_notice(&mut self, seat: u8) {
        self.stream.write_u8(8).await.unwrap();
        self.stream.write_u8(seat).await.unwrap();
    }

    async fn write_blob(&mut self, payload: &[u8]) {
        self.stream.write_u32(payload.len() as u32).await.unwrap();
        self.stream.write_all(payload).await.unwrap();
    }

    async fn read_blob(&mut self) -> Vec<u8> {
        let len = timeout(RECV_TIMEOUT, self.stream.read_u32())
            .await
            .expect("timed out reading blob length")
            .unwrap() as usize;
        let mut payload = vec![0u8; len];
        if len > 0 {
            self.stream.read_exact(&mut payload).await.unwrap();
        }
        payload
    }
}

/// Mock client for the per-room UDP relay channel.
pub struct RelayClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl RelayClient {
    pub async fn connect(port: u16) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self {
            socket,
            server: SocketAddr::from(([127, 0, 0, 1], port)),
        }
    }

    pub async fn send(&self, datagram: &[u8]) {
        self.socket.send_to(datagram, self.server).await.unwrap();
    }

    pub async fn recv(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 1500];
        let (len, _) = timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for datagram")
            .unwrap();
        buf.truncate(len);
        buf
    }

    /// True when nothing arrives within the window; used to assert drops.
    pub async fn recv_nothing(&self, window: Duration) -> bool {
        let mut buf = vec![0u8; 1500];
        timeout(window, self.socket.recv_from(&mut buf)).await.is_err()
    }
}
