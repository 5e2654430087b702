//! One hosted multiplayer session: lobby seats, TCP registrations, UDP relay
//! state and the supervisors that tie their lifetimes together.

pub mod control;
pub mod game_data;
pub mod relay;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use mpn_proto::constants::{MAX_PLAYERS, NO_SEAT};
use mpn_proto::control::Registration;
use mpn_proto::lobby::LobbyMessage;

use crate::ConnId;
use game_data::GameData;

/// Seconds of silence before a slot is considered gone.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Seconds without any UDP packet before the room is closed.
pub const UDP_SILENCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default adaptive-buffer base until a client tunes it over TCP.
pub const DEFAULT_BUFFER: u32 = 3;

/// Queue handle for one lobby connection's writer task.
pub type LobbyTx = mpsc::Sender<LobbyMessage>;

/// Immutable room attributes fixed at creation.
#[derive(Debug, Clone)]
pub struct RoomMeta {
    pub room_name: String,
    pub game_name: String,
    pub md5: String,
    pub client_sha: String,
    pub emulator: String,
    pub password: String,
    pub features: HashMap<String, String>,
    pub creator: String,
}

/// A lobby-connected player holding one of the four seats.
#[derive(Debug, Clone)]
pub struct Seat {
    pub number: u8,
    pub conn_id: ConnId,
    pub ip: String,
    pub tx: LobbyTx,
}

/// State owned by the TCP control engine.
#[derive(Debug, Default)]
pub struct ControlState {
    pub registrations: [Option<Registration>; MAX_PLAYERS],
    /// Seat bytes handed out to control connections that have not (yet)
    /// registered. Keeps two handshakes from claiming one slot.
    claimed: [bool; MAX_PLAYERS],
    /// Slots flagged by a disconnect notice; reaped at the next sweep.
    marked: [bool; MAX_PLAYERS],
    pub settings: Option<Bytes>,
    pub files: HashMap<String, Bytes>,
}

#[derive(Debug)]
struct Timestamps {
    last_activity: Instant,
    last_udp_packet: Instant,
}

pub struct Room {
    pub meta: RoomMeta,
    pub port: u16,
    pub players: Mutex<HashMap<String, Seat>>,
    pub control: Mutex<ControlState>,
    pub game: Mutex<GameData>,
    pub udp: Arc<UdpSocket>,
    base_buffer: AtomicU32,
    running: AtomicBool,
    closed: AtomicBool,
    times: Mutex<Timestamps>,
    shutdown_tx: watch::Sender<bool>,
}

impl Room {
    pub fn new(meta: RoomMeta, port: u16, udp: Arc<UdpSocket>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let now = Instant::now();
        Arc::new(Self {
            meta,
            port,
            players: Mutex::new(HashMap::new()),
            control: Mutex::new(ControlState::default()),
            game: Mutex::new(GameData::new(DEFAULT_BUFFER)),
            udp,
            base_buffer: AtomicU32::new(DEFAULT_BUFFER),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            times: Mutex::new(Timestamps {
                last_activity: now,
                last_udp_packet: now,
            }),
            shutdown_tx,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flip to running. Returns false when the game had already started.
    pub fn start(&self) -> bool {
        let started = !self.running.swap(true, Ordering::AcqRel);
        if started {
            // Give the UDP silence clock a fresh baseline.
            self.times.lock().last_udp_packet = Instant::now();
        }
        started
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear the room down. Safe to call any number of times, from any task;
    /// listeners observe the shutdown signal and pending reads fail out.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);
        info!(room = %self.meta.room_name, port = self.port, "room closed");
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn touch_activity(&self) {
        self.times.lock().last_activity = Instant::now();
    }

    /// UDP traffic counts as activity too.
    pub fn touch_udp(&self) {
        let mut times = self.times.lock();
        let now = Instant::now();
        times.last_udp_packet = now;
        times.last_activity = now;
    }

    pub fn activity_age(&self) -> Duration {
        self.times.lock().last_activity.elapsed()
    }

    pub fn udp_age(&self) -> Duration {
        self.times.lock().last_udp_packet.elapsed()
    }

    /// Hand out the lowest slot byte not registered and not already claimed
    /// by another control handshake. `NO_SEAT` when the room is full.
    pub fn claim_control_seat(&self) -> u8 {
        let mut control = self.control.lock();
        for i in 0..MAX_PLAYERS {
            if control.registrations[i].is_none() && !control.claimed[i] {
                control.claimed[i] = true;
                return i as u8;
            }
        }
        NO_SEAT
    }

    /// Drop an unused handshake claim so the seat can be offered again.
    pub fn release_control_seat(&self, seat: u8) {
        if (seat as usize) < MAX_PLAYERS {
            let mut control = self.control.lock();
            if control.registrations[seat as usize].is_none() {
                control.claimed[seat as usize] = false;
            }
        }
    }

    /// Record a registration; the first one per seat wins.
    pub fn register(&self, seat: u8, reg: Registration) {
        let mut control = self.control.lock();
        let entry = &mut control.registrations[seat as usize];
        if entry.is_none() {
            *entry = Some(reg);
            debug!(room = %self.meta.room_name, seat, reg_id = reg.reg_id, "slot registered");
        }
    }

    pub fn registration(&self, seat: u8) -> Option<Registration> {
        self.control.lock().registrations[seat as usize]
    }

    /// The slot whose registration carries `reg_id` — identifies the player
    /// behind a `PlayerInputRequest`.
    pub fn slot_for_reg_id(&self, reg_id: u32) -> Option<u8> {
        let control = self.control.lock();
        (0..MAX_PLAYERS as u8)
            .find(|&i| control.registrations[i as usize].is_some_and(|r| r.reg_id == reg_id))
    }

    /// Store settings; the first uploader wins.
    pub fn store_settings(&self, payload: Bytes) {
        let mut control = self.control.lock();
        if control.settings.is_none() {
            control.settings = Some(payload);
        }
    }

    pub fn store_file(&self, name: String, payload: Bytes) {
        self.control.lock().files.insert(name, payload);
    }

    /// Flag a slot for removal at the next player sweep.
    pub fn mark_disconnect(&self, seat: u8) {
        if (seat as usize) < MAX_PLAYERS {
            self.control.lock().marked[seat as usize] = true;
        }
    }

    pub fn base_buffer(&self) -> u32 {
        self.base_buffer.load(Ordering::Relaxed)
    }

    /// Retune the adaptive buffer: new base, per-slot depth back to zero.
    pub fn change_buffer(&self, base: u32) {
        self.base_buffer.store(base, Ordering::Relaxed);
        self.game.lock().change_buffer(base);
        info!(room = %self.meta.room_name, buffer = base, "buffer changed");
    }

    /// One liveness sweep: reap slots that stayed silent (or sent a
    /// disconnect notice), then reset the flags for the next window.
    /// Returns true while at least one slot is still alive.
    fn sweep_players(&self) -> bool {
        let mut control = self.control.lock();
        let mut game = self.game.lock();
        let mut any_alive = false;

        for i in 0..MAX_PLAYERS {
            if control.registrations[i].is_none() {
                continue;
            }
            if game.is_alive(i as u8) && !control.marked[i] {
                any_alive = true;
            } else {
                control.registrations[i] = None;
                control.claimed[i] = false;
                control.marked[i] = false;
                game.mark_slot_dead(i as u8);
                info!(room = %self.meta.room_name, slot = i, "player disconnected");
            }
            debug!(
                room = %self.meta.room_name,
                slot = i,
                buffer_size = game.buffer_size(i as u8),
                buffer_health = game.buffer_health(i as u8),
                lag = game.lag(i as u8),
                "slot status"
            );
        }
        game.clear_alive();
        any_alive
    }
}

/// Start the per-room I/O loops. Runs from room creation so clients can
/// exchange settings before the game begins.
pub fn spawn_io_tasks(room: &Arc<Room>, listener: TcpListener) {
    tokio::spawn(control::run_control_listener(Arc::clone(room), listener));
    tokio::spawn(relay::run_udp_loop(Arc::clone(room)));
}

/// Start the gameplay supervisors. Runs once, when the creator begins the
/// game.
pub fn spawn_game_supervisors(room: &Arc<Room>) {
    tokio::spawn(manage_players(Arc::clone(room)));
    tokio::spawn(monitor_activity(Arc::clone(room)));
}

/// Periodic liveness sweep. Closes the room once every slot has gone quiet.
async fn manage_players(room: Arc<Room>) {
    let mut shutdown = room.subscribe_shutdown();
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(DISCONNECT_TIMEOUT) => {}
        }
        if !room.sweep_players() {
            info!(room = %room.meta.room_name, "no active players, closing room");
            room.close();
            return;
        }
    }
}

/// Watches the room's clocks and closes it when traffic stops.
async fn monitor_activity(room: Arc<Room>) {
    let mut shutdown = room.subscribe_shutdown();
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
        if room.activity_age() > DISCONNECT_TIMEOUT || room.udp_age() > UDP_SILENCE_TIMEOUT {
            info!(room = %room.meta.room_name, "room inactive, closing");
            room.close();
            return;
        }
    }
}

/// Host part of a peer address, kept on the seat for logging.
pub fn host_ip(addr: SocketAddr) -> String {
    addr.ip().to_string()
}
