//! Process-wide room table and port allocator.
//!
//! Rooms are keyed by name; each live room owns exactly one port in
//! `[base_port + 1, base_port + max_games]`, bound for both TCP and UDP at
//! allocation time. Creations are serialised so two concurrent requests
//! cannot claim the same slot; the registry mutex itself is never held
//! across a bind.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{info, warn};

use crate::room::{self, Room, RoomMeta};
use crate::ConnId;

/// Cadence of the belt-and-braces purge task.
const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Rooms idle longer than this are purged regardless of state.
const PURGE_IDLE_AFTER: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
pub enum CreateError {
    /// A room with this name already exists.
    Duplicate,
    /// Every port in the configured range is taken or failed to bind.
    NoPorts,
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, Arc<Room>>,
    ports: HashSet<u16>,
}

pub struct Registry {
    base_port: u16,
    max_games: u16,
    inner: Mutex<Inner>,
    /// Serialises port scans across concurrent room creations.
    create_lock: tokio::sync::Mutex<()>,
}

impl Registry {
    pub fn new(base_port: u16, max_games: u16) -> Self {
        Self {
            base_port,
            max_games,
            inner: Mutex::new(Inner::default()),
            create_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn contains(&self, room_name: &str) -> bool {
        self.inner.lock().rooms.contains_key(room_name)
    }

    pub fn find_by_port(&self, port: u16) -> Option<Arc<Room>> {
        self.inner
            .lock()
            .rooms
            .values()
            .find(|r| r.port == port)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<Room>> {
        self.inner.lock().rooms.values().cloned().collect()
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    pub fn ports_in_use(&self) -> usize {
        self.inner.lock().ports.len()
    }

    /// Create a room: allocate the lowest free port whose TCP and UDP binds
    /// both succeed, start its I/O loops, and hand it back.
    pub async fn create_room(self: &Arc<Self>, meta: RoomMeta) -> Result<Arc<Room>, CreateError> {
        let _guard = self.create_lock.lock().await;

        if self.contains(&meta.room_name) {
            return Err(CreateError::Duplicate);
        }

        for port in (self.base_port + 1)..=(self.base_port + self.max_games) {
            if self.inner.lock().ports.contains(&port) {
                continue;
            }
            let tcp = match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => listener,
                Err(_) => continue,
            };
            let udp = match UdpSocket::bind(("0.0.0.0", port)).await {
                Ok(socket) => Arc::new(socket),
                Err(_) => continue,
            };

            let room = Room::new(meta, port, udp);
            {
                let mut inner = self.inner.lock();
                inner.rooms.insert(room.meta.room_name.clone(), Arc::clone(&room));
                inner.ports.insert(port);
            }
            room::spawn_io_tasks(&room, tcp);
            self.spawn_reaper(Arc::clone(&room));
            return Ok(room);
        }

        warn!(room = %meta.room_name, "no free port for new room");
        Err(CreateError::NoPorts)
    }

    /// Waits out the room's shutdown signal, then drops it from the table
    /// and frees its port. The single cleanup point for every close path.
    fn spawn_reaper(self: &Arc<Self>, room: Arc<Room>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = room.subscribe_shutdown();
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            registry.release(&room);
        });
    }

    fn release(&self, room: &Arc<Room>) {
        let mut inner = self.inner.lock();
        if inner
            .rooms
            .get(&room.meta.room_name)
            .is_some_and(|r| Arc::ptr_eq(r, room))
        {
            inner.rooms.remove(&room.meta.room_name);
        }
        inner.ports.remove(&room.port);
        info!(room = %room.meta.room_name, port = room.port, "room released");
    }

    /// A lobby connection went away: vacate its seats, tell the survivors,
    /// and tear down any never-started room it leaves empty.
    pub async fn handle_disconnect(&self, conn_id: ConnId) {
        for room in self.snapshot() {
            let (removed, now_empty) = {
                let mut players = room.players.lock();
                let names: Vec<String> = players
                    .iter()
                    .filter(|(_, seat)| seat.conn_id == conn_id)
                    .map(|(name, _)| name.clone())
                    .collect();
                for name in &names {
                    players.remove(name);
                    info!(room = %room.meta.room_name, player = %name, "player left lobby");
                }
                (!names.is_empty(), players.is_empty())
            };

            if !removed {
                continue;
            }
            if now_empty && !room.is_running() {
                info!(room = %room.meta.room_name, "no more players in room, deleting");
                room.close();
            } else {
                crate::lobby::broadcast_players(&room).await;
            }
        }
    }

    /// Lobby traffic refreshes the activity clock of every room holding a
    /// seat for this connection.
    pub fn touch_activity(&self, conn_id: ConnId) {
        for room in self.snapshot() {
            let holds_seat = room
                .players
                .lock()
                .values()
                .any(|seat| seat.conn_id == conn_id);
            if holds_seat {
                room.touch_activity();
            }
        }
    }

    /// Safety net: drop rooms that have seen nothing for a long time.
    pub async fn purge_inactive_rooms(self: Arc<Self>) {
        loop {
            tokio::time::sleep(PURGE_INTERVAL).await;
            for room in self.snapshot() {
                if room.activity_age() > PURGE_IDLE_AFTER {
                    info!(room = %room.meta.room_name, "room purged due to inactivity");
                    room.close();
                }
            }
        }
    }
}
