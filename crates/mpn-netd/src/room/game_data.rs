//! Per-room relay state: input buffers, lead/lag accounting, liveness and
//! desync tracking. One instance per room behind the room's game mutex; the
//! UDP handler and the player sweep are the only writers.

use std::collections::HashMap;
use std::net::SocketAddr;

use mpn_proto::constants::{INPUT_DATA_MAX, KEY_INFO_MAX_FRAMES, MAX_PLAYERS, STATUS_DESYNC};
use mpn_proto::frame::{counter_lag, counter_newer};
use mpn_proto::relay::KeyInfoEntry;

/// CP0 sync samples retained before the oldest counters are evicted.
const SYNC_WINDOW: usize = 50;

/// Ceiling for the per-slot adaptive buffer depth.
const BUFFER_SIZE_CAP: u32 = 8;

/// Input word and plugin byte recorded for one frame. Inputs and plugins
/// share a key domain, so they live in one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInput {
    pub keys: u32,
    pub plugin: u8,
}

#[derive(Debug)]
struct SyncSample {
    slot: u8,
    blob: Vec<u8>,
}

#[derive(Debug)]
pub struct GameData {
    addresses: [Option<SocketAddr>; MAX_PLAYERS],
    inputs: [HashMap<u32, FrameInput>; MAX_PLAYERS],
    pending: [Option<FrameInput>; MAX_PLAYERS],
    last_count: [u32; MAX_PLAYERS],
    count_lag: [u32; MAX_PLAYERS],
    lead_count: u32,
    /// `lead_count` is meaningless until the first input arrives; the seed
    /// must be unconditional or an upper-half first counter would be lost.
    has_lead: bool,
    buffer_size: [u32; MAX_PLAYERS],
    buffer_health: [u32; MAX_PLAYERS],
    alive: [bool; MAX_PLAYERS],
    status: u8,
    sync_values: HashMap<u32, SyncSample>,
}

impl GameData {
    pub fn new(base_buffer: u32) -> Self {
        Self {
            addresses: [None; MAX_PLAYERS],
            inputs: std::array::from_fn(|_| HashMap::new()),
            pending: [None; MAX_PLAYERS],
            last_count: [0; MAX_PLAYERS],
            count_lag: [0; MAX_PLAYERS],
            lead_count: 0,
            has_lead: false,
            buffer_size: [0; MAX_PLAYERS],
            buffer_health: [base_buffer; MAX_PLAYERS],
            alive: [false; MAX_PLAYERS],
            status: 0,
            sync_values: HashMap::new(),
        }
    }

    /// Mark the slot alive and remember where to reach it.
    pub fn touch(&mut self, slot: u8, addr: SocketAddr) {
        self.alive[slot as usize] = true;
        self.addresses[slot as usize] = Some(addr);
    }

    /// Record one executed frame from a client. Updates pending input, the
    /// room lead and every slot's lag.
    pub fn record_input(&mut self, slot: u8, count: u32, keys: u32, plugin: u8) {
        let i = slot as usize;
        let input = FrameInput { keys, plugin };
        self.inputs[i].insert(count, input);
        self.pending[i] = Some(input);
        if counter_newer(count, self.last_count[i]) || self.inputs[i].len() == 1 {
            self.last_count[i] = count;
        }

        if self.inputs[i].len() > INPUT_DATA_MAX {
            let oldest = Self::oldest_counter(self.inputs[i].keys());
            if let Some(oldest) = oldest {
                self.inputs[i].remove(&oldest);
            }
        }

        if !self.has_lead || counter_newer(count, self.lead_count) {
            self.lead_count = count;
            self.has_lead = true;
        }
        self.recompute_lag();
    }

    fn recompute_lag(&mut self) {
        for i in 0..MAX_PLAYERS {
            self.count_lag[i] = if self.pending[i].is_some() {
                counter_lag(self.last_count[i], self.lead_count)
            } else {
                0
            };
        }
    }

    fn oldest_counter<'a>(mut keys: impl Iterator<Item = &'a u32>) -> Option<u32> {
        let mut oldest = *keys.next()?;
        for &k in keys {
            if counter_newer(oldest, k) {
                oldest = k;
            }
        }
        Some(oldest)
    }

    /// Frames for `slot` starting at `from`, at most four. Spectators only
    /// get what actually exists; players get pending-input synthesis and,
    /// failing that, zero entries.
    pub fn collect_frames(&self, slot: u8, from: u32, spectator: bool) -> Vec<KeyInfoEntry> {
        let i = slot as usize;
        let mut entries = Vec::with_capacity(KEY_INFO_MAX_FRAMES);
        let mut count = from;
        for _ in 0..KEY_INFO_MAX_FRAMES {
            let input = match self.inputs[i].get(&count) {
                Some(input) => *input,
                None if spectator => break,
                None => self.pending[i].unwrap_or(FrameInput { keys: 0, plugin: 0 }),
            };
            entries.push(KeyInfoEntry {
                count,
                keys: input.keys,
                plugin: input.plugin,
            });
            count = count.wrapping_add(1);
        }
        entries
    }

    /// Adaptive buffer accounting for a satisfied player request at `count`.
    /// A timely fetch shrinks the slot's buffer toward zero and tightens its
    /// health window; a late one grows the buffer up to the cap.
    pub fn note_request(&mut self, slot: u8, count: u32) {
        let i = slot as usize;
        let lag = counter_lag(count, self.lead_count);
        if lag <= self.buffer_health[i] {
            self.buffer_size[i] = self.buffer_size[i].saturating_sub(1);
            self.buffer_health[i] = self.buffer_health[i].saturating_sub(1);
        } else {
            self.buffer_size[i] = (self.buffer_size[i] + 1).min(BUFFER_SIZE_CAP);
        }
    }

    /// Record a CP0 sync sample. Returns the conflicting slot pair when this
    /// sample first trips the desync flag.
    pub fn observe_sync(&mut self, slot: u8, count: u32, blob: Vec<u8>) -> Option<(u8, u8)> {
        if self.status & STATUS_DESYNC != 0 {
            return None;
        }
        match self.sync_values.get(&count) {
            Some(sample) if sample.blob != blob => {
                self.status |= STATUS_DESYNC;
                Some((sample.slot, slot))
            }
            Some(_) => None,
            None => {
                self.sync_values.insert(count, SyncSample { slot, blob });
                while self.sync_values.len() > SYNC_WINDOW {
                    let oldest = Self::oldest_counter(self.sync_values.keys());
                    let Some(oldest) = oldest else { break };
                    self.sync_values.remove(&oldest);
                }
                None
            }
        }
    }

    /// Other slots that are alive and reachable, for gratuitous fanout.
    pub fn gratuitous_targets(&self, sender: u8) -> Vec<(u8, SocketAddr)> {
        (0..MAX_PLAYERS as u8)
            .filter(|&j| j != sender && self.alive[j as usize])
            .filter_map(|j| self.addresses[j as usize].map(|a| (j, a)))
            .collect()
    }

    /// Frames the slot is behind the room lead.
    pub fn lag(&self, slot: u8) -> u32 {
        self.count_lag[slot as usize]
    }

    pub fn lag_byte(&self, slot: u8) -> u8 {
        self.count_lag[slot as usize].min(u8::MAX as u32) as u8
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn mark_slot_dead(&mut self, slot: u8) {
        self.status |= 1 << (slot + 1);
    }

    pub fn is_alive(&self, slot: u8) -> bool {
        self.alive[slot as usize]
    }

    pub fn clear_alive(&mut self) {
        self.alive = [false; MAX_PLAYERS];
    }

    pub fn set_dead(&mut self, slot: u8) {
        self.alive[slot as usize] = false;
    }

    pub fn lead_count(&self) -> u32 {
        self.lead_count
    }

    pub fn input_len(&self, slot: u8) -> usize {
        self.inputs[slot as usize].len()
    }

    pub fn buffer_size(&self, slot: u8) -> u32 {
        self.buffer_size[slot as usize]
    }

    pub fn buffer_health(&self, slot: u8) -> u32 {
        self.buffer_health[slot as usize]
    }

    /// Reset per-slot pacing to a new base buffer.
    pub fn change_buffer(&mut self, base: u32) {
        self.buffer_size = [0; MAX_PLAYERS];
        self.buffer_health = [base; MAX_PLAYERS];
    }
}
