//! Player state reconciliation
//!
//! Each connected player entity carries a `PlayerSyncState` fed exclusively
//! by decoded sync packets. The transport gives no ordering guarantee, so the
//! reconciler enforces increasing-timestamp order itself by dropping stale
//! movement and aim updates. All operations are best-effort: bad input is discarded
//! silently and never surfaces as an error to the network layer.

use log::debug;
use shared::{SyncPacket, Vector3};
use std::collections::HashMap;
use std::time::Instant;

/// Which sync tier the player has reached. Transitions only move forward;
/// the state is discarded with the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PuresyncKind {
    None,
    Lightsync,
    Puresync,
}

/// Handle to a connected player entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerId(pub u32);

/// Last-known-good movement and aim state for one player.
#[derive(Debug)]
pub struct PlayerSyncState {
    position: Vector3,
    move_speed: Vector3,
    turn_speed: Vector3,
    increments: Vector3,
    /// Timestamp of the newest applied movement update. Non-decreasing.
    last_update_ms: u64,
    sync_kind: PuresyncKind,

    // Two-sample aim window for extrapolation.
    old_aim: Vector3,
    current_aim: Vector3,
    old_aim_ms: u64,
    current_aim_ms: u64,
    aim_speed: Vector3,
    extrapolating_aim: bool,

    /// Exponentially smoothed at a fixed 1/2 weight.
    latency_ms: u16,

    in_interruption: bool,
    interruption_ended: Option<Instant>,

    player_sync_count: u32,
    key_sync_count: u32,
    vehicle_sync_count: u32,
}

impl PlayerSyncState {
    fn new() -> Self {
        Self {
            position: Vector3::default(),
            move_speed: Vector3::default(),
            turn_speed: Vector3::default(),
            increments: Vector3::default(),
            last_update_ms: 0,
            sync_kind: PuresyncKind::None,
            old_aim: Vector3::default(),
            current_aim: Vector3::default(),
            old_aim_ms: 0,
            current_aim_ms: 0,
            aim_speed: Vector3::default(),
            extrapolating_aim: false,
            latency_ms: 0,
            in_interruption: false,
            interruption_ended: None,
            player_sync_count: 0,
            key_sync_count: 0,
            vehicle_sync_count: 0,
        }
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }

    pub fn move_speed(&self) -> Vector3 {
        self.move_speed
    }

    pub fn turn_speed(&self) -> Vector3 {
        self.turn_speed
    }

    pub fn increments(&self) -> Vector3 {
        self.increments
    }

    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    pub fn sync_kind(&self) -> PuresyncKind {
        self.sync_kind
    }

    pub fn current_aim(&self) -> Vector3 {
        self.current_aim
    }

    pub fn aim_speed(&self) -> Vector3 {
        self.aim_speed
    }

    pub fn latency_ms(&self) -> u16 {
        self.latency_ms
    }

    pub fn is_extrapolating_aim(&self) -> bool {
        self.extrapolating_aim
    }

    pub fn set_extrapolating_aim(&mut self, enabled: bool) {
        self.extrapolating_aim = enabled;
    }

    pub fn player_sync_count(&self) -> u32 {
        self.player_sync_count
    }

    pub fn key_sync_count(&self) -> u32 {
        self.key_sync_count
    }

    pub fn vehicle_sync_count(&self) -> u32 {
        self.vehicle_sync_count
    }

    /// Position the player is extrapolated to `ahead_ms` past the last aim
    /// sample. Requires two distinct samples; otherwise the current aim.
    pub fn extrapolated_aim(&self, ahead_ms: u64) -> Vector3 {
        self.current_aim.add(&self.aim_speed.scale(ahead_ms as f32))
    }
}

/// Per-player sync state machine collection.
#[derive(Default)]
pub struct SyncReconciler {
    players: HashMap<PlayerId, PlayerSyncState>,
}

impl SyncReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates sync state alongside the player entity.
    pub fn add_player(&mut self, player: PlayerId) {
        self.players.entry(player).or_insert_with(PlayerSyncState::new);
    }

    /// Destroys sync state with the entity.
    pub fn remove_player(&mut self, player: PlayerId) -> bool {
        self.players.remove(&player).is_some()
    }

    pub fn state(&self, player: PlayerId) -> Option<&PlayerSyncState> {
        self.players.get(&player)
    }

    pub fn state_mut(&mut self, player: PlayerId) -> Option<&mut PlayerSyncState> {
        self.players.get_mut(&player)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Applies a full movement update. Returns false when the update is
    /// stale (older timestamp than the stored state) or the player is
    /// unknown; stale updates modify nothing.
    pub fn apply_movement_update(
        &mut self,
        player: PlayerId,
        position: Vector3,
        move_speed: Vector3,
        turn_speed: Vector3,
        increments: Vector3,
        timestamp: u64,
    ) -> bool {
        let Some(state) = self.players.get_mut(&player) else {
            return false;
        };
        if timestamp < state.last_update_ms {
            debug!(
                "Dropping stale movement update for {:?} ({} < {})",
                player, timestamp, state.last_update_ms
            );
            return false;
        }
        state.position = position;
        state.move_speed = move_speed;
        state.turn_speed = turn_speed;
        state.increments = increments;
        state.last_update_ms = timestamp;
        state.sync_kind = PuresyncKind::Puresync;
        state.player_sync_count += 1;
        true
    }

    /// Applies a reduced lightsync position update. Advances the sync tier
    /// only from `None`; a player already on puresync stays there.
    pub fn apply_lightsync_update(
        &mut self,
        player: PlayerId,
        position: Vector3,
        timestamp: u64,
    ) -> bool {
        let Some(state) = self.players.get_mut(&player) else {
            return false;
        };
        if timestamp < state.last_update_ms {
            debug!(
                "Dropping stale lightsync update for {:?} ({} < {})",
                player, timestamp, state.last_update_ms
            );
            return false;
        }
        state.position = position;
        state.last_update_ms = timestamp;
        if state.sync_kind == PuresyncKind::None {
            state.sync_kind = PuresyncKind::Lightsync;
        }
        state.player_sync_count += 1;
        true
    }

    /// Rotates the two-sample aim window. Like movement updates, aim samples
    /// apply in increasing timestamp order; a stale sample is dropped so it
    /// can neither overwrite newer aim state nor feed a negative time delta
    /// into the velocity. With extrapolation enabled and two distinct
    /// timestamps, derives the aim velocity; equal timestamps skip the
    /// velocity update to avoid dividing by zero.
    pub fn apply_aim_update(&mut self, player: PlayerId, aim: Vector3, timestamp: u64) -> bool {
        let Some(state) = self.players.get_mut(&player) else {
            return false;
        };
        if timestamp < state.current_aim_ms {
            debug!(
                "Dropping stale aim update for {:?} ({} < {})",
                player, timestamp, state.current_aim_ms
            );
            return false;
        }
        if state.extrapolating_aim {
            state.old_aim = state.current_aim;
            state.old_aim_ms = state.current_aim_ms;
            state.current_aim = aim;
            state.current_aim_ms = timestamp;
            if state.current_aim_ms != state.old_aim_ms {
                let dt_ms = (state.current_aim_ms - state.old_aim_ms) as f32;
                state.aim_speed = state.current_aim.sub(&state.old_aim).scale(1.0 / dt_ms);
            }
        } else {
            state.current_aim = aim;
            state.current_aim_ms = timestamp;
        }
        true
    }

    /// Fixed-weight smoothing: `latency = (latency + sample) / 2`.
    pub fn update_latency(&mut self, player: PlayerId, sample_ms: u16) -> bool {
        match self.players.get_mut(&player) {
            Some(state) => {
                state.latency_ms = ((state.latency_ms as u32 + sample_ms as u32) / 2) as u16;
                true
            }
            None => false,
        }
    }

    /// Toggles the interruption flag; the transition back to "recovered"
    /// starts the elapsed-time counter used to suppress spurious desync
    /// warnings right after a hiccup.
    pub fn set_in_interruption(&mut self, player: PlayerId, in_interruption: bool) {
        let Some(state) = self.players.get_mut(&player) else {
            return;
        };
        if state.in_interruption && !in_interruption {
            state.interruption_ended = Some(Instant::now());
        }
        state.in_interruption = in_interruption;
    }

    /// Whether the player is in an interruption now or recovered from one
    /// within the last `max_ms` milliseconds.
    pub fn was_recently_in_interruption(&self, player: PlayerId, max_ms: u64) -> bool {
        let Some(state) = self.players.get(&player) else {
            return false;
        };
        if state.in_interruption {
            return true;
        }
        match state.interruption_ended {
            Some(ended) => ended.elapsed().as_millis() as u64 <= max_ms,
            None => false,
        }
    }

    pub fn increment_key_sync(&mut self, player: PlayerId) {
        if let Some(state) = self.players.get_mut(&player) {
            state.key_sync_count += 1;
        }
    }

    pub fn increment_vehicle_sync(&mut self, player: PlayerId) {
        if let Some(state) = self.players.get_mut(&player) {
            state.vehicle_sync_count += 1;
        }
    }

    /// Routes a decoded packet to the matching operation.
    pub fn apply_packet(&mut self, player: PlayerId, packet: &SyncPacket) -> bool {
        match packet {
            SyncPacket::PlayerPuresync {
                position,
                move_speed,
                turn_speed,
                increments,
                timestamp,
                latency_ms,
            } => {
                let applied = self.apply_movement_update(
                    player,
                    *position,
                    *move_speed,
                    *turn_speed,
                    *increments,
                    *timestamp,
                );
                if applied {
                    self.update_latency(player, *latency_ms);
                }
                applied
            }
            SyncPacket::PlayerLightsync {
                position,
                timestamp,
                latency_ms,
            } => {
                let applied = self.apply_lightsync_update(player, *position, *timestamp);
                if applied {
                    self.update_latency(player, *latency_ms);
                }
                applied
            }
            SyncPacket::VehiclePuresync {
                position,
                move_speed,
                turn_speed,
                increments,
                timestamp,
                latency_ms,
            } => {
                let applied = self.apply_movement_update(
                    player,
                    *position,
                    *move_speed,
                    *turn_speed,
                    *increments,
                    *timestamp,
                );
                if applied {
                    self.increment_vehicle_sync(player);
                    self.update_latency(player, *latency_ms);
                }
                applied
            }
            SyncPacket::KeySync { .. } => {
                if self.players.contains_key(&player) {
                    self.increment_key_sync(player);
                    true
                } else {
                    false
                }
            }
            SyncPacket::AimSync { aim, timestamp } => {
                self.apply_aim_update(player, *aim, *timestamp)
            }
        }
    }
}
