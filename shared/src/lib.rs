//! Types shared between the synchronization core and the transport adapter.
//!
//! The transport layer (packet framing, encryption, reliability) lives outside
//! this workspace; what crosses the boundary are the already-decoded sync
//! structures defined here, plus the vector math they carry.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, clamped into u64 range.
pub fn now_ms() -> u64 {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    ms.min(u64::MAX as u128) as u64
}

/// Represents a vector in 3D world space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Returns the normalized vector, or zero when the magnitude is zero.
    pub fn normalize(&self) -> Vector3 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector3::default()
        } else {
            Vector3 {
                x: self.x / mag,
                y: self.y / mag,
                z: self.z / mag,
            }
        }
    }

    /// Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector3 {
        Vector3 {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }

    /// Returns the sum of two vectors.
    pub fn add(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }

    /// Returns the difference of two vectors.
    pub fn sub(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

/// A decoded player-sync packet as handed over by the transport layer.
///
/// Puresync carries full movement state, lightsync a reduced subset for
/// bandwidth savings. Malformed packets are assumed filtered upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncPacket {
    PlayerPuresync {
        position: Vector3,
        move_speed: Vector3,
        turn_speed: Vector3,
        increments: Vector3,
        timestamp: u64,
        latency_ms: u16,
    },
    PlayerLightsync {
        position: Vector3,
        timestamp: u64,
        latency_ms: u16,
    },
    VehiclePuresync {
        position: Vector3,
        move_speed: Vector3,
        turn_speed: Vector3,
        increments: Vector3,
        timestamp: u64,
        latency_ms: u16,
    },
    KeySync {
        timestamp: u64,
    },
    AimSync {
        aim: Vector3,
        timestamp: u64,
    },
}

impl SyncPacket {
    /// Timestamp the sender stamped on this packet.
    pub fn timestamp(&self) -> u64 {
        match self {
            SyncPacket::PlayerPuresync { timestamp, .. } => *timestamp,
            SyncPacket::PlayerLightsync { timestamp, .. } => *timestamp,
            SyncPacket::VehiclePuresync { timestamp, .. } => *timestamp,
            SyncPacket::KeySync { timestamp } => *timestamp,
            SyncPacket::AimSync { timestamp, .. } => *timestamp,
        }
    }
}

/// Wire envelope pairing a sync packet with the player entity it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub player_id: u32,
    pub packet: SyncPacket,
}
