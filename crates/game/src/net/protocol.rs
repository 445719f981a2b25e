use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::replication::{angle_index, QuantizedState, Quantizer};
use crate::world::{Entity, EntityId};

pub const MAX_PACKET_SIZE: usize = 16 * 1024;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x464C434B;
pub const DEFAULT_PORT: u16 = 27016;
pub const DEFAULT_TICK_RATE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    ConnectionRequest {
        client_salt: u64,
    },
    ConnectionChallenge {
        server_salt: u64,
        challenge: u64,
    },
    ChallengeResponse {
        combined_salt: u64,
    },
    ConnectionAccepted {
        client_id: u32,
        entity_id: u32,
        quantization: QuantizationInfo,
    },
    ConnectionDenied {
        reason: String,
    },
    Replicate(TickMessage),
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Disconnect,
}

/// Step sizes the client needs to turn cells back into world units.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct QuantizationInfo {
    pub position_step: f32,
    pub velocity_step: f32,
    pub health_step: f32,
}

impl From<Quantizer> for QuantizationInfo {
    fn from(q: Quantizer) -> Self {
        Self {
            position_step: q.position_step,
            velocity_step: q.velocity_step,
            health_step: q.health_step,
        }
    }
}

impl From<QuantizationInfo> for Quantizer {
    fn from(info: QuantizationInfo) -> Self {
        Self {
            position_step: info.position_step,
            velocity_step: info.velocity_step,
            health_step: info.health_step,
        }
    }
}

/// First sight of an entity for one receiver.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct SpawnMessage {
    pub entity_id: u32,
    pub kind: u8,
    pub position: [f32; 3],
    pub yaw: u8,
    pub health: f32,
    pub max_health: f32,
    pub variant: Option<u8>,
}

impl SpawnMessage {
    pub fn new(entity: &Entity, quantized: &QuantizedState, quantizer: &Quantizer) -> Self {
        let (health, max_health) = quantizer.health(quantized);
        Self {
            entity_id: entity.id.0,
            kind: entity.kind as u8,
            position: quantizer.position(quantized).into(),
            yaw: angle_index(entity.state.yaw),
            health,
            max_health,
            variant: entity.variant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityUpdate {
    pub entity_id: u32,
    pub state: QuantizedState,
}

impl EntityUpdate {
    pub fn new(entity_id: EntityId, state: QuantizedState) -> Self {
        Self {
            entity_id: entity_id.0,
            state,
        }
    }
}

/// Everything one receiver gets for one tick. Never split across ticks.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TickMessage {
    pub tick: u32,
    pub server_time_ms: u64,
    pub current: Vec<u32>,
    pub spawns: Vec<SpawnMessage>,
    pub updates: Vec<EntityUpdate>,
    pub deaths: Vec<u32>,
    pub despawns: Vec<u32>,
}

impl TickMessage {
    pub fn new(tick: u32, server_time_ms: u64) -> Self {
        Self {
            tick,
            server_time_ms,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(PacketError::Deserialize)
    }
}
