use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn id(self) -> u32 {
        self.0
    }
}

impl From<u32> for EntityId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum EntityKind {
    #[default]
    Player = 0,
    Sheep = 1,
    Cow = 2,
    Pig = 3,
    Zombie = 4,
    Skeleton = 5,
    Spider = 6,
}

impl EntityKind {
    pub const MOBS: [EntityKind; 6] = [
        Self::Sheep,
        Self::Cow,
        Self::Pig,
        Self::Zombie,
        Self::Skeleton,
        Self::Spider,
    ];

    pub fn is_hostile(self) -> bool {
        matches!(self, Self::Zombie | Self::Skeleton | Self::Spider)
    }

    pub fn max_health(self) -> f32 {
        match self {
            Self::Player | Self::Zombie | Self::Skeleton => 20.0,
            Self::Sheep | Self::Pig => 8.0,
            Self::Cow => 10.0,
            Self::Spider => 16.0,
        }
    }
}

impl From<u8> for EntityKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Player,
            1 => Self::Sheep,
            2 => Self::Cow,
            3 => Self::Pig,
            4 => Self::Zombie,
            5 => Self::Skeleton,
            6 => Self::Spider,
            _ => Self::Sheep,
        }
    }
}

/// Animation label handed to the external animator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum DiscreteState {
    #[default]
    Idle = 0,
    Walk = 1,
    Run = 2,
    Graze = 3,
    Attack = 4,
    Hurt = 5,
}

impl DiscreteState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Walk => "walk",
            Self::Run => "run",
            Self::Graze => "graze",
            Self::Attack => "attack",
            Self::Hurt => "hurt",
        }
    }
}

impl From<u8> for DiscreteState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Walk,
            2 => Self::Run,
            3 => Self::Graze,
            4 => Self::Attack,
            5 => Self::Hurt,
            _ => Self::Idle,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntityFlags: u8 {
        const GROUNDED = 1 << 0;
        const SNEAK = 1 << 1;
        const SPRINT = 1 << 2;
    }
}

/// Observable state of one entity as the simulation sees it. Angles are in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawState {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub velocity: Vec3,
    pub flags: EntityFlags,
    pub health: f32,
    pub max_health: f32,
    pub state: DiscreteState,
}

impl Default for RawState {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

impl RawState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
            velocity: Vec3::ZERO,
            flags: EntityFlags::GROUNDED,
            health: 20.0,
            max_health: 20.0,
            state: DiscreteState::Idle,
        }
    }

    pub fn with_health(mut self, health: f32, max_health: f32) -> Self {
        self.health = health;
        self.max_health = max_health;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub variant: Option<u8>,
    pub state: RawState,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, position: Vec3) -> Self {
        let max_health = kind.max_health();
        Self {
            id,
            kind,
            variant: None,
            state: RawState::at(position).with_health(max_health, max_health),
        }
    }

    pub fn player(id: EntityId, spawn_position: Vec3) -> Self {
        Self::new(id, EntityKind::Player, spawn_position)
    }

    pub fn with_variant(mut self, variant: u8) -> Self {
        self.variant = Some(variant);
        self
    }
}
