mod animation;
mod buffer;
mod client;
mod config;
mod interpolation;
mod lifecycle;
mod replica;
mod tuning;

pub use animation::{AnimationConfig, AnimationScheduler, Schedule};
pub use buffer::{BufferConfig, EntityBuffer, Sample, SnapshotBuffer};
pub use client::NetworkClient;
pub use config::ClientConfig;
pub use interpolation::{sample_target, InterpolationConfig, Interpolator, Pose, Target, TargetSource};
pub use lifecycle::{
    DeathAnimation, DeathStep, LifecycleEvent, LifecycleManager, MobLifecycleState, SubscriptionId,
};
pub use replica::{ClientReplication, DyingPose, EntityPose, Frame, ServerClock};
pub use tuning::{SpeciesTable, SpeciesTuning};
