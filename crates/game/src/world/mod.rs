mod entity;
mod registry;

pub use entity::{DiscreteState, Entity, EntityFlags, EntityId, EntityKind, RawState};
pub use registry::{World, WorldEvent};
