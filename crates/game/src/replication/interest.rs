use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::world::EntityId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ReceiverId(pub u32);

/// One observer for a single tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverContext {
    pub receiver_id: ReceiverId,
    pub entity: Option<EntityId>,
    pub center: Option<Vec3>,
    pub interest_radius: f32,
}

impl ReceiverContext {
    pub fn new(receiver_id: ReceiverId, center: Option<Vec3>, interest_radius: f32) -> Self {
        Self {
            receiver_id,
            entity: None,
            center,
            interest_radius,
        }
    }

    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }
}

/// Squared distance on the XZ plane; height never limits visibility.
pub fn planar_distance_sq(a: Vec3, b: Vec3) -> f32 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    dx * dx + dz * dz
}

/// An unknown center counts as distance zero.
pub fn is_within_interest(position: Vec3, center: Option<Vec3>, radius_sq: f32) -> bool {
    match center {
        Some(center) => planar_distance_sq(position, center) <= radius_sq,
        None => true,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InterestFilter {
    radius_cap_sq: f32,
}

impl InterestFilter {
    pub fn new(radius_cap_sq: f32) -> Self {
        Self { radius_cap_sq }
    }

    pub fn radius_sq_for(&self, receiver: &ReceiverContext) -> f32 {
        (receiver.interest_radius * receiver.interest_radius).min(self.radius_cap_sq)
    }

    pub fn is_visible(&self, receiver: &ReceiverContext, entity: EntityId, position: Vec3) -> bool {
        receiver.entity == Some(entity)
            || is_within_interest(position, receiver.center, self.radius_sq_for(receiver))
    }
}
