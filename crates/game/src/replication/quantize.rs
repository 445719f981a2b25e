use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::world::{DiscreteState, EntityFlags, RawState};

pub const ANGLE_STEPS: u32 = 256;
pub const ANGLE_STEP_DEGREES: f32 = 360.0 / ANGLE_STEPS as f32;

pub const DEFAULT_POSITION_STEP: f32 = 0.125;
pub const DEFAULT_VELOCITY_STEP: f32 = 1.0 / 16.0;
pub const DEFAULT_HEALTH_STEP: f32 = 0.5;

/// Every numeric field of a [`RawState`] reduced to integer cells.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct QuantizedState {
    pub position: [i32; 3],
    pub yaw: u8,
    pub pitch: u8,
    pub velocity: [i16; 3],
    pub flags: u8,
    pub health: u16,
    pub max_health: u16,
    pub state: u8,
}

impl QuantizedState {
    pub fn flags(&self) -> EntityFlags {
        EntityFlags::from_bits_truncate(self.flags)
    }

    pub fn discrete_state(&self) -> DiscreteState {
        DiscreteState::from(self.state)
    }
}

/// Fixed-step rounding shared by server and client. Pure and stateless.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantizer {
    pub position_step: f32,
    pub velocity_step: f32,
    pub health_step: f32,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self {
            position_step: DEFAULT_POSITION_STEP,
            velocity_step: DEFAULT_VELOCITY_STEP,
            health_step: DEFAULT_HEALTH_STEP,
        }
    }
}

impl Quantizer {
    pub fn quantize_position(&self, x: f32) -> f32 {
        quantize(x, self.position_step)
    }

    pub fn quantize_angle(&self, degrees: f32) -> f32 {
        angle_from_index(angle_index(degrees))
    }

    pub fn quantize_state(&self, state: &RawState) -> QuantizedState {
        let p = state.position;
        let v = state.velocity;
        QuantizedState {
            position: [
                cell(p.x, self.position_step),
                cell(p.y, self.position_step),
                cell(p.z, self.position_step),
            ],
            yaw: angle_index(state.yaw),
            pitch: angle_index(state.pitch),
            velocity: [
                velocity_cell(v.x, self.velocity_step),
                velocity_cell(v.y, self.velocity_step),
                velocity_cell(v.z, self.velocity_step),
            ],
            flags: state.flags.bits(),
            health: health_cell(state.health, self.health_step),
            max_health: health_cell(state.max_health, self.health_step),
            state: state.state as u8,
        }
    }

    pub fn position(&self, state: &QuantizedState) -> Vec3 {
        Vec3::new(
            state.position[0] as f32 * self.position_step,
            state.position[1] as f32 * self.position_step,
            state.position[2] as f32 * self.position_step,
        )
    }

    pub fn velocity(&self, state: &QuantizedState) -> Vec3 {
        Vec3::new(
            state.velocity[0] as f32 * self.velocity_step,
            state.velocity[1] as f32 * self.velocity_step,
            state.velocity[2] as f32 * self.velocity_step,
        )
    }

    pub fn health(&self, state: &QuantizedState) -> (f32, f32) {
        (
            state.health as f32 * self.health_step,
            state.max_health as f32 * self.health_step,
        )
    }
}

/// `round(x / step) * step`.
pub fn quantize(x: f32, step: f32) -> f32 {
    (x / step).round() * step
}

fn cell(x: f32, step: f32) -> i32 {
    (x / step).round() as i32
}

/// Saturates instead of wrapping when the value does not fit the wire type.
fn velocity_cell(x: f32, step: f32) -> i16 {
    cell(x, step).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn health_cell(x: f32, step: f32) -> u16 {
    cell(x.max(0.0), step).clamp(0, u16::MAX as i32) as u16
}

/// Wraps into [0, 360) and maps onto one of [`ANGLE_STEPS`] slots.
pub fn angle_index(degrees: f32) -> u8 {
    let wrapped = degrees.rem_euclid(360.0);
    ((wrapped / ANGLE_STEP_DEGREES).round() as u32 % ANGLE_STEPS) as u8
}

pub fn angle_from_index(index: u8) -> f32 {
    index as f32 * ANGLE_STEP_DEGREES
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn angle_wraps_negative_and_full_turn() {
        assert_eq!(angle_index(0.0), 0);
        assert_eq!(angle_index(360.0), 0);
        assert_eq!(angle_index(-90.0), angle_index(270.0));
        assert_eq!(angle_index(359.9), 0);
        assert_eq!(angle_index(ANGLE_STEP_DEGREES * 3.0), 3);
    }

    #[test]
    fn state_cells_decode() {
        let quantizer = Quantizer::default();
        let mut raw = RawState::at(Vec3::new(1.0, 64.0, -2.5));
        raw.velocity = Vec3::new(0.5, 0.0, -1.0);
        raw.health = 7.3;

        let q = quantizer.quantize_state(&raw);
        assert_eq!(quantizer.position(&q), Vec3::new(1.0, 64.0, -2.5));
        assert_eq!(quantizer.velocity(&q), Vec3::new(0.5, 0.0, -1.0));
        assert_eq!(quantizer.health(&q).0, 7.5);
        assert!(q.flags().contains(EntityFlags::GROUNDED));
    }

    #[test]
    fn sub_step_motion_shares_a_cell() {
        let quantizer = Quantizer::default();
        let a = quantizer.quantize_state(&RawState::at(Vec3::new(0.0, 64.0, 0.0)));
        let b = quantizer.quantize_state(&RawState::at(Vec3::new(0.05, 64.0, 0.0)));
        let c = quantizer.quantize_state(&RawState::at(Vec3::new(0.5, 64.0, 0.0)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn out_of_range_cells_saturate() {
        let quantizer = Quantizer::default();
        let mut raw = RawState::at(Vec3::new(0.0, 64.0, 0.0));
        raw.velocity = Vec3::new(1.0e9, -1.0e9, 0.0);
        raw.health = 1.0e9;
        raw.max_health = f32::INFINITY;

        let q = quantizer.quantize_state(&raw);
        let velocity = quantizer.velocity(&q);
        assert!(velocity.x > 0.0);
        assert!(velocity.y < 0.0);
        assert_eq!(q.velocity[0], i16::MAX);
        assert_eq!(q.velocity[1], i16::MIN);
        assert_eq!(q.health, u16::MAX);
        assert_eq!(q.max_health, u16::MAX);
    }

    proptest! {
        #[test]
        fn position_quantization_is_idempotent(x in -10_000.0f32..10_000.0) {
            let quantizer = Quantizer::default();
            let once = quantizer.quantize_position(x);
            prop_assert_eq!(quantizer.quantize_position(once), once);
        }

        #[test]
        fn position_error_is_bounded(x in -10_000.0f32..10_000.0) {
            let quantizer = Quantizer::default();
            let error = (quantizer.quantize_position(x) - x).abs();
            prop_assert!(error <= quantizer.position_step / 2.0 + 1e-3);
        }

        #[test]
        fn angle_quantization_is_idempotent(deg in -720.0f32..720.0) {
            let once = angle_index(deg);
            prop_assert_eq!(angle_index(angle_from_index(once)), once);
        }

        #[test]
        fn angle_error_is_bounded(deg in 0.0f32..360.0) {
            let quantized = angle_from_index(angle_index(deg));
            let diff = (quantized - deg).rem_euclid(360.0);
            let error = diff.min(360.0 - diff);
            prop_assert!(error <= ANGLE_STEP_DEGREES / 2.0 + 1e-3);
        }
    }
}
