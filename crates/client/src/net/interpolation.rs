use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::buffer::{EntityBuffer, Sample};
use super::tuning::SpeciesTuning;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterpolationConfig {
    /// How far behind the estimated server clock entities are drawn, in seconds.
    pub delay: f64,
    /// Bracket distance above which the later sample is taken as-is.
    pub teleport_distance: f32,
    pub max_extrapolation: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            delay: 0.125,
            teleport_distance: 4.0,
            max_extrapolation: 0.35,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    Interpolated,
    Teleported,
    Extrapolated,
    Held,
}

/// Where an entity should be at a given instant according to its buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub position: Vec3,
    pub yaw: f32,
    pub source: TargetSource,
}

/// Samples `buffer` at `now - delay`. `now` is in estimated server seconds.
pub fn sample_target(buffer: &EntityBuffer, now: f64, config: &InterpolationConfig) -> Target {
    let samples = buffer.samples();
    let render_time = now - config.delay;

    if samples.len() < 2 {
        return extrapolate(buffer.last_known(), now, config);
    }

    if let Some(oldest) = samples.front().filter(|s| render_time < s.time) {
        return Target {
            position: oldest.position,
            yaw: oldest.yaw,
            source: TargetSource::Held,
        };
    }

    let bracket = samples
        .iter()
        .zip(samples.iter().skip(1))
        .find(|(from, to)| from.time <= render_time && render_time <= to.time);

    match bracket {
        Some((from, to)) => interpolate(from, to, render_time, config),
        // Past the newest sample: lead from the render clock, not from `now`.
        None => extrapolate(buffer.last_known(), render_time, config),
    }
}

fn interpolate(from: &Sample, to: &Sample, render_time: f64, config: &InterpolationConfig) -> Target {
    if from.position.distance(to.position) > config.teleport_distance {
        return Target {
            position: to.position,
            yaw: to.yaw,
            source: TargetSource::Teleported,
        };
    }

    let span = to.time - from.time;
    let t = if span > 0.0 {
        ((render_time - from.time) / span).clamp(0.0, 1.0) as f32
    } else {
        1.0
    };

    Target {
        position: from.position.lerp(to.position, t),
        yaw: to.yaw,
        source: TargetSource::Interpolated,
    }
}

/// Leads `last` by `at - last.time`, clamped to the extrapolation window.
fn extrapolate(last: &Sample, at: f64, config: &InterpolationConfig) -> Target {
    let ahead = (at - last.time).clamp(0.0, config.max_extrapolation.max(0.0)) as f32;
    Target {
        position: last.position + last.velocity * ahead,
        yaw: last.yaw,
        source: TargetSource::Extrapolated,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub yaw: f32,
}

/// Per-entity exponential smoothing toward the sampled target.
///
/// The smoothing step uses the time since this interpolator last ran, not the
/// frame delta, so an entity skipped for a while catches up when it resumes.
#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    smoothed: Option<Vec3>,
    last_step: Option<f64>,
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, target: Target, now: f64, tuning: SpeciesTuning) -> Pose {
        let position = match (self.smoothed, self.last_step) {
            (Some(current), Some(last)) if target.source != TargetSource::Teleported => {
                let elapsed = (now - last).max(0.0) as f32;
                let alpha = 1.0 - (-elapsed * tuning.interp_speed).exp();
                current.lerp(target.position, alpha)
            }
            _ => target.position,
        };
        self.smoothed = Some(position);
        self.last_step = Some(now);

        Pose {
            position,
            yaw: (target.yaw + tuning.yaw_offset).rem_euclid(360.0),
        }
    }

    pub fn smoothed(&self) -> Option<Vec3> {
        self.smoothed
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::net::buffer::BufferConfig;

    fn moving(time: f64, x: f32, vx: f32) -> Sample {
        Sample {
            time,
            position: Vec3::new(x, 0.0, 0.0),
            yaw: 0.0,
            velocity: Vec3::new(vx, 0.0, 0.0),
        }
    }

    fn buffer_of(samples: &[Sample]) -> EntityBuffer {
        let config = BufferConfig::default();
        let mut buffer = EntityBuffer::new(samples[0]);
        for sample in &samples[1..] {
            buffer.push(*sample, &config);
        }
        buffer
    }

    #[test]
    fn lerps_between_brackets() {
        let buffer = buffer_of(&[moving(1.0, 0.0, 0.0), moving(1.1, 1.0, 0.0)]);
        let target = sample_target(&buffer, 1.175, &InterpolationConfig::default());
        assert_eq!(target.source, TargetSource::Interpolated);
        assert!((target.position.x - 0.5).abs() < 1e-4);
    }

    #[test]
    fn yaw_takes_the_later_sample() {
        let mut later = moving(1.1, 1.0, 0.0);
        later.yaw = 90.0;
        let buffer = buffer_of(&[moving(1.0, 0.0, 0.0), later]);
        let target = sample_target(&buffer, 1.135, &InterpolationConfig::default());
        assert_eq!(target.yaw, 90.0);
    }

    #[test]
    fn large_jump_snaps_to_later_sample() {
        let buffer = buffer_of(&[moving(1.0, 0.0, 0.0), moving(1.1, 10.0, 0.0)]);
        let target = sample_target(&buffer, 1.175, &InterpolationConfig::default());
        assert_eq!(target.source, TargetSource::Teleported);
        assert_eq!(target.position.x, 10.0);
    }

    #[test]
    fn single_sample_extrapolates_with_clamp() {
        let buffer = buffer_of(&[moving(1.0, 0.0, 2.0)]);
        let config = InterpolationConfig::default();

        let near = sample_target(&buffer, 1.2, &config);
        assert_eq!(near.source, TargetSource::Extrapolated);
        assert!((near.position.x - 0.4).abs() < 1e-4);

        let far = sample_target(&buffer, 5.0, &config);
        assert!((far.position.x - 0.7).abs() < 1e-4);
    }

    #[test]
    fn render_time_before_history_holds_oldest() {
        let buffer = buffer_of(&[moving(2.0, 3.0, 1.0), moving(2.1, 4.0, 1.0)]);
        let target = sample_target(&buffer, 1.0, &InterpolationConfig::default());
        assert_eq!(target.source, TargetSource::Held);
        assert_eq!(target.position.x, 3.0);
    }

    #[test]
    fn smoothing_starts_at_target_then_converges() {
        let tuning = SpeciesTuning {
            interp_speed: 10.0,
            yaw_offset: 180.0,
        };
        let mut interpolator = Interpolator::new();
        let first = Target {
            position: Vec3::ZERO,
            yaw: 270.0,
            source: TargetSource::Interpolated,
        };
        let pose = interpolator.step(first, 2.0, tuning);
        assert_eq!(pose.position, Vec3::ZERO);
        assert_eq!(pose.yaw, 90.0);

        let moved = Target {
            position: Vec3::new(1.0, 0.0, 0.0),
            ..first
        };
        let pose = interpolator.step(moved, 2.1, tuning);
        let expected = 1.0 - (-1.0f32).exp();
        assert!((pose.position.x - expected).abs() < 1e-5);
    }

    #[test]
    fn teleport_skips_smoothing() {
        let tuning = SpeciesTuning::default();
        let mut interpolator = Interpolator::new();
        let start = Target {
            position: Vec3::ZERO,
            yaw: 0.0,
            source: TargetSource::Interpolated,
        };
        interpolator.step(start, 1.0, tuning);
        let jump = Target {
            position: Vec3::splat(50.0),
            yaw: 0.0,
            source: TargetSource::Teleported,
        };
        assert_eq!(interpolator.step(jump, 1.016, tuning).position, Vec3::splat(50.0));
    }

    #[test]
    fn resumed_interpolator_covers_the_skipped_time() {
        let tuning = SpeciesTuning {
            interp_speed: 10.0,
            yaw_offset: 0.0,
        };
        let mut interpolator = Interpolator::new();
        let start = Target {
            position: Vec3::ZERO,
            yaw: 0.0,
            source: TargetSource::Interpolated,
        };
        interpolator.step(start, 1.0, tuning);

        let far = Target {
            position: Vec3::new(8.0, 0.0, 0.0),
            ..start
        };
        let pose = interpolator.step(far, 2.0, tuning);
        let expected = 8.0 * (1.0 - (-10.0f32).exp());
        assert!((pose.position.x - expected).abs() < 1e-3);
    }

    #[test]
    fn running_ahead_of_history_is_continuous() {
        let config = InterpolationConfig::default();
        let buffer = buffer_of(&[moving(1.0, 0.0, 1.0), moving(1.25, 0.25, 1.0)]);

        let inside = sample_target(&buffer, 1.249 + config.delay, &config);
        let beyond = sample_target(&buffer, 1.251 + config.delay, &config);
        assert_eq!(inside.source, TargetSource::Interpolated);
        assert_eq!(beyond.source, TargetSource::Extrapolated);
        assert!((beyond.position.x - inside.position.x).abs() < 0.01);
        assert!((beyond.position.x - 0.251).abs() < 1e-3);
    }

    proptest! {
        #[test]
        fn extrapolation_is_exact_inside_window(
            vx in -20.0f32..20.0,
            ahead in 0.0f64..0.35,
        ) {
            let buffer = buffer_of(&[moving(3.0, 1.0, vx)]);
            let target = sample_target(&buffer, 3.0 + ahead, &InterpolationConfig::default());
            let expected = 1.0 + vx * ahead as f32;
            prop_assert!((target.position.x - expected).abs() < 1e-3);
        }
    }
}
