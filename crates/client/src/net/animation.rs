use glam::Vec3;
use serde::{Deserialize, Serialize};

use flock::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimationConfig {
    /// Frame time the base budget is sized for.
    pub target_dt: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub base_budget: usize,
    pub floor: usize,
    pub ceiling: usize,
    pub render_distance: f32,
    pub priority_near_radius: f32,
    /// Length of the client-side death animation in seconds.
    pub death_duration: f32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            target_dt: 1.0 / 60.0,
            min_scale: 0.25,
            max_scale: 1.0,
            base_budget: 48,
            floor: 8,
            ceiling: 96,
            render_distance: 96.0,
            priority_near_radius: 16.0,
            death_duration: 1.0,
        }
    }
}

/// Which entities get fresh poses this frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    pub animate: Vec<EntityId>,
    /// In range but over budget; they keep their previous pose.
    pub deferred: Vec<EntityId>,
    pub culled: Vec<EntityId>,
    pub budget: usize,
}

#[derive(Debug, Clone)]
pub struct AnimationScheduler {
    config: AnimationConfig,
}

impl AnimationScheduler {
    pub fn new(config: AnimationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnimationConfig {
        &self.config
    }

    pub fn budget(&self, actual_dt: f32) -> usize {
        let c = &self.config;
        let scale = if actual_dt > 0.0 {
            (c.target_dt / actual_dt).clamp(c.min_scale, c.max_scale)
        } else {
            c.max_scale
        };
        let scaled = (c.base_budget as f32 * scale).round() as usize;
        scaled.clamp(c.floor, c.ceiling.max(c.floor))
    }

    pub fn schedule(&self, viewer: Vec3, candidates: &[(EntityId, Vec3)], actual_dt: f32) -> Schedule {
        let budget = self.budget(actual_dt);
        let near_sq = self.config.priority_near_radius * self.config.priority_near_radius;
        let far_sq = self.config.render_distance * self.config.render_distance;

        let mut schedule = Schedule {
            budget,
            ..Default::default()
        };
        let mut far = Vec::new();

        for &(id, position) in candidates {
            let distance_sq = viewer.distance_squared(position);
            if distance_sq > far_sq {
                schedule.culled.push(id);
            } else if distance_sq <= near_sq {
                schedule.animate.push(id);
            } else {
                far.push((distance_sq, id));
            }
        }

        far.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let remaining = budget.saturating_sub(schedule.animate.len());
        for (index, (_, id)) in far.into_iter().enumerate() {
            if index < remaining {
                schedule.animate.push(id);
            } else {
                schedule.deferred.push(id);
            }
        }

        schedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(id: u32, x: f32) -> (EntityId, Vec3) {
        (EntityId(id), Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn budget_scales_with_frame_time() {
        let scheduler = AnimationScheduler::new(AnimationConfig::default());
        assert_eq!(scheduler.budget(1.0 / 60.0), 48);
        assert_eq!(scheduler.budget(1.0 / 30.0), 24);
        assert_eq!(scheduler.budget(1.0), 12);
        assert_eq!(scheduler.budget(1.0 / 240.0), 48);
    }

    #[test]
    fn budget_respects_floor() {
        let scheduler = AnimationScheduler::new(AnimationConfig {
            base_budget: 10,
            ..Default::default()
        });
        assert_eq!(scheduler.budget(1.0), 8);
    }

    #[test]
    fn near_entities_ignore_the_budget() {
        let scheduler = AnimationScheduler::new(AnimationConfig {
            base_budget: 8,
            floor: 1,
            ..Default::default()
        });
        let candidates: Vec<_> = (0..12).map(|i| at(i, i as f32)).collect();
        let schedule = scheduler.schedule(Vec3::ZERO, &candidates, 1.0 / 60.0);
        assert_eq!(schedule.animate.len(), 12);
        assert!(schedule.deferred.is_empty());
    }

    #[test]
    fn far_entities_fill_remaining_budget_nearest_first() {
        let scheduler = AnimationScheduler::new(AnimationConfig {
            base_budget: 3,
            floor: 1,
            ..Default::default()
        });
        let candidates = [at(1, 5.0), at(2, 80.0), at(3, 30.0), at(4, 200.0), at(5, 50.0)];
        let schedule = scheduler.schedule(Vec3::ZERO, &candidates, 1.0 / 60.0);
        assert_eq!(schedule.animate, vec![EntityId(1), EntityId(3), EntityId(5)]);
        assert_eq!(schedule.deferred, vec![EntityId(2)]);
        assert_eq!(schedule.culled, vec![EntityId(4)]);
    }
}
