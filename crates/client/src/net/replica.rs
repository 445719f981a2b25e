use std::collections::HashSet;

use glam::Vec3;

use flock::replication::angle_from_index;
use flock::{EntityId, EntityKind, Quantizer, TickMessage};

use super::animation::AnimationScheduler;
use super::buffer::Sample;
use super::config::ClientConfig;
use super::lifecycle::{LifecycleEvent, LifecycleManager, SubscriptionId};

/// Tracks the offset between the local clock and the server's, both in seconds.
#[derive(Debug, Clone)]
pub struct ServerClock {
    offset: Option<f64>,
    correction_rate: f64,
}

impl ServerClock {
    pub fn new(correction_rate: f64) -> Self {
        Self {
            offset: None,
            correction_rate: correction_rate.clamp(0.0, 1.0),
        }
    }

    pub fn observe(&mut self, server_time: f64, local_now: f64) {
        let sample = server_time - local_now;
        self.offset = Some(match self.offset {
            Some(offset) => offset + (sample - offset) * self.correction_rate,
            None => sample,
        });
    }

    pub fn now(&self, local_now: f64) -> Option<f64> {
        self.offset.map(|offset| local_now + offset)
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    pub fn reset(&mut self) {
        self.offset = None;
    }
}

/// Pose for one active entity, handed to whatever draws it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityPose {
    pub id: EntityId,
    pub kind: EntityKind,
    pub variant: Option<u8>,
    pub position: Vec3,
    pub yaw: f32,
    pub state: &'static str,
    /// False when the pose was carried over from an earlier frame.
    pub animate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DyingPose {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec3,
    pub yaw: f32,
    pub progress: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub poses: Vec<EntityPose>,
    pub dying: Vec<DyingPose>,
    pub budget: usize,
    pub culled: usize,
    pub deferred: usize,
}

impl Frame {
    pub fn animated(&self) -> usize {
        self.poses.iter().filter(|p| p.animate).count()
    }
}

/// Client half of replication: applies tick messages and produces poses.
pub struct ClientReplication {
    config: ClientConfig,
    quantizer: Quantizer,
    own_entity: Option<EntityId>,
    clock: ServerClock,
    lifecycle: LifecycleManager,
    scheduler: AnimationScheduler,
    last_tick: Option<u32>,
}

impl ClientReplication {
    pub fn new(config: ClientConfig, quantizer: Quantizer, own_entity: Option<EntityId>) -> Self {
        Self {
            clock: ServerClock::new(config.clock_correction_rate),
            lifecycle: LifecycleManager::new(config.buffer, config.animation.death_duration),
            scheduler: AnimationScheduler::new(config.animation),
            quantizer,
            own_entity,
            last_tick: None,
            config,
        }
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&LifecycleEvent) + 'static) -> SubscriptionId {
        self.lifecycle.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.lifecycle.unsubscribe(id)
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }

    pub fn last_tick(&self) -> Option<u32> {
        self.last_tick
    }

    /// Applies one tick message. Deaths and despawns go first, then entities
    /// missing from the current set, then spawns, then updates.
    pub fn ingest(&mut self, message: TickMessage, local_now: f64) -> bool {
        if self.last_tick.is_some_and(|last| message.tick <= last) {
            log::debug!("ignoring stale tick {}", message.tick);
            return false;
        }
        self.last_tick = Some(message.tick);

        let time = message.server_time_ms as f64 / 1000.0;
        self.clock.observe(time, local_now);

        for id in message.deaths.iter().copied().map(EntityId) {
            let offset = self
                .lifecycle
                .get(id)
                .map(|e| self.config.species.get(e.kind).yaw_offset)
                .unwrap_or(0.0);
            self.lifecycle.death(id, offset);
        }
        for id in message.despawns.iter().copied().map(EntityId) {
            self.lifecycle.despawn(id);
        }

        let current: HashSet<EntityId> = message.current.iter().copied().map(EntityId).collect();
        for id in self.lifecycle.active_ids() {
            if !current.contains(&id) {
                log::debug!("entity {} left the current set", id.id());
                self.lifecycle.despawn(id);
            }
        }

        for spawn in &message.spawns {
            let seed = Sample::at_rest(
                time,
                Vec3::from(spawn.position),
                angle_from_index(spawn.yaw),
            );
            self.lifecycle.spawn(
                EntityId(spawn.entity_id),
                EntityKind::from(spawn.kind),
                spawn.variant,
                seed,
            );
        }

        for update in &message.updates {
            let sample = Sample {
                time,
                position: self.quantizer.position(&update.state),
                yaw: angle_from_index(update.state.yaw),
                velocity: self.quantizer.velocity(&update.state),
            };
            self.lifecycle.apply_update(
                EntityId(update.entity_id),
                sample,
                update.state.discrete_state(),
            );
        }

        true
    }

    /// Advances death animations and poses every active entity in range.
    /// Produces an empty frame until the first message arrives.
    pub fn render_frame(&mut self, local_now: f64, dt: f32) -> Frame {
        let Some(now) = self.clock.now(local_now) else {
            return Frame::default();
        };

        self.lifecycle.step_dying(dt);
        let mut dying: Vec<DyingPose> = self
            .lifecycle
            .dying()
            .map(|(id, d)| DyingPose {
                id,
                kind: d.kind,
                position: d.pose.position,
                yaw: d.pose.yaw,
                progress: d.animation.progress(),
            })
            .collect();
        dying.sort_by_key(|d| d.id);

        let viewer = self
            .own_entity
            .and_then(|id| self.lifecycle.resting_position(id))
            .unwrap_or(Vec3::ZERO);
        let candidates: Vec<(EntityId, Vec3)> = self
            .lifecycle
            .active_ids()
            .into_iter()
            .filter_map(|id| self.lifecycle.resting_position(id).map(|p| (id, p)))
            .collect();
        let schedule = self.scheduler.schedule(viewer, &candidates, dt);

        let mut poses = Vec::with_capacity(schedule.animate.len() + schedule.deferred.len());
        for &id in &schedule.animate {
            let Some(pose) =
                self.lifecycle
                    .animate(id, now, &self.config.interpolation, &self.config.species)
            else {
                continue;
            };
            if let Some(entity) = self.lifecycle.get(id) {
                poses.push(EntityPose {
                    id,
                    kind: entity.kind,
                    variant: entity.variant,
                    position: pose.position,
                    yaw: pose.yaw,
                    state: entity.state.as_str(),
                    animate: true,
                });
            }
        }
        for &id in &schedule.deferred {
            let Some(entity) = self.lifecycle.get(id) else {
                continue;
            };
            let Some(pose) = entity.pose() else {
                continue;
            };
            poses.push(EntityPose {
                id,
                kind: entity.kind,
                variant: entity.variant,
                position: pose.position,
                yaw: pose.yaw,
                state: entity.state.as_str(),
                animate: false,
            });
        }

        Frame {
            poses,
            dying,
            budget: schedule.budget,
            culled: schedule.culled.len(),
            deferred: schedule.deferred.len(),
        }
    }

    pub fn clear(&mut self) {
        self.lifecycle.clear();
        self.clock.reset();
        self.last_tick = None;
    }
}
