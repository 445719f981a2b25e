use std::collections::HashMap;

use glam::Vec3;

use flock::{DiscreteState, EntityId, EntityKind};

use super::buffer::{BufferConfig, Sample, SnapshotBuffer};
use super::interpolation::{sample_target, InterpolationConfig, Interpolator, Pose};
use super::tuning::SpeciesTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobLifecycleState {
    Spawning,
    Active,
    Dying,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Spawned(EntityId),
    Despawned(EntityId),
    DeathAnimationComplete(EntityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&LifecycleEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathStep {
    Continue,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeathAnimation {
    elapsed: f32,
    duration: f32,
}

impl DeathAnimation {
    pub fn new(duration: f32) -> Self {
        Self {
            elapsed: 0.0,
            duration,
        }
    }

    pub fn step(&mut self, dt: f32) -> DeathStep {
        self.elapsed += dt.max(0.0);
        if self.elapsed >= self.duration {
            DeathStep::Complete
        } else {
            DeathStep::Continue
        }
    }

    pub fn progress(&self) -> f32 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        (self.elapsed / self.duration).clamp(0.0, 1.0)
    }
}

#[derive(Debug)]
pub struct ActiveEntity {
    pub kind: EntityKind,
    pub state: DiscreteState,
    pub variant: Option<u8>,
    interpolator: Interpolator,
    pose: Option<Pose>,
}

impl ActiveEntity {
    pub fn pose(&self) -> Option<Pose> {
        self.pose
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DyingEntity {
    pub kind: EntityKind,
    pub pose: Pose,
    pub animation: DeathAnimation,
}

/// Owns every per-entity client buffer and walks entities through
/// spawn, death and removal. An id absent from both maps is Removed.
pub struct LifecycleManager {
    buffer: SnapshotBuffer,
    active: HashMap<EntityId, ActiveEntity>,
    dying: HashMap<EntityId, DyingEntity>,
    subscribers: Vec<(SubscriptionId, Callback)>,
    next_subscription: u64,
    death_duration: f32,
}

impl LifecycleManager {
    pub fn new(buffer: BufferConfig, death_duration: f32) -> Self {
        Self {
            buffer: SnapshotBuffer::new(buffer),
            active: HashMap::new(),
            dying: HashMap::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
            death_duration,
        }
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&LifecycleEvent) + 'static) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    fn emit(&mut self, event: LifecycleEvent) {
        for (_, callback) in &mut self.subscribers {
            callback(&event);
        }
    }

    pub fn state(&self, id: EntityId) -> MobLifecycleState {
        if self.active.contains_key(&id) {
            MobLifecycleState::Active
        } else if self.dying.contains_key(&id) {
            MobLifecycleState::Dying
        } else {
            MobLifecycleState::Removed
        }
    }

    /// Seeds the buffer with one sample at the spawn point and enters Active.
    /// A spawn for an already active id only refreshes it. A spawn for a dying
    /// id ends the old incarnation with `Despawned` first.
    pub fn spawn(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        variant: Option<u8>,
        seed: Sample,
    ) -> MobLifecycleState {
        if let Some(existing) = self.active.get_mut(&id) {
            existing.kind = kind;
            existing.variant = variant;
            self.buffer.insert(id, seed);
            return MobLifecycleState::Active;
        }

        if self.dying.remove(&id).is_some() {
            self.buffer.remove(id);
            self.emit(LifecycleEvent::Despawned(id));
        }
        log::debug!(
            "entity {} {:?} -> {:?}",
            id.id(),
            MobLifecycleState::Spawning,
            MobLifecycleState::Active
        );
        self.buffer.insert(id, seed);
        self.active.insert(
            id,
            ActiveEntity {
                kind,
                state: DiscreteState::Idle,
                variant,
                interpolator: Interpolator::new(),
                pose: None,
            },
        );
        self.emit(LifecycleEvent::Spawned(id));
        MobLifecycleState::Active
    }

    /// Returns false when the id is not active; such updates are dropped.
    pub fn apply_update(&mut self, id: EntityId, sample: Sample, state: DiscreteState) -> bool {
        let Some(entity) = self.active.get_mut(&id) else {
            log::debug!("dropping update for entity {} ({:?})", id.id(), self.state(id));
            return false;
        };
        entity.state = state;
        self.buffer.insert(id, sample);
        true
    }

    /// Active only. The entity freezes at its last pose and stops taking updates.
    pub fn death(&mut self, id: EntityId, yaw_offset: f32) -> bool {
        let Some(entity) = self.active.remove(&id) else {
            log::debug!("ignoring death of entity {} ({:?})", id.id(), self.state(id));
            return false;
        };
        let pose = entity.pose.or_else(|| {
            self.buffer.get(id).map(|b| {
                let last = b.last_known();
                Pose {
                    position: last.position,
                    yaw: (last.yaw + yaw_offset).rem_euclid(360.0),
                }
            })
        });
        self.dying.insert(
            id,
            DyingEntity {
                kind: entity.kind,
                pose: pose.unwrap_or(Pose {
                    position: Vec3::ZERO,
                    yaw: 0.0,
                }),
                animation: DeathAnimation::new(self.death_duration),
            },
        );
        true
    }

    /// Removes a live or dying entity at once. Repeated calls are no-ops.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        let was_live = self.active.remove(&id).is_some() | self.dying.remove(&id).is_some();
        if !was_live {
            return false;
        }
        self.buffer.remove(id);
        self.emit(LifecycleEvent::Despawned(id));
        true
    }

    /// Advances every death animation; returns the ids that finished.
    pub fn step_dying(&mut self, dt: f32) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.dying.keys().copied().collect();
        ids.sort();

        let mut finished = Vec::new();
        for id in ids {
            let Some(dying) = self.dying.get_mut(&id) else {
                continue;
            };
            if dying.animation.step(dt) == DeathStep::Complete {
                self.dying.remove(&id);
                self.buffer.remove(id);
                self.emit(LifecycleEvent::DeathAnimationComplete(id));
                finished.push(id);
            }
        }
        finished
    }

    /// Samples the buffer and advances the entity's smoothing to `now`.
    pub fn animate(
        &mut self,
        id: EntityId,
        now: f64,
        config: &InterpolationConfig,
        species: &SpeciesTable,
    ) -> Option<Pose> {
        let entity = self.active.get_mut(&id)?;
        let buffer = self.buffer.get(id)?;
        let target = sample_target(buffer, now, config);
        let pose = entity.interpolator.step(target, now, species.get(entity.kind));
        entity.pose = Some(pose);
        Some(pose)
    }

    /// Newest replicated position of an active entity. Unlike the drawn pose
    /// this keeps moving while the entity is culled or deferred.
    pub fn resting_position(&self, id: EntityId) -> Option<Vec3> {
        if !self.active.contains_key(&id) {
            return None;
        }
        self.buffer.get(id).map(|b| b.last_known().position)
    }

    pub fn active(&self) -> impl Iterator<Item = (EntityId, &ActiveEntity)> {
        self.active.iter().map(|(id, entity)| (*id, entity))
    }

    pub fn active_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.active.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: EntityId) -> Option<&ActiveEntity> {
        self.active.get(&id)
    }

    pub fn dying(&self) -> impl Iterator<Item = (EntityId, &DyingEntity)> {
        self.dying.iter().map(|(id, entity)| (*id, entity))
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn dying_count(&self) -> usize {
        self.dying.len()
    }

    /// Drops every entity without emitting events.
    pub fn clear(&mut self) {
        self.active.clear();
        self.dying.clear();
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::net::tuning::SpeciesTable;

    fn seed(time: f64, x: f32) -> Sample {
        Sample::at_rest(time, Vec3::new(x, 0.0, 0.0), 0.0)
    }

    fn recording(manager: &mut LifecycleManager) -> Rc<RefCell<Vec<LifecycleEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        manager.subscribe(move |event| sink.borrow_mut().push(*event));
        events
    }

    #[test]
    fn spawn_enters_active_with_a_seed_sample() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 1.0);
        let events = recording(&mut manager);

        let state = manager.spawn(EntityId(1), EntityKind::Cow, None, seed(0.0, 2.0));
        assert_eq!(state, MobLifecycleState::Active);
        assert_eq!(manager.buffer().get(EntityId(1)).map(|b| b.len()), Some(1));
        assert_eq!(*events.borrow(), vec![LifecycleEvent::Spawned(EntityId(1))]);
    }

    #[test]
    fn updates_for_unknown_entities_are_dropped() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 1.0);
        assert!(!manager.apply_update(EntityId(4), seed(0.1, 1.0), DiscreteState::Walk));
        assert!(manager.buffer().is_empty());
    }

    #[test]
    fn death_requires_active() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 1.0);
        assert!(!manager.death(EntityId(3), 0.0));
        manager.spawn(EntityId(3), EntityKind::Pig, None, seed(0.0, 0.0));
        assert!(manager.death(EntityId(3), 0.0));
        assert!(!manager.death(EntityId(3), 0.0));
        assert_eq!(manager.state(EntityId(3)), MobLifecycleState::Dying);
    }

    #[test]
    fn despawn_during_death_short_circuits() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 1.0);
        let events = recording(&mut manager);
        let id = EntityId(7);
        manager.spawn(id, EntityKind::Sheep, Some(1), seed(0.0, 5.0));

        assert!(manager.death(id, 0.0));
        assert!(!manager.apply_update(id, seed(0.1, 9.0), DiscreteState::Walk));
        assert!(manager.get(id).is_none());
        manager.step_dying(0.3);

        assert!(manager.despawn(id));
        assert!(manager.step_dying(1.0).is_empty());
        assert_eq!(manager.state(id), MobLifecycleState::Removed);
        assert!(!manager.buffer().contains(id));
        assert_eq!(
            *events.borrow(),
            vec![LifecycleEvent::Spawned(id), LifecycleEvent::Despawned(id)]
        );
    }

    #[test]
    fn despawn_is_idempotent() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 1.0);
        let events = recording(&mut manager);
        manager.spawn(EntityId(2), EntityKind::Zombie, None, seed(0.0, 0.0));

        assert!(manager.despawn(EntityId(2)));
        assert!(!manager.despawn(EntityId(2)));
        let despawns = events
            .borrow()
            .iter()
            .filter(|e| matches!(e, LifecycleEvent::Despawned(_)))
            .count();
        assert_eq!(despawns, 1);
    }

    #[test]
    fn death_animation_completes_once() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 0.5);
        let events = recording(&mut manager);
        manager.spawn(EntityId(9), EntityKind::Spider, None, seed(0.0, 0.0));
        manager.death(EntityId(9), 0.0);

        assert!(manager.step_dying(0.25).is_empty());
        let progress = manager.dying().next().map(|(_, d)| d.animation.progress());
        assert_eq!(progress, Some(0.5));
        assert_eq!(manager.step_dying(0.25), vec![EntityId(9)]);
        assert!(manager.step_dying(0.25).is_empty());
        assert!(!manager.despawn(EntityId(9)));
        assert_eq!(
            events.borrow().last(),
            Some(&LifecycleEvent::DeathAnimationComplete(EntityId(9)))
        );
    }

    #[test]
    fn unsubscribed_callbacks_stop_firing() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 1.0);
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let sub = manager.subscribe(move |_| *sink.borrow_mut() += 1);

        manager.spawn(EntityId(1), EntityKind::Cow, None, seed(0.0, 0.0));
        assert!(manager.unsubscribe(sub));
        manager.despawn(EntityId(1));
        assert_eq!(*count.borrow(), 1);
        assert!(!manager.unsubscribe(sub));
    }

    #[test]
    fn animate_follows_the_buffer() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 1.0);
        let id = EntityId(5);
        manager.spawn(id, EntityKind::Player, None, seed(1.0, 0.0));
        manager.apply_update(id, seed(1.05, 0.5), DiscreteState::Walk);
        manager.apply_update(id, seed(1.1, 1.0), DiscreteState::Walk);

        let pose = manager
            .animate(id, 1.175, &InterpolationConfig::default(), &SpeciesTable::default())
            .unwrap();
        assert!((pose.position.x - 0.5).abs() < 1e-4);
        assert_eq!(manager.get(id).map(|e| e.state), Some(DiscreteState::Walk));
    }

    #[test]
    fn respawn_over_a_dying_entity_despawns_it_first() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 1.0);
        let events = recording(&mut manager);
        let id = EntityId(11);
        manager.spawn(id, EntityKind::Cow, None, seed(0.0, 0.0));
        manager.death(id, 0.0);

        assert_eq!(
            manager.spawn(id, EntityKind::Cow, Some(2), seed(1.0, 6.0)),
            MobLifecycleState::Active
        );
        assert_eq!(manager.dying_count(), 0);
        assert_eq!(manager.buffer().get(id).map(|b| b.len()), Some(1));
        assert_eq!(
            *events.borrow(),
            vec![
                LifecycleEvent::Spawned(id),
                LifecycleEvent::Despawned(id),
                LifecycleEvent::Spawned(id),
            ]
        );
        assert!(manager.step_dying(2.0).is_empty());
    }

    #[test]
    fn resting_position_tracks_updates_without_animation() {
        let mut manager = LifecycleManager::new(BufferConfig::default(), 1.0);
        let id = EntityId(6);
        manager.spawn(id, EntityKind::Pig, None, seed(1.0, 0.0));
        manager.animate(id, 1.2, &InterpolationConfig::default(), &SpeciesTable::default());

        manager.apply_update(id, seed(1.05, 20.0), DiscreteState::Walk);
        assert_eq!(manager.resting_position(id), Some(Vec3::new(20.0, 0.0, 0.0)));
        assert_eq!(manager.get(id).and_then(|e| e.pose()).map(|p| p.position.x), Some(0.0));

        manager.death(id, 0.0);
        assert_eq!(manager.resting_position(id), None);
    }
}
