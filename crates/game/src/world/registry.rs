use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;

use super::entity::{Entity, EntityId, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldEvent {
    Spawned(EntityId),
    Despawned(EntityId),
    Died(EntityId),
}

/// Authoritative entity registry. Replication only ever reads frozen copies of it.
#[derive(Debug)]
pub struct World {
    tick: u32,
    start: Instant,
    entities: HashMap<EntityId, Entity>,
    next_entity_id: u32,
    events: Vec<WorldEvent>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            tick: 0,
            start: Instant::now(),
            entities: HashMap::new(),
            next_entity_id: 1,
            events: Vec::new(),
        }
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn advance_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    pub fn server_time_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn spawn(&mut self, kind: EntityKind, position: Vec3) -> EntityId {
        let id = self.allocate_id();
        self.insert(Entity::new(id, kind, position))
    }

    pub fn spawn_player(&mut self, spawn_position: Vec3) -> EntityId {
        let id = self.allocate_id();
        self.insert(Entity::player(id, spawn_position))
    }

    pub fn spawn_with(&mut self, build: impl FnOnce(EntityId) -> Entity) -> EntityId {
        let id = self.allocate_id();
        let mut entity = build(id);
        entity.id = id;
        self.insert(entity)
    }

    /// Removes the entity without a death; observers drop it immediately.
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id);
        if entity.is_some() {
            self.events.push(WorldEvent::Despawned(id));
        }
        entity
    }

    /// Removes the entity through death; observers play a terminal animation.
    pub fn kill(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id);
        if entity.is_some() {
            self.events.push(WorldEvent::Died(id));
        }
        entity
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Frozen copy of every live entity, ordered by id.
    pub fn samples(&self) -> Arc<[Entity]> {
        let mut entities: Vec<Entity> = self.entities.values().cloned().collect();
        entities.sort_by_key(|e| e.id);
        entities.into()
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }

    fn insert(&mut self, entity: Entity) -> EntityId {
        let id = entity.id;
        self.entities.insert(id, entity);
        self.events.push(WorldEvent::Spawned(id));
        id
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_are_sorted_copies() {
        let mut world = World::new();
        let a = world.spawn(EntityKind::Sheep, Vec3::new(3.0, 64.0, 0.0));
        let b = world.spawn_player(Vec3::new(0.0, 64.0, 0.0));

        let samples = world.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].id, a);
        assert_eq!(samples[1].id, b);

        if let Some(entity) = world.get_mut(a) {
            entity.state.position.x = 50.0;
        }
        assert_eq!(samples[0].state.position.x, 3.0);
    }

    #[test]
    fn lifecycle_events_in_order() {
        let mut world = World::new();
        let a = world.spawn(EntityKind::Cow, Vec3::ZERO);
        let b = world.spawn(EntityKind::Zombie, Vec3::ZERO);
        world.kill(a);
        world.despawn(b);
        world.despawn(b);

        assert_eq!(
            world.drain_events(),
            vec![
                WorldEvent::Spawned(a),
                WorldEvent::Spawned(b),
                WorldEvent::Died(a),
                WorldEvent::Despawned(b),
            ]
        );
        assert!(world.drain_events().is_empty());
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut world = World::new();
        let a = world.spawn(EntityKind::Pig, Vec3::ZERO);
        world.despawn(a);
        let b = world.spawn(EntityKind::Pig, Vec3::ZERO);
        assert_ne!(a, b);
    }
}
