use std::collections::HashMap;

use glam::Vec3;

use flock::{DiscreteState, Entity, EntityFlags, EntityId, EntityKind, World};

const GROUND_HEIGHT: f32 = 64.0;
const RESPAWN_DELAY: f32 = 3.0;
const PATROL_RADIUS: f32 = 12.0;
const PATROL_SPEED: f32 = 0.25;

/// Xorshift64 noise for the demo herd.
#[derive(Debug, Clone)]
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn unit(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.unit()
    }

    pub fn pick<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            return None;
        }
        Some(items[(self.next_u64() % items.len() as u64) as usize])
    }
}

#[derive(Debug, Clone, Copy)]
struct Brain {
    mode: DiscreteState,
    timer: f32,
    heading: f32,
}

/// Demo population: mobs wander, graze and idle; one dies every
/// `death_interval` seconds and a replacement appears a few seconds later.
pub struct Herd {
    rng: Rng,
    brains: HashMap<EntityId, Brain>,
    population: usize,
    half_extent: f32,
    death_interval: f32,
    death_timer: f32,
    respawns: Vec<f32>,
}

impl Herd {
    pub fn new(population: usize, seed: u64) -> Self {
        let half_extent = (population as f32).sqrt().mul_add(6.0, 32.0);
        Self {
            rng: Rng::new(seed),
            brains: HashMap::new(),
            population,
            half_extent,
            death_interval: 5.0,
            death_timer: 5.0,
            respawns: Vec::new(),
        }
    }

    pub fn with_death_interval(mut self, seconds: f32) -> Self {
        self.death_interval = seconds;
        self.death_timer = seconds;
        self
    }

    pub fn half_extent(&self) -> f32 {
        self.half_extent
    }

    pub fn living(&self) -> usize {
        self.brains.len()
    }

    pub fn populate(&mut self, world: &mut World) {
        while self.brains.len() + self.respawns.len() < self.population {
            self.spawn_one(world);
        }
        log::info!("herd of {} mobs in a {:.0}m square", self.brains.len(), self.half_extent * 2.0);
    }

    pub fn simulate(&mut self, world: &mut World, dt: f32) {
        let ids: Vec<EntityId> = self.brains.keys().copied().collect();
        for id in ids {
            let Some(entity) = world.get_mut(id) else {
                self.brains.remove(&id);
                continue;
            };
            if let Some(brain) = self.brains.get_mut(&id) {
                step_mob(entity, brain, &mut self.rng, self.half_extent, dt);
            }
        }

        if self.death_interval > 0.0 {
            self.death_timer -= dt;
            if self.death_timer <= 0.0 {
                self.death_timer += self.death_interval;
                self.kill_random(world);
            }
        }

        let mut due = 0;
        self.respawns.retain_mut(|timer| {
            *timer -= dt;
            if *timer <= 0.0 {
                due += 1;
                false
            } else {
                true
            }
        });
        for _ in 0..due {
            self.spawn_one(world);
        }
    }

    fn kill_random(&mut self, world: &mut World) {
        let mut ids: Vec<EntityId> = self.brains.keys().copied().collect();
        ids.sort();
        let Some(victim) = self.rng.pick(&ids) else {
            return;
        };
        self.brains.remove(&victim);
        if let Some(entity) = world.kill(victim) {
            log::debug!("{:?} {} died", entity.kind, victim.id());
            self.respawns.push(RESPAWN_DELAY);
        }
    }

    fn spawn_one(&mut self, world: &mut World) {
        let kind = self.rng.pick(&EntityKind::MOBS).unwrap_or(EntityKind::Sheep);
        let x = self.rng.range(-self.half_extent, self.half_extent);
        let z = self.rng.range(-self.half_extent, self.half_extent);
        let variant = (self.rng.next_u64() % 4) as u8;
        let heading = self.rng.range(0.0, 360.0);

        let id = world.spawn_with(|id| {
            let mut entity =
                Entity::new(id, kind, Vec3::new(x, GROUND_HEIGHT, z)).with_variant(variant);
            entity.state.yaw = heading;
            entity
        });
        self.brains.insert(
            id,
            Brain {
                mode: DiscreteState::Idle,
                timer: 0.0,
                heading,
            },
        );
    }
}

fn step_mob(entity: &mut Entity, brain: &mut Brain, rng: &mut Rng, half_extent: f32, dt: f32) {
    brain.timer -= dt;
    if brain.timer <= 0.0 {
        let roll = rng.unit();
        brain.mode = if entity.kind.is_hostile() && roll < 0.2 {
            DiscreteState::Run
        } else if roll < 0.55 {
            DiscreteState::Walk
        } else if roll < 0.8 && !entity.kind.is_hostile() {
            DiscreteState::Graze
        } else {
            DiscreteState::Idle
        };
        brain.heading = (brain.heading + rng.range(-90.0, 90.0)).rem_euclid(360.0);
        brain.timer = rng.range(1.5, 5.0);
    }

    let speed = match brain.mode {
        DiscreteState::Walk => 1.2,
        DiscreteState::Run => 3.5,
        _ => 0.0,
    };
    let (sin, cos) = brain.heading.to_radians().sin_cos();
    let velocity = Vec3::new(sin * speed, 0.0, cos * speed);
    let mut position = entity.state.position + velocity * dt;

    if position.x.abs() > half_extent || position.z.abs() > half_extent {
        brain.heading = (brain.heading + 180.0).rem_euclid(360.0);
        position.x = position.x.clamp(-half_extent, half_extent);
        position.z = position.z.clamp(-half_extent, half_extent);
    }

    let state = &mut entity.state;
    state.position = position;
    state.velocity = velocity;
    state.yaw = brain.heading;
    state.pitch = if brain.mode == DiscreteState::Graze { 30.0 } else { 0.0 };
    state.state = brain.mode;
    state.flags = EntityFlags::GROUNDED;
    state.flags.set(EntityFlags::SPRINT, brain.mode == DiscreteState::Run);
}

/// Moves a client's stand-in entity around a circle so observers have a
/// steadily moving player to watch.
pub fn patrol(entity: &mut Entity, elapsed: f32, phase: f32) {
    let angle = elapsed * PATROL_SPEED + phase;
    let (sin, cos) = angle.sin_cos();
    let position = Vec3::new(cos * PATROL_RADIUS, GROUND_HEIGHT, sin * PATROL_RADIUS);
    let tangent = Vec3::new(-sin, 0.0, cos) * PATROL_RADIUS * PATROL_SPEED;

    let state = &mut entity.state;
    state.position = position;
    state.velocity = tangent;
    state.yaw = tangent.x.atan2(tangent.z).to_degrees().rem_euclid(360.0);
    state.state = DiscreteState::Walk;
}
