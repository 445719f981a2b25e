use std::collections::{HashMap, VecDeque};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use flock::EntityId;

/// One received state, stamped with server time in seconds. Yaw is in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub position: Vec3,
    pub yaw: f32,
    pub velocity: Vec3,
}

impl Sample {
    pub fn at_rest(time: f64, position: Vec3, yaw: f32) -> Self {
        Self {
            time,
            position,
            yaw,
            velocity: Vec3::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub max_age: f64,
    pub max_count: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_age: 1.0,
            max_count: 14,
        }
    }
}

/// Time-ordered history for one entity plus the newest sample ever received,
/// which survives trimming so extrapolation always has a source.
#[derive(Debug, Clone)]
pub struct EntityBuffer {
    samples: VecDeque<Sample>,
    last_known: Sample,
}

impl EntityBuffer {
    pub fn new(first: Sample) -> Self {
        let mut samples = VecDeque::new();
        samples.push_back(first);
        Self {
            samples,
            last_known: first,
        }
    }

    pub fn push(&mut self, sample: Sample, config: &BufferConfig) {
        let index = self
            .samples
            .iter()
            .rposition(|s| s.time <= sample.time)
            .map_or(0, |i| i + 1);
        self.samples.insert(index, sample);
        if sample.time >= self.last_known.time {
            self.last_known = sample;
        }
        self.trim(config);
    }

    /// Age first, relative to the newest sample, then count. Oldest go first.
    fn trim(&mut self, config: &BufferConfig) {
        let newest = self.last_known.time;
        while self
            .samples
            .front()
            .is_some_and(|s| newest - s.time > config.max_age)
        {
            self.samples.pop_front();
        }
        while self.samples.len() > config.max_count.max(1) {
            self.samples.pop_front();
        }
    }

    pub fn samples(&self) -> &VecDeque<Sample> {
        &self.samples
    }

    pub fn last_known(&self) -> &Sample {
        &self.last_known
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SnapshotBuffer {
    config: BufferConfig,
    entities: HashMap<EntityId, EntityBuffer>,
}

impl SnapshotBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            entities: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: EntityId, sample: Sample) {
        match self.entities.get_mut(&id) {
            Some(buffer) => buffer.push(sample, &self.config),
            None => {
                self.entities.insert(id, EntityBuffer::new(sample));
            }
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityBuffer> {
        self.entities.get(&id)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<EntityBuffer> {
        self.entities.remove(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.entities.values().map(EntityBuffer::len).sum()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}
