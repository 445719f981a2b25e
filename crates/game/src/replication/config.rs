use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::quantize::Quantizer;

pub const DEFAULT_INTEREST_RADIUS: f32 = 64.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub quantizer: Quantizer,
    /// Radius given to receivers that do not ask for their own.
    pub interest_radius: f32,
    /// Upper bound applied to every receiver's radius.
    pub max_interest_radius: f32,
    /// Zero runs every job on the calling thread.
    pub worker_count: usize,
    pub receivers_per_job: usize,
    pub job_timeout: Duration,
    /// Every Nth tick resends everything visible. Zero disables.
    pub full_sync_interval: u32,
    pub max_queue_depth: usize,
    /// Entities carrying a spawn or update in one message; the rest wait for a
    /// later tick. Zero disables.
    pub max_entities_per_message: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            quantizer: Quantizer::default(),
            interest_radius: DEFAULT_INTEREST_RADIUS,
            max_interest_radius: 128.0,
            worker_count: 4,
            receivers_per_job: 8,
            job_timeout: Duration::from_millis(250),
            full_sync_interval: 100,
            max_queue_depth: 256,
            max_entities_per_message: 160,
        }
    }
}

impl ReplicationConfig {
    pub fn max_interest_radius_sq(&self) -> f32 {
        self.max_interest_radius * self.max_interest_radius
    }

    pub fn is_full_sync_tick(&self, tick: u32) -> bool {
        self.full_sync_interval > 0 && tick % self.full_sync_interval == 0
    }
}
