use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Artificial outbound loss for exercising the delta and full-sync healing.
#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn new(loss_percent: f32) -> Self {
        Self {
            enabled: loss_percent > 0.0,
            loss_percent: loss_percent.clamp(0.0, 100.0),
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_unit() * 100.0 < self.loss_percent
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub packets_rejected: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
}

impl NetworkStats {
    pub fn record_rtt(&mut self, sample_ms: f32) {
        if self.rtt_ms == 0.0 {
            self.rtt_ms = sample_ms;
        } else {
            self.rtt_ms += (sample_ms - self.rtt_ms) * 0.125;
        }
    }
}

/// Uniform in `[0, 1]`.
pub fn rand_unit() -> f32 {
    (rand_u64() >> 40) as f32 / (1u64 << 24) as f32
}

pub fn rand_u64() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut hasher = DefaultHasher::new();
    Instant::now().hash(&mut hasher);
    COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    hasher.finish()
}
