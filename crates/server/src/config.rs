use std::time::Duration;

use flock::{PacketLossSimulation, ReplicationConfig, DEFAULT_TICK_RATE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub mob_count: usize,
    pub client_timeout: Duration,
    pub stats_interval: Duration,
    pub replication: ReplicationConfig,
    pub global_packet_loss: Option<PacketLossSimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            mob_count: 200,
            client_timeout: Duration::from_secs(30),
            stats_interval: Duration::from_secs(1),
            replication: ReplicationConfig::default(),
            global_packet_loss: None,
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
