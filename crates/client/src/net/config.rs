use std::time::Duration;

use super::animation::AnimationConfig;
use super::buffer::BufferConfig;
use super::interpolation::InterpolationConfig;
use super::tuning::SpeciesTable;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connection_timeout: Duration,
    pub ping_interval: Duration,
    /// Weight given to each new server clock sample.
    pub clock_correction_rate: f64,
    pub buffer: BufferConfig,
    pub interpolation: InterpolationConfig,
    pub animation: AnimationConfig,
    pub species: SpeciesTable,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_millis(500),
            clock_correction_rate: 0.1,
            buffer: BufferConfig::default(),
            interpolation: InterpolationConfig::default(),
            animation: AnimationConfig::default(),
            species: SpeciesTable::default(),
        }
    }
}
