use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use flock::EntityKind;

/// Per-species presentation constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeciesTuning {
    /// Rate of the exponential smoothing toward the sampled target, per second.
    pub interp_speed: f32,
    /// Degrees added to the replicated yaw to match the model's forward axis.
    pub yaw_offset: f32,
}

impl Default for SpeciesTuning {
    fn default() -> Self {
        Self {
            interp_speed: 10.0,
            yaw_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesTable {
    #[serde(default)]
    pub fallback: SpeciesTuning,
    #[serde(default)]
    pub species: HashMap<EntityKind, SpeciesTuning>,
}

impl Default for SpeciesTable {
    fn default() -> Self {
        let entries = [
            (EntityKind::Player, 15.0, 0.0),
            (EntityKind::Sheep, 12.0, 180.0),
            (EntityKind::Cow, 10.0, 180.0),
            (EntityKind::Pig, 12.0, 180.0),
            (EntityKind::Zombie, 8.0, 0.0),
            (EntityKind::Skeleton, 9.0, 0.0),
            (EntityKind::Spider, 11.0, 0.0),
        ];
        Self {
            fallback: SpeciesTuning::default(),
            species: entries
                .into_iter()
                .map(|(kind, interp_speed, yaw_offset)| {
                    (
                        kind,
                        SpeciesTuning {
                            interp_speed,
                            yaw_offset,
                        },
                    )
                })
                .collect(),
        }
    }
}

impl SpeciesTable {
    pub fn get(&self, kind: EntityKind) -> SpeciesTuning {
        self.species.get(&kind).copied().unwrap_or(self.fallback)
    }

    pub fn set(&mut self, kind: EntityKind, tuning: SpeciesTuning) {
        self.species.insert(kind, tuning);
    }
}
