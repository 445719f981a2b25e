use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::net::{EntityUpdate, SpawnMessage, TickMessage};
use crate::world::{Entity, EntityId};

use super::delta::{should_send, LastSentTable};
use super::interest::{InterestFilter, ReceiverContext, ReceiverId};
use super::quantize::Quantizer;

pub type JobId = u64;

/// Computes the bundles for one job. Must be a pure function of the job.
pub type JobRunner = fn(&Job) -> Vec<ReceiverBundle>;

/// One batch of receivers for one tick. Owns everything it reads.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: JobId,
    pub tick: u32,
    pub entities: Arc<[Entity]>,
    pub receivers: Vec<ReceiverContext>,
    pub interest_radius_sq: f32,
    pub last_sent: HashMap<ReceiverId, LastSentTable>,
    pub force_full_sync: bool,
    pub quantizer: Quantizer,
    /// Entities per receiver that may carry a spawn or update. Zero is unlimited.
    pub max_entries: usize,
}

impl Job {
    pub fn receiver_ids(&self) -> Vec<ReceiverId> {
        self.receivers.iter().map(|r| r.receiver_id).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverBundle {
    pub receiver_id: ReceiverId,
    pub current: BTreeSet<EntityId>,
    pub spawns: Vec<SpawnMessage>,
    pub updates: Vec<EntityUpdate>,
    pub new_last_sent: LastSentTable,
    /// Visible entities left for a later tick because the message was full.
    pub held_back: usize,
}

impl ReceiverBundle {
    pub fn new(receiver_id: ReceiverId) -> Self {
        Self {
            receiver_id,
            current: BTreeSet::new(),
            spawns: Vec::new(),
            updates: Vec::new(),
            new_last_sent: LastSentTable::new(),
            held_back: 0,
        }
    }

    pub fn to_message(&self, tick: u32, server_time_ms: u64) -> TickMessage {
        TickMessage {
            tick,
            server_time_ms,
            current: self.current.iter().map(|id| id.0).collect(),
            spawns: self.spawns.clone(),
            updates: self.updates.clone(),
            deaths: Vec::new(),
            despawns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("job {job_id} panicked: {message}")]
    Panicked { job_id: JobId, message: String },
    #[error("job {job_id} did not report back in time")]
    TimedOut { job_id: JobId },
    #[error("worker pool is shut down")]
    PoolClosed,
}

pub fn run_job(job: &Job) -> Vec<ReceiverBundle> {
    let filter = InterestFilter::new(job.interest_radius_sq);
    job.receivers
        .iter()
        .map(|receiver| assemble_receiver(job, &filter, receiver))
        .collect()
}

fn assemble_receiver(
    job: &Job,
    filter: &InterestFilter,
    receiver: &ReceiverContext,
) -> ReceiverBundle {
    let mut bundle = ReceiverBundle::new(receiver.receiver_id);
    let previous_table = job.last_sent.get(&receiver.receiver_id);
    let mut remaining = (job.max_entries > 0).then_some(job.max_entries);

    for entity in job.entities.iter() {
        if !filter.is_visible(receiver, entity.id, entity.state.position) {
            continue;
        }

        let quantized = job.quantizer.quantize_state(&entity.state);
        let previous = previous_table.and_then(|table| table.get(&entity.id));
        let is_self = receiver.entity == Some(entity.id);
        let spawn = previous.is_none() || job.force_full_sync;
        let update = should_send(previous, &quantized, job.force_full_sync, is_self);

        // The receiver's own entity is never held back.
        if (spawn || update) && !is_self {
            if let Some(left) = remaining.as_mut() {
                if *left == 0 {
                    bundle.held_back += 1;
                    // Known entities stay in the current set; new ones are not
                    // recorded so they spawn on a later tick.
                    if let Some(previous) = previous {
                        bundle.current.insert(entity.id);
                        bundle.new_last_sent.insert(entity.id, *previous);
                    }
                    continue;
                }
                *left -= 1;
            }
        }
        bundle.current.insert(entity.id);

        if spawn {
            bundle
                .spawns
                .push(SpawnMessage::new(entity, &quantized, &job.quantizer));
        }

        if update {
            bundle.updates.push(EntityUpdate::new(entity.id, quantized));
            bundle.new_last_sent.insert(entity.id, quantized);
        } else if let Some(previous) = previous {
            // Keep the transmitted baseline so sub-step drift still adds up.
            bundle.new_last_sent.insert(entity.id, *previous);
        }
    }

    bundle
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::world::EntityKind;

    fn job_for(entities: Vec<Entity>, receivers: Vec<ReceiverContext>) -> Job {
        Job {
            job_id: 1,
            tick: 1,
            entities: entities.into(),
            receivers,
            interest_radius_sq: f32::MAX,
            last_sent: HashMap::new(),
            force_full_sync: false,
            quantizer: Quantizer::default(),
            max_entries: 0,
        }
    }

    #[test]
    fn first_sight_spawns_and_updates() {
        let sheep = Entity::new(EntityId(3), EntityKind::Sheep, Vec3::new(4.0, 64.0, 0.0));
        let receiver = ReceiverContext::new(ReceiverId(1), Some(Vec3::ZERO), 50.0);
        let bundles = run_job(&job_for(vec![sheep], vec![receiver]));

        assert_eq!(bundles.len(), 1);
        let bundle = &bundles[0];
        assert!(bundle.current.contains(&EntityId(3)));
        assert_eq!(bundle.spawns.len(), 1);
        assert_eq!(bundle.updates.len(), 1);
        assert!(bundle.new_last_sent.contains_key(&EntityId(3)));
    }

    #[test]
    fn unsent_entities_keep_old_baseline() {
        let quantizer = Quantizer::default();
        let mut sheep = Entity::new(EntityId(3), EntityKind::Sheep, Vec3::new(4.0, 64.0, 0.0));
        let receiver = ReceiverContext::new(ReceiverId(1), Some(Vec3::ZERO), 50.0);

        let mut job = job_for(vec![sheep.clone()], vec![receiver]);
        let baseline = quantizer.quantize_state(&sheep.state);
        job.last_sent
            .insert(ReceiverId(1), LastSentTable::from([(sheep.id, baseline)]));

        sheep.state.position.x += 0.04;
        job.entities = vec![sheep].into();
        let bundle = &run_job(&job)[0];

        assert!(bundle.updates.is_empty());
        assert!(bundle.spawns.is_empty());
        assert_eq!(bundle.new_last_sent.get(&EntityId(3)), Some(&baseline));
    }

    #[test]
    fn out_of_view_entities_leave_the_baseline() {
        let quantizer = Quantizer::default();
        let sheep = Entity::new(EntityId(3), EntityKind::Sheep, Vec3::new(80.0, 64.0, 0.0));
        let receiver = ReceiverContext::new(ReceiverId(1), Some(Vec3::ZERO), 50.0);
        let mut job = job_for(vec![sheep.clone()], vec![receiver]);
        job.last_sent.insert(
            ReceiverId(1),
            LastSentTable::from([(sheep.id, quantizer.quantize_state(&sheep.state))]),
        );

        let bundle = &run_job(&job)[0];
        assert!(bundle.current.is_empty());
        assert!(bundle.new_last_sent.is_empty());
    }

    #[test]
    fn full_messages_hold_back_new_entities() {
        let quantizer = Quantizer::default();
        let herd: Vec<Entity> = (1..=5)
            .map(|i| Entity::new(EntityId(i), EntityKind::Cow, Vec3::new(i as f32, 64.0, 0.0)))
            .collect();
        let receiver = ReceiverContext::new(ReceiverId(1), Some(Vec3::ZERO), 50.0)
            .with_entity(EntityId(5));
        let mut job = job_for(herd.clone(), vec![receiver]);
        job.max_entries = 2;
        job.last_sent.insert(
            ReceiverId(1),
            LastSentTable::from([(EntityId(1), quantizer.quantize_state(&herd[0].state))]),
        );

        let bundle = &run_job(&job)[0];
        let spawned: Vec<u32> = bundle.spawns.iter().map(|s| s.entity_id).collect();
        assert_eq!(spawned, vec![2, 3, 5]);
        assert_eq!(bundle.held_back, 1);
        assert_eq!(
            bundle.current.iter().map(|id| id.0).collect::<Vec<_>>(),
            vec![1, 2, 3, 5]
        );
        assert!(!bundle.new_last_sent.contains_key(&EntityId(4)));
        assert!(bundle.new_last_sent.contains_key(&EntityId(1)));

        job.last_sent.insert(ReceiverId(1), bundle.new_last_sent.clone());
        let next = &run_job(&job)[0];
        assert_eq!(next.spawns.iter().map(|s| s.entity_id).collect::<Vec<_>>(), vec![4]);
        assert_eq!(next.held_back, 0);
    }

    #[test]
    fn message_lists_current_in_id_order() {
        let mut bundle = ReceiverBundle::new(ReceiverId(1));
        bundle.current.insert(EntityId(9));
        bundle.current.insert(EntityId(2));
        let message = bundle.to_message(5, 250);
        assert_eq!(message.current, vec![2, 9]);
        assert_eq!(message.tick, 5);
    }
}
