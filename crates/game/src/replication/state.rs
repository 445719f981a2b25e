use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;

use crate::net::{Dispatcher, Notices, Outbox};
use crate::world::{Entity, EntityId, WorldEvent};

use super::assembler::{AssemblyInput, SnapshotAssembler};
use super::config::ReplicationConfig;
use super::delta::DeltaGate;
use super::interest::{ReceiverContext, ReceiverId};
use super::job::{run_job, JobRunner};

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u32,
    pub full_sync: bool,
    pub job_count: usize,
    pub failed_jobs: usize,
    pub sent: usize,
    pub shed: usize,
    pub dropped: usize,
    pub bytes: usize,
    pub updates: usize,
    /// Entities left out of this tick's messages by the per-message cap.
    pub held_back: usize,
}

/// Server half of replication: baselines, pending notices, the worker pool
/// and the dispatcher, driven once per simulation tick.
pub struct ReplicationState {
    config: ReplicationConfig,
    gate: DeltaGate,
    assembler: SnapshotAssembler,
    dispatcher: Dispatcher,
    notices: HashMap<ReceiverId, Notices>,
}

impl ReplicationState {
    pub fn new(config: ReplicationConfig) -> io::Result<Self> {
        Self::with_runner(config, run_job)
    }

    pub fn with_runner(config: ReplicationConfig, runner: JobRunner) -> io::Result<Self> {
        let assembler = SnapshotAssembler::with_runner(&config, runner)?;
        let dispatcher = Dispatcher::new(config.max_queue_depth);
        Ok(Self {
            config,
            gate: DeltaGate::new(),
            assembler,
            dispatcher,
            notices: HashMap::new(),
        })
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn gate(&self) -> &DeltaGate {
        &self.gate
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn pending_notices(&self, receiver: ReceiverId) -> Option<&Notices> {
        self.notices.get(&receiver)
    }

    pub fn receiver_context(&self, receiver: ReceiverId) -> ReceiverContext {
        ReceiverContext::new(receiver, None, self.config.interest_radius)
    }

    /// Turns deaths and despawns into notices for every receiver that knew the entity.
    pub fn apply_world_events(&mut self, events: &[WorldEvent]) {
        for event in events {
            match *event {
                WorldEvent::Spawned(_) => {}
                WorldEvent::Died(id) => self.queue_notice(id, |n| &mut n.deaths),
                WorldEvent::Despawned(id) => self.queue_notice(id, |n| &mut n.despawns),
            }
        }
    }

    fn queue_notice(&mut self, entity: EntityId, list: fn(&mut Notices) -> &mut Vec<EntityId>) {
        for receiver in self.gate.forget_entity(entity) {
            let pending = list(self.notices.entry(receiver).or_default());
            if !pending.contains(&entity) {
                pending.push(entity);
            }
        }
    }

    pub fn remove_receiver(&mut self, receiver: ReceiverId) {
        self.gate.forget_receiver(receiver);
        self.notices.remove(&receiver);
        log::debug!("dropped replication state for {:?}", receiver);
    }

    pub fn tick(
        &mut self,
        tick: u32,
        server_time_ms: u64,
        entities: Arc<[Entity]>,
        receivers: &[ReceiverContext],
        outbox: &mut impl Outbox,
    ) -> TickReport {
        let live: HashSet<ReceiverId> = receivers.iter().map(|r| r.receiver_id).collect();
        self.gate.retain_receivers(&live);
        self.dispatcher.retain_receivers(&live);
        self.notices.retain(|id, _| live.contains(id));

        let full_sync = self.config.is_full_sync_tick(tick);
        let input = AssemblyInput {
            tick,
            entities,
            receivers,
            gate: &self.gate,
            force_full_sync: full_sync,
        };
        let mut assembled = self.assembler.assemble(&input);
        let held_back: usize = assembled.bundles.values().map(|b| b.held_back).sum();
        if held_back > 0 {
            log::debug!("tick {}: {} entities held back for later messages", tick, held_back);
        }

        let dispatched = self.dispatcher.dispatch(
            tick,
            server_time_ms,
            &assembled.bundles,
            &self.notices,
            outbox,
        );

        for receiver in &dispatched.sent {
            if let Some(bundle) = assembled.bundles.remove(receiver) {
                self.gate.commit(*receiver, bundle.new_last_sent);
            }
            self.notices.remove(receiver);
        }
        for receiver in &dispatched.stale {
            self.remove_receiver(*receiver);
        }

        if full_sync {
            log::debug!("tick {}: full sync to {} receivers", tick, dispatched.sent.len());
        }

        TickReport {
            tick,
            full_sync,
            job_count: assembled.job_count,
            failed_jobs: assembled.failed.len(),
            sent: dispatched.sent.len(),
            shed: dispatched.shed.len(),
            dropped: dispatched.failed.len() + dispatched.stale.len(),
            bytes: dispatched.bytes,
            updates: dispatched.updates,
            held_back,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::net::{DispatchError, TickMessage};
    use crate::world::{EntityKind, World};

    #[derive(Default)]
    struct Capture {
        messages: Vec<(ReceiverId, TickMessage)>,
        refuse: HashSet<ReceiverId>,
    }

    impl Outbox for Capture {
        fn send(
            &mut self,
            receiver: ReceiverId,
            message: &TickMessage,
        ) -> Result<usize, DispatchError> {
            if self.refuse.contains(&receiver) {
                return Err(DispatchError::Oversized {
                    receiver,
                    size: usize::MAX,
                    limit: 0,
                });
            }
            self.messages.push((receiver, message.clone()));
            Ok(1)
        }
    }

    fn state() -> ReplicationState {
        ReplicationState::new(ReplicationConfig {
            worker_count: 0,
            full_sync_interval: 0,
            ..Default::default()
        })
        .unwrap()
    }

    fn viewer(id: u32) -> ReceiverContext {
        ReceiverContext::new(ReceiverId(id), Some(Vec3::ZERO), 32.0)
    }

    #[test]
    fn baseline_commits_only_after_send() {
        let mut world = World::new();
        let cow = world.spawn(EntityKind::Cow, Vec3::new(2.0, 0.0, 2.0));
        let mut replication = state();
        let receivers = [viewer(1), viewer(2)];

        let mut outbox = Capture::default();
        outbox.refuse.insert(ReceiverId(2));
        let report = replication.tick(1, 0, world.samples(), &receivers, &mut outbox);

        assert_eq!(report.sent, 1);
        assert_eq!(report.dropped, 1);
        assert!(replication.gate().knows(ReceiverId(1), cow));
        assert!(!replication.gate().knows(ReceiverId(2), cow));

        outbox.refuse.clear();
        replication.tick(2, 50, world.samples(), &receivers, &mut outbox);
        let (_, retry) = outbox
            .messages
            .iter()
            .rev()
            .find(|(id, _)| *id == ReceiverId(2))
            .unwrap();
        assert_eq!(retry.spawns.len(), 1);
        assert!(replication.gate().knows(ReceiverId(2), cow));
    }

    #[test]
    fn deaths_reach_only_receivers_that_knew() {
        let mut world = World::new();
        let pig = world.spawn(EntityKind::Pig, Vec3::new(1.0, 0.0, 0.0));
        let mut replication = state();
        let mut outbox = Capture::default();
        replication.tick(1, 0, world.samples(), &[viewer(1)], &mut outbox);

        world.kill(pig);
        replication.apply_world_events(&world.drain_events());
        assert_eq!(
            replication.pending_notices(ReceiverId(1)).map(|n| n.deaths.clone()),
            Some(vec![pig])
        );

        outbox.messages.clear();
        replication.tick(2, 50, world.samples(), &[viewer(1), viewer(2)], &mut outbox);
        let first = outbox
            .messages
            .iter()
            .find(|(id, _)| *id == ReceiverId(1))
            .map(|(_, m)| m.clone())
            .unwrap();
        let second = outbox
            .messages
            .iter()
            .find(|(id, _)| *id == ReceiverId(2))
            .map(|(_, m)| m.clone())
            .unwrap();
        assert_eq!(first.deaths, vec![pig.0]);
        assert!(second.deaths.is_empty());
        assert!(replication.pending_notices(ReceiverId(1)).is_none());
    }

    #[test]
    fn notices_wait_for_a_successful_send() {
        let mut world = World::new();
        let sheep = world.spawn(EntityKind::Sheep, Vec3::ZERO);
        let mut replication = state();
        let mut outbox = Capture::default();
        replication.tick(1, 0, world.samples(), &[viewer(1)], &mut outbox);

        world.despawn(sheep);
        replication.apply_world_events(&world.drain_events());
        outbox.refuse.insert(ReceiverId(1));
        replication.tick(2, 50, world.samples(), &[viewer(1)], &mut outbox);
        assert!(replication.pending_notices(ReceiverId(1)).is_some());

        outbox.refuse.clear();
        replication.tick(3, 100, world.samples(), &[viewer(1)], &mut outbox);
        let (_, message) = outbox.messages.last().unwrap();
        assert_eq!(message.despawns, vec![sheep.0]);
    }

    #[test]
    fn departed_receivers_lose_their_baseline() {
        let mut world = World::new();
        world.spawn(EntityKind::Zombie, Vec3::ZERO);
        let mut replication = state();
        let mut outbox = Capture::default();
        replication.tick(1, 0, world.samples(), &[viewer(1), viewer(2)], &mut outbox);
        assert_eq!(replication.gate().receiver_count(), 2);

        replication.tick(2, 50, world.samples(), &[viewer(1)], &mut outbox);
        assert_eq!(replication.gate().receiver_count(), 1);
    }

    #[test]
    fn crowds_are_spread_over_several_ticks() {
        let mut world = World::new();
        for i in 0..10 {
            world.spawn(EntityKind::Cow, Vec3::new(i as f32, 0.0, 0.0));
        }
        let mut replication = ReplicationState::new(ReplicationConfig {
            worker_count: 0,
            full_sync_interval: 0,
            max_entities_per_message: 4,
            ..Default::default()
        })
        .unwrap();
        let mut outbox = Capture::default();

        let mut spawned = Vec::new();
        for tick in 1..=3 {
            let report = replication.tick(tick, 0, world.samples(), &[viewer(1)], &mut outbox);
            let (_, message) = outbox.messages.last().unwrap();
            assert!(message.spawns.len() <= 4);
            assert_eq!(report.held_back, 10 - spawned.len() - message.spawns.len());
            spawned.extend(message.spawns.iter().map(|s| s.entity_id));
            assert_eq!(message.current.len(), spawned.len());
        }
        assert_eq!(spawned.len(), 10);
    }
}
