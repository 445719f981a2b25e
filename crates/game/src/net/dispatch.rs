use std::collections::{HashMap, HashSet};
use std::io;

use crate::replication::{ReceiverBundle, ReceiverId};
use crate::world::EntityId;

use super::protocol::{PacketError, TickMessage};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("receiver {0:?} is no longer connected")]
    StaleReceiver(ReceiverId),
    #[error("message for receiver {receiver:?} is {size} bytes, limit is {limit}")]
    Oversized {
        receiver: ReceiverId,
        size: usize,
        limit: usize,
    },
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("send failed: {0}")]
    Io(#[from] io::Error),
}

/// Where finished tick messages go. Returns the number of bytes written.
pub trait Outbox {
    fn send(&mut self, receiver: ReceiverId, message: &TickMessage) -> Result<usize, DispatchError>;
}

/// Death and despawn notices waiting for a receiver's next successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notices {
    pub deaths: Vec<EntityId>,
    pub despawns: Vec<EntityId>,
}

impl Notices {
    pub fn is_empty(&self) -> bool {
        self.deaths.is_empty() && self.despawns.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub sent: Vec<ReceiverId>,
    pub shed: Vec<ReceiverId>,
    pub failed: Vec<ReceiverId>,
    pub stale: Vec<ReceiverId>,
    pub bytes: usize,
    pub updates: usize,
}

/// Sends one message per receiver per tick, shedding the least starved
/// receivers when more messages are queued than `max_queue_depth`.
#[derive(Debug)]
pub struct Dispatcher {
    max_queue_depth: usize,
    starvation: HashMap<ReceiverId, u32>,
    /// Receivers whose last message was too large, warned about once.
    oversized: HashSet<ReceiverId>,
}

impl Dispatcher {
    pub fn new(max_queue_depth: usize) -> Self {
        Self {
            max_queue_depth,
            starvation: HashMap::new(),
            oversized: HashSet::new(),
        }
    }

    pub fn starvation(&self, receiver: ReceiverId) -> u32 {
        self.starvation.get(&receiver).copied().unwrap_or(0)
    }

    pub fn retain_receivers(&mut self, live: &HashSet<ReceiverId>) {
        self.starvation.retain(|id, _| live.contains(id));
        self.oversized.retain(|id| live.contains(id));
    }

    pub fn is_oversized(&self, receiver: ReceiverId) -> bool {
        self.oversized.contains(&receiver)
    }

    /// Receivers in service order: longest unserved first, then by id.
    pub fn queue_order(&self, receivers: impl IntoIterator<Item = ReceiverId>) -> Vec<ReceiverId> {
        let mut queue: Vec<ReceiverId> = receivers.into_iter().collect();
        queue.sort_by(|a, b| {
            self.starvation(*b)
                .cmp(&self.starvation(*a))
                .then_with(|| a.cmp(b))
        });
        queue
    }

    pub fn dispatch(
        &mut self,
        tick: u32,
        server_time_ms: u64,
        bundles: &HashMap<ReceiverId, ReceiverBundle>,
        notices: &HashMap<ReceiverId, Notices>,
        outbox: &mut impl Outbox,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut queue = self.queue_order(bundles.keys().copied());

        if queue.len() > self.max_queue_depth {
            report.shed = queue.split_off(self.max_queue_depth);
            log::warn!(
                "tick {}: queue depth {} over {}, shedding {} receivers",
                tick,
                queue.len() + report.shed.len(),
                self.max_queue_depth,
                report.shed.len()
            );
        }
        for receiver in &report.shed {
            *self.starvation.entry(*receiver).or_insert(0) += 1;
        }

        for receiver in queue {
            let Some(bundle) = bundles.get(&receiver) else {
                continue;
            };
            let mut message = bundle.to_message(tick, server_time_ms);
            if let Some(pending) = notices.get(&receiver) {
                message.deaths = pending.deaths.iter().map(|id| id.0).collect();
                message.despawns = pending.despawns.iter().map(|id| id.0).collect();
            }

            match outbox.send(receiver, &message) {
                Ok(bytes) => {
                    report.bytes += bytes;
                    report.updates += message.updates.len();
                    report.sent.push(receiver);
                    self.starvation.insert(receiver, 0);
                    if self.oversized.remove(&receiver) {
                        log::info!("receiver {:?} fits in a packet again", receiver);
                    }
                }
                Err(DispatchError::StaleReceiver(_)) => {
                    log::debug!("receiver {:?} left mid-tick, dropping its bundle", receiver);
                    self.starvation.remove(&receiver);
                    report.stale.push(receiver);
                }
                Err(e @ DispatchError::Oversized { .. }) => {
                    if self.oversized.insert(receiver) {
                        log::warn!(
                            "tick {}: {} ({} current, {} spawns, {} updates); retrying every tick",
                            tick,
                            e,
                            message.current.len(),
                            message.spawns.len(),
                            message.updates.len()
                        );
                    } else {
                        log::debug!("tick {}: {}", tick, e);
                    }
                    *self.starvation.entry(receiver).or_insert(0) += 1;
                    report.failed.push(receiver);
                }
                Err(e) => {
                    log::warn!("tick {}: dropping message for {:?}: {}", tick, receiver, e);
                    *self.starvation.entry(receiver).or_insert(0) += 1;
                    report.failed.push(receiver);
                }
            }
        }

        report
    }
}
