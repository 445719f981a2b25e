use std::collections::{HashMap, HashSet};

use crate::world::EntityId;

use super::interest::ReceiverId;
use super::quantize::QuantizedState;

/// What one receiver was last sent, per entity.
pub type LastSentTable = HashMap<EntityId, QuantizedState>;

/// Whether an entity must be (re)sent to one receiver this tick.
///
/// `QuantizedState` equality covers every cell and the flag bits, so any flag
/// flip counts as a change.
pub fn should_send(
    previous: Option<&QuantizedState>,
    current: &QuantizedState,
    force_full_sync: bool,
    is_self: bool,
) -> bool {
    if force_full_sync || is_self {
        return true;
    }
    match previous {
        Some(previous) => previous != current,
        None => true,
    }
}

/// Per-receiver baselines. Tables are handed to jobs by value and replaced
/// wholesale once the receiver's message went out.
#[derive(Debug, Default)]
pub struct DeltaGate {
    tables: HashMap<ReceiverId, LastSentTable>,
}

impl DeltaGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, receiver: ReceiverId) -> Option<&LastSentTable> {
        self.tables.get(&receiver)
    }

    pub fn knows(&self, receiver: ReceiverId, entity: EntityId) -> bool {
        self.tables
            .get(&receiver)
            .is_some_and(|table| table.contains_key(&entity))
    }

    /// Copies of the tables for one batch; receivers never sent anything are absent.
    pub fn slice(&self, receivers: &[ReceiverId]) -> HashMap<ReceiverId, LastSentTable> {
        receivers
            .iter()
            .filter_map(|id| self.tables.get(id).map(|table| (*id, table.clone())))
            .collect()
    }

    pub fn commit(&mut self, receiver: ReceiverId, table: LastSentTable) {
        self.tables.insert(receiver, table);
    }

    pub fn forget_receiver(&mut self, receiver: ReceiverId) -> bool {
        self.tables.remove(&receiver).is_some()
    }

    pub fn retain_receivers(&mut self, live: &HashSet<ReceiverId>) {
        self.tables.retain(|id, _| live.contains(id));
    }

    /// Drops the entity from every baseline, returning the receivers that knew it.
    pub fn forget_entity(&mut self, entity: EntityId) -> Vec<ReceiverId> {
        let mut knew: Vec<ReceiverId> = self
            .tables
            .iter_mut()
            .filter_map(|(id, table)| table.remove(&entity).map(|_| *id))
            .collect();
        knew.sort();
        knew
    }

    pub fn receiver_count(&self) -> usize {
        self.tables.len()
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::replication::quantize::Quantizer;
    use crate::world::{EntityFlags, RawState};

    fn quantized(x: f32) -> QuantizedState {
        Quantizer::default().quantize_state(&RawState::at(Vec3::new(x, 64.0, 0.0)))
    }

    #[test]
    fn missing_record_must_send() {
        assert!(should_send(None, &quantized(0.0), false, false));
    }

    #[test]
    fn unchanged_is_gated() {
        let q = quantized(1.0);
        assert!(!should_send(Some(&q), &q, false, false));
        assert!(should_send(Some(&q), &q, true, false));
        assert!(should_send(Some(&q), &q, false, true));
    }

    #[test]
    fn flag_flip_is_a_change() {
        let quantizer = Quantizer::default();
        let mut raw = RawState::at(Vec3::ZERO);
        let before = quantizer.quantize_state(&raw);
        raw.flags.insert(EntityFlags::SNEAK);
        let after = quantizer.quantize_state(&raw);
        assert!(should_send(Some(&before), &after, false, false));
    }

    #[test]
    fn forget_entity_reports_knowers() {
        let mut gate = DeltaGate::new();
        let mut table = LastSentTable::new();
        table.insert(EntityId(5), quantized(0.0));
        gate.commit(ReceiverId(2), table.clone());
        gate.commit(ReceiverId(1), table);
        gate.commit(ReceiverId(3), LastSentTable::new());

        assert_eq!(
            gate.forget_entity(EntityId(5)),
            vec![ReceiverId(1), ReceiverId(2)]
        );
        assert!(!gate.knows(ReceiverId(1), EntityId(5)));
        assert!(gate.forget_entity(EntityId(5)).is_empty());
    }

    #[test]
    fn slice_only_copies_requested() {
        let mut gate = DeltaGate::new();
        gate.commit(ReceiverId(1), LastSentTable::new());
        gate.commit(ReceiverId(2), LastSentTable::new());

        let slice = gate.slice(&[ReceiverId(2), ReceiverId(7)]);
        assert_eq!(slice.len(), 1);
        assert!(slice.contains_key(&ReceiverId(2)));
    }
}
