// src/reservation.rs - exclusive/crew-bounded claims on targets and tiles.
// Grounded on `systems/access_control.rs`'s `Door`/`Gate`/`AccessReader`
// exclusive-with-timer pattern (an entity that is "claimed" and must be
// released), generalized to the target/tile reservation model in
// `spec.md` 4.5.
use bevy::prelude::*;
use std::collections::{HashMap, HashSet};

use crate::agents::AgentId;
use crate::events::{ReleaseReason, ReservationReleased, TileFreed};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TargetId(pub u32);

#[derive(Resource, Default)]
pub struct ReservationTable {
    targets: HashMap<TargetId, TargetReservation>,
    tiles: HashMap<(i32, i32), AgentId>,
}

struct TargetReservation {
    max_crew: u32,
    holders: HashSet<AgentId>,
}

impl ReservationTable {
    /// Succeeds iff fewer than `max_crew` holders currently exist. Stable
    /// under repeated calls from the same agent (won't double-count).
    pub fn try_reserve(&mut self, agent: AgentId, target: TargetId, max_crew: u32) -> bool {
        let entry = self.targets.entry(target).or_insert_with(|| TargetReservation {
            max_crew,
            holders: HashSet::new(),
        });
        entry.max_crew = max_crew;
        if entry.holders.contains(&agent) {
            return true;
        }
        if (entry.holders.len() as u32) < max_crew {
            entry.holders.insert(agent);
            true
        } else {
            false
        }
    }

    /// Idempotent: releasing a target you don't hold is a no-op. Collects
    /// the resulting event into `released` rather than writing through an
    /// `EventWriter` directly, so the reservation logic stays plain Rust
    /// and unit-testable; the plugin drains `released` into the real
    /// `EventWriter<ReservationReleased>` each tick.
    pub fn release(&mut self, agent: AgentId, target: TargetId, reason: ReleaseReason, released: &mut Vec<ReservationReleased>) {
        if let Some(res) = self.targets.get_mut(&target) {
            if res.holders.remove(&agent) {
                released.push(ReservationReleased { target, agent, reason });
            }
            if res.holders.is_empty() {
                self.targets.remove(&target);
            }
        }
    }

    pub fn holder_count(&self, target: TargetId) -> usize {
        self.targets.get(&target).map(|r| r.holders.len()).unwrap_or(0)
    }

    pub fn is_holder(&self, agent: AgentId, target: TargetId) -> bool {
        self.targets.get(&target).map(|r| r.holders.contains(&agent)).unwrap_or(false)
    }

    /// Releases every reservation held by `agent` (death, despawn).
    pub fn release_all_for_agent(
        &mut self,
        agent: AgentId,
        reason: ReleaseReason,
        released: &mut Vec<ReservationReleased>,
        freed: &mut Vec<TileFreed>,
    ) {
        let targets: Vec<TargetId> = self
            .targets
            .iter()
            .filter(|(_, r)| r.holders.contains(&agent))
            .map(|(id, _)| *id)
            .collect();
        for target in targets {
            self.release(agent, target, reason, released);
        }
        let tiles: Vec<(i32, i32)> = self
            .tiles
            .iter()
            .filter(|(_, a)| **a == agent)
            .map(|(t, _)| *t)
            .collect();
        for tile in tiles {
            self.release_tile(agent, tile, freed);
        }
    }

    pub fn try_claim_tile(&mut self, agent: AgentId, tile: (i32, i32)) -> bool {
        match self.tiles.get(&tile) {
            Some(holder) if *holder != agent => false,
            _ => {
                self.tiles.insert(tile, agent);
                true
            }
        }
    }

    pub fn tile_holder(&self, tile: (i32, i32)) -> Option<AgentId> {
        self.tiles.get(&tile).copied()
    }

    /// Collects freed-tile events into `freed` instead of an `EventWriter`
    /// so callers without ECS access (tests) can still observe them.
    pub fn release_tile(&mut self, agent: AgentId, tile: (i32, i32), freed: &mut Vec<TileFreed>) {
        if self.tiles.get(&tile) == Some(&agent) {
            self.tiles.remove(&tile);
            freed.push(TileFreed { tile });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crew_bound_admits_exactly_max_crew() {
        let mut table = ReservationTable::default();
        let target = TargetId(1);
        assert!(table.try_reserve(AgentId(1), target, 2));
        assert!(table.try_reserve(AgentId(2), target, 2));
        assert!(!table.try_reserve(AgentId(3), target, 2));
        assert_eq!(table.holder_count(target), 2);
    }

    #[test]
    fn double_reserve_by_same_agent_is_idempotent() {
        let mut table = ReservationTable::default();
        let target = TargetId(1);
        assert!(table.try_reserve(AgentId(1), target, 1));
        assert!(table.try_reserve(AgentId(1), target, 1));
        assert_eq!(table.holder_count(target), 1);
    }

    #[test]
    fn tile_claim_is_exclusive() {
        let mut table = ReservationTable::default();
        assert!(table.try_claim_tile(AgentId(1), (3, 3)));
        assert!(!table.try_claim_tile(AgentId(2), (3, 3)));
        let mut freed = Vec::new();
        table.release_tile(AgentId(1), (3, 3), &mut freed);
        assert_eq!(freed.len(), 1);
        assert!(table.try_claim_tile(AgentId(2), (3, 3)));
    }

    #[test]
    fn double_release_tile_is_noop() {
        let mut table = ReservationTable::default();
        table.try_claim_tile(AgentId(1), (1, 1));
        let mut freed = Vec::new();
        table.release_tile(AgentId(1), (1, 1), &mut freed);
        table.release_tile(AgentId(1), (1, 1), &mut freed);
        assert_eq!(freed.len(), 1);
    }

    #[test]
    fn release_emits_event_only_when_holder_was_present() {
        let mut table = ReservationTable::default();
        let target = TargetId(7);
        table.try_reserve(AgentId(1), target, 1);
        let mut released = Vec::new();
        table.release(AgentId(2), target, ReleaseReason::StateChange, &mut released);
        assert!(released.is_empty());
        table.release(AgentId(1), target, ReleaseReason::StateChange, &mut released);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].agent, AgentId(1));
    }

    #[test]
    fn release_all_for_agent_clears_targets_and_tiles() {
        let mut table = ReservationTable::default();
        let target = TargetId(9);
        table.try_reserve(AgentId(1), target, 2);
        table.try_claim_tile(AgentId(1), (2, 2));
        let mut released = Vec::new();
        let mut freed = Vec::new();
        table.release_all_for_agent(AgentId(1), ReleaseReason::Death, &mut released, &mut freed);
        assert_eq!(released.len(), 1);
        assert_eq!(freed.len(), 1);
        assert_eq!(table.holder_count(target), 0);
        assert!(table.tile_holder((2, 2)).is_none());
    }
}
