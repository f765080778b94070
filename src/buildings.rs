// src/buildings.rs - placed structures: footprint, completion, HP,
// inventory slots, occupancy. Grounded on the teacher's `Door`/interactable
// structures in `systems/access_control.rs` (an entity with HP, open/closed
// state, and an occupant), generalized to the full building model in
// `spec.md` 3.
use bevy::prelude::*;
use std::collections::HashMap;

use crate::agents::AgentId;
use crate::grid::{BuildingBlockRule, TileRect};
use crate::items::ItemType;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct BuildingId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum BuildingKind {
    Wall,
    Door,
    Bed,
    Stove,
    Turret,
    StockpileMarker,
}

impl BuildingKind {
    /// What this kind contributes to `WorldGrid` once the building is
    /// complete; blueprints never block regardless of kind.
    pub fn block_rule(self) -> BuildingBlockRule {
        match self {
            BuildingKind::Wall | BuildingKind::Bed | BuildingKind::Stove | BuildingKind::Turret => {
                BuildingBlockRule::Blocking
            }
            BuildingKind::Door => BuildingBlockRule::Door,
            BuildingKind::StockpileMarker => BuildingBlockRule::NonBlocking,
        }
    }

    pub fn max_hp(self) -> u16 {
        match self {
            BuildingKind::Wall => 300,
            BuildingKind::Door => 150,
            BuildingKind::Bed => 80,
            BuildingKind::Stove => 120,
            BuildingKind::Turret => 200,
            BuildingKind::StockpileMarker => 1,
        }
    }

    pub fn inventory_slots(self) -> usize {
        match self {
            BuildingKind::Stove => 2,
            BuildingKind::Bed => 0,
            _ => 0,
        }
    }

    pub fn build_work_required(self) -> f32 {
        match self {
            BuildingKind::Wall => 40.0,
            BuildingKind::Door => 30.0,
            BuildingKind::Bed => 60.0,
            BuildingKind::Stove => 80.0,
            BuildingKind::Turret => 150.0,
            BuildingKind::StockpileMarker => 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BuildingInventorySlot {
    pub item: Option<ItemType>,
    pub qty: u16,
}

/// What a building is currently occupied by, if anything (cooking
/// colonist, bed sleeper, reservation holder for single-occupant kinds).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Occupancy {
    Empty,
    Occupant(AgentId),
}

#[derive(Clone, Debug)]
pub struct Building {
    pub id: BuildingId,
    pub kind: BuildingKind,
    pub gx: i32,
    pub gy: i32,
    pub gw: i32,
    pub gh: i32,
    pub rotation: u8,
    pub complete: bool,
    pub work_progress: f32,
    pub hp: u16,
    pub inventory: Vec<BuildingInventorySlot>,
    pub occupancy: Occupancy,
    pub door_open: bool,
}

impl Building {
    pub fn footprint(&self) -> TileRect {
        TileRect { x0: self.gx, y0: self.gy, x1: self.gx + self.gw, y1: self.gy + self.gh }
    }

    pub fn is_blocking(&self) -> bool {
        self.complete && self.kind.block_rule() == BuildingBlockRule::Blocking
    }
}

#[derive(Debug)]
pub enum PlaceError {
    Blocked { gx: i32, gy: i32, cost: f32 },
}

/// Arena of all placed buildings (blueprints and completed alike), keyed by
/// a monotonic integer handle per `spec.md` 9's arena/handle re-architecture
/// note.
#[derive(Resource, Default)]
pub struct BuildingArena {
    next_id: u32,
    buildings: HashMap<BuildingId, Building>,
}

impl BuildingArena {
    pub fn get(&self, id: BuildingId) -> Option<&Building> {
        self.buildings.get(&id)
    }

    pub fn get_mut(&mut self, id: BuildingId) -> Option<&mut Building> {
        self.buildings.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Building> {
        self.buildings.values()
    }

    /// Places a blueprint. Does not touch the grid directly: the caller
    /// (kernel facade) marks the grid once the blueprint completes, keeping
    /// `BuildingArena` decoupled from `WorldGrid` the same way `RegionGraph`
    /// is decoupled from it.
    pub fn place_blueprint(&mut self, kind: BuildingKind, gx: i32, gy: i32, gw: i32, gh: i32, rotation: u8) -> BuildingId {
        let id = BuildingId(self.next_id);
        self.next_id += 1;
        let slots = vec![BuildingInventorySlot::default(); kind.inventory_slots()];
        self.buildings.insert(
            id,
            Building {
                id,
                kind,
                gx,
                gy,
                gw,
                gh,
                rotation,
                complete: false,
                work_progress: 0.0,
                hp: kind.max_hp(),
                inventory: slots,
                occupancy: Occupancy::Empty,
                door_open: true,
            },
        );
        id
    }

    pub fn cancel(&mut self, id: BuildingId) -> Option<Building> {
        self.buildings.remove(&id)
    }

    /// Reconstructs an arena from a save blob's building rows. `next_id` is
    /// derived from the highest loaded id, not stored separately, since the
    /// persisted format (`spec.md` 6) doesn't carry an allocator cursor.
    pub fn load_raw(rows: Vec<Building>) -> Self {
        let next_id = rows.iter().map(|b| b.id.0).max().map(|m| m + 1).unwrap_or(0);
        let buildings = rows.into_iter().map(|b| (b.id, b)).collect();
        Self { next_id, buildings }
    }

    /// Applies one tick of construction work; returns `true` exactly on the
    /// tick completion crosses the threshold (caller emits `BuildingCompleted`
    /// and marks the grid on that edge only).
    pub fn apply_build_work(&mut self, id: BuildingId, amount: f32) -> bool {
        let Some(b) = self.buildings.get_mut(&id) else { return false };
        if b.complete {
            return false;
        }
        b.work_progress += amount;
        if b.work_progress >= b.kind.build_work_required() {
            b.complete = true;
            true
        } else {
            false
        }
    }

    /// Returns `true` exactly on the tick HP crosses zero (caller emits
    /// `BuildingDestroyed` and unmarks the grid on that edge).
    pub fn apply_damage(&mut self, id: BuildingId, amount: u16) -> bool {
        let Some(b) = self.buildings.get_mut(&id) else { return false };
        let was_alive = b.hp > 0;
        b.hp = b.hp.saturating_sub(amount);
        was_alive && b.hp == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placing_a_blueprint_does_not_complete_it() {
        let mut arena = BuildingArena::default();
        let id = arena.place_blueprint(BuildingKind::Wall, 2, 2, 1, 1, 0);
        assert!(!arena.get(id).unwrap().complete);
    }

    #[test]
    fn build_work_completes_exactly_once_at_threshold() {
        let mut arena = BuildingArena::default();
        let id = arena.place_blueprint(BuildingKind::Door, 0, 0, 1, 1, 0);
        let required = BuildingKind::Door.build_work_required();
        assert!(!arena.apply_build_work(id, required - 1.0));
        assert!(arena.apply_build_work(id, 1.0));
        assert!(!arena.apply_build_work(id, 100.0));
    }

    #[test]
    fn damage_crossing_zero_fires_exactly_once() {
        let mut arena = BuildingArena::default();
        let id = arena.place_blueprint(BuildingKind::Wall, 0, 0, 1, 1, 0);
        let hp = arena.get(id).unwrap().hp;
        assert!(!arena.apply_damage(id, hp - 1));
        assert!(arena.apply_damage(id, 1));
        assert!(!arena.apply_damage(id, 1));
    }

    #[test]
    fn cancel_removes_blueprint() {
        let mut arena = BuildingArena::default();
        let id = arena.place_blueprint(BuildingKind::Wall, 0, 0, 1, 1, 0);
        assert!(arena.cancel(id).is_some());
        assert!(arena.get(id).is_none());
    }
}
