// src/fsm/mod.rs - priority-preemptive FSMs. Split from `agents.rs` the way
// the teacher keeps `core/goap.rs` (decision logic) separate from
// `components.rs` (entity data).
pub mod agent;
pub mod intruder;

use bevy::prelude::*;

use crate::agents::AgentId;
use crate::buildings::BuildingId;
use crate::events::{AgentDied, AgentDowned, BuildingCompleted, BuildingDestroyed, DeathCause, InventoryChanged, PathFailed, ReservationReleased, StateChanged, TileFreed};

/// Collects every event an FSM tick can emit, in the `&mut Vec<T>` shape
/// `reservation.rs` uses, so the whole FSM stays plain Rust and
/// unit-testable without a running `App`. The plugin drains this into real
/// `EventWriter`s once per tick.
#[derive(Resource, Default)]
pub struct FsmOutbox {
    pub state_changed: Vec<StateChanged>,
    pub path_failed: Vec<PathFailed>,
    pub reservation_released: Vec<ReservationReleased>,
    pub tile_freed: Vec<TileFreed>,
    pub agent_downed: Vec<AgentDowned>,
    pub agent_died: Vec<AgentDied>,
    pub inventory_changed: Vec<InventoryChanged>,
    /// FSM -> kernel only: a door's HP just crossed zero. `Kernel::tick`
    /// drains this into a `PendingEdit::DoorDestroyed` each subtick; it is
    /// never read by `flush_outbox`.
    pub building_destroyed: Vec<BuildingDestroyed>,
    /// External-facing, populated by the kernel's edit phase once a queued
    /// `PlaceBuildingComplete`/`DoorDestroyed` edit is actually applied to
    /// the grid, one tick after the FSM signal above fires.
    pub building_completed: Vec<BuildingCompleted>,
    pub building_destroyed_notice: Vec<BuildingDestroyed>,
}

impl FsmOutbox {
    pub fn push_state_changed(&mut self, agent: AgentId, from: &'static str, to: &'static str, reason: &'static str, tick: u64) {
        self.state_changed.push(StateChanged { agent, from, to, reason, tick });
    }

    pub fn push_downed(&mut self, agent: AgentId) {
        self.agent_downed.push(AgentDowned { agent });
    }

    pub fn push_died(&mut self, agent: AgentId, cause: DeathCause) {
        self.agent_died.push(AgentDied { agent, cause });
    }

    pub fn push_inventory_changed(&mut self, container: BuildingId, delta: i32) {
        self.inventory_changed.push(InventoryChanged { container, delta });
    }

    pub fn push_building_destroyed(&mut self, building: BuildingId) {
        self.building_destroyed.push(BuildingDestroyed { building });
    }
}
