// src/events.rs - kernel -> sink event bus
use bevy::prelude::*;

use crate::agents::AgentId;
use crate::buildings::BuildingId;
use crate::reservation::TargetId;

/// Mirrors `spec.md` section 6's Event list one-for-one, in the same spirit
/// as the teacher's `ActionEvent`/`AlertEvent`: plain data events consumed
/// by external (rendering/audio/UI) systems via `EventReader`.
#[derive(Event, Debug, Clone)]
pub struct StateChanged {
    pub agent: AgentId,
    pub from: &'static str,
    pub to: &'static str,
    pub reason: &'static str,
    pub tick: u64,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct PathFailed {
    pub agent: AgentId,
    pub goal_tile: (i32, i32),
}

#[derive(Event, Debug, Clone, Copy)]
pub enum ReleaseReason {
    Death,
    StateChange,
    SoftLockExpiry,
    Cancelled,
    Timeout,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct ReservationReleased {
    pub target: TargetId,
    pub agent: AgentId,
    pub reason: ReleaseReason,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct TileFreed {
    pub tile: (i32, i32),
}

#[derive(Event, Debug, Clone, Copy)]
pub struct BuildingCompleted {
    pub building: BuildingId,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct BuildingDestroyed {
    pub building: BuildingId,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct AgentDowned {
    pub agent: AgentId,
}

#[derive(Event, Debug, Clone, Copy)]
pub enum DeathCause {
    Combat,
    Starvation,
    Bleeding,
    Other,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct AgentDied {
    pub agent: AgentId,
    pub cause: DeathCause,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct InventoryChanged {
    pub container: BuildingId,
    pub delta: i32,
}

/// Registers every kernel event type on the app, grouped the way the
/// teacher's `core::events` wiring registers its event set in `main.rs`.
pub fn register_events(app: &mut App) {
    app.add_event::<StateChanged>()
        .add_event::<PathFailed>()
        .add_event::<ReservationReleased>()
        .add_event::<TileFreed>()
        .add_event::<BuildingCompleted>()
        .add_event::<BuildingDestroyed>()
        .add_event::<AgentDowned>()
        .add_event::<AgentDied>()
        .add_event::<InventoryChanged>();
}
