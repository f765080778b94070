// src/plugin.rs - Bevy wiring for the kernel. Grounded on the teacher's
// `main.rs` plugin-registration style (`app.add_plugins(...)` per subsystem,
// `add_systems(Update, ... .chain())` for ordering) and its event
// registration block, generalized to the single `KernelSet::Tick` ordering
// `spec.md` 5 specifies (deliver path callbacks -> apply grid edits ->
// advance clock & FSMs -> drain path queue -> drain region rebuild queue),
// which `Kernel::tick` already performs internally in that order.
use bevy::prelude::*;

use crate::config::KernelConfig;
use crate::events::{register_events, AgentDied, AgentDowned, BuildingCompleted, BuildingDestroyed, InventoryChanged, PathFailed, ReservationReleased, StateChanged, TileFreed};
use crate::fsm::agent::WorkGiver;
use crate::fsm::intruder::DamageSink;
use crate::fsm::FsmOutbox;
use crate::kernel::{flush_outbox, Kernel, PerceptionSource, ThreatSource};

/// System set the one kernel-tick system runs in. Exposed so a host game can
/// order its own rendering/input systems relative to it with `.after`/
/// `.before`, the same way the teacher orders gameplay systems around
/// `GameSet` markers.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelSet {
    Tick,
}

/// Content-policy hooks the host game must insert as resources before this
/// plugin's systems run; the kernel only defines the traits (`spec.md`
/// 4.5/4.9's "compose by ownership" notes), never a concrete strategy.
#[derive(Resource)]
pub struct WorkGiverRes(pub Box<dyn WorkGiver + Send + Sync>);

#[derive(Resource)]
pub struct DamageSinkRes(pub Box<dyn DamageSink + Send + Sync>);

#[derive(Resource)]
pub struct PerceptionSourceRes(pub Box<dyn PerceptionSource + Send + Sync>);

#[derive(Resource)]
pub struct ThreatSourceRes(pub Box<dyn ThreatSource + Send + Sync>);

/// Registers the kernel, its event types, and the single tick system. The
/// host game is responsible for inserting `WorkGiverRes`/`DamageSinkRes`/
/// `PerceptionSourceRes`/`ThreatSourceRes` before this plugin builds (content
/// policy is never the kernel's to supply).
pub struct KernelPlugin {
    pub config: KernelConfig,
    pub cols: i32,
    pub rows: i32,
    pub tile_size: f32,
    pub seed: u64,
}

impl KernelPlugin {
    pub fn new(config: KernelConfig, cols: i32, rows: i32, tile_size: f32, seed: u64) -> Self {
        Self { config, cols, rows, tile_size, seed }
    }
}

impl Plugin for KernelPlugin {
    fn build(&self, app: &mut App) {
        register_events(app);
        app.insert_resource(Kernel::new(self.config.clone(), self.cols, self.rows, self.tile_size, self.seed));
        app.init_resource::<FsmOutbox>();
        app.configure_sets(Update, KernelSet::Tick);
        app.add_systems(Update, kernel_tick_system.in_set(KernelSet::Tick));
    }
}

/// Advances the kernel by one frame's wall-clock time and flushes its
/// collected FSM outbox into the app's real `EventWriter`s. `Kernel::tick`
/// owns every ordering step internally; this system is the only place that
/// step boundary crosses into ECS.
#[allow(clippy::too_many_arguments)]
fn kernel_tick_system(
    mut kernel: ResMut<Kernel>,
    mut outbox: ResMut<FsmOutbox>,
    work_giver: Res<WorkGiverRes>,
    mut damage_sink: ResMut<DamageSinkRes>,
    perception_source: Res<PerceptionSourceRes>,
    threat_source: Res<ThreatSourceRes>,
    time: Res<Time>,
    mut state_changed: EventWriter<StateChanged>,
    mut path_failed: EventWriter<PathFailed>,
    mut reservation_released: EventWriter<ReservationReleased>,
    mut tile_freed: EventWriter<TileFreed>,
    mut agent_downed: EventWriter<AgentDowned>,
    mut agent_died: EventWriter<AgentDied>,
    mut inventory_changed: EventWriter<InventoryChanged>,
    mut building_completed: EventWriter<BuildingCompleted>,
    mut building_destroyed: EventWriter<BuildingDestroyed>,
) {
    kernel.tick(
        time.delta_secs(),
        work_giver.0.as_ref(),
        damage_sink.0.as_mut(),
        perception_source.0.as_ref(),
        threat_source.0.as_ref(),
        &mut outbox,
    );
    flush_outbox(
        &mut outbox,
        &mut state_changed,
        &mut path_failed,
        &mut reservation_released,
        &mut tile_freed,
        &mut agent_downed,
        &mut agent_died,
        &mut inventory_changed,
        &mut building_completed,
        &mut building_destroyed,
    );
}
