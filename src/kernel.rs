// src/kernel.rs - narrow facade exposed to rendering/input/content systems.
// Grounded on the teacher's `GlobalData`/`GameState`-style central resource
// (one struct other systems query through, rather than reaching into
// subsystem internals directly), generalized to the full query/command/event
// surface `spec.md` 6 specifies.
use std::collections::HashMap;

use bevy::prelude::*;

use crate::agents::{AgentId, AgentState, ColonistData, IntruderData, IntruderId, Needs, TargetHandle};
use crate::buildings::{BuildingArena, BuildingId, BuildingKind, PlaceError};
use crate::clock::SimulationClock;
use crate::config::KernelConfig;
use crate::events::{AgentDied, AgentDowned, InventoryChanged, PathFailed, ReleaseReason, ReservationReleased, StateChanged, TileFreed};
use crate::executor::ms;
use crate::fsm::agent::{tick_agent, Perception, World as FsmWorld, WorkGiver};
use crate::fsm::intruder::{tick_intruder, DamageSink};
use crate::fsm::FsmOutbox;
use crate::grid::{FloorClass, TileRect, WorldGrid};
use crate::items::FloorItemArena;
use crate::path_queue::{PathRequestQueue, RequestId};
use crate::pathfinding::Profile;
use crate::regions::{ObjectKind, ObjectRef, RegionGraph, RegionId, RoomId};
use crate::reservation::{ReservationTable, TargetId};

/// Perception/threat signals are content policy (LoS, faction, draft orders)
/// per `spec.md` 4.1/4.9; the kernel only defines how to ask for them.
pub trait PerceptionSource {
    fn perception_for(&self, agent: AgentId, data: &ColonistData) -> Perception;
}

pub trait ThreatSource {
    fn nearest_threat(&self, intruder: IntruderId, position: Vec2) -> Option<Vec2>;
}

/// One pending grid mutation, applied at the start of the next tick (tick
/// ordering step 2, `spec.md` 5) rather than immediately, so a rendering or
/// input system's edit this frame lands deterministically before FSMs run.
enum PendingEdit {
    PlaceBuildingComplete(BuildingId),
    CancelBuilding(BuildingId),
    PaintFloor(TileRect, FloorClass),
    EraseFloor(TileRect),
    DoorDestroyed(BuildingId),
}

/// Central simulation-kernel resource. Owns every subsystem named in
/// `spec.md` 2's component table and exposes the external-interface surface
/// from `spec.md` 6 as plain methods.
#[derive(Resource)]
pub struct Kernel {
    pub grid: WorldGrid,
    pub regions: RegionGraph,
    pub reservations: ReservationTable,
    pub path_queue: PathRequestQueue,
    pub buildings: BuildingArena,
    pub items: FloorItemArena,
    pub clock: SimulationClock,
    pub config: KernelConfig,

    colonists: HashMap<AgentId, ColonistData>,
    intruders: HashMap<IntruderId, IntruderData>,
    next_agent_id: u32,
    next_intruder_id: u32,

    pending_edits: Vec<PendingEdit>,
    pending_rebuilds: Vec<(Vec2, f32)>,

    pub seed: u64,
    pub rng_stream: u64,
}

impl Kernel {
    pub fn new(config: KernelConfig, cols: i32, rows: i32, tile_size: f32, seed: u64) -> Self {
        let grid = WorldGrid::new(cols, rows, tile_size, config.regions.section_tiles as i32);
        let mut regions = RegionGraph::new(config.regions.region_chunk_tiles as i32, tile_size);
        regions.rebuild_full(&grid);
        Self {
            grid,
            regions,
            reservations: ReservationTable::default(),
            path_queue: PathRequestQueue::default(),
            buildings: BuildingArena::default(),
            items: FloorItemArena::default(),
            clock: SimulationClock::new(config.clock.tick_rate, config.clock.frame_tick_catchup),
            config,
            colonists: HashMap::new(),
            intruders: HashMap::new(),
            next_agent_id: 0,
            next_intruder_id: 0,
            pending_edits: Vec::new(),
            pending_rebuilds: Vec::new(),
            seed,
            rng_stream: 0,
        }
    }

    // -- queries --

    pub fn tile_at(&self, world_x: f32, world_y: f32) -> (i32, i32) {
        self.grid.tile_at(world_x, world_y)
    }

    pub fn is_walkable(&self, gx: i32, gy: i32, profile: Profile) -> bool {
        self.grid.is_walkable(gx, gy, profile)
    }

    pub fn is_reachable(&self, from_world: Vec2, to_world: Vec2, profile: Profile) -> bool {
        self.regions.is_reachable(&self.grid, from_world, to_world, profile)
    }

    pub fn find_nearest(&self, from_world: Vec2, kind: ObjectKind, max_regions: usize) -> Option<ObjectRef> {
        self.regions
            .find_nearest(&self.grid, from_world, |o| o.kind == kind, max_regions)
            .map(|(obj, _)| obj)
    }

    pub fn agent_state(&self, agent: AgentId) -> Option<AgentState> {
        self.colonists.get(&agent).map(|c| c.state)
    }

    pub fn agent_health(&self, agent: AgentId) -> Option<Needs> {
        self.colonists.get(&agent).map(|c| c.needs)
    }

    pub fn agent_inventory(&self, agent: AgentId) -> Option<&[crate::agents::InventorySlot]> {
        self.colonists.get(&agent).map(|c| c.inventory.as_slice())
    }

    pub fn colonist(&self, agent: AgentId) -> Option<&ColonistData> {
        self.colonists.get(&agent)
    }

    pub fn colonists(&self) -> impl Iterator<Item = &ColonistData> {
        self.colonists.values()
    }

    pub fn intruders(&self) -> impl Iterator<Item = &IntruderData> {
        self.intruders.values()
    }

    pub fn reservation_status(&self, target: TargetId) -> usize {
        self.reservations.holder_count(target)
    }

    /// Exposed for debug overlays only: every live region's id, tile count,
    /// and room grouping.
    pub fn debug_regions(&self) -> Vec<(RegionId, usize, RoomId)> {
        self.regions.iter_regions().map(|r| (r.id, r.tiles.len(), r.room)).collect()
    }

    // -- commands --

    pub fn place_building(&mut self, kind: BuildingKind, gx: i32, gy: i32, gw: i32, gh: i32, rotation: u8) -> Result<BuildingId, PlaceError> {
        for y in gy..gy + gh {
            for x in gx..gx + gw {
                let cost = self.grid.traverse_cost(x, y);
                if self.grid.solid_at(x, y) || cost >= crate::grid::IMPASSABLE {
                    return Err(PlaceError::Blocked { gx: x, gy: y, cost });
                }
            }
        }
        Ok(self.buildings.place_blueprint(kind, gx, gy, gw, gh, rotation))
    }

    pub fn cancel_building(&mut self, id: BuildingId) {
        self.pending_edits.push(PendingEdit::CancelBuilding(id));
    }

    pub fn paint_floor(&mut self, rect: TileRect, floor: FloorClass) {
        self.pending_edits.push(PendingEdit::PaintFloor(rect, floor));
    }

    pub fn erase_floor(&mut self, rect: TileRect) {
        self.pending_edits.push(PendingEdit::EraseFloor(rect));
    }

    /// Signals that `id`'s construction work has crossed its completion
    /// threshold; the grid mark is applied on the next tick's edit phase,
    /// not here, to respect the single grid-mutation point per tick.
    pub fn notify_building_complete(&mut self, id: BuildingId) {
        self.pending_edits.push(PendingEdit::PlaceBuildingComplete(id));
    }

    pub fn notify_door_destroyed(&mut self, id: BuildingId) {
        self.pending_edits.push(PendingEdit::DoorDestroyed(id));
    }

    pub fn request_path(&mut self, agent: AgentId, start: Vec2, goal: Vec2, profile: Profile, priority: i32) -> RequestId {
        self.path_queue.request_path(agent, start, goal, profile, priority, None)
    }

    pub fn cancel_path(&mut self, id: RequestId) {
        self.path_queue.cancel(id);
    }

    pub fn try_reserve(&mut self, agent: AgentId, target: TargetId, max_crew: u32) -> bool {
        self.reservations.try_reserve(agent, target, max_crew)
    }

    pub fn release(&mut self, agent: AgentId, target: TargetId, reason: ReleaseReason, out_released: &mut Vec<ReservationReleased>) {
        self.reservations.release(agent, target, reason, out_released);
    }

    /// Applies `amount` of damage to whatever `target` resolves to, per the
    /// generic target-dispatch surface `spec.md` 6 exposes. Building damage
    /// crossing zero HP is routed through `notify_door_destroyed` so the
    /// grid edit still lands at the normal tick-ordering point rather than
    /// here; agent damage just deducts HP, letting the existing priority
    /// ladder carry the agent into `Downed` on its own next tick. `kind` and
    /// `source` are opaque to the kernel — damage-curve and attribution
    /// policy stay content-side per 1's exclusions.
    pub fn apply_damage(&mut self, target: TargetHandle, amount: f32, kind: &'static str, source: Option<TargetHandle>) {
        let _ = (kind, source);
        let amount = amount.max(0.0);
        match target {
            TargetHandle::Building(id) => {
                if self.buildings.apply_damage(id, amount as u16) {
                    self.notify_door_destroyed(id);
                }
            }
            TargetHandle::Agent(id) => {
                if let Some(c) = self.colonists.get_mut(&id) {
                    c.needs.hp -= amount;
                }
            }
            TargetHandle::Tile(_, _) | TargetHandle::Reservation(_) => {}
        }
    }

    pub fn spawn_agent(&mut self, position: Vec2) -> AgentId {
        let id = AgentId(self.next_agent_id);
        self.next_agent_id += 1;
        self.colonists.insert(id, ColonistData::new(id, position));
        id
    }

    pub fn remove_agent(&mut self, id: AgentId, outbox: &mut FsmOutbox) {
        if let Some(mut data) = self.colonists.remove(&id) {
            self.reservations.release_all_for_agent(id, ReleaseReason::Death, &mut outbox.reservation_released, &mut outbox.tile_freed);
            if let Some(req) = data.move_goal.take().and_then(|g| g.request_id) {
                self.path_queue.cancel(req);
            }
        }
    }

    pub fn spawn_intruder(&mut self, position: Vec2) -> IntruderId {
        let id = IntruderId(self.next_intruder_id);
        self.next_intruder_id += 1;
        self.intruders.insert(id, IntruderData::new(id, position));
        id
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.clock.set_paused(paused);
    }

    pub fn set_speed(&mut self, multiplier: f32) {
        self.clock.set_speed(multiplier);
    }

    pub fn drop_item(&mut self, item_type: crate::items::ItemType, qty: u16, world_pos: Vec2) -> crate::items::FloorItemId {
        self.items.drop(item_type, qty, world_pos)
    }

    pub fn take_item(&mut self, id: crate::items::FloorItemId, qty: u16) -> u16 {
        self.items.take(id, qty)
    }

    pub fn items_in_zone(&self, zone: &crate::items::StockpileZone) -> Vec<crate::items::FloorItemId> {
        let tile_size = self.grid.tile_size;
        self.items.find_in_zone(zone, |p| ((p.x / tile_size).floor() as i32, (p.y / tile_size).floor() as i32))
    }

    /// Serializes the colony to the `spec.md` 6 binary blob. Building
    /// inventories, grid layers, and agent/intruder snapshots round-trip;
    /// in-flight paths and reservations are re-requested fresh on load.
    pub fn save(&self) -> Vec<u8> {
        let blob = crate::save::SaveBlob {
            tick_rate: self.config.clock.tick_rate as u16,
            seed: self.seed,
            save_tick: self.clock.tick,
            grid: self.grid.clone(),
            buildings: self.buildings.iter().cloned().collect(),
            colonists: self.colonists.values().cloned().collect(),
            intruders: self.intruders.values().cloned().collect(),
            rng_stream: self.rng_stream,
        };
        crate::save::save_game(&blob)
    }

    /// Rebuilds a `Kernel` from a save blob produced by [`Kernel::save`].
    /// Regions are rebuilt from scratch and door block rules are reapplied
    /// since the wire format doesn't persist the region graph itself.
    pub fn load(bytes: &[u8], mut config: KernelConfig) -> Result<Self, crate::save::SaveError> {
        let blob = crate::save::load_game(bytes)?;
        config.clock.tick_rate = blob.tick_rate as u32;
        let mut grid = blob.grid;
        let buildings = BuildingArena::load_raw(blob.buildings);
        crate::save::reapply_door_registry(&mut grid, &buildings);
        let mut regions = RegionGraph::new(config.regions.region_chunk_tiles as i32, grid.tile_size);
        regions.rebuild_full(&grid);

        let mut colonists = HashMap::new();
        let mut next_agent_id = 0;
        for c in blob.colonists {
            next_agent_id = next_agent_id.max(c.id.0 + 1);
            colonists.insert(c.id, c);
        }
        let mut intruders = HashMap::new();
        let mut next_intruder_id = 0;
        for i in blob.intruders {
            next_intruder_id = next_intruder_id.max(i.id.0 + 1);
            intruders.insert(i.id, i);
        }

        Ok(Self {
            grid,
            regions,
            reservations: ReservationTable::default(),
            path_queue: PathRequestQueue::default(),
            buildings,
            items: FloorItemArena::default(),
            clock: SimulationClock::new(config.clock.tick_rate, config.clock.frame_tick_catchup),
            config,
            colonists,
            intruders,
            next_agent_id,
            next_intruder_id,
            pending_edits: Vec::new(),
            pending_rebuilds: Vec::new(),
            seed: blob.seed,
            rng_stream: blob.rng_stream,
        })
    }

    // -- per-tick ordering (`spec.md` 5) --

    /// Applies queued grid/building edits (step 2). Each edit bumps
    /// `grid_version` via the underlying `WorldGrid`/`BuildingArena` calls
    /// and schedules a partial region rebuild at its footprint.
    fn apply_pending_edits(&mut self, outbox: &mut FsmOutbox) {
        let edits = std::mem::take(&mut self.pending_edits);
        for edit in edits {
            match edit {
                PendingEdit::PlaceBuildingComplete(id) => {
                    if let Some(b) = self.buildings.get(id) {
                        self.grid.mark_building(b.gx, b.gy, b.gw, b.gh, b.kind.block_rule());
                        let center = self.grid.tile_center(b.gx, b.gy);
                        self.pending_rebuilds.push((center, self.grid.tile_size * (b.gw.max(b.gh) as f32)));
                        outbox.building_completed.push(crate::events::BuildingCompleted { building: id });
                    }
                }
                PendingEdit::CancelBuilding(id) => {
                    if let Some(b) = self.buildings.cancel(id) {
                        if b.complete {
                            self.grid.unmark_building(b.gx, b.gy, b.gw, b.gh);
                        }
                        let center = self.grid.tile_center(b.gx, b.gy);
                        self.pending_rebuilds.push((center, self.grid.tile_size * (b.gw.max(b.gh) as f32)));
                    }
                }
                PendingEdit::DoorDestroyed(id) => {
                    if let Some(b) = self.buildings.get(id) {
                        self.grid.unmark_building(b.gx, b.gy, b.gw, b.gh);
                        let center = self.grid.tile_center(b.gx, b.gy);
                        self.pending_rebuilds.push((center, self.grid.tile_size * (b.gw.max(b.gh) as f32)));
                        outbox.building_destroyed_notice.push(crate::events::BuildingDestroyed { building: id });
                    }
                }
                PendingEdit::PaintFloor(rect, floor) => {
                    self.grid.paint_floor_rect(rect, floor);
                }
                PendingEdit::EraseFloor(rect) => {
                    self.grid.remove_floor_rect(rect);
                }
            }
        }
    }

    /// Drains queued region/nav rebuilds under `REBUILD_BUDGET_MS` (step 5).
    /// Each rebuild is O(rebuilt-area), never the full grid, per `spec.md`
    /// 4.4; excess requests roll over to the next tick rather than drop.
    fn drain_rebuilds(&mut self) {
        let budget = ms(self.config.budgets.rebuild_budget_ms);
        let start = std::time::Instant::now();
        while let Some((center, radius)) = self.pending_rebuilds.pop() {
            // `rebuild_partial` resets the rect to bare layer-derived cost,
            // forgetting building/door marks; re-apply every complete
            // building overlapping the rect before handing the rect to the
            // region graph, per `WorldGrid::rebuild_partial_rect`'s contract.
            let rect = self.grid.rebuild_partial(center, radius);
            for b in self.buildings.iter() {
                if b.complete && b.footprint().intersects(&rect) {
                    self.grid.mark_building(b.gx, b.gy, b.gw, b.gh, b.kind.block_rule());
                }
            }
            self.regions.rebuild_area(&self.grid, rect);
            if start.elapsed() >= budget {
                break;
            }
        }
    }

    /// Advances the simulation by `real_dt` of wall-clock time, running
    /// every ordering step in `spec.md` 5. `work_giver`/`damage_sink` and the
    /// perception/threat sources are content-policy hooks supplied by the
    /// caller each tick.
    pub fn tick(
        &mut self,
        real_dt: f32,
        work_giver: &dyn WorkGiver,
        damage_sink: &mut dyn DamageSink,
        perception_source: &dyn PerceptionSource,
        threat_source: &dyn ThreatSource,
        outbox: &mut FsmOutbox,
    ) {
        self.apply_pending_edits(outbox);

        let ticks = self.clock.advance(real_dt);
        for _ in 0..ticks {
            let tick = self.clock.tick;
            let mut agent_ids: Vec<AgentId> = self.colonists.keys().copied().collect();
            agent_ids.sort();
            for id in agent_ids {
                let Some(mut data) = self.colonists.remove(&id) else { continue };
                let perception = perception_source.perception_for(id, &data);
                {
                    let mut fsm_world = FsmWorld {
                        grid: &self.grid,
                        regions: &self.regions,
                        reservations: &mut self.reservations,
                        path_queue: &mut self.path_queue,
                        buildings: &mut self.buildings,
                        items: &mut self.items,
                        config: &self.config,
                        tick,
                    };
                    tick_agent(&mut data, &mut fsm_world, &perception, work_giver, outbox);
                }
                self.colonists.insert(id, data);
            }

            let mut intruder_ids: Vec<IntruderId> = self.intruders.keys().copied().collect();
            intruder_ids.sort_by_key(|i| i.0);
            for id in intruder_ids {
                let Some(mut data) = self.intruders.remove(&id) else { continue };
                let target_pos = threat_source.nearest_threat(id, data.position);
                {
                    let mut fsm_world = FsmWorld {
                        grid: &self.grid,
                        regions: &self.regions,
                        reservations: &mut self.reservations,
                        path_queue: &mut self.path_queue,
                        buildings: &mut self.buildings,
                        items: &mut self.items,
                        config: &self.config,
                        tick,
                    };
                    tick_intruder(&mut data, &mut fsm_world, target_pos, self.config.fsm.stagger_speed_mult, damage_sink, outbox);
                }
                self.intruders.insert(id, data);
            }

            for destroyed in outbox.building_destroyed.drain(..) {
                self.pending_edits.push(PendingEdit::DoorDestroyed(destroyed.building));
            }
        }

        let path_budget = ms(self.config.budgets.path_budget_ms);
        let max_expansions = self.config.pathing.path_max_expansions;
        self.path_queue.drain(&self.grid, path_budget, max_expansions);

        self.drain_rebuilds();
    }
}

/// Drains an `FsmOutbox` into real Bevy `EventWriter`s. Kept free-standing
/// (not a method) so plain-Rust callers assembling their own outbox never
/// need a live `App`.
pub fn flush_outbox(
    outbox: &mut FsmOutbox,
    state_changed: &mut EventWriter<StateChanged>,
    path_failed: &mut EventWriter<PathFailed>,
    reservation_released: &mut EventWriter<ReservationReleased>,
    tile_freed: &mut EventWriter<TileFreed>,
    agent_downed: &mut EventWriter<AgentDowned>,
    agent_died: &mut EventWriter<AgentDied>,
    inventory_changed: &mut EventWriter<InventoryChanged>,
    building_completed: &mut EventWriter<crate::events::BuildingCompleted>,
    building_destroyed: &mut EventWriter<crate::events::BuildingDestroyed>,
) {
    for e in outbox.state_changed.drain(..) {
        state_changed.write(e);
    }
    for e in outbox.path_failed.drain(..) {
        path_failed.write(e);
    }
    for e in outbox.reservation_released.drain(..) {
        reservation_released.write(e);
    }
    for e in outbox.tile_freed.drain(..) {
        tile_freed.write(e);
    }
    for e in outbox.agent_downed.drain(..) {
        agent_downed.write(e);
    }
    for e in outbox.agent_died.drain(..) {
        agent_died.write(e);
    }
    for e in outbox.inventory_changed.drain(..) {
        inventory_changed.write(e);
    }
    for e in outbox.building_completed.drain(..) {
        building_completed.write(e);
    }
    for e in outbox.building_destroyed_notice.drain(..) {
        building_destroyed.write(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::TargetHandle;
    use crate::fsm::agent::WorkKind;

    struct NoWork;
    impl WorkGiver for NoWork {
        fn candidates(&self, _agent: &ColonistData) -> Vec<(WorkKind, TargetHandle, i32)> {
            Vec::new()
        }
    }
    struct NoDamage;
    impl DamageSink for NoDamage {
        fn apply_damage(&mut self, _target: TargetHandle, _amount: f32) {}
    }
    struct NoPerception;
    impl PerceptionSource for NoPerception {
        fn perception_for(&self, _agent: AgentId, _data: &ColonistData) -> Perception {
            Perception::default()
        }
    }
    struct NoThreat;
    impl ThreatSource for NoThreat {
        fn nearest_threat(&self, _intruder: IntruderId, _position: Vec2) -> Option<Vec2> {
            None
        }
    }

    #[test]
    fn spawn_and_tick_runs_agent_through_seek_task_to_idle() {
        let mut kernel = Kernel::new(KernelConfig::default(), 20, 20, 32.0, 1);
        let id = kernel.spawn_agent(Vec2::new(16.0, 16.0));
        let mut outbox = FsmOutbox::default();
        kernel.tick(1.0 / 30.0, &NoWork, &mut NoDamage, &NoPerception, &NoThreat, &mut outbox);
        assert_eq!(kernel.agent_state(id), Some(AgentState::Idle));
    }

    #[test]
    fn placing_building_on_solid_tile_is_blocked() {
        let mut kernel = Kernel::new(KernelConfig::default(), 20, 20, 32.0, 1);
        kernel.grid.set_tile_terrain(5, 5, crate::grid::TerrainClass::Water);
        assert!(matches!(kernel.place_building(BuildingKind::Wall, 5, 5, 1, 1, 0), Err(PlaceError::Blocked { .. })));
    }

    #[test]
    fn building_completion_marks_grid_on_next_tick_only() {
        let mut kernel = Kernel::new(KernelConfig::default(), 20, 20, 32.0, 1);
        let id = kernel.place_building(BuildingKind::Wall, 3, 3, 1, 1, 0).unwrap();
        assert!(!kernel.grid.solid_at(3, 3));
        kernel.notify_building_complete(id);
        assert!(!kernel.grid.solid_at(3, 3));
        let mut outbox = FsmOutbox::default();
        kernel.tick(1.0 / 30.0, &NoWork, &mut NoDamage, &NoPerception, &NoThreat, &mut outbox);
        assert!(kernel.grid.solid_at(3, 3));
    }

    #[test]
    fn building_completion_emits_building_completed_once_applied() {
        let mut kernel = Kernel::new(KernelConfig::default(), 20, 20, 32.0, 1);
        let id = kernel.place_building(BuildingKind::Wall, 3, 3, 1, 1, 0).unwrap();
        kernel.notify_building_complete(id);
        let mut outbox = FsmOutbox::default();
        kernel.tick(1.0 / 30.0, &NoWork, &mut NoDamage, &NoPerception, &NoThreat, &mut outbox);
        assert_eq!(outbox.building_completed.len(), 1);
        assert_eq!(outbox.building_completed[0].building, id);
    }

    #[test]
    fn save_and_load_round_trips_grid_and_colonist_state() {
        let mut kernel = Kernel::new(KernelConfig::default(), 10, 10, 32.0, 42);
        let id = kernel.place_building(BuildingKind::Wall, 2, 2, 1, 1, 0).unwrap();
        kernel.notify_building_complete(id);
        kernel.spawn_agent(Vec2::new(48.0, 48.0));
        let mut outbox = FsmOutbox::default();
        kernel.tick(1.0 / 30.0, &NoWork, &mut NoDamage, &NoPerception, &NoThreat, &mut outbox);

        let bytes = kernel.save();
        let loaded = Kernel::load(&bytes, KernelConfig::default()).unwrap();

        assert!(loaded.grid.solid_at(2, 2));
        assert_eq!(loaded.colonists().count(), 1);
        assert_eq!(loaded.seed, 42);
    }

    #[test]
    fn apply_damage_to_agent_downs_it_on_next_tick() {
        let mut kernel = Kernel::new(KernelConfig::default(), 10, 10, 32.0, 1);
        let id = kernel.spawn_agent(Vec2::new(16.0, 16.0));
        kernel.apply_damage(TargetHandle::Agent(id), 1000.0, "melee", None);
        assert!(kernel.agent_health(id).unwrap().hp <= 0.0);
        let mut outbox = FsmOutbox::default();
        kernel.tick(1.0 / 30.0, &NoWork, &mut NoDamage, &NoPerception, &NoThreat, &mut outbox);
        assert_eq!(kernel.agent_state(id), Some(AgentState::Downed));
        assert_eq!(outbox.agent_downed.len(), 1);
    }

    #[test]
    fn apply_damage_crossing_zero_destroys_building_on_next_tick() {
        let mut kernel = Kernel::new(KernelConfig::default(), 10, 10, 32.0, 1);
        let id = kernel.place_building(BuildingKind::Door, 3, 3, 1, 1, 0).unwrap();
        kernel.notify_building_complete(id);
        let mut outbox = FsmOutbox::default();
        kernel.tick(1.0 / 30.0, &NoWork, &mut NoDamage, &NoPerception, &NoThreat, &mut outbox);
        assert!(kernel.grid.solid_at(3, 3) || kernel.grid.is_door(3, 3));

        let hp = kernel.buildings.get(id).unwrap().hp;
        kernel.apply_damage(TargetHandle::Building(id), hp as f32, "bash", None);
        let mut outbox = FsmOutbox::default();
        kernel.tick(1.0 / 30.0, &NoWork, &mut NoDamage, &NoPerception, &NoThreat, &mut outbox);
        assert_eq!(outbox.building_destroyed_notice.len(), 1);
    }

    #[test]
    fn dropped_item_is_found_in_its_stockpile_zone() {
        let mut kernel = Kernel::new(KernelConfig::default(), 10, 10, 32.0, 1);
        let item = kernel.drop_item(crate::items::ItemType::Wood, 5, Vec2::new(48.0, 48.0));
        let zone = crate::items::StockpileZone {
            rect: crate::grid::TileRect { x0: 0, y0: 0, x1: 4, y1: 4 },
            filter: crate::items::StockpileFilter::AllowAll,
            label: "test".to_string(),
        };
        assert_eq!(kernel.items_in_zone(&zone), vec![item]);
        assert_eq!(kernel.take_item(item, 5), 5);
    }
}
