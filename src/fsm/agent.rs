// src/fsm/agent.rs - priority-preemptive colonist FSM. Grounded on the
// teacher's `core/goap.rs` (a `GoapAgent` picking the highest-scored `Goal`
// whose preconditions hold, then running it to completion or interruption),
// collapsed here to the fixed priority ladder `spec.md` 4.8 specifies in
// place of GOAP's open-ended goal scoring.
use bevy::prelude::*;

use crate::agents::{AgentState, CachedPath, Carrying, ColonistData, CookingSubstate, HaulSubstate, MoveGoal, TargetHandle};
use crate::buildings::{BuildingArena, BuildingKind};
use crate::config::KernelConfig;
use crate::fsm::FsmOutbox;
use crate::grid::WorldGrid;
use crate::items::{FloorItemArena, FloorItemId, ItemType};
use crate::path_queue::PathRequestQueue;
use crate::pathfinding::Profile;
use crate::regions::RegionGraph;
use crate::reservation::{ReservationTable, TargetId};

const EAT_THRESHOLD: f32 = 70.0;
const SLEEP_THRESHOLD: f32 = 70.0;
const WHEAT_PER_BATCH: u16 = 10;
const BREAD_PER_BATCH: u16 = 4;
const DOWNED_BLEED_PER_SEC: f32 = 1.0;
/// `hp` floor a downed agent bleeds out at; crossing it fires `agent_died`
/// exactly once (`spec.md` 5 "Death"). Instant lethal hits still route
/// through `downed` first — the kernel's `apply_damage` only deducts HP,
/// per 1's exclusion of combat-damage-curve policy.
pub const DEATH_HP_FLOOR: f32 = -50.0;

#[derive(Clone, Copy, Debug, Default)]
pub struct Perception {
    pub enemy_near: bool,
    pub can_fight: bool,
    pub draft_order: Option<Vec2>,
    pub medical_available: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WorkKind {
    Build,
    Chop,
    Mine,
    Harvest,
    /// Move a loose floor stack into the nearest stockpile. `target` must
    /// be `TargetHandle::Reservation(TargetId(floor_item_id))` so the
    /// pickup is reservable the same way a building target is.
    Haul,
    /// Collect a stove's finished bread batch and carry it to the nearest
    /// stockpile. `target` is the stove `TargetHandle::Building`.
    HaulBread,
}

impl WorkKind {
    fn state(self) -> AgentState {
        match self {
            WorkKind::Build => AgentState::Build,
            WorkKind::Chop => AgentState::Chop,
            WorkKind::Mine => AgentState::Mine,
            WorkKind::Harvest => AgentState::Harvest,
            WorkKind::Haul => AgentState::Haul,
            WorkKind::HaulBread => AgentState::StoreBread,
        }
    }
}

/// External strategy interface the kernel only defines, per `spec.md` 4.5:
/// concrete work-item sourcing (which trees need chopping, which blueprints
/// need building) is content policy, not kernel policy.
pub trait WorkGiver {
    fn candidates(&self, agent: &ColonistData) -> Vec<(WorkKind, TargetHandle, i32)>;
}

pub struct World<'a> {
    pub grid: &'a WorldGrid,
    pub regions: &'a RegionGraph,
    pub reservations: &'a mut ReservationTable,
    pub path_queue: &'a mut PathRequestQueue,
    pub buildings: &'a mut BuildingArena,
    pub items: &'a mut FloorItemArena,
    pub config: &'a KernelConfig,
    pub tick: u64,
}

fn target_reservation_id(target: TargetHandle) -> Option<TargetId> {
    match target {
        TargetHandle::Building(b) => Some(TargetId(b.0)),
        TargetHandle::Reservation(t) => Some(t),
        _ => None,
    }
}

fn soft_lock_ticks(config: &KernelConfig) -> u64 {
    (config.fsm.soft_lock_sec * config.clock.tick_rate as f32).round() as u64
}

fn transition(agent: &mut ColonistData, to: AgentState, reason: &'static str, world: &World, outbox: &mut FsmOutbox) {
    let from = agent.state;
    if from == to {
        return;
    }
    outbox.push_state_changed(agent.id, state_name(from), state_name(to), reason, world.tick);
    if to == AgentState::Downed {
        outbox.push_downed(agent.id);
    }
    agent.transition(to, reason, world.tick, soft_lock_ticks(world.config));
    agent.move_goal = None;
}

fn state_name(s: AgentState) -> &'static str {
    use AgentState::*;
    match s {
        Flee => "flee",
        Drafted => "drafted",
        WaitingAtDoor => "waiting_at_door",
        BeingTreated => "being_treated",
        Doctoring => "doctoring",
        Downed => "downed",
        HealSeek => "heal_seek",
        Sleep => "sleep",
        GoToSleep => "go_to_sleep",
        Eat => "eat",
        StoreBread => "store_bread",
        HaulBread => "haul_bread",
        Cooking => "cooking",
        Build => "build",
        Chop => "chop",
        Mine => "mine",
        Harvest => "harvest",
        Haul => "haul",
        Resting => "resting",
        Move => "move",
        Idle => "idle",
        SeekTask => "seek_task",
    }
}

/// Highest-priority candidate given the agent's needs and external
/// perception, per the `spec.md` 4.8 priority ladder. Returns `None` when
/// no candidate beats staying put (the current-state machinery decides
/// continuation in that case).
fn evaluate_candidate(agent: &ColonistData, perception: &Perception) -> Option<AgentState> {
    if agent.needs.hp <= 0.0 || agent.needs.consciousness <= 0.0 {
        return Some(AgentState::Downed);
    }
    if perception.enemy_near && !perception.can_fight && perception.draft_order.is_none() {
        return Some(AgentState::Flee);
    }
    if perception.draft_order.is_some() {
        return Some(AgentState::Drafted);
    }
    if agent.needs.fatigue >= SLEEP_THRESHOLD {
        return Some(AgentState::GoToSleep);
    }
    if agent.needs.hunger >= EAT_THRESHOLD {
        return Some(AgentState::Eat);
    }
    None
}

/// Runs one tick of the FSM for a single agent. `work_giver` supplies
/// content-level task candidates; `perception` supplies the externally
/// computed threat/command signals `spec.md` 4.1 leaves as hooks.
pub fn tick_agent(agent: &mut ColonistData, world: &mut World, perception: &Perception, work_giver: &dyn WorkGiver, outbox: &mut FsmOutbox) {
    if let Some(candidate) = evaluate_candidate(agent, perception) {
        if agent.can_preempt_with(candidate, world.tick) {
            release_current(agent, world, outbox);
            transition(agent, candidate, "priority_preempt", world, outbox);
        }
    }

    match agent.state {
        AgentState::Downed => tick_downed(agent, world, outbox),
        AgentState::Flee => tick_flee(agent, world, outbox),
        AgentState::Drafted => tick_drafted(agent, world, perception, outbox),
        AgentState::GoToSleep => tick_go_to_sleep(agent, world, outbox),
        AgentState::Sleep => tick_sleep(agent, world, outbox),
        AgentState::Eat => tick_eat(agent, world, outbox),
        AgentState::Cooking => tick_cooking(agent, world, outbox),
        AgentState::Build | AgentState::Chop | AgentState::Mine | AgentState::Harvest => {
            tick_work(agent, world, outbox)
        }
        AgentState::Haul | AgentState::StoreBread | AgentState::HaulBread => tick_haul(agent, world, outbox),
        AgentState::Move => { /* move is always entered via a delegating state; nothing to do standalone */ }
        AgentState::Idle => tick_idle(agent, world, work_giver, outbox),
        AgentState::SeekTask => tick_seek_task(agent, world, work_giver, outbox),
        AgentState::Resting => tick_resting(agent, world, outbox),
        AgentState::WaitingAtDoor | AgentState::BeingTreated | AgentState::Doctoring | AgentState::HealSeek => {
            // Paired/external states: driven by kernel-facade commands
            // (`assign_doctor`, door-open callback), not by this tick.
        }
    }
}

fn release_current(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    if let Some(tid) = agent.target.and_then(target_reservation_id) {
        world.reservations.release(agent.id, tid, crate::events::ReleaseReason::StateChange, &mut outbox.reservation_released);
    }
    if let Some(req) = agent.move_goal.and_then(|g| g.request_id) {
        world.path_queue.cancel(req);
    }
}

fn tick_downed(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    // Cannot move; needs still tick elsewhere. Waiting for a doctor's
    // external rescue command, or bleeding out past `DEATH_HP_FLOOR`.
    if agent.dead {
        return;
    }
    agent.needs.hp = (agent.needs.hp - world.config.tick_dt() * DOWNED_BLEED_PER_SEC).max(DEATH_HP_FLOOR);
    if agent.needs.hp <= DEATH_HP_FLOOR {
        agent.dead = true;
        outbox.push_died(agent.id, crate::events::DeathCause::Bleeding);
    }
}

/// Generic `move`: submits/advances a path toward `goal.target_world`,
/// handling re-path triggers and door waits. Returns `true` once arrived
/// within `goal.arrival_radius` of the final waypoint.
fn drive_move(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) -> MoveOutcome {
    let Some(mut goal) = agent.move_goal else { return MoveOutcome::Pending };
    let cfg = &world.config.fsm;
    let tick_rate = world.config.clock.tick_rate as f32;

    if let Some(req) = goal.request_id {
        if let Some(delivery) = world.path_queue.poll(agent.id) {
            if delivery.request == req {
                goal.request_id = None;
                if delivery.cancelled {
                    // superseded; a fresh request will be issued below.
                } else if let Some(path) = delivery.path {
                    let start_tile = world.grid.tile_at(path[0].x, path[0].y);
                    agent.path = Some(CachedPath {
                        waypoints: path,
                        index: 0,
                        start_tile,
                        goal_tile: world.grid.tile_at(goal.target_world.x, goal.target_world.y),
                        grid_version_at_compute: world.grid.grid_version,
                    });
                } else {
                    outbox.path_failed.push(crate::events::PathFailed {
                        agent: agent.id,
                        goal_tile: world.grid.tile_at(goal.target_world.x, goal.target_world.y),
                    });
                    agent.move_goal = None;
                    return MoveOutcome::Failed;
                }
            }
        }
    }

    if agent.path.is_none() && goal.request_id.is_none() {
        let id = world.path_queue.request_path(agent.id, agent.position, goal.target_world, Profile::Agent, agent.state.priority(), None);
        goal.request_id = Some(id);
        goal.last_repath_tick = world.tick;
        goal.stuck_since_tick = world.tick;
        goal.stuck_anchor = agent.position;
        agent.move_goal = Some(goal);
        return MoveOutcome::Pending;
    }

    let Some(path) = agent.path.clone() else {
        agent.move_goal = Some(goal);
        return MoveOutcome::Pending;
    };

    // Re-path trigger: grid mutated since this path was computed and the
    // remaining route now crosses a non-walkable tile.
    if world.grid.grid_version != path.grid_version_at_compute {
        let blocked = path.waypoints[path.index..].iter().any(|wp| {
            let (gx, gy) = world.grid.tile_at(wp.x, wp.y);
            !world.grid.is_walkable(gx, gy, Profile::Agent)
        });
        if blocked {
            agent.path = None;
            goal.request_id = None;
            agent.move_goal = Some(goal);
            return drive_move(agent, world, outbox);
        }
    }

    // Re-path trigger: goal moved far from where the path was aimed.
    let goal_moved_tiles = (path.waypoints.last().copied().unwrap_or(goal.target_world) - goal.target_world).length() / world.grid.tile_size;
    if goal_moved_tiles > cfg.repath_goal_moved_tiles && world.tick.saturating_sub(goal.last_repath_tick) >= tick_rate as u64 {
        agent.path = None;
        goal.request_id = None;
        goal.last_repath_tick = world.tick;
        agent.move_goal = Some(goal);
        return drive_move(agent, world, outbox);
    }

    // Door wait: next tile is a closed door.
    if let Some(next) = path.waypoints.get(path.index + 1) {
        let (ngx, ngy) = world.grid.tile_at(next.x, next.y);
        if world.grid.is_door(ngx, ngy) && world.grid.door_is_open(ngx, ngy) == Some(false) {
            goal.waiting_at_door = Some((ngx, ngy));
            agent.move_goal = Some(goal);
            return MoveOutcome::WaitingAtDoor;
        }
    }
    goal.waiting_at_door = None;

    // Stuck detector.
    let stuck_window_ticks = (cfg.stuck_window_sec * tick_rate) as u64;
    if world.tick.saturating_sub(goal.stuck_since_tick) >= stuck_window_ticks {
        let moved = (agent.position - goal.stuck_anchor).length();
        if moved < cfg.stuck_eps_world {
            agent.path = None;
            goal.request_id = None;
            goal.stuck_since_tick = world.tick;
            goal.stuck_anchor = agent.position;
            agent.move_goal = Some(goal);
            return drive_move(agent, world, outbox);
        }
        goal.stuck_since_tick = world.tick;
        goal.stuck_anchor = agent.position;
    }

    let mut path = path;
    let base_speed = 64.0_f32;
    let tile_cost = world.grid.traverse_cost(
        world.grid.tile_at(agent.position.x, agent.position.y).0,
        world.grid.tile_at(agent.position.x, agent.position.y).1,
    );
    let fatigue_mod = 1.0 - (agent.needs.fatigue / 200.0).min(0.5);
    let speed = base_speed * fatigue_mod / tile_cost.max(0.1);

    let target_wp = path.waypoints[path.index];
    let to_target = target_wp - agent.position;
    let dist = to_target.length();
    let dt = 1.0 / tick_rate;
    if dist > cfg.arrival_eps_world {
        let step = speed * dt;
        agent.position += to_target.normalize_or_zero() * step.min(dist);
        agent.facing = to_target.normalize_or_zero();
    } else if path.index + 1 < path.waypoints.len() {
        path.index += 1;
    }
    agent.path = Some(path.clone());
    agent.move_goal = Some(goal);

    let at_last = path.index == path.waypoints.len() - 1;
    let dist_to_final = (path.waypoints[path.waypoints.len() - 1] - agent.position).length();
    if at_last && dist_to_final < goal.arrival_radius {
        agent.path = None;
        agent.move_goal = None;
        MoveOutcome::Arrived
    } else {
        MoveOutcome::Pending
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MoveOutcome {
    Arrived,
    Pending,
    Failed,
    WaitingAtDoor,
}

fn start_move(agent: &mut ColonistData, target_world: Vec2, arrival_radius: f32, world: &World) {
    agent.move_goal = Some(MoveGoal {
        target_world,
        arrival_radius,
        request_id: None,
        last_repath_tick: world.tick,
        stuck_since_tick: world.tick,
        stuck_anchor: agent.position,
        waiting_at_door: None,
    });
    agent.path = None;
}

fn tick_seek_task(agent: &mut ColonistData, world: &mut World, work_giver: &dyn WorkGiver, outbox: &mut FsmOutbox) {
    for (kind, target, _priority) in work_giver.candidates(agent) {
        let Some(tid) = target_reservation_id(target) else { continue };
        if !world.regions.is_reachable(world.grid, agent.position, target_world_of(target, world), Profile::Agent) {
            continue;
        }
        if world.reservations.try_reserve(agent.id, tid, 1) {
            agent.target = Some(target);
            agent.work_started_tick = world.tick;
            transition(agent, kind.state(), "seek_task_committed", world, outbox);
            return;
        }
    }
    transition(agent, AgentState::Idle, "no_reachable_reservable_candidate", world, outbox);
}

fn target_world_of(target: TargetHandle, world: &World) -> Vec2 {
    match target {
        TargetHandle::Building(b) => world
            .buildings
            .get(b)
            .map(|building| world.grid.tile_center(building.gx, building.gy))
            .unwrap_or(Vec2::ZERO),
        TargetHandle::Tile(gx, gy) => world.grid.tile_center(gx, gy),
        // The only producer of a bare `Reservation` target today is a
        // haul candidate pointing at a floor item stack.
        TargetHandle::Reservation(tid) => world.items.get(FloorItemId(tid.0)).map(|it| it.world_pos).unwrap_or(Vec2::ZERO),
        TargetHandle::Agent(_) => Vec2::ZERO,
    }
}

fn tick_idle(agent: &mut ColonistData, world: &mut World, work_giver: &dyn WorkGiver, outbox: &mut FsmOutbox) {
    // Small re-evaluation delay: only re-enter seek_task once soft lock
    // (reused here as the idle re-check cadence) has elapsed.
    if world.tick >= agent.soft_lock_until_tick {
        transition(agent, AgentState::SeekTask, "idle_reeval", world, outbox);
        tick_seek_task(agent, world, work_giver, outbox);
    }
}

fn work_radius_target(agent: &ColonistData, world: &World) -> Option<Vec2> {
    match agent.target? {
        TargetHandle::Building(b) => world.buildings.get(b).map(|building| world.grid.tile_center(building.gx, building.gy)),
        TargetHandle::Tile(gx, gy) => Some(world.grid.tile_center(gx, gy)),
        _ => None,
    }
}

fn tick_work(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    let Some(target_pos) = work_radius_target(agent, world) else {
        transition(agent, AgentState::SeekTask, "lost_target", world, outbox);
        return;
    };
    let dist = (target_pos - agent.position).length();
    let work_radius = world.grid.tile_size * 1.5;
    if dist > work_radius {
        if agent.move_goal.is_none() {
            start_move(agent, target_pos, work_radius, world);
        }
        drive_move(agent, world, outbox);
        return;
    }

    let timeout_ticks = (world.config.fsm.work_timeout_sec * world.config.clock.tick_rate as f32) as u64;
    if world.tick.saturating_sub(agent.work_started_tick) > timeout_ticks {
        release_current(agent, world, outbox);
        agent.target = None;
        transition(agent, AgentState::SeekTask, "work_timeout", world, outbox);
        return;
    }

    let skill = *agent.skills.get("labor").unwrap_or(&10);
    let amount = skill as f32 * 0.1;
    if let Some(TargetHandle::Building(b)) = agent.target {
        if world.buildings.apply_build_work(b, amount) {
            world.items.drop(ItemType::Wood, 1, agent.position);
            release_current(agent, world, outbox);
            agent.target = None;
            transition(agent, AgentState::SeekTask, "work_complete", world, outbox);
        }
    }
}

/// Nearest complete `StockpileMarker` building's tile center, or `None`
/// when the colony has none — hauling has nowhere content-policy-free to
/// drop cargo without one.
fn nearest_stockpile(agent: &ColonistData, world: &World) -> Option<Vec2> {
    world
        .buildings
        .iter()
        .filter(|b| b.complete && b.kind == BuildingKind::StockpileMarker)
        .map(|b| world.grid.tile_center(b.gx, b.gy))
        .min_by(|a, b| (*a - agent.position).length().partial_cmp(&(*b - agent.position).length()).unwrap())
}

/// Drops whatever the agent is carrying on the floor under it and clears
/// the cargo, shared by every haul drop-off/abort path.
fn drop_carried(agent: &mut ColonistData, world: &mut World) {
    if let Carrying::Item(item_type, qty) = agent.carrying {
        world.items.drop(item_type, qty, agent.position);
    }
    agent.carrying = Carrying::None;
}

/// `haul`/`store_bread`/`haul_bread` collapse to move-to-cargo,
/// pick-up, move-to-stockpile, deposit — the same shape as `tick_cooking`'s
/// `AcquireWheat`/`CarryToStove` substates.
fn tick_haul(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    match agent.state {
        AgentState::Haul => tick_haul_generic(agent, world, outbox),
        AgentState::StoreBread | AgentState::HaulBread => tick_haul_bread(agent, world, outbox),
        _ => unreachable!("tick_haul only dispatched for haul/store_bread/haul_bread"),
    }
}

fn tick_haul_generic(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    let substate = agent.haul_substate.unwrap_or(HaulSubstate::ToPickup);
    match substate {
        HaulSubstate::ToPickup => {
            let Some(TargetHandle::Reservation(tid)) = agent.target else {
                transition(agent, AgentState::SeekTask, "no_haul_target", world, outbox);
                return;
            };
            let item_id = FloorItemId(tid.0);
            let Some(pos) = world.items.get(item_id).map(|it| it.world_pos) else {
                release_current(agent, world, outbox);
                agent.target = None;
                transition(agent, AgentState::SeekTask, "haul_item_gone", world, outbox);
                return;
            };
            if agent.move_goal.is_none() && agent.path.is_none() {
                start_move(agent, pos, world.grid.tile_size, world);
            }
            if drive_move(agent, world, outbox) == MoveOutcome::Arrived {
                let Some(item) = world.items.get(item_id) else {
                    release_current(agent, world, outbox);
                    agent.target = None;
                    transition(agent, AgentState::SeekTask, "haul_item_gone", world, outbox);
                    return;
                };
                let (item_type, qty) = (item.item_type, item.qty);
                world.items.take(item_id, qty);
                agent.carrying = Carrying::Item(item_type, qty);
                agent.haul_substate = Some(HaulSubstate::ToDropoff);
                release_current(agent, world, outbox);
                agent.target = None;
            }
        }
        HaulSubstate::ToDropoff => {
            let Some(dest) = nearest_stockpile(agent, world) else {
                drop_carried(agent, world);
                agent.haul_substate = None;
                transition(agent, AgentState::SeekTask, "no_stockpile", world, outbox);
                return;
            };
            if agent.move_goal.is_none() && agent.path.is_none() {
                start_move(agent, dest, world.grid.tile_size, world);
            }
            if drive_move(agent, world, outbox) == MoveOutcome::Arrived {
                drop_carried(agent, world);
                agent.haul_substate = None;
                transition(agent, AgentState::SeekTask, "haul_delivered", world, outbox);
            }
        }
    }
}

fn tick_haul_bread(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    match agent.state {
        AgentState::StoreBread => {
            let Some(TargetHandle::Building(stove)) = agent.target else {
                transition(agent, AgentState::SeekTask, "no_stove_target", world, outbox);
                return;
            };
            let Some(building) = world.buildings.get(stove) else {
                transition(agent, AgentState::SeekTask, "stove_missing", world, outbox);
                return;
            };
            let center = world.grid.tile_center(building.gx, building.gy);
            if agent.move_goal.is_none() && agent.path.is_none() {
                start_move(agent, center, world.grid.tile_size * 1.5, world);
            }
            if drive_move(agent, world, outbox) == MoveOutcome::Arrived {
                let taken = world.buildings.get_mut(stove).and_then(|b| b.inventory.get_mut(1)).map(|slot| {
                    let qty = slot.qty;
                    slot.qty = 0;
                    slot.item = None;
                    qty
                });
                release_current(agent, world, outbox);
                agent.target = None;
                match taken {
                    Some(qty) if qty > 0 => {
                        outbox.push_inventory_changed(stove, -(qty as i32));
                        agent.carrying = Carrying::Item(ItemType::Bread, qty);
                        transition(agent, AgentState::HaulBread, "bread_collected", world, outbox);
                    }
                    _ => {
                        transition(agent, AgentState::SeekTask, "no_bread_ready", world, outbox);
                    }
                }
            }
        }
        AgentState::HaulBread => {
            let Some(dest) = nearest_stockpile(agent, world) else {
                drop_carried(agent, world);
                transition(agent, AgentState::SeekTask, "no_stockpile", world, outbox);
                return;
            };
            if agent.move_goal.is_none() && agent.path.is_none() {
                start_move(agent, dest, world.grid.tile_size, world);
            }
            if drive_move(agent, world, outbox) == MoveOutcome::Arrived {
                drop_carried(agent, world);
                transition(agent, AgentState::SeekTask, "bread_delivered", world, outbox);
            }
        }
        _ => unreachable!("tick_haul_bread only dispatched for store_bread/haul_bread"),
    }
}

fn tick_cooking(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    let substate = agent.cooking_substate.unwrap_or(CookingSubstate::AcquireWheat);
    match substate {
        CookingSubstate::AcquireWheat => {
            let found = world
                .items
                .iter()
                .find(|it| it.item_type == ItemType::Wheat && it.qty >= WHEAT_PER_BATCH)
                .map(|it| (it.id, it.world_pos));
            let Some((item_id, pos)) = found else {
                transition(agent, AgentState::SeekTask, "no_wheat_available", world, outbox);
                return;
            };
            if agent.move_goal.is_none() && agent.path.is_none() {
                start_move(agent, pos, world.grid.tile_size, world);
            }
            if drive_move(agent, world, outbox) == MoveOutcome::Arrived {
                world.items.take(item_id, WHEAT_PER_BATCH);
                agent.carrying = crate::agents::Carrying::Wheat(WHEAT_PER_BATCH as u8);
                agent.cooking_substate = Some(CookingSubstate::CarryToStove);
            }
        }
        CookingSubstate::CarryToStove => {
            let Some(TargetHandle::Building(stove)) = agent.target else {
                transition(agent, AgentState::SeekTask, "no_stove_target", world, outbox);
                return;
            };
            let Some(building) = world.buildings.get(stove) else {
                transition(agent, AgentState::SeekTask, "stove_missing", world, outbox);
                return;
            };
            let center = world.grid.tile_center(building.gx, building.gy);
            if agent.move_goal.is_none() && agent.path.is_none() {
                start_move(agent, center, world.grid.tile_size * 1.5, world);
            }
            if drive_move(agent, world, outbox) == MoveOutcome::Arrived {
                if let crate::agents::Carrying::Wheat(q) = agent.carrying {
                    if let Some(slot) = world.buildings.get_mut(stove).and_then(|b| b.inventory.get_mut(0)) {
                        slot.item = Some(ItemType::Wheat);
                        slot.qty += q as u16;
                    }
                    outbox.push_inventory_changed(stove, q as i32);
                }
                agent.carrying = crate::agents::Carrying::None;
                agent.cooking_substate = Some(CookingSubstate::Cook);
                agent.cook_progress = 0.0;
            }
        }
        CookingSubstate::Cook => {
            let skill = *agent.skills.get("cooking").unwrap_or(&10) as f32;
            let cook_time_total = 20.0 - (skill * 0.1).min(15.0);
            agent.cook_progress += world.config.tick_dt() / cook_time_total.max(1.0);
            if agent.cook_progress >= 1.0 {
                if let Some(TargetHandle::Building(stove)) = agent.target {
                    if let Some(b) = world.buildings.get_mut(stove) {
                        if let Some(slot) = b.inventory.get_mut(0) {
                            slot.qty = slot.qty.saturating_sub(WHEAT_PER_BATCH);
                        }
                        if let Some(bread_slot) = b.inventory.get_mut(1) {
                            bread_slot.item = Some(ItemType::Bread);
                            bread_slot.qty += BREAD_PER_BATCH;
                        }
                    }
                }
                agent.cook_progress = 0.0;
                agent.cooking_substate = None;
                agent.target = None;
                transition(agent, AgentState::SeekTask, "batch_complete", world, outbox);
            }
        }
        CookingSubstate::DepositBread => {
            agent.cooking_substate = None;
            transition(agent, AgentState::SeekTask, "deposit_complete", world, outbox);
        }
    }
}

fn tick_go_to_sleep(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    let Some(bed_pos) = work_radius_target(agent, world).or(Some(agent.position)) else { return };
    if agent.move_goal.is_none() && agent.path.is_none() {
        start_move(agent, bed_pos, world.grid.tile_size, world);
    }
    if drive_move(agent, world, outbox) == MoveOutcome::Arrived {
        transition(agent, AgentState::Sleep, "arrived_at_bed", world, outbox);
    }
}

fn tick_sleep(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    agent.needs.fatigue = (agent.needs.fatigue - world.config.tick_dt() * 4.0).max(0.0);
    if agent.needs.fatigue <= 0.0 {
        transition(agent, AgentState::SeekTask, "rested", world, outbox);
    }
}

fn tick_eat(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    agent.needs.hunger = (agent.needs.hunger - world.config.tick_dt() * 20.0).max(0.0);
    if agent.needs.hunger <= 0.0 {
        transition(agent, AgentState::SeekTask, "fed", world, outbox);
    }
}

fn tick_flee(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    if agent.move_goal.is_none() {
        // Flee to a far corner; real safe-tile selection (region BFS away
        // from the threat) is content policy fed in via `perception`.
        let safe = Vec2::new(world.grid.tile_size * (world.grid.cols - 1) as f32, agent.position.y);
        start_move(agent, safe, world.grid.tile_size, world);
    }
    if drive_move(agent, world, outbox) == MoveOutcome::Arrived {
        transition(agent, AgentState::SeekTask, "reached_safety", world, outbox);
    }
}

fn tick_drafted(agent: &mut ColonistData, world: &mut World, perception: &Perception, outbox: &mut FsmOutbox) {
    if let Some(order) = perception.draft_order {
        if agent.move_goal.is_none() {
            start_move(agent, order, world.grid.tile_size, world);
        }
        drive_move(agent, world, outbox);
    }
}

fn tick_resting(agent: &mut ColonistData, world: &mut World, outbox: &mut FsmOutbox) {
    agent.needs.fatigue = (agent.needs.fatigue - world.config.tick_dt() * 2.0).max(0.0);
    if agent.needs.fatigue <= 0.0 {
        transition(agent, AgentState::SeekTask, "resting_done", world, outbox);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentId;
    use crate::buildings::BuildingArena;
    use crate::config::KernelConfig;
    use crate::grid::WorldGrid;
    use crate::items::FloorItemArena;
    use crate::path_queue::PathRequestQueue;
    use crate::regions::RegionGraph;
    use crate::reservation::ReservationTable;

    struct NoWork;
    impl WorkGiver for NoWork {
        fn candidates(&self, _agent: &ColonistData) -> Vec<(WorkKind, TargetHandle, i32)> {
            Vec::new()
        }
    }

    fn harness() -> (WorldGrid, RegionGraph, ReservationTable, PathRequestQueue, BuildingArena, FloorItemArena, KernelConfig) {
        let grid = WorldGrid::new(20, 20, 32.0, 8);
        let mut regions = RegionGraph::new(12, 32.0);
        regions.rebuild_full(&grid);
        (grid, regions, ReservationTable::default(), PathRequestQueue::default(), BuildingArena::default(), FloorItemArena::default(), KernelConfig::default())
    }

    #[test]
    fn seek_task_with_no_candidates_goes_idle() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut agent = ColonistData::new(AgentId(1), Vec2::new(16.0, 16.0));
        let mut outbox = FsmOutbox::default();
        tick_seek_task(&mut agent, &mut world, &NoWork, &mut outbox);
        assert_eq!(agent.state, AgentState::Idle);
    }

    #[test]
    fn high_hunger_preempts_seek_task_into_eat() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut agent = ColonistData::new(AgentId(1), Vec2::new(16.0, 16.0));
        agent.needs.hunger = 95.0;
        let mut outbox = FsmOutbox::default();
        tick_agent(&mut agent, &mut world, &Perception::default(), &NoWork, &mut outbox);
        assert_eq!(agent.state, AgentState::Eat);
    }

    #[test]
    fn eat_state_reduces_hunger_and_returns_to_seek_task() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut agent = ColonistData::new(AgentId(1), Vec2::new(16.0, 16.0));
        agent.transition(AgentState::Eat, "test", 0, 12);
        agent.needs.hunger = 0.5;
        let mut outbox = FsmOutbox::default();
        tick_eat(&mut agent, &mut world, &mut outbox);
        assert_eq!(agent.state, AgentState::SeekTask);
    }

    #[test]
    fn haul_moves_floor_item_into_nearest_stockpile() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let stockpile = buildings.place_blueprint(BuildingKind::StockpileMarker, 8, 8, 1, 1, 0);
        buildings.get_mut(stockpile).unwrap().complete = true;
        let item_id = items.drop(ItemType::Wood, 5, Vec2::new(16.0, 16.0));
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut agent = ColonistData::new(AgentId(1), Vec2::new(16.0, 16.0));
        agent.state = AgentState::Haul;
        agent.target = Some(TargetHandle::Reservation(TargetId(item_id.0)));
        let mut outbox = FsmOutbox::default();

        let mut picked_up = false;
        for tick in 0..500 {
            world.tick = tick;
            tick_haul(&mut agent, &mut world, &mut outbox);
            world.path_queue.drain(world.grid, std::time::Duration::ZERO, 20_000);
            if !picked_up && agent.haul_substate == Some(HaulSubstate::ToDropoff) {
                picked_up = true;
                assert_eq!(agent.carrying, Carrying::Item(ItemType::Wood, 5));
                assert!(world.items.get(item_id).is_none());
            }
            if agent.state == AgentState::SeekTask {
                break;
            }
        }
        assert!(picked_up);
        assert_eq!(agent.state, AgentState::SeekTask);
        assert_eq!(agent.carrying, Carrying::None);
    }

    #[test]
    fn store_bread_collects_from_stove_then_hauls_to_stockpile() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let stockpile = buildings.place_blueprint(BuildingKind::StockpileMarker, 1, 1, 1, 1, 0);
        buildings.get_mut(stockpile).unwrap().complete = true;
        let stove = buildings.place_blueprint(BuildingKind::Stove, 10, 10, 1, 1, 0);
        {
            let b = buildings.get_mut(stove).unwrap();
            b.complete = true;
            b.inventory[1].item = Some(ItemType::Bread);
            b.inventory[1].qty = BREAD_PER_BATCH;
        }
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut agent = ColonistData::new(AgentId(1), Vec2::new(16.0, 16.0));
        agent.state = AgentState::StoreBread;
        agent.target = Some(TargetHandle::Building(stove));
        let mut outbox = FsmOutbox::default();

        let mut collected = false;
        for tick in 0..500 {
            world.tick = tick;
            tick_haul(&mut agent, &mut world, &mut outbox);
            world.path_queue.drain(world.grid, std::time::Duration::ZERO, 20_000);
            if !collected && agent.state == AgentState::HaulBread {
                collected = true;
                assert_eq!(agent.carrying, Carrying::Item(ItemType::Bread, BREAD_PER_BATCH));
                assert_eq!(world.buildings.get(stove).unwrap().inventory[1].qty, 0);
            }
            if agent.state == AgentState::SeekTask {
                break;
            }
        }
        assert!(collected);
        assert_eq!(agent.state, AgentState::SeekTask);
        assert_eq!(agent.carrying, Carrying::None);
    }

    #[test]
    fn downed_agent_cannot_be_preempted_by_lower_priority_but_higher_still_wins() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut agent = ColonistData::new(AgentId(1), Vec2::new(16.0, 16.0));
        agent.needs.hp = 0.0;
        let mut outbox = FsmOutbox::default();
        tick_agent(&mut agent, &mut world, &Perception::default(), &NoWork, &mut outbox);
        assert_eq!(agent.state, AgentState::Downed);
    }
}
