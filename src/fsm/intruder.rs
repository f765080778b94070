// src/fsm/intruder.rs - simpler grid-aligned chase/attack/door-bash FSM.
// Grounded on `core/goap.rs`'s target-acquisition loop collapsed to a fixed
// ladder, and on `systems/access_control.rs`'s `Door` HP/open-state model
// for `bash_door`.
use bevy::prelude::*;

use crate::agents::{CachedPath, IntruderData, IntruderState, TargetHandle};
use crate::buildings::BuildingId;
use crate::fsm::agent::World;
use crate::fsm::FsmOutbox;
use crate::pathfinding::Profile;

const MELEE_RANGE: f32 = 24.0;
const ATTACK_COOLDOWN_SEC: f32 = 1.0;
const DOOR_BASH_DAMAGE: u16 = 15;
const REPATH_GOAL_MOVED_TILES: f32 = 1.5;
const STUCK_WINDOW_SEC: f32 = 0.75;

/// External hook for applying combat damage; the kernel only defines the
/// interface per `spec.md` 4.5/9 ("`DamageSource`... compose by ownership").
pub trait DamageSink {
    fn apply_damage(&mut self, target: TargetHandle, amount: f32);
}

pub fn tick_intruder(
    intruder: &mut IntruderData,
    world: &mut World,
    target_pos: Option<Vec2>,
    config_stagger_mult: f32,
    damage_sink: &mut dyn DamageSink,
    outbox: &mut FsmOutbox,
) {
    poll_path(intruder, world);

    if let Some(until) = intruder.stagger_until_tick {
        if world.tick < until {
            intruder.state = IntruderState::Staggered;
            // Still shuffling forward at reduced speed; cannot attack or
            // bash while recovering (`spec.md` 4.9).
            advance_path(intruder, world, config_stagger_mult);
            return;
        }
        intruder.stagger_until_tick = None;
    }

    match intruder.state {
        IntruderState::Wander => tick_wander(intruder, world, target_pos),
        IntruderState::Chase => tick_chase(intruder, world, target_pos),
        IntruderState::Attack => tick_attack(intruder, world, target_pos, damage_sink),
        IntruderState::BashDoor => tick_bash_door(intruder, world, damage_sink, outbox),
        IntruderState::Staggered => {
            intruder.state = IntruderState::Wander;
        }
    }
}

fn tick_wander(intruder: &mut IntruderData, world: &mut World, target_pos: Option<Vec2>) {
    if target_pos.is_some() {
        intruder.state = IntruderState::Chase;
        intruder.path = None;
        return;
    }
    if intruder.path.is_none() {
        let dest = Vec2::new(
            (intruder.position.x + world.grid.tile_size * 3.0).min(world.grid.tile_size * (world.grid.cols - 1) as f32),
            intruder.position.y,
        );
        request_path(intruder, world, dest);
    }
    advance_path(intruder, world, 1.0);
}

fn tick_chase(intruder: &mut IntruderData, world: &mut World, target_pos: Option<Vec2>) {
    let Some(target) = target_pos else {
        intruder.state = IntruderState::Wander;
        intruder.path = None;
        return;
    };
    if (intruder.position - target).length() <= MELEE_RANGE {
        intruder.state = IntruderState::Attack;
        return;
    }
    let needs_repath = match &intruder.path {
        None => true,
        Some(p) => {
            let last = p.waypoints.last().copied().unwrap_or(target);
            (last - target).length() / world.grid.tile_size > REPATH_GOAL_MOVED_TILES
        }
    };
    if needs_repath {
        request_path(intruder, world, target);
    }
    if let Some(next_door) = door_blocking_next_step(intruder, world) {
        let _ = next_door;
        intruder.state = IntruderState::BashDoor;
        return;
    }
    advance_path(intruder, world, 1.0);
}

fn tick_attack(intruder: &mut IntruderData, world: &mut World, target_pos: Option<Vec2>, damage_sink: &mut dyn DamageSink) {
    let Some(target) = target_pos else {
        intruder.state = IntruderState::Wander;
        return;
    };
    if (intruder.position - target).length() > MELEE_RANGE {
        intruder.state = IntruderState::Chase;
        return;
    }
    intruder.attack_cooldown_remaining -= world.config.tick_dt();
    if intruder.attack_cooldown_remaining <= 0.0 {
        if let Some(handle) = intruder.target {
            damage_sink.apply_damage(handle, 10.0);
        }
        intruder.attack_cooldown_remaining = ATTACK_COOLDOWN_SEC;
    }
}

fn tick_bash_door(intruder: &mut IntruderData, world: &mut World, damage_sink: &mut dyn DamageSink, outbox: &mut FsmOutbox) {
    let Some((dgx, dgy)) = door_blocking_next_step(intruder, world) else {
        intruder.state = IntruderState::Chase;
        return;
    };
    if let Some(building_id) = building_at(world, dgx, dgy) {
        damage_sink.apply_damage(TargetHandle::Building(building_id), DOOR_BASH_DAMAGE as f32);
        let destroyed = world.buildings.apply_damage(building_id, DOOR_BASH_DAMAGE);
        // Every swing has recoil: stagger for the configured duration, same
        // as a received hit, before the next bash or chase step.
        let stagger_ticks = (world.config.fsm.stagger_duration_sec * world.config.clock.tick_rate as f32).round() as u64;
        intruder.stagger_until_tick = Some(world.tick + stagger_ticks.max(1));
        if destroyed {
            // Door destroyed: signal the kernel facade, which unmarks the
            // grid tile on the next edit phase (tick ordering step 2,
            // `spec.md` 5) rather than here.
            outbox.push_building_destroyed(building_id);
            intruder.path = None;
            intruder.state = IntruderState::Chase;
        }
    } else {
        intruder.state = IntruderState::Chase;
    }
}

fn building_at(world: &World, gx: i32, gy: i32) -> Option<BuildingId> {
    world
        .buildings
        .iter()
        .find(|b| b.footprint().contains(gx, gy))
        .map(|b| b.id)
}

fn door_blocking_next_step(intruder: &IntruderData, world: &World) -> Option<(i32, i32)> {
    let path = intruder.path.as_ref()?;
    let next = path.waypoints.get(path.index + 1)?;
    let (gx, gy) = world.grid.tile_at(next.x, next.y);
    if world.grid.is_door(gx, gy) && world.grid.door_is_open(gx, gy) == Some(false) {
        Some((gx, gy))
    } else {
        None
    }
}

/// Intruders share the agent path-queue's mailbox keyspace via a disjoint
/// id range (`u32::MAX - id`), so both profiles drain through one
/// `PathRequestQueue` without a second arena.
fn intruder_mailbox_key(intruder: &IntruderData) -> crate::agents::AgentId {
    crate::agents::AgentId(u32::MAX - intruder.id.0)
}

fn request_path(intruder: &mut IntruderData, world: &mut World, dest: Vec2) {
    let id = world.path_queue.request_path(intruder_mailbox_key(intruder), intruder.position, dest, Profile::Intruder, 50, None);
    intruder.pending_path_request = Some(id);
}

fn poll_path(intruder: &mut IntruderData, world: &mut World) {
    if intruder.pending_path_request.is_none() {
        return;
    }
    if let Some(delivery) = world.path_queue.poll(intruder_mailbox_key(intruder)) {
        intruder.pending_path_request = None;
        if let Some(path) = delivery.path {
            let start_tile = world.grid.tile_at(path[0].x, path[0].y);
            let goal_tile = world.grid.tile_at(path.last().copied().unwrap_or(path[0]).x, path.last().copied().unwrap_or(path[0]).y);
            intruder.path = Some(CachedPath {
                waypoints: path,
                index: 0,
                start_tile,
                goal_tile,
                grid_version_at_compute: world.grid.grid_version,
            });
        }
    }
}

fn advance_path(intruder: &mut IntruderData, world: &mut World, speed_mult: f32) {
    let Some(mut path) = intruder.path.clone() else { return };

    let tick_rate = world.config.clock.tick_rate as f32;
    let stuck_window_ticks = (STUCK_WINDOW_SEC * tick_rate) as u64;
    if world.tick.saturating_sub(intruder.stuck_since_tick) >= stuck_window_ticks {
        let moved = (intruder.position - intruder.stuck_anchor).length();
        intruder.stuck_since_tick = world.tick;
        intruder.stuck_anchor = intruder.position;
        if moved < world.config.fsm.stuck_eps_world {
            intruder.path = None;
            intruder.pending_path_request = None;
            return;
        }
    }

    let target_wp = path.waypoints[path.index];
    let to_target = target_wp - intruder.position;
    let dist = to_target.length();
    let speed = 56.0 * speed_mult;
    let dt = world.config.tick_dt();
    if dist > world.config.fsm.arrival_eps_world {
        intruder.position += to_target.normalize_or_zero() * (speed * dt).min(dist);
    } else if path.index + 1 < path.waypoints.len() {
        path.index += 1;
    } else {
        intruder.path = None;
        return;
    }
    intruder.path = Some(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::IntruderId;
    use crate::buildings::{BuildingArena, BuildingKind};
    use crate::config::KernelConfig;
    use crate::grid::WorldGrid;
    use crate::items::FloorItemArena;
    use crate::path_queue::PathRequestQueue;
    use crate::regions::RegionGraph;
    use crate::reservation::ReservationTable;

    struct NoDamage;
    impl DamageSink for NoDamage {
        fn apply_damage(&mut self, _target: TargetHandle, _amount: f32) {}
    }

    fn harness() -> (WorldGrid, RegionGraph, ReservationTable, PathRequestQueue, BuildingArena, FloorItemArena, KernelConfig) {
        let grid = WorldGrid::new(20, 20, 32.0, 8);
        let mut regions = RegionGraph::new(12, 32.0);
        regions.rebuild_full(&grid);
        (grid, regions, ReservationTable::default(), PathRequestQueue::default(), BuildingArena::default(), FloorItemArena::default(), KernelConfig::default())
    }

    #[test]
    fn intruder_enters_chase_when_a_target_appears() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut intruder = IntruderData::new(IntruderId(1), Vec2::new(16.0, 16.0));
        let mut outbox = FsmOutbox::default();
        tick_intruder(&mut intruder, &mut world, Some(Vec2::new(100.0, 16.0)), 1.0 / 6.0, &mut NoDamage, &mut outbox);
        assert_eq!(intruder.state, IntruderState::Chase);
    }

    #[test]
    fn intruder_attacks_once_in_melee_range() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut intruder = IntruderData::new(IntruderId(1), Vec2::new(16.0, 16.0));
        intruder.state = IntruderState::Attack;
        intruder.target = Some(TargetHandle::Agent(crate::agents::AgentId(7)));
        let mut outbox = FsmOutbox::default();
        tick_intruder(&mut intruder, &mut world, Some(Vec2::new(20.0, 16.0)), 1.0 / 6.0, &mut NoDamage, &mut outbox);
        assert_eq!(intruder.attack_cooldown_remaining, ATTACK_COOLDOWN_SEC);
    }

    #[test]
    fn staggered_intruder_ignores_everything_until_expiry() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut intruder = IntruderData::new(IntruderId(1), Vec2::new(16.0, 16.0));
        intruder.stagger_until_tick = Some(5);
        let mut outbox = FsmOutbox::default();
        tick_intruder(&mut intruder, &mut world, Some(Vec2::new(100.0, 16.0)), 1.0 / 6.0, &mut NoDamage, &mut outbox);
        assert_eq!(intruder.state, IntruderState::Staggered);
    }

    #[test]
    fn staggered_intruder_still_shuffles_at_reduced_speed() {
        let (grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 0 };
        let mut intruder = IntruderData::new(IntruderId(1), Vec2::new(16.0, 16.0));
        intruder.stagger_until_tick = Some(5);
        intruder.path = Some(CachedPath {
            waypoints: vec![Vec2::new(16.0, 16.0), Vec2::new(500.0, 16.0)],
            index: 1,
            start_tile: (0, 0),
            goal_tile: (10, 0),
            grid_version_at_compute: grid.grid_version,
        });
        let mut outbox = FsmOutbox::default();
        let stagger_mult = 1.0 / 6.0;
        tick_intruder(&mut intruder, &mut world, None, stagger_mult, &mut NoDamage, &mut outbox);
        let dt = world.config.tick_dt();
        let expected = (56.0 * stagger_mult * dt).min(500.0 - 16.0);
        assert!((intruder.position.x - (16.0 + expected)).abs() < 0.01);
    }

    #[test]
    fn every_door_bash_swing_triggers_stagger() {
        let (mut grid, regions, mut reservations, mut queue, mut buildings, mut items, config) = harness();
        grid.mark_building(5, 5, 1, 1, crate::grid::BuildingBlockRule::Door);
        grid.set_door_open(5, 5, false);
        let door_id = buildings.place_blueprint(BuildingKind::Door, 5, 5, 1, 1, 0);
        buildings.get_mut(door_id).unwrap().complete = true;
        let mut world = World { grid: &grid, regions: &regions, reservations: &mut reservations, path_queue: &mut queue, buildings: &mut buildings, items: &mut items, config: &config, tick: 3 };
        let mut intruder = IntruderData::new(IntruderId(1), Vec2::new(5.0 * 32.0, 5.0 * 32.0 + 32.0));
        intruder.state = IntruderState::BashDoor;
        intruder.path = Some(CachedPath {
            waypoints: vec![intruder.position, Vec2::new(5.0 * 32.0 + 16.0, 5.0 * 32.0 + 16.0)],
            index: 0,
            start_tile: (5, 6),
            goal_tile: (5, 5),
            grid_version_at_compute: grid.grid_version,
        });
        let mut outbox = FsmOutbox::default();
        assert!(intruder.stagger_until_tick.is_none());
        tick_intruder(&mut intruder, &mut world, None, 1.0 / 6.0, &mut NoDamage, &mut outbox);
        assert!(intruder.stagger_until_tick.is_some());
        assert!(intruder.stagger_until_tick.unwrap() > 3);
    }
}
