// src/pathfinding.rs - A* over WorldGrid, grounded on the teacher's
// `find_path`/`Node`/`heuristic`/`get_movement_cost` (systems/pathfinding.rs),
// generalized to per-profile neighbor rules, a danger overlay, corner-cutting
// prevention, and an expansion guard per the kernel spec.
use bevy::prelude::*;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::grid::WorldGrid;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Profile {
    Agent,
    Intruder,
}

const SQRT2: f32 = std::f32::consts::SQRT_2;
const INTRUDER_DOOR_PENALTY: f32 = 50.0;

/// Additive per-tile penalty overlay (e.g. "avoid enemy line of fire"),
/// supplied by the caller per `spec.md` 4.2.
#[derive(Default, Clone)]
pub struct DangerOverlay {
    penalties: HashMap<(i32, i32), f32>,
}

impl DangerOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, gx: i32, gy: i32, penalty: f32) {
        self.penalties.insert((gx, gy), penalty);
    }

    pub fn penalty_at(&self, gx: i32, gy: i32) -> f32 {
        self.penalties.get(&(gx, gy)).copied().unwrap_or(0.0)
    }

    /// Cheap hash used as part of the path-request-queue fingerprint; not
    /// cryptographic, just needs to change when the overlay changes.
    pub fn fingerprint(&self) -> u64 {
        let mut acc: u64 = 1469598103934665603; // FNV offset basis
        let mut entries: Vec<_> = self.penalties.iter().collect();
        entries.sort_by_key(|(k, _)| **k);
        for ((x, y), p) in entries {
            for byte in x.to_le_bytes().iter().chain(y.to_le_bytes().iter()).chain(p.to_bits().to_le_bytes().iter()) {
                acc ^= *byte as u64;
                acc = acc.wrapping_mul(1099511628211);
            }
        }
        acc
    }
}

#[derive(Clone, Debug)]
struct OpenNode {
    pos: (i32, i32),
    g: f32,
    h: f32,
    seq: u64,
}

impl OpenNode {
    fn f(&self) -> f32 {
        self.g + self.h
    }
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos
    }
}
impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the lowest f (then lowest g,
        // then earliest insertion) comes out first.
        other
            .f()
            .partial_cmp(&self.f())
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.g.partial_cmp(&self.g).unwrap_or(Ordering::Equal))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Octile heuristic scaled by the minimum possible tile cost (1.0).
fn heuristic(a: (i32, i32), b: (i32, i32)) -> f32 {
    let dx = (a.0 - b.0).unsigned_abs() as f32;
    let dy = (a.1 - b.1).unsigned_abs() as f32;
    let (dmin, dmax) = if dx < dy { (dx, dy) } else { (dy, dx) };
    dmax + (SQRT2 - 2.0) * dmin
}

fn passable_for_search(grid: &WorldGrid, gx: i32, gy: i32, profile: Profile) -> Option<f32> {
    if grid.solid_at(gx, gy) {
        return None;
    }
    match profile {
        Profile::Agent => {
            let c = grid.traverse_cost(gx, gy);
            if c >= crate::grid::IMPASSABLE {
                None
            } else {
                Some(0.0)
            }
        }
        Profile::Intruder => {
            if grid.is_door(gx, gy) {
                // Closed doors are soft-blocked: still expandable, at a
                // steep additive penalty, so an intruder can elect to
                // bash through rather than detour.
                let open = grid.door_is_open(gx, gy).unwrap_or(true);
                Some(if open { 0.0 } else { INTRUDER_DOOR_PENALTY })
            } else {
                let c = grid.traverse_cost(gx, gy);
                if c >= crate::grid::IMPASSABLE {
                    None
                } else {
                    Some(0.0)
                }
            }
        }
    }
}

const NEIGHBORS: [(i32, i32); 8] = [
    (1, 0), (-1, 0), (0, 1), (0, -1),
    (1, 1), (1, -1), (-1, 1), (-1, -1),
];

/// Computes a tile-aligned path, or `None` if unreachable within the
/// expansion budget. `start`/`goal` are world positions; the returned
/// path's waypoints are tile centers, first element always the start tile
/// (per `spec.md` 4.2's "stable arrival checks" requirement).
pub fn find_path(
    grid: &WorldGrid,
    start: Vec2,
    goal: Vec2,
    profile: Profile,
    danger: Option<&DangerOverlay>,
    max_expansions: u32,
) -> Option<Vec<Vec2>> {
    let start_tile = grid.tile_at(start.x, start.y);
    let goal_tile = grid.tile_at(goal.x, goal.y);

    if start_tile == goal_tile {
        return Some(vec![grid.tile_center(start_tile.0, start_tile.1)]);
    }
    if passable_for_search(grid, goal_tile.0, goal_tile.1, profile).is_none() {
        return None;
    }

    let mut open = std::collections::BinaryHeap::new();
    let mut best_g: HashMap<(i32, i32), f32> = HashMap::new();
    let mut came_from: HashMap<(i32, i32), (i32, i32)> = HashMap::new();
    let mut closed: HashSet<(i32, i32)> = HashSet::new();
    let mut seq: u64 = 0;

    best_g.insert(start_tile, 0.0);
    open.push(OpenNode {
        pos: start_tile,
        g: 0.0,
        h: heuristic(start_tile, goal_tile),
        seq,
    });

    let mut expansions: u32 = 0;

    while let Some(current) = open.pop() {
        if closed.contains(&current.pos) {
            continue;
        }
        if current.pos == goal_tile {
            return Some(reconstruct(grid, &came_from, start_tile, goal_tile));
        }

        closed.insert(current.pos);
        expansions += 1;
        if expansions > max_expansions {
            return None;
        }

        for (dx, dy) in NEIGHBORS {
            let npos = (current.pos.0 + dx, current.pos.1 + dy);
            if closed.contains(&npos) {
                continue;
            }
            let Some(extra_penalty) = passable_for_search(grid, npos.0, npos.1, profile) else {
                continue;
            };

            let is_diagonal = dx != 0 && dy != 0;
            if is_diagonal {
                // No corner cutting: both orthogonal neighbors must be
                // non-solid.
                let ortho_a_solid = grid.solid_at(current.pos.0 + dx, current.pos.1);
                let ortho_b_solid = grid.solid_at(current.pos.0, current.pos.1 + dy);
                if ortho_a_solid || ortho_b_solid {
                    continue;
                }
            }

            let step_base = if is_diagonal { SQRT2 } else { 1.0 };
            let tile_cost = grid.traverse_cost(npos.0, npos.1).min(crate::grid::IMPASSABLE - 1.0);
            let danger_penalty = danger.map(|d| d.penalty_at(npos.0, npos.1)).unwrap_or(0.0);
            let step_cost = step_base * tile_cost + extra_penalty + danger_penalty;
            let tentative_g = current.g + step_cost;

            let better = match best_g.get(&npos) {
                Some(&g) => tentative_g < g,
                None => true,
            };
            if better {
                best_g.insert(npos, tentative_g);
                came_from.insert(npos, current.pos);
                seq += 1;
                open.push(OpenNode {
                    pos: npos,
                    g: tentative_g,
                    h: heuristic(npos, goal_tile),
                    seq,
                });
            }
        }
    }

    None
}

fn reconstruct(
    grid: &WorldGrid,
    came_from: &HashMap<(i32, i32), (i32, i32)>,
    start: (i32, i32),
    goal: (i32, i32),
) -> Vec<Vec2> {
    let mut tiles = vec![goal];
    let mut cur = goal;
    while cur != start {
        cur = came_from[&cur];
        tiles.push(cur);
    }
    tiles.reverse();
    tiles.into_iter().map(|(x, y)| grid.tile_center(x, y)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BuildingBlockRule, FloorClass, WorldGrid};

    fn empty_grid() -> WorldGrid {
        WorldGrid::new(10, 10, 32.0, 8)
    }

    #[test]
    fn straight_line_path_on_empty_grid() {
        let grid = empty_grid();
        let path = find_path(&grid, Vec2::new(16.0, 16.0), Vec2::new(304.0, 16.0), Profile::Agent, None, 20_000).unwrap();
        assert_eq!(path.len(), 10);
        for (i, p) in path.iter().enumerate() {
            assert_eq!(*p, Vec2::new(16.0 + 32.0 * i as f32, 16.0));
        }
    }

    #[test]
    fn start_equals_goal_returns_single_waypoint() {
        let grid = empty_grid();
        let path = find_path(&grid, Vec2::new(16.0, 16.0), Vec2::new(20.0, 20.0), Profile::Agent, None, 20_000).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0], Vec2::new(16.0, 16.0));
    }

    #[test]
    fn path_routes_around_a_wall() {
        let mut grid = empty_grid();
        for y in 0..3 {
            grid.mark_building(5, y, 1, 1, BuildingBlockRule::Blocking);
        }
        let path = find_path(&grid, Vec2::new(16.0, 16.0), Vec2::new(304.0, 16.0), Profile::Agent, None, 20_000).unwrap();
        assert!(path.len() >= 13);
        for p in &path {
            let (gx, gy) = grid.tile_at(p.x, p.y);
            assert!(!(gx == 5 && gy < 3));
        }
    }

    #[test]
    fn goal_unreachable_inside_closed_ring_returns_none() {
        let mut grid = empty_grid();
        for x in 2..=6 {
            grid.mark_building(x, 2, 1, 1, BuildingBlockRule::Blocking);
            grid.mark_building(x, 6, 1, 1, BuildingBlockRule::Blocking);
        }
        for y in 2..=6 {
            grid.mark_building(2, y, 1, 1, BuildingBlockRule::Blocking);
            grid.mark_building(6, y, 1, 1, BuildingBlockRule::Blocking);
        }
        let inside = grid.tile_center(4, 4);
        let outside = grid.tile_center(0, 0);
        assert!(find_path(&grid, inside, outside, Profile::Agent, None, 20_000).is_none());
    }

    #[test]
    fn diagonal_corner_through_two_solids_is_rejected() {
        let mut grid = empty_grid();
        grid.mark_building(1, 0, 1, 1, BuildingBlockRule::Blocking);
        grid.mark_building(0, 1, 1, 1, BuildingBlockRule::Blocking);
        // (0,0) -> (1,1) diagonal must be rejected; only route is unreachable
        // because (1,0) and (0,1) are blocked and (1,1) has no other entry
        // from (0,0) within this 2x2 pocket.
        let path = find_path(&grid, grid.tile_center(0, 0), grid.tile_center(1, 1), Profile::Agent, None, 20_000);
        assert!(path.is_none() || path.unwrap().len() > 2);
    }

    #[test]
    fn max_expansions_exceeded_returns_none() {
        let grid = WorldGrid::new(200, 200, 32.0, 8);
        let path = find_path(&grid, Vec2::new(16.0, 16.0), Vec2::new(6384.0, 6384.0), Profile::Agent, None, 10);
        assert!(path.is_none());
    }

    #[test]
    fn floors_reduce_but_never_increase_cost_below_zero() {
        let mut grid = empty_grid();
        grid.paint_floor_rect(crate::grid::TileRect { x0: 0, y0: 0, x1: 10, y1: 1 }, FloorClass::StoneRoad);
        let path = find_path(&grid, Vec2::new(16.0, 16.0), Vec2::new(304.0, 16.0), Profile::Agent, None, 20_000).unwrap();
        assert_eq!(path.len(), 10);
    }

    #[test]
    fn intruder_can_expand_through_closed_door() {
        let mut grid = empty_grid();
        for y in 0..10 {
            if y != 5 {
                grid.mark_building(5, y, 1, 1, BuildingBlockRule::Blocking);
            } else {
                grid.mark_building(5, y, 1, 1, BuildingBlockRule::Door);
                grid.set_door_open(5, y, false);
            }
        }
        let path = find_path(&grid, Vec2::new(16.0, 16.0), Vec2::new(304.0, 176.0), Profile::Intruder, None, 20_000);
        assert!(path.is_some());
    }
}
