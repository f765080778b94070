// src/grid.rs - tile solidity/cost layers, grounded on
// systems/pathfinding.rs's `PathfindingGrid`/`TileType`, generalized from a
// single walkable/blocked/difficult tristate to the full
// terrain+floor+solid+cost layer model the kernel spec requires.
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::pathfinding::Profile;

/// Movement-cost sentinel for tiles that can never be crossed.
pub const IMPASSABLE: f32 = 999.0;
const DOOR_OPEN_COST: f32 = 1.0;
const DOOR_CLOSED_COST: f32 = 3.0;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub enum TerrainClass {
    #[default]
    Grass,
    Dirt,
    Sand,
    Stone,
    Mud,
    Water,
    Rock,
}

impl TerrainClass {
    pub fn cost(self) -> f32 {
        match self {
            TerrainClass::Grass => 1.0,
            TerrainClass::Dirt => 1.0,
            TerrainClass::Sand => 1.3,
            TerrainClass::Stone => 1.0,
            TerrainClass::Mud => 1.8,
            TerrainClass::Water => IMPASSABLE,
            TerrainClass::Rock => IMPASSABLE,
        }
    }

    pub fn is_impassable(self) -> bool {
        self.cost() >= IMPASSABLE
    }

    pub fn as_u8(self) -> u8 {
        match self {
            TerrainClass::Grass => 0,
            TerrainClass::Dirt => 1,
            TerrainClass::Sand => 2,
            TerrainClass::Stone => 3,
            TerrainClass::Mud => 4,
            TerrainClass::Water => 5,
            TerrainClass::Rock => 6,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => TerrainClass::Dirt,
            2 => TerrainClass::Sand,
            3 => TerrainClass::Stone,
            4 => TerrainClass::Mud,
            5 => TerrainClass::Water,
            6 => TerrainClass::Rock,
            _ => TerrainClass::Grass,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub enum FloorClass {
    #[default]
    None,
    BasicPath,
    StoneRoad,
    Wooden,
}

impl FloorClass {
    /// Floors can only reduce cost, never raise it above the bare-ground 1.0.
    pub fn multiplier(self) -> f32 {
        match self {
            FloorClass::None => 1.0,
            FloorClass::BasicPath => 0.85,
            FloorClass::StoneRoad => 0.6,
            FloorClass::Wooden => 0.75,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FloorClass::None => 0,
            FloorClass::BasicPath => 1,
            FloorClass::StoneRoad => 2,
            FloorClass::Wooden => 3,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => FloorClass::BasicPath,
            2 => FloorClass::StoneRoad,
            3 => FloorClass::Wooden,
            _ => FloorClass::None,
        }
    }
}

/// Axis-aligned tile rectangle, exclusive upper bound (`x in [x0,x1)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl TileRect {
    pub fn contains(&self, gx: i32, gy: i32) -> bool {
        gx >= self.x0 && gx < self.x1 && gy >= self.y0 && gy < self.y1
    }

    pub fn intersects(&self, other: &TileRect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }
}

/// What a building contributes to the grid when placed/removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildingBlockRule {
    /// Always solid once complete (walls, stoves, beds with footprint).
    Blocking,
    /// Never solid; registers as a door tile instead (cost depends on state).
    Door,
    /// Never solid (stockpile markers, blueprints of non-blocking kinds).
    NonBlocking,
}

/// Single source of truth for tile walkability and cost.
///
/// Grounded on `PathfindingGrid` (`systems/pathfinding.rs`): a flat `Vec`
/// of per-tile data plus a `dirty`-style invalidation flag, generalized to
/// the terrain+floor+solid+cost layer set the kernel spec requires.
#[derive(Resource, Clone)]
pub struct WorldGrid {
    pub cols: i32,
    pub rows: i32,
    pub tile_size: f32,
    pub section_tiles: i32,

    solid: Vec<u8>,
    cost: Vec<f32>,
    terrain: Vec<TerrainClass>,
    floor: Vec<FloorClass>,
    /// tile index -> is_open. Door tiles are always `solid=0`.
    doors: HashMap<usize, bool>,
    section_dirty: Vec<bool>,
    section_cols: i32,

    pub grid_version: u64,
}

impl WorldGrid {
    pub fn new(cols: i32, rows: i32, tile_size: f32, section_tiles: i32) -> Self {
        let n = (cols * rows) as usize;
        let section_cols = (cols + section_tiles - 1) / section_tiles;
        let section_rows = (rows + section_tiles - 1) / section_tiles;
        Self {
            cols,
            rows,
            tile_size,
            section_tiles,
            solid: vec![0; n],
            cost: vec![1.0; n],
            terrain: vec![TerrainClass::default(); n],
            floor: vec![FloorClass::default(); n],
            doors: HashMap::new(),
            section_dirty: vec![false; (section_cols * section_rows) as usize],
            section_cols,
            grid_version: 0,
        }
    }

    /// Reconstructs a grid directly from persisted layer arrays (`spec.md`
    /// 6), bypassing `set_tile_terrain` recomputation so a load round-trips
    /// the saved bytes exactly rather than re-derive them. Door registry is
    /// not part of the persisted per-tile layers (only `solid`/`cost` are);
    /// the caller re-applies `mark_building` for each loaded door building
    /// afterward to repopulate it.
    pub fn from_raw_layers(
        cols: i32,
        rows: i32,
        tile_size: f32,
        section_tiles: i32,
        solid: Vec<u8>,
        cost: Vec<f32>,
        terrain: Vec<TerrainClass>,
        floor: Vec<FloorClass>,
    ) -> Self {
        let section_cols = (cols + section_tiles - 1) / section_tiles;
        let section_rows = (rows + section_tiles - 1) / section_tiles;
        Self {
            cols,
            rows,
            tile_size,
            section_tiles,
            solid,
            cost,
            terrain,
            floor,
            doors: HashMap::new(),
            section_dirty: vec![false; (section_cols * section_rows) as usize],
            section_cols,
            grid_version: 0,
        }
    }

    fn in_bounds(&self, gx: i32, gy: i32) -> bool {
        gx >= 0 && gy >= 0 && gx < self.cols && gy < self.rows
    }

    fn idx(&self, gx: i32, gy: i32) -> usize {
        (gy * self.cols + gx) as usize
    }

    fn clamp_tile(&self, gx: i32, gy: i32) -> (i32, i32) {
        (gx.clamp(0, self.cols - 1), gy.clamp(0, self.rows - 1))
    }

    /// `spec.md` 4.1: out-of-bounds reads are silently clamped.
    pub fn tile_at(&self, world_x: f32, world_y: f32) -> (i32, i32) {
        let gx = (world_x / self.tile_size).floor() as i32;
        let gy = (world_y / self.tile_size).floor() as i32;
        self.clamp_tile(gx, gy)
    }

    pub fn tile_center(&self, gx: i32, gy: i32) -> Vec2 {
        Vec2::new(
            (gx as f32 + 0.5) * self.tile_size,
            (gy as f32 + 0.5) * self.tile_size,
        )
    }

    fn mark_section_dirty(&mut self, gx: i32, gy: i32) {
        let sx = gx / self.section_tiles;
        let sy = gy / self.section_tiles;
        let si = (sy * self.section_cols + sx) as usize;
        if si < self.section_dirty.len() {
            self.section_dirty[si] = true;
        }
    }

    pub fn take_dirty_sections(&mut self) -> Vec<usize> {
        let mut out = Vec::new();
        for (i, d) in self.section_dirty.iter_mut().enumerate() {
            if *d {
                out.push(i);
                *d = false;
            }
        }
        out
    }

    pub fn is_door(&self, gx: i32, gy: i32) -> bool {
        if !self.in_bounds(gx, gy) {
            return false;
        }
        self.doors.contains_key(&self.idx(gx, gy))
    }

    pub fn door_is_open(&self, gx: i32, gy: i32) -> Option<bool> {
        if !self.in_bounds(gx, gy) {
            return None;
        }
        self.doors.get(&self.idx(gx, gy)).copied()
    }

    pub fn set_door_open(&mut self, gx: i32, gy: i32, open: bool) {
        if !self.in_bounds(gx, gy) {
            return;
        }
        let i = self.idx(gx, gy);
        if let Some(state) = self.doors.get_mut(&i) {
            *state = open;
            self.grid_version += 1;
        }
    }

    pub fn is_walkable(&self, gx: i32, gy: i32, profile: Profile) -> bool {
        if !self.in_bounds(gx, gy) {
            return false;
        }
        let i = self.idx(gx, gy);
        if self.solid[i] != 0 {
            return false;
        }
        if self.cost[i] >= IMPASSABLE {
            return false;
        }
        if let Some(open) = self.doors.get(&i) {
            return match profile {
                Profile::Agent => true,
                Profile::Intruder => *open,
            };
        }
        true
    }

    /// Callers must treat a `solid` tile's cost as infinite regardless of
    /// the raw value returned here.
    pub fn traverse_cost(&self, gx: i32, gy: i32) -> f32 {
        if !self.in_bounds(gx, gy) {
            return IMPASSABLE;
        }
        let i = self.idx(gx, gy);
        if self.solid[i] != 0 {
            return IMPASSABLE;
        }
        if let Some(open) = self.doors.get(&i) {
            return if *open { DOOR_OPEN_COST } else { DOOR_CLOSED_COST };
        }
        self.cost[i]
    }

    pub fn terrain_at(&self, gx: i32, gy: i32) -> TerrainClass {
        if !self.in_bounds(gx, gy) {
            return TerrainClass::Rock;
        }
        self.terrain[self.idx(gx, gy)]
    }

    pub fn floor_at(&self, gx: i32, gy: i32) -> FloorClass {
        if !self.in_bounds(gx, gy) {
            return FloorClass::None;
        }
        self.floor[self.idx(gx, gy)]
    }

    pub fn solid_at(&self, gx: i32, gy: i32) -> bool {
        if !self.in_bounds(gx, gy) {
            return true;
        }
        self.solid[self.idx(gx, gy)] != 0
    }

    fn recompute_cost_from_layers(&mut self, gx: i32, gy: i32) {
        let i = self.idx(gx, gy);
        if self.solid[i] != 0 {
            // A completed blocking building keeps cost irrelevant but we
            // still store the layer-derived value so unmark_building can
            // restore it verbatim.
            self.cost[i] = self.terrain[i].cost() * self.floor[i].multiplier();
            return;
        }
        self.cost[i] = self.terrain[i].cost() * self.floor[i].multiplier();
    }

    /// Sets the base terrain class for a tile. Assumes no building
    /// currently covers the tile; terrain mutation and building placement
    /// are distinct operations per `spec.md` 4.1 and are not composed here.
    /// Impassable terrain (deep water/rock) forces `solid=1` to preserve
    /// invariant 1 (walkable tiles have finite cost).
    pub fn set_tile_terrain(&mut self, gx: i32, gy: i32, terrain: TerrainClass) {
        if !self.in_bounds(gx, gy) {
            return;
        }
        let i = self.idx(gx, gy);
        self.terrain[i] = terrain;
        self.solid[i] = if terrain.is_impassable() { 1 } else { 0 };
        if self.solid[i] != 0 {
            self.doors.remove(&i);
        }
        self.recompute_cost_from_layers(gx, gy);
        self.mark_section_dirty(gx, gy);
        self.grid_version += 1;
    }

    pub fn set_tile_floor(&mut self, gx: i32, gy: i32, floor: FloorClass) {
        if !self.in_bounds(gx, gy) {
            return;
        }
        let i = self.idx(gx, gy);
        self.floor[i] = floor;
        self.recompute_cost_from_layers(gx, gy);
        self.mark_section_dirty(gx, gy);
        self.grid_version += 1;
    }

    pub fn paint_floor_rect(&mut self, rect: TileRect, floor: FloorClass) {
        for gy in rect.y0.max(0)..rect.y1.min(self.rows) {
            for gx in rect.x0.max(0)..rect.x1.min(self.cols) {
                let i = self.idx(gx, gy);
                self.floor[i] = floor;
                self.recompute_cost_from_layers(gx, gy);
                self.mark_section_dirty(gx, gy);
            }
        }
        self.grid_version += 1;
    }

    pub fn remove_floor_rect(&mut self, rect: TileRect) {
        self.paint_floor_rect(rect, FloorClass::None);
    }

    /// Sets/clears `solid` for a building footprint according to its
    /// blocking rule. Door kind clears solid and registers a door tile
    /// (open by default, matching a freshly-built door).
    pub fn mark_building(&mut self, gx: i32, gy: i32, gw: i32, gh: i32, rule: BuildingBlockRule) {
        for y in gy.max(0)..(gy + gh).min(self.rows) {
            for x in gx.max(0)..(gx + gw).min(self.cols) {
                let i = self.idx(x, y);
                match rule {
                    BuildingBlockRule::Blocking => {
                        self.solid[i] = 1;
                        self.doors.remove(&i);
                    }
                    BuildingBlockRule::Door => {
                        self.solid[i] = 0;
                        self.doors.insert(i, true);
                    }
                    BuildingBlockRule::NonBlocking => {
                        self.solid[i] = 0;
                        self.doors.remove(&i);
                    }
                }
                self.mark_section_dirty(x, y);
            }
        }
        self.grid_version += 1;
    }

    pub fn unmark_building(&mut self, gx: i32, gy: i32, gw: i32, gh: i32) {
        for y in gy.max(0)..(gy + gh).min(self.rows) {
            for x in gx.max(0)..(gx + gw).min(self.cols) {
                let i = self.idx(x, y);
                self.solid[i] = 0;
                self.doors.remove(&i);
                // Terrain that was always impassable (deep water/rock)
                // must not become walkable just because a building left.
                if self.terrain[i].is_impassable() {
                    self.solid[i] = 1;
                }
                self.mark_section_dirty(x, y);
            }
        }
        self.grid_version += 1;
    }

    /// Clears `solid` and resets `cost` to the layer-derived value across
    /// the rectangle. Terrain-impassable tiles remain solid.
    pub fn clear_area(&mut self, rect: TileRect) {
        for gy in rect.y0.max(0)..rect.y1.min(self.rows) {
            for gx in rect.x0.max(0)..rect.x1.min(self.cols) {
                let i = self.idx(gx, gy);
                self.doors.remove(&i);
                self.solid[i] = if self.terrain[i].is_impassable() { 1 } else { 0 };
                self.recompute_cost_from_layers(gx, gy);
                self.mark_section_dirty(gx, gy);
            }
        }
        self.grid_version += 1;
    }

    /// Computes the padded rectangle around `center_world` at `radius`,
    /// returning it so the caller (kernel facade) can re-apply building
    /// marks and then invoke `RegionGraph::rebuild_area` over the same
    /// rect. The grid itself does not know about buildings or regions.
    pub fn rebuild_partial_rect(&self, center_world: Vec2, radius: f32) -> TileRect {
        const PAD: i32 = 2;
        let (cgx, cgy) = self.tile_at(center_world.x, center_world.y);
        let k = (radius / self.tile_size).ceil() as i32 + PAD;
        TileRect {
            x0: cgx - k,
            y0: cgy - k,
            x1: cgx + k + 1,
            y1: cgy + k + 1,
        }
    }

    pub fn full_rect(&self) -> TileRect {
        TileRect { x0: 0, y0: 0, x1: self.cols, y1: self.rows }
    }

    pub fn rebuild_partial(&mut self, center_world: Vec2, radius: f32) -> TileRect {
        let rect = self.rebuild_partial_rect(center_world, radius);
        self.clear_area(rect);
        rect
    }

    pub fn rebuild_full(&mut self) -> TileRect {
        let rect = self.full_rect();
        self.clear_area(rect);
        rect
    }

    // -- accessors used by save.rs / pathfinding.rs --
    pub fn raw_solid(&self) -> &[u8] {
        &self.solid
    }
    pub fn raw_cost(&self) -> &[f32] {
        &self.cost
    }
    pub fn raw_terrain(&self) -> &[TerrainClass] {
        &self.terrain
    }
    pub fn raw_floor(&self) -> &[FloorClass] {
        &self.floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> WorldGrid {
        WorldGrid::new(10, 10, 32.0, 8)
    }

    #[test]
    fn walkable_tiles_have_finite_cost() {
        let grid = small_grid();
        for gy in 0..grid.rows {
            for gx in 0..grid.cols {
                if !grid.solid_at(gx, gy) {
                    assert!(grid.traverse_cost(gx, gy) < IMPASSABLE);
                }
            }
        }
    }

    #[test]
    fn completed_blocking_building_is_solid() {
        let mut grid = small_grid();
        grid.mark_building(2, 2, 2, 2, BuildingBlockRule::Blocking);
        for y in 2..4 {
            for x in 2..4 {
                assert!(grid.solid_at(x, y));
            }
        }
    }

    #[test]
    fn floor_under_impassable_terrain_does_not_unblock() {
        let mut grid = small_grid();
        grid.set_tile_terrain(5, 5, TerrainClass::Water);
        grid.set_tile_floor(5, 5, FloorClass::StoneRoad);
        assert!(grid.solid_at(5, 5));
    }

    #[test]
    fn removing_obstacle_over_impassable_terrain_stays_solid() {
        let mut grid = small_grid();
        grid.set_tile_terrain(5, 5, TerrainClass::Rock);
        grid.mark_building(5, 5, 1, 1, BuildingBlockRule::Blocking);
        grid.unmark_building(5, 5, 1, 1);
        assert!(grid.solid_at(5, 5));
    }

    #[test]
    fn every_mutation_bumps_grid_version() {
        let mut grid = small_grid();
        let v0 = grid.grid_version;
        grid.set_tile_floor(1, 1, FloorClass::BasicPath);
        assert!(grid.grid_version > v0);
        let v1 = grid.grid_version;
        grid.mark_building(3, 3, 1, 1, BuildingBlockRule::Blocking);
        assert!(grid.grid_version > v1);
    }

    #[test]
    fn paint_then_erase_floor_restores_cost() {
        let mut grid = small_grid();
        let before: Vec<f32> = (0..grid.cols)
            .flat_map(|x| (0..grid.rows).map(move |y| (x, y)))
            .map(|(x, y)| grid.traverse_cost(x, y))
            .collect();
        let rect = TileRect { x0: 1, y0: 1, x1: 4, y1: 4 };
        grid.paint_floor_rect(rect, FloorClass::StoneRoad);
        grid.remove_floor_rect(rect);
        let after: Vec<f32> = (0..grid.cols)
            .flat_map(|x| (0..grid.rows).map(move |y| (x, y)))
            .map(|(x, y)| grid.traverse_cost(x, y))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn out_of_bounds_reads_clamp() {
        let grid = small_grid();
        let (gx, gy) = grid.tile_at(-500.0, 99999.0);
        assert_eq!(gx, 0);
        assert_eq!(gy, grid.rows - 1);
    }

    #[test]
    fn door_tile_is_walkable_for_agent_but_not_closed_intruder() {
        let mut grid = small_grid();
        grid.mark_building(4, 4, 1, 1, BuildingBlockRule::Door);
        grid.set_door_open(4, 4, false);
        assert!(grid.is_walkable(4, 4, Profile::Agent));
        assert!(!grid.is_walkable(4, 4, Profile::Intruder));
        grid.set_door_open(4, 4, true);
        assert!(grid.is_walkable(4, 4, Profile::Intruder));
    }
}
