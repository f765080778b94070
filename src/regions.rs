// src/regions.rs - flood-fill partition of walkable space into bounded,
// stably-identified regions with door-aware links and room grouping. New
// relative to the teacher (which has no locality/region index); grounded on
// the chunked-grid walk idiom used by the teacher's tile systems
// (`systems/tilemap.rs`) and on the union-find-over-regions algorithm
// `spec.md` 4.4 spells out directly.
use bevy::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::grid::{TileRect, WorldGrid};
use crate::pathfinding::Profile;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct RegionId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct RoomId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum LinkKind {
    Open,
    Door,
}

#[derive(Clone, Debug)]
pub struct Region {
    pub id: RegionId,
    pub tiles: HashSet<(i32, i32)>,
    pub rect: TileRect,
    pub room: RoomId,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ObjectKind {
    Tree,
    Rock,
    Building,
}

#[derive(Clone, Copy, Debug)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub id: u32,
    pub world_pos: Vec2,
}

/// Partition of walkable space into chunk-bounded regions, plus the derived
/// room grouping and object locality indices.
#[derive(Resource)]
pub struct RegionGraph {
    chunk_tiles: i32,
    tile_size: f32,
    next_region_id: u32,
    next_room_id: u32,
    regions: HashMap<RegionId, Region>,
    tile_region: HashMap<(i32, i32), RegionId>,
    links: HashMap<RegionId, HashSet<(RegionId, LinkKind)>>,
    region_objects: HashMap<RegionId, Vec<ObjectRef>>,
    object_region: HashMap<(ObjectKind, u32), RegionId>,
}

impl RegionGraph {
    pub fn new(chunk_tiles: i32, tile_size: f32) -> Self {
        Self {
            chunk_tiles,
            tile_size,
            next_region_id: 1,
            next_room_id: 1,
            regions: HashMap::new(),
            tile_region: HashMap::new(),
            links: HashMap::new(),
            region_objects: HashMap::new(),
            object_region: HashMap::new(),
        }
    }

    pub fn region_at(&self, gx: i32, gy: i32) -> Option<RegionId> {
        self.tile_region.get(&(gx, gy)).copied()
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn iter_regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn links_of(&self, id: RegionId) -> impl Iterator<Item = &(RegionId, LinkKind)> {
        self.links.get(&id).into_iter().flatten()
    }

    fn alloc_region(&mut self) -> RegionId {
        let id = RegionId(self.next_region_id);
        self.next_region_id += 1;
        id
    }

    fn chunk_align_outward(&self, rect: TileRect, grid: &WorldGrid) -> TileRect {
        let w = self.chunk_tiles;
        let x0 = (rect.x0.div_euclid(w)) * w;
        let y0 = (rect.y0.div_euclid(w)) * w;
        let x1 = ((rect.x1 - 1).div_euclid(w) + 1) * w;
        let y1 = ((rect.y1 - 1).div_euclid(w) + 1) * w;
        TileRect {
            x0: x0.max(0),
            y0: y0.max(0),
            x1: x1.min(grid.cols),
            y1: y1.min(grid.rows),
        }
    }

    fn remove_region(&mut self, id: RegionId) {
        if let Some(region) = self.regions.remove(&id) {
            for t in &region.tiles {
                self.tile_region.remove(t);
            }
        }
        if let Some(neighbors) = self.links.remove(&id) {
            for (other, _) in neighbors {
                if let Some(set) = self.links.get_mut(&other) {
                    set.retain(|(r, _)| *r != id);
                }
            }
        }
        self.region_objects.remove(&id);
        self.object_region.retain(|_, r| *r != id);
    }

    fn is_region_tile(grid: &WorldGrid, gx: i32, gy: i32) -> bool {
        !grid.solid_at(gx, gy) && grid.traverse_cost(gx, gy) < crate::grid::IMPASSABLE
    }

    /// Flood-fills every chunk intersecting `rect` (which must already be
    /// chunk-aligned), treating door tiles as partition boundaries: they
    /// belong to a region but never extend one into a neighbor.
    fn flood_chunks(&mut self, grid: &WorldGrid, rect: TileRect) {
        let w = self.chunk_tiles;
        let mut cy = rect.y0;
        while cy < rect.y1 {
            let mut cx = rect.x0;
            while cx < rect.x1 {
                let chunk = TileRect { x0: cx, y0: cy, x1: (cx + w).min(rect.x1), y1: (cy + w).min(rect.y1) };
                self.flood_one_chunk(grid, chunk);
                cx += w;
            }
            cy += w;
        }
        self.assign_doors(grid, rect);
    }

    fn flood_one_chunk(&mut self, grid: &WorldGrid, chunk: TileRect) {
        for gy in chunk.y0..chunk.y1 {
            for gx in chunk.x0..chunk.x1 {
                if self.tile_region.contains_key(&(gx, gy)) {
                    continue;
                }
                if grid.is_door(gx, gy) || !Self::is_region_tile(grid, gx, gy) {
                    continue;
                }
                // BFS within this chunk only.
                let id = self.alloc_region();
                let mut tiles = HashSet::new();
                let mut queue = VecDeque::new();
                queue.push_back((gx, gy));
                tiles.insert((gx, gy));
                while let Some((x, y)) = queue.pop_front() {
                    for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                        let (nx, ny) = (x + dx, y + dy);
                        if !chunk.contains(nx, ny) {
                            continue;
                        }
                        if tiles.contains(&(nx, ny)) {
                            continue;
                        }
                        if grid.is_door(nx, ny) || !Self::is_region_tile(grid, nx, ny) {
                            continue;
                        }
                        tiles.insert((nx, ny));
                        queue.push_back((nx, ny));
                    }
                }
                let (mut x0, mut y0, mut x1, mut y1) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
                for &(x, y) in &tiles {
                    self.tile_region.insert((x, y), id);
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x + 1);
                    y1 = y1.max(y + 1);
                }
                self.regions.insert(
                    id,
                    Region { id, tiles, rect: TileRect { x0, y0, x1, y1 }, room: RoomId(0) },
                );
            }
        }
    }

    /// Assigns every unassigned door tile in `rect` to a neighboring
    /// region (arbitrary pick among neighbors, preferring the first found)
    /// or, if fully isolated, a fresh singleton region.
    fn assign_doors(&mut self, grid: &WorldGrid, rect: TileRect) {
        for gy in rect.y0..rect.y1 {
            for gx in rect.x0..rect.x1 {
                if !grid.is_door(gx, gy) || self.tile_region.contains_key(&(gx, gy)) {
                    continue;
                }
                let mut chosen = None;
                for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                    if let Some(r) = self.tile_region.get(&(gx + dx, gy + dy)) {
                        chosen = Some(*r);
                        break;
                    }
                }
                let id = chosen.unwrap_or_else(|| self.alloc_region());
                if chosen.is_none() {
                    self.regions.insert(
                        id,
                        Region {
                            id,
                            tiles: HashSet::from([(gx, gy)]),
                            rect: TileRect { x0: gx, y0: gy, x1: gx + 1, y1: gy + 1 },
                            room: RoomId(0),
                        },
                    );
                } else if let Some(region) = self.regions.get_mut(&id) {
                    region.tiles.insert((gx, gy));
                }
                self.tile_region.insert((gx, gy), id);
            }
        }
    }

    /// Recomputes links for every tile in `rect` plus a 1-tile border ring,
    /// so cross-boundary adjacency to untouched neighbor regions is caught.
    fn recompute_links(&mut self, grid: &WorldGrid, rect: TileRect) {
        let mut pairs: HashSet<(RegionId, RegionId, LinkKind)> = HashSet::new();
        for gy in (rect.y0 - 1)..(rect.y1 + 1) {
            for gx in (rect.x0 - 1)..(rect.x1 + 1) {
                let Some(ra) = self.tile_region.get(&(gx, gy)).copied() else { continue };
                for (dx, dy) in [(1, 0), (0, 1)] {
                    let (nx, ny) = (gx + dx, gy + dy);
                    let Some(rb) = self.tile_region.get(&(nx, ny)).copied() else { continue };
                    if ra == rb {
                        continue;
                    }
                    let kind = if grid.is_door(gx, gy) || grid.is_door(nx, ny) {
                        LinkKind::Door
                    } else {
                        LinkKind::Open
                    };
                    let (a, b) = if ra.0 < rb.0 { (ra, rb) } else { (rb, ra) };
                    pairs.insert((a, b, kind));
                }
            }
        }
        for (a, b, kind) in pairs {
            self.links.entry(a).or_default().insert((b, kind));
            self.links.entry(b).or_default().insert((a, kind));
        }
    }

    fn recompute_rooms(&mut self) {
        let ids: Vec<RegionId> = self.regions.keys().copied().collect();
        let mut parent: HashMap<RegionId, RegionId> = ids.iter().map(|id| (*id, *id)).collect();

        fn find(parent: &mut HashMap<RegionId, RegionId>, x: RegionId) -> RegionId {
            let p = parent[&x];
            if p == x {
                x
            } else {
                let root = find(parent, p);
                parent.insert(x, root);
                root
            }
        }

        for (a, set) in &self.links {
            for (b, kind) in set {
                if *kind == LinkKind::Open {
                    let ra = find(&mut parent, *a);
                    let rb = find(&mut parent, *b);
                    if ra != rb {
                        parent.insert(ra, rb);
                    }
                }
            }
        }

        let mut root_to_room: HashMap<RegionId, RoomId> = HashMap::new();
        for id in ids {
            let root = find(&mut parent, id);
            let room = *root_to_room.entry(root).or_insert_with(|| {
                let r = RoomId(self.next_room_id);
                self.next_room_id += 1;
                r
            });
            if let Some(region) = self.regions.get_mut(&id) {
                region.room = room;
            }
        }
    }

    pub fn rebuild_area(&mut self, grid: &WorldGrid, rect: TileRect) {
        let expanded = self.chunk_align_outward(rect, grid);
        let to_delete: Vec<RegionId> = self
            .regions
            .iter()
            .filter(|(_, r)| r.rect.intersects(&expanded) || r.tiles.iter().any(|(x, y)| expanded.contains(*x, *y)))
            .map(|(id, _)| *id)
            .collect();
        for id in to_delete {
            self.remove_region(id);
        }
        self.flood_chunks(grid, expanded);
        self.recompute_links(grid, expanded);
        self.recompute_rooms();
    }

    pub fn rebuild_full(&mut self, grid: &WorldGrid) {
        self.regions.clear();
        self.tile_region.clear();
        self.links.clear();
        self.region_objects.clear();
        self.object_region.clear();
        let full = grid.full_rect();
        let aligned = self.chunk_align_outward(full, grid);
        self.flood_chunks(grid, aligned);
        self.recompute_links(grid, aligned);
        self.recompute_rooms();
    }

    /// BFS over the region graph. Door-links are always passable here
    /// (reachability is binary: an agent walks through, an intruder can
    /// eventually bash through), unlike the pathfinder's cost treatment.
    pub fn is_reachable(&self, grid: &WorldGrid, from: Vec2, to: Vec2, _profile: Profile) -> bool {
        let (fgx, fgy) = grid.tile_at(from.x, from.y);
        let (tgx, tgy) = grid.tile_at(to.x, to.y);
        let Some(start) = self.region_at(fgx, fgy) else { return false };
        let Some(target) = self.region_at(tgx, tgy) else { return false };
        if start == target {
            return true;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(start);
        queue.push_back(start);
        while let Some(r) = queue.pop_front() {
            for (next, _kind) in self.links_of(r) {
                if *next == target {
                    return true;
                }
                if seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        false
    }

    pub fn update_object_caches(&mut self, grid: &WorldGrid, objects: &[ObjectRef]) {
        self.region_objects.clear();
        self.object_region.clear();
        for obj in objects {
            let (gx, gy) = grid.tile_at(obj.world_pos.x, obj.world_pos.y);
            if let Some(region) = self.region_at(gx, gy) {
                self.region_objects.entry(region).or_default().push(*obj);
                self.object_region.insert((obj.kind, obj.id), region);
            }
        }
    }

    /// BFS outward by region, nearest regions first; within a region,
    /// nearest by Euclidean distance. Stops at `max_regions` visited.
    pub fn find_nearest(
        &self,
        grid: &WorldGrid,
        from: Vec2,
        mut predicate: impl FnMut(&ObjectRef) -> bool,
        max_regions: usize,
    ) -> Option<(ObjectRef, RegionId)> {
        let (gx, gy) = grid.tile_at(from.x, from.y);
        let start = self.region_at(gx, gy)?;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(start);
        queue.push_back(start);
        let mut visited = 0usize;

        while let Some(r) = queue.pop_front() {
            visited += 1;
            if visited > max_regions {
                return None;
            }
            if let Some(objs) = self.region_objects.get(&r) {
                let best = objs
                    .iter()
                    .filter(|o| predicate(o))
                    .min_by(|a, b| {
                        a.world_pos
                            .distance_squared(from)
                            .partial_cmp(&b.world_pos.distance_squared(from))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                if let Some(found) = best {
                    return Some((*found, r));
                }
            }
            for (next, _) in self.links_of(r) {
                if seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BuildingBlockRule, WorldGrid};

    fn grid_240() -> (WorldGrid, RegionGraph) {
        let grid = WorldGrid::new(240, 240, 32.0, 8);
        let mut regions = RegionGraph::new(12, 32.0);
        regions.rebuild_full(&grid);
        (grid, regions)
    }

    #[test]
    fn every_walkable_tile_has_exactly_one_region() {
        let grid = WorldGrid::new(24, 24, 32.0, 8);
        let mut regions = RegionGraph::new(12, 32.0);
        regions.rebuild_full(&grid);
        for gy in 0..grid.rows {
            for gx in 0..grid.cols {
                assert!(regions.region_at(gx, gy).is_some());
            }
        }
    }

    #[test]
    fn partial_rebuild_does_not_change_distant_region_ids() {
        let (mut grid, mut regions) = grid_240();
        let tree_tile = grid.tile_at(100.0, 100.0);
        grid.mark_building(tree_tile.0, tree_tile.1, 1, 1, BuildingBlockRule::Blocking);
        regions.rebuild_area(&grid, grid.rebuild_partial_rect(Vec2::new(100.0, 100.0), 16.0));

        let far_a = regions.region_at(0, 0);
        let far_b = regions.region_at(200, 200);

        grid.unmark_building(tree_tile.0, tree_tile.1, 1, 1);
        let rect = grid.rebuild_partial(Vec2::new(100.0, 100.0), 16.0);
        regions.rebuild_area(&grid, rect);

        assert_eq!(regions.region_at(0, 0), far_a);
        assert_eq!(regions.region_at(200, 200), far_b);
    }

    #[test]
    fn reachability_across_open_region() {
        let (grid, regions) = grid_240();
        assert!(regions.is_reachable(&grid, Vec2::new(16.0, 16.0), Vec2::new(200.0, 200.0), Profile::Agent));
    }

    #[test]
    fn single_tile_grid_reaches_only_self() {
        let grid = WorldGrid::new(1, 1, 32.0, 8);
        let mut regions = RegionGraph::new(12, 32.0);
        regions.rebuild_full(&grid);
        assert!(regions.is_reachable(&grid, Vec2::new(16.0, 16.0), Vec2::new(16.0, 16.0), Profile::Agent));
    }

    #[test]
    fn door_splits_two_regions_with_door_link() {
        let mut grid = WorldGrid::new(24, 24, 32.0, 8);
        for y in 0..24 {
            if y == 12 {
                grid.mark_building(12, y, 1, 1, BuildingBlockRule::Door);
            } else {
                grid.mark_building(12, y, 1, 1, BuildingBlockRule::Blocking);
            }
        }
        let mut regions = RegionGraph::new(12, 32.0);
        regions.rebuild_full(&grid);
        let left = regions.region_at(0, 0).unwrap();
        let right = regions.region_at(23, 0).unwrap();
        assert_ne!(left, right);
        assert!(regions.is_reachable(&grid, Vec2::new(16.0, 16.0), Vec2::new(750.0, 16.0), Profile::Agent));
    }
}
