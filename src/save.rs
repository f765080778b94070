// src/save.rs - binary save/load round-trip. Grounded on the teacher's
// `systems/save.rs` `save_game_complete`/`load_game` function pair and its
// "serialize the resources the caller owns, write to disk, parse back on
// load" shape, but the wire format itself is the hand-rolled little-endian
// layout `spec.md` 6 specifies rather than the teacher's `serde_json` blob
// (a textual save can't express a bit-exact grid round-trip).
use std::io::{self, Read, Write};

use bevy::prelude::*;

use crate::agents::{AgentId, AgentState, Carrying, ColonistData, CookingSubstate, HaulSubstate, InventorySlot, IntruderData, IntruderId, IntruderState, Needs};
use crate::buildings::{Building, BuildingArena, BuildingInventorySlot, BuildingKind, Occupancy};
use crate::grid::{BuildingBlockRule, FloorClass, TerrainClass, WorldGrid};
use crate::items::ItemType;

const MAGIC: &[u8; 4] = b"CGK1";

#[derive(Debug)]
pub enum SaveError {
    Io(io::Error),
    BadMagic,
    UnknownEnumTag(&'static str, u32),
}

impl From<io::Error> for SaveError {
    fn from(e: io::Error) -> Self {
        SaveError::Io(e)
    }
}

pub struct SaveBlob {
    pub tick_rate: u16,
    pub seed: u64,
    pub save_tick: u64,
    pub grid: WorldGrid,
    pub buildings: Vec<Building>,
    pub colonists: Vec<ColonistData>,
    pub intruders: Vec<IntruderData>,
    pub rng_stream: u64,
}

fn w_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}
fn w_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn w_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn w_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn w_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn w_blob(out: &mut Vec<u8>, blob: &[u8]) {
    w_u32(out, blob.len() as u32);
    out.extend_from_slice(blob);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "save file truncated"));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }
    fn u16(&mut self) -> io::Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }
    fn u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn u64(&mut self) -> io::Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn f32(&mut self) -> io::Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn blob(&mut self) -> io::Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

fn item_type_to_u8(t: ItemType) -> u8 {
    match t {
        ItemType::Wheat => 0,
        ItemType::Bread => 1,
        ItemType::Wood => 2,
        ItemType::Stone => 3,
    }
}

fn item_type_from_u8(v: u8) -> Option<ItemType> {
    match v {
        0 => Some(ItemType::Wheat),
        1 => Some(ItemType::Bread),
        2 => Some(ItemType::Wood),
        3 => Some(ItemType::Stone),
        _ => None,
    }
}

fn building_kind_to_u16(k: BuildingKind) -> u16 {
    match k {
        BuildingKind::Wall => 0,
        BuildingKind::Door => 1,
        BuildingKind::Bed => 2,
        BuildingKind::Stove => 3,
        BuildingKind::Turret => 4,
        BuildingKind::StockpileMarker => 5,
    }
}

fn building_kind_from_u16(v: u16) -> Result<BuildingKind, SaveError> {
    Ok(match v {
        0 => BuildingKind::Wall,
        1 => BuildingKind::Door,
        2 => BuildingKind::Bed,
        3 => BuildingKind::Stove,
        4 => BuildingKind::Turret,
        5 => BuildingKind::StockpileMarker,
        other => return Err(SaveError::UnknownEnumTag("BuildingKind", other as u32)),
    })
}

fn agent_state_to_u16(s: AgentState) -> u16 {
    use AgentState::*;
    match s {
        Flee => 0,
        Drafted => 1,
        WaitingAtDoor => 2,
        BeingTreated => 3,
        Doctoring => 4,
        Downed => 5,
        HealSeek => 6,
        Sleep => 7,
        GoToSleep => 8,
        Eat => 9,
        StoreBread => 10,
        HaulBread => 11,
        Cooking => 12,
        Build => 13,
        Chop => 14,
        Mine => 15,
        Harvest => 16,
        Haul => 17,
        Resting => 18,
        Move => 19,
        Idle => 20,
        SeekTask => 21,
    }
}

fn agent_state_from_u16(v: u16) -> Result<AgentState, SaveError> {
    use AgentState::*;
    Ok(match v {
        0 => Flee,
        1 => Drafted,
        2 => WaitingAtDoor,
        3 => BeingTreated,
        4 => Doctoring,
        5 => Downed,
        6 => HealSeek,
        7 => Sleep,
        8 => GoToSleep,
        9 => Eat,
        10 => StoreBread,
        11 => HaulBread,
        12 => Cooking,
        13 => Build,
        14 => Chop,
        15 => Mine,
        16 => Harvest,
        17 => Haul,
        18 => Resting,
        19 => Move,
        20 => Idle,
        21 => SeekTask,
        other => return Err(SaveError::UnknownEnumTag("AgentState", other as u32)),
    })
}

fn intruder_state_to_u16(s: IntruderState) -> u16 {
    match s {
        IntruderState::Wander => 0,
        IntruderState::Chase => 1,
        IntruderState::Attack => 2,
        IntruderState::BashDoor => 3,
        IntruderState::Staggered => 4,
    }
}

fn intruder_state_from_u16(v: u16) -> Result<IntruderState, SaveError> {
    Ok(match v {
        0 => IntruderState::Wander,
        1 => IntruderState::Chase,
        2 => IntruderState::Attack,
        3 => IntruderState::BashDoor,
        4 => IntruderState::Staggered,
        other => return Err(SaveError::UnknownEnumTag("IntruderState", other as u32)),
    })
}

fn write_inventory_blob(slots: &[InventorySlot]) -> Vec<u8> {
    let mut out = Vec::new();
    w_u16(&mut out, slots.len() as u16);
    for slot in slots {
        match slot.item {
            Some(item) => {
                w_u8(&mut out, 1);
                w_u8(&mut out, item_type_to_u8(item));
            }
            None => w_u8(&mut out, 0),
        }
        w_u16(&mut out, slot.qty);
    }
    out
}

fn read_inventory_blob(bytes: &[u8]) -> io::Result<Vec<InventorySlot>> {
    let mut r = Reader::new(bytes);
    let n = r.u16()?;
    let mut out = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let has = r.u8()?;
        let item = if has == 1 { item_type_from_u8(r.u8()?) } else { None };
        let qty = r.u16()?;
        out.push(InventorySlot { item, qty });
    }
    Ok(out)
}

/// Packs `carrying` plus the two work substates into one blob, the same way
/// `write_inventory_blob` packs a slot list. Intruder rows write the empty
/// `Carrying::None`/`None`/`None` form through this too, so both agent kinds
/// read back through one `read_carry_blob` call.
fn write_carry_blob(carrying: Carrying, cooking_substate: Option<CookingSubstate>, haul_substate: Option<HaulSubstate>) -> Vec<u8> {
    let mut out = Vec::new();
    match carrying {
        Carrying::None => {
            w_u8(&mut out, 0);
            w_u8(&mut out, 0);
            w_u16(&mut out, 0);
        }
        Carrying::Wheat(n) => {
            w_u8(&mut out, 1);
            w_u8(&mut out, n);
            w_u16(&mut out, 0);
        }
        Carrying::Bread(n) => {
            w_u8(&mut out, 2);
            w_u8(&mut out, n);
            w_u16(&mut out, 0);
        }
        Carrying::Item(item, qty) => {
            w_u8(&mut out, 3);
            w_u8(&mut out, item_type_to_u8(item));
            w_u16(&mut out, qty);
        }
    }
    let cook_tag = match cooking_substate {
        None => 0u8,
        Some(CookingSubstate::AcquireWheat) => 1,
        Some(CookingSubstate::CarryToStove) => 2,
        Some(CookingSubstate::Cook) => 3,
        Some(CookingSubstate::DepositBread) => 4,
    };
    w_u8(&mut out, cook_tag);
    let haul_tag = match haul_substate {
        None => 0u8,
        Some(HaulSubstate::ToPickup) => 1,
        Some(HaulSubstate::ToDropoff) => 2,
    };
    w_u8(&mut out, haul_tag);
    out
}

fn read_carry_blob(bytes: &[u8]) -> io::Result<(Carrying, Option<CookingSubstate>, Option<HaulSubstate>)> {
    let mut r = Reader::new(bytes);
    let tag = r.u8()?;
    let a = r.u8()?;
    let b = r.u16()?;
    let carrying = match tag {
        1 => Carrying::Wheat(a),
        2 => Carrying::Bread(a),
        3 => Carrying::Item(item_type_from_u8(a).unwrap_or(ItemType::Wheat), b),
        _ => Carrying::None,
    };
    let cooking_substate = match r.u8()? {
        1 => Some(CookingSubstate::AcquireWheat),
        2 => Some(CookingSubstate::CarryToStove),
        3 => Some(CookingSubstate::Cook),
        4 => Some(CookingSubstate::DepositBread),
        _ => None,
    };
    let haul_substate = match r.u8()? {
        1 => Some(HaulSubstate::ToPickup),
        2 => Some(HaulSubstate::ToDropoff),
        _ => None,
    };
    Ok((carrying, cooking_substate, haul_substate))
}

/// Serializes the full simulation to the `spec.md` 6 binary layout.
pub fn save_game(blob: &SaveBlob) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    w_u32(&mut out, blob.grid.cols as u32);
    w_u32(&mut out, blob.grid.rows as u32);
    w_u16(&mut out, blob.grid.tile_size as u16);
    w_u16(&mut out, blob.tick_rate);
    w_u64(&mut out, blob.seed);
    w_u64(&mut out, blob.save_tick);

    let terrain = blob.grid.raw_terrain();
    let floor = blob.grid.raw_floor();
    let solid = blob.grid.raw_solid();
    let cost = blob.grid.raw_cost();
    for i in 0..(blob.grid.cols * blob.grid.rows) as usize {
        w_u8(&mut out, terrain[i].as_u8());
        w_u8(&mut out, floor[i].as_u8());
        w_u8(&mut out, solid[i]);
        w_f32(&mut out, cost[i]);
    }

    w_u32(&mut out, blob.buildings.len() as u32);
    for b in &blob.buildings {
        w_u32(&mut out, b.id.0);
        w_u16(&mut out, building_kind_to_u16(b.kind));
        w_u16(&mut out, b.gx as u16);
        w_u16(&mut out, b.gy as u16);
        w_u16(&mut out, b.gw as u16);
        w_u16(&mut out, b.gh as u16);
        w_u8(&mut out, if b.complete { 1 } else { 0 });
        w_u16(&mut out, b.hp);
        let mut inv_blob = Vec::new();
        w_u16(&mut inv_blob, b.inventory.len() as u16);
        for slot in &b.inventory {
            match slot.item {
                Some(item) => {
                    w_u8(&mut inv_blob, 1);
                    w_u8(&mut inv_blob, item_type_to_u8(item));
                }
                None => w_u8(&mut inv_blob, 0),
            }
            w_u16(&mut inv_blob, slot.qty);
        }
        w_blob(&mut out, &inv_blob);
    }

    w_u32(&mut out, (blob.colonists.len() + blob.intruders.len()) as u32);
    for c in &blob.colonists {
        w_u32(&mut out, c.id.0);
        w_u8(&mut out, 0); // kind: colonist
        w_f32(&mut out, c.position.x);
        w_f32(&mut out, c.position.y);
        w_u16(&mut out, agent_state_to_u16(c.state));
        w_blob(&mut out, &[]); // priorities blob: external work-giver policy, nothing kernel-owned to persist
        w_f32(&mut out, c.needs.hp);
        w_f32(&mut out, c.needs.hunger);
        w_f32(&mut out, c.needs.fatigue);
        w_f32(&mut out, c.needs.pain);
        w_f32(&mut out, c.needs.consciousness);
        w_blob(&mut out, &write_inventory_blob(&c.inventory));
        w_blob(&mut out, &write_carry_blob(c.carrying, c.cooking_substate, c.haul_substate));
        w_blob(&mut out, &[]); // path blob: paths are re-requested on load, not persisted
    }
    for i in &blob.intruders {
        w_u32(&mut out, i.id.0);
        w_u8(&mut out, 1); // kind: intruder
        w_f32(&mut out, i.position.x);
        w_f32(&mut out, i.position.y);
        w_u16(&mut out, intruder_state_to_u16(i.state));
        w_blob(&mut out, &[]);
        w_f32(&mut out, 0.0);
        w_f32(&mut out, 0.0);
        w_f32(&mut out, 0.0);
        w_f32(&mut out, 0.0);
        w_f32(&mut out, 0.0);
        w_blob(&mut out, &[]);
        w_blob(&mut out, &write_carry_blob(Carrying::None, None, None));
        w_blob(&mut out, &[]);
    }

    w_u64(&mut out, blob.seed);
    w_u64(&mut out, blob.rng_stream);

    out
}

/// Parses a `spec.md` 6 save blob. A mismatched magic or truncated buffer
/// aborts with an error rather than attempting a partial load.
pub fn load_game(bytes: &[u8]) -> Result<SaveBlob, SaveError> {
    let mut r = Reader::new(bytes);
    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(SaveError::BadMagic);
    }
    let cols = r.u32()? as i32;
    let rows = r.u32()? as i32;
    let tile_size = r.u16()? as f32;
    let tick_rate = r.u16()?;
    let seed = r.u64()?;
    let save_tick = r.u64()?;

    let n_tiles = (cols * rows) as usize;
    let mut terrain = Vec::with_capacity(n_tiles);
    let mut floor = Vec::with_capacity(n_tiles);
    let mut solid = Vec::with_capacity(n_tiles);
    let mut cost = Vec::with_capacity(n_tiles);
    for _ in 0..n_tiles {
        terrain.push(TerrainClass::from_u8(r.u8()?));
        floor.push(FloorClass::from_u8(r.u8()?));
        solid.push(r.u8()?);
        cost.push(r.f32()?);
    }
    let grid = WorldGrid::from_raw_layers(cols, rows, tile_size, 8, solid, cost, terrain, floor);

    let n_buildings = r.u32()?;
    let mut buildings = Vec::with_capacity(n_buildings as usize);
    for _ in 0..n_buildings {
        let id = crate::buildings::BuildingId(r.u32()?);
        let kind = building_kind_from_u16(r.u16()?)?;
        let gx = r.u16()? as i32;
        let gy = r.u16()? as i32;
        let gw = r.u16()? as i32;
        let gh = r.u16()? as i32;
        let complete = r.u8()? != 0;
        let hp = r.u16()?;
        let inv_bytes = r.blob()?;
        let mut ir = Reader::new(&inv_bytes);
        let n_slots = ir.u16()?;
        let mut inventory = Vec::with_capacity(n_slots as usize);
        for _ in 0..n_slots {
            let has = ir.u8()?;
            let item = if has == 1 { item_type_from_u8(ir.u8()?) } else { None };
            let qty = ir.u16()?;
            inventory.push(BuildingInventorySlot { item, qty });
        }
        buildings.push(Building {
            id,
            kind,
            gx,
            gy,
            gw,
            gh,
            rotation: 0,
            complete,
            work_progress: if complete { kind.build_work_required() } else { 0.0 },
            hp,
            inventory,
            occupancy: Occupancy::Empty,
            door_open: true,
        });
    }

    let n_agents = r.u32()?;
    let mut colonists = Vec::new();
    let mut intruders = Vec::new();
    for _ in 0..n_agents {
        let id = r.u32()?;
        let kind = r.u8()?;
        let x = r.f32()?;
        let y = r.f32()?;
        let state_raw = r.u16()?;
        let _priorities = r.blob()?;
        let hp = r.f32()?;
        let hunger = r.f32()?;
        let fatigue = r.f32()?;
        let pain = r.f32()?;
        let consciousness = r.f32()?;
        let inventory_bytes = r.blob()?;
        let carry_bytes = r.blob()?;
        let _path_blob = r.blob()?;
        match kind {
            0 => {
                let mut c = ColonistData::new(AgentId(id), Vec2::new(x, y));
                c.state = agent_state_from_u16(state_raw)?;
                c.needs = Needs { hunger, fatigue, pain, hp, consciousness };
                c.inventory = read_inventory_blob(&inventory_bytes)?;
                let (carrying, cooking_substate, haul_substate) = read_carry_blob(&carry_bytes)?;
                c.carrying = carrying;
                c.cooking_substate = cooking_substate;
                c.haul_substate = haul_substate;
                colonists.push(c);
            }
            1 => {
                let mut i = IntruderData::new(IntruderId(id), Vec2::new(x, y));
                i.state = intruder_state_from_u16(state_raw)?;
                intruders.push(i);
            }
            other => return Err(SaveError::UnknownEnumTag("AgentKind", other as u32)),
        }
    }

    let _rng_seed = r.u64()?;
    let rng_stream = r.u64()?;

    Ok(SaveBlob {
        tick_rate,
        seed,
        save_tick,
        grid,
        buildings,
        colonists,
        intruders,
        rng_stream,
    })
}

/// Re-applies door-block marks for any loaded `Door` building so the grid's
/// door registry (not part of the persisted per-tile layers) is repopulated.
/// Doors always load open.
pub fn reapply_door_registry(grid: &mut WorldGrid, buildings: &BuildingArena) {
    for b in buildings.iter() {
        if b.complete && b.kind.block_rule() == BuildingBlockRule::Door {
            grid.mark_building(b.gx, b.gy, b.gw, b.gh, BuildingBlockRule::Door);
        }
    }
}

pub fn write_to_file(path: &str, blob: &SaveBlob) -> io::Result<()> {
    let bytes = save_game(blob);
    let mut f = std::fs::File::create(path)?;
    f.write_all(&bytes)
}

pub fn read_from_file(path: &str) -> Result<SaveBlob, SaveError> {
    let mut f = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    f.read_to_end(&mut bytes)?;
    load_game(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileRect;

    fn sample_grid() -> WorldGrid {
        let mut g = WorldGrid::new(6, 6, 32.0, 8);
        g.set_tile_terrain(2, 2, TerrainClass::Mud);
        g.paint_floor_rect(TileRect { x0: 0, y0: 0, x1: 3, y1: 1 }, FloorClass::StoneRoad);
        g.mark_building(4, 4, 1, 1, BuildingBlockRule::Blocking);
        g
    }

    #[test]
    fn round_trip_preserves_grid_layers() {
        let grid = sample_grid();
        let mut colonist = ColonistData::new(AgentId(3), Vec2::new(50.0, 60.0));
        colonist.needs = Needs { hp: 80.0, hunger: 20.0, fatigue: 10.0, pain: 0.0, consciousness: 1.0 };
        let blob = SaveBlob {
            tick_rate: 30,
            seed: 12345,
            save_tick: 900,
            grid,
            buildings: vec![Building {
                id: crate::buildings::BuildingId(0),
                kind: BuildingKind::Wall,
                gx: 4,
                gy: 4,
                gw: 1,
                gh: 1,
                rotation: 0,
                complete: true,
                work_progress: 40.0,
                hp: 300,
                inventory: Vec::new(),
                occupancy: Occupancy::Empty,
                door_open: true,
            }],
            colonists: vec![colonist],
            intruders: Vec::new(),
            rng_stream: 77,
        };
        let bytes = save_game(&blob);
        let loaded = load_game(&bytes).unwrap();

        assert_eq!(loaded.seed, 12345);
        assert_eq!(loaded.save_tick, 900);
        assert_eq!(loaded.rng_stream, 77);
        assert_eq!(loaded.grid.raw_solid(), blob.grid.raw_solid());
        assert_eq!(loaded.grid.raw_cost(), blob.grid.raw_cost());
        assert_eq!(loaded.buildings.len(), 1);
        assert_eq!(loaded.colonists.len(), 1);
        assert_eq!(loaded.colonists[0].needs.hp, 80.0);
        assert_eq!(loaded.colonists[0].position, Vec2::new(50.0, 60.0));
    }

    #[test]
    fn round_trip_preserves_carrying_and_cooking_substate() {
        let mut colonist = ColonistData::new(AgentId(9), Vec2::new(10.0, 10.0));
        colonist.carrying = Carrying::Item(ItemType::Wheat, 7);
        colonist.cooking_substate = Some(CookingSubstate::CarryToStove);
        colonist.haul_substate = Some(HaulSubstate::ToDropoff);
        let blob = SaveBlob {
            tick_rate: 30,
            seed: 1,
            save_tick: 0,
            grid: sample_grid(),
            buildings: Vec::new(),
            colonists: vec![colonist],
            intruders: Vec::new(),
            rng_stream: 0,
        };
        let bytes = save_game(&blob);
        let loaded = load_game(&bytes).unwrap();
        assert_eq!(loaded.colonists[0].carrying, Carrying::Item(ItemType::Wheat, 7));
        assert_eq!(loaded.colonists[0].cooking_substate, Some(CookingSubstate::CarryToStove));
        assert_eq!(loaded.colonists[0].haul_substate, Some(HaulSubstate::ToDropoff));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let bytes = vec![0u8; 32];
        assert!(matches!(load_game(&bytes), Err(SaveError::BadMagic)));
    }

    #[test]
    fn save_load_save_is_byte_identical() {
        let grid = sample_grid();
        let blob = SaveBlob {
            tick_rate: 30,
            seed: 1,
            save_tick: 5,
            grid,
            buildings: Vec::new(),
            colonists: Vec::new(),
            intruders: Vec::new(),
            rng_stream: 0,
        };
        let first = save_game(&blob);
        let loaded = load_game(&first).unwrap();
        let second = save_game(&SaveBlob {
            tick_rate: loaded.tick_rate,
            seed: loaded.seed,
            save_tick: loaded.save_tick,
            grid: loaded.grid,
            buildings: loaded.buildings,
            colonists: loaded.colonists,
            intruders: loaded.intruders,
            rng_stream: loaded.rng_stream,
        });
        assert_eq!(first, second);
    }
}
