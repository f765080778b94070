// src/items.rs - dropped floor stacks and stockpile zones. Grounded on
// `spec.md` 3; the teacher has no item/hauling model, so this is built
// directly against the spec rather than generalized from a teacher
// counterpart (noted in DESIGN.md).
use bevy::prelude::*;
use std::collections::HashSet;

use crate::grid::TileRect;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ItemType {
    Wheat,
    Bread,
    Wood,
    Stone,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct FloorItemId(pub u32);

#[derive(Clone, Copy, Debug)]
pub struct FloorItem {
    pub id: FloorItemId,
    pub item_type: ItemType,
    pub qty: u16,
    pub world_pos: Vec2,
}

#[derive(Clone, Debug)]
pub enum StockpileFilter {
    AllowAll,
    Allow(HashSet<ItemType>),
}

impl StockpileFilter {
    pub fn accepts(&self, item: ItemType) -> bool {
        match self {
            StockpileFilter::AllowAll => true,
            StockpileFilter::Allow(set) => set.contains(&item),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StockpileZone {
    pub rect: TileRect,
    pub filter: StockpileFilter,
    pub label: String,
}

impl StockpileZone {
    pub fn contains_tile(&self, gx: i32, gy: i32) -> bool {
        self.rect.contains(gx, gy)
    }
}

/// Arena of floor items, keyed by handle. Consumed by hauling/construction,
/// created by harvest/drop actions (`spec.md` 3 lifecycle).
#[derive(Resource, Default)]
pub struct FloorItemArena {
    next_id: u32,
    items: std::collections::HashMap<FloorItemId, FloorItem>,
}

impl FloorItemArena {
    pub fn drop(&mut self, item_type: ItemType, qty: u16, world_pos: Vec2) -> FloorItemId {
        let id = FloorItemId(self.next_id);
        self.next_id += 1;
        self.items.insert(id, FloorItem { id, item_type, qty, world_pos });
        id
    }

    pub fn get(&self, id: FloorItemId) -> Option<&FloorItem> {
        self.items.get(&id)
    }

    /// Removes up to `qty` from the stack; deletes the stack once it hits
    /// zero. Returns the quantity actually removed.
    pub fn take(&mut self, id: FloorItemId, qty: u16) -> u16 {
        let Some(stack) = self.items.get_mut(&id) else { return 0 };
        let taken = qty.min(stack.qty);
        stack.qty -= taken;
        if stack.qty == 0 {
            self.items.remove(&id);
        }
        taken
    }

    pub fn iter(&self) -> impl Iterator<Item = &FloorItem> {
        self.items.values()
    }

    pub fn find_in_zone(&self, zone: &StockpileZone, tile_of: impl Fn(Vec2) -> (i32, i32)) -> Vec<FloorItemId> {
        self.items
            .values()
            .filter(|it| {
                let (gx, gy) = tile_of(it.world_pos);
                zone.contains_tile(gx, gy) && zone.filter.accepts(it.item_type)
            })
            .map(|it| it.id)
            .collect()
    }
}
