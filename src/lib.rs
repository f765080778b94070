// src/lib.rs - crate root. Module layout mirrors the teacher's `lib.rs`
// (flat top-level modules plus one nested `systems`-style folder, here
// `fsm/` for the two priority-preemptive state machines).
pub mod agents;
pub mod buildings;
pub mod clock;
pub mod config;
pub mod events;
pub mod executor;
pub mod fsm;
pub mod grid;
pub mod items;
pub mod kernel;
pub mod path_queue;
pub mod pathfinding;
pub mod plugin;
pub mod regions;
pub mod reservation;
pub mod save;

pub use kernel::Kernel;
pub use plugin::KernelPlugin;
