// src/agents.rs - colonist/intruder entity data. Grounded on the teacher's
// `components.rs` entity-data structs (position/velocity/facing components
// plus small per-unit state), generalized to the needs/skills/inventory/FSM
// shape `spec.md` 3 and 4.8/4.9 require. `Carrying` is the sum-type
// re-architecture the spec's 9 calls for in place of nullable floats.
use bevy::prelude::*;
use std::collections::HashMap;

use crate::buildings::BuildingId;
use crate::reservation::TargetId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct AgentId(pub u32);

/// Handle to whatever an agent is currently targeting; never an owning
/// reference, always resolved back through the relevant arena/table.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TargetHandle {
    Building(BuildingId),
    Tile(i32, i32),
    Agent(AgentId),
    Reservation(TargetId),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Carrying {
    None,
    Wheat(u8),
    Bread(u8),
    /// Generic hauled cargo (`haul`/`haul_bread`), distinct from the
    /// cooking-specific `Wheat`/`Bread` slots above since hauled stacks can
    /// exceed a `u8`.
    Item(crate::items::ItemType, u16),
}

impl Default for Carrying {
    fn default() -> Self {
        Carrying::None
    }
}

/// Priority-preemptive state set, `spec.md` 4.8. Priority ordering is a
/// property of the state itself, not stored per-agent.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum AgentState {
    Flee,
    Drafted,
    WaitingAtDoor,
    BeingTreated,
    Doctoring,
    Downed,
    HealSeek,
    Sleep,
    GoToSleep,
    Eat,
    StoreBread,
    HaulBread,
    Cooking,
    Build,
    Chop,
    Mine,
    Harvest,
    Haul,
    Resting,
    Move,
    Idle,
    SeekTask,
}

impl AgentState {
    /// Higher wins. Mirrors the ladder in `spec.md` 4.8 verbatim.
    pub fn priority(self) -> i32 {
        use AgentState::*;
        match self {
            Flee => 100,
            Drafted => 99,
            WaitingAtDoor => 98,
            BeingTreated => 97,
            Doctoring => 96,
            Downed => 95,
            HealSeek => 90,
            Sleep => 80,
            GoToSleep => 70,
            Eat => 65,
            StoreBread => 45,
            HaulBread => 44,
            Cooking => 42,
            Build | Chop | Mine | Harvest | Haul => 40,
            Resting => 35,
            Move => 25,
            Idle => 15,
            SeekTask => 10,
        }
    }

    /// Critical states bypass soft locks entirely (`spec.md` 4.8).
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            AgentState::Flee
                | AgentState::Drafted
                | AgentState::Downed
                | AgentState::WaitingAtDoor
                | AgentState::BeingTreated
                | AgentState::Doctoring
        )
    }
}

/// One FSM transition, kept for tests/debug per `spec.md` 4.8's "state
/// change logging" requirement.
#[derive(Clone, Copy, Debug)]
pub struct StateTransition {
    pub from: AgentState,
    pub to: AgentState,
    pub reason: &'static str,
    pub tick: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Needs {
    pub hunger: f32,
    pub fatigue: f32,
    pub pain: f32,
    pub hp: f32,
    pub consciousness: f32,
}

impl Needs {
    pub fn full_health() -> Self {
        Self { hunger: 0.0, fatigue: 0.0, pain: 0.0, hp: 100.0, consciousness: 1.0 }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InventorySlot {
    pub item: Option<crate::items::ItemType>,
    pub qty: u16,
}

#[derive(Clone, Debug)]
pub struct CachedPath {
    pub waypoints: Vec<Vec2>,
    pub index: usize,
    pub start_tile: (i32, i32),
    pub goal_tile: (i32, i32),
    pub grid_version_at_compute: u64,
}

/// `cooking`'s multi-step breakdown (`spec.md` 4.8), modeled as an explicit
/// substate enum per the coroutine-to-enum re-architecture note in 9.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CookingSubstate {
    AcquireWheat,
    CarryToStove,
    Cook,
    DepositBread,
}

/// `haul`'s two-step breakdown: fetch the cargo, then carry it to its
/// drop-off. Shared by the generic `haul` state and the `store_bread` /
/// `haul_bread` pair (`spec.md` 4.8).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HaulSubstate {
    ToPickup,
    ToDropoff,
}

/// Parameters of an in-flight `move`, set by whichever state delegated to
/// it (`spec.md` 4.8's "move (generic)").
#[derive(Clone, Copy, Debug)]
pub struct MoveGoal {
    pub target_world: Vec2,
    pub arrival_radius: f32,
    pub request_id: Option<crate::path_queue::RequestId>,
    pub last_repath_tick: u64,
    pub stuck_since_tick: u64,
    pub stuck_anchor: Vec2,
    pub waiting_at_door: Option<(i32, i32)>,
}

/// Colonist entity data. Pure struct, not a `Component` derive target
/// directly — the plugin layer wraps it as `Colonist(pub ColonistData)` so
/// the FSM logic below stays plain Rust and unit-testable.
#[derive(Clone, Debug)]
pub struct ColonistData {
    pub id: AgentId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub facing: Vec2,

    pub path: Option<CachedPath>,

    pub state: AgentState,
    pub state_entered_tick: u64,
    pub soft_lock_until_tick: u64,
    pub history: Vec<StateTransition>,

    pub target: Option<TargetHandle>,
    pub task: Option<&'static str>,

    pub skills: HashMap<&'static str, u8>,
    pub needs: Needs,
    pub inventory: Vec<InventorySlot>,
    pub equipment: Vec<InventorySlot>,
    pub carrying: Carrying,

    pub cook_progress: f32,
    pub cooking_substate: Option<CookingSubstate>,
    pub haul_substate: Option<HaulSubstate>,
    pub move_goal: Option<MoveGoal>,
    pub work_started_tick: u64,

    /// Set once `needs.hp` bleeds past the terminal floor while `downed`;
    /// guards `agent_died` against firing more than once.
    pub dead: bool,
}

impl ColonistData {
    pub fn new(id: AgentId, position: Vec2) -> Self {
        Self {
            id,
            position,
            velocity: Vec2::ZERO,
            facing: Vec2::X,
            path: None,
            state: AgentState::SeekTask,
            state_entered_tick: 0,
            soft_lock_until_tick: 0,
            history: Vec::new(),
            target: None,
            task: None,
            skills: HashMap::new(),
            needs: Needs::full_health(),
            inventory: Vec::new(),
            equipment: Vec::new(),
            carrying: Carrying::None,
            cook_progress: 0.0,
            cooking_substate: None,
            haul_substate: None,
            move_goal: None,
            work_started_tick: 0,
            dead: false,
        }
    }

    /// `spec.md` 4.8: a candidate strictly higher-priority preempts
    /// unconditionally; equal/lower must wait for soft-lock expiry unless
    /// the current state is critical.
    pub fn can_preempt_with(&self, candidate: AgentState, now_tick: u64) -> bool {
        if candidate.priority() > self.state.priority() {
            return true;
        }
        if self.state.is_critical() {
            return false;
        }
        now_tick >= self.soft_lock_until_tick
    }

    pub fn transition(&mut self, to: AgentState, reason: &'static str, now_tick: u64, soft_lock_ticks: u64) {
        if to == self.state {
            return;
        }
        self.history.push(StateTransition { from: self.state, to, reason, tick: now_tick });
        self.state = to;
        self.state_entered_tick = now_tick;
        self.soft_lock_until_tick = now_tick + soft_lock_ticks;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum IntruderState {
    Wander,
    Chase,
    Attack,
    BashDoor,
    Staggered,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IntruderId(pub u32);

#[derive(Clone, Debug)]
pub struct IntruderData {
    pub id: IntruderId,
    pub position: Vec2,
    pub target: Option<TargetHandle>,
    pub path: Option<CachedPath>,
    pub state: IntruderState,
    pub attack_cooldown_remaining: f32,
    pub stagger_until_tick: Option<u64>,
    pub pending_path_request: Option<crate::path_queue::RequestId>,
    pub stuck_since_tick: u64,
    pub stuck_anchor: Vec2,
}

impl IntruderData {
    pub fn new(id: IntruderId, position: Vec2) -> Self {
        Self {
            id,
            position,
            target: None,
            path: None,
            state: IntruderState::Wander,
            attack_cooldown_remaining: 0.0,
            stagger_until_tick: None,
            pending_path_request: None,
            stuck_since_tick: 0,
            stuck_anchor: position,
        }
    }

    pub fn is_staggered(&self, now_tick: u64) -> bool {
        self.stagger_until_tick.map(|t| now_tick < t).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_candidate_always_preempts() {
        let mut c = ColonistData::new(AgentId(1), Vec2::ZERO);
        c.transition(AgentState::Chop, "work", 0, 12);
        assert!(c.can_preempt_with(AgentState::Sleep, 1));
    }

    #[test]
    fn equal_priority_candidate_blocked_until_soft_lock_expires() {
        let mut c = ColonistData::new(AgentId(1), Vec2::ZERO);
        c.transition(AgentState::Chop, "work", 0, 12);
        assert!(!c.can_preempt_with(AgentState::Harvest, 1));
        assert!(c.can_preempt_with(AgentState::Harvest, 12));
    }

    #[test]
    fn critical_state_ignores_soft_lock_entirely() {
        let mut c = ColonistData::new(AgentId(1), Vec2::ZERO);
        c.transition(AgentState::Downed, "injury", 0, 9999);
        // Downed (95) vs Doctoring (96): higher priority still preempts.
        assert!(c.can_preempt_with(AgentState::Doctoring, 1));
    }

    #[test]
    fn transition_records_history_and_resets_soft_lock() {
        let mut c = ColonistData::new(AgentId(1), Vec2::ZERO);
        c.transition(AgentState::Chop, "seek_task->chop", 5, 12);
        assert_eq!(c.history.len(), 1);
        assert_eq!(c.history[0].from, AgentState::SeekTask);
        assert_eq!(c.history[0].to, AgentState::Chop);
        assert_eq!(c.soft_lock_until_tick, 17);
    }

    #[test]
    fn transition_to_same_state_is_a_noop() {
        let mut c = ColonistData::new(AgentId(1), Vec2::ZERO);
        c.transition(AgentState::Chop, "a", 0, 12);
        c.transition(AgentState::Chop, "b", 5, 12);
        assert_eq!(c.history.len(), 1);
    }

    #[test]
    fn staggered_intruder_reports_staggered_until_tick_passes() {
        let mut i = IntruderData::new(IntruderId(1), Vec2::ZERO);
        i.stagger_until_tick = Some(10);
        assert!(i.is_staggered(5));
        assert!(!i.is_staggered(10));
    }
}
