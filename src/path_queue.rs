// src/path_queue.rs - priority-ordered, budget-bounded path request
// scheduler with a fingerprinted LRU result cache and supersede-on-replace
// cancellation. New relative to the teacher (which calls `find_path`
// synchronously inside a system); the request/result shape follows the
// message-passing mailbox re-architecture note in `spec.md` 9 rather than
// a callback/closure, which is what the teacher's `ActionEvent` decoupling
// already hints at (events instead of captured closures).
use bevy::prelude::*;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::agents::AgentId;
use crate::config::KernelConfig;
use crate::executor::{run_until, BudgetedWorker};
use crate::grid::WorldGrid;
use crate::pathfinding::{find_path, DangerOverlay, Profile};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct RequestId(pub u64);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct Fingerprint {
    start_tile: (i32, i32),
    goal_tile: (i32, i32),
    grid_version: u64,
    profile: ProfileKey,
    danger_hash: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum ProfileKey {
    Agent,
    Intruder,
}

impl From<Profile> for ProfileKey {
    fn from(p: Profile) -> Self {
        match p {
            Profile::Agent => ProfileKey::Agent,
            Profile::Intruder => ProfileKey::Intruder,
        }
    }
}

struct PendingRequest {
    agent: AgentId,
    start: Vec2,
    goal: Vec2,
    profile: Profile,
    danger: Option<DangerOverlay>,
    fingerprint_danger_hash: u64,
}

#[derive(Debug)]
struct QueuedKey {
    id: RequestId,
    priority: i32,
    seq: u64,
}

impl PartialEq for QueuedKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for QueuedKey {}

impl PartialOrd for QueuedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within a priority, FIFO (earlier seq first).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Delivered to an agent's mailbox at the start of the tick after the
/// request that produced it was processed (or immediately, on supersede).
#[derive(Debug, Clone)]
pub struct PathDelivery {
    pub request: RequestId,
    pub path: Option<Vec<Vec2>>,
    pub cancelled: bool,
}

struct LruCache {
    cap: usize,
    order: VecDeque<Fingerprint>,
    map: HashMap<Fingerprint, Vec<Vec2>>,
}

impl LruCache {
    fn new(cap: usize) -> Self {
        Self { cap, order: VecDeque::new(), map: HashMap::new() }
    }

    fn get(&mut self, key: &Fingerprint) -> Option<Vec<Vec2>> {
        if let Some(v) = self.map.get(key) {
            let v = v.clone();
            self.order.retain(|k| k != key);
            self.order.push_back(*key);
            Some(v)
        } else {
            None
        }
    }

    fn put(&mut self, key: Fingerprint, value: Vec<Vec2>) {
        if self.map.insert(key, value).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key);
        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }
}

/// Single-threaded cooperative scheduler for pathfinding work, bounded by a
/// per-frame wall-clock budget (`spec.md` 4.3).
#[derive(Resource)]
pub struct PathRequestQueue {
    next_id: u64,
    seq: u64,
    heap: std::collections::BinaryHeap<QueuedKey>,
    pending: HashMap<RequestId, PendingRequest>,
    agent_active: HashMap<AgentId, RequestId>,
    mailbox: HashMap<AgentId, PathDelivery>,
    cache: LruCache,
}

impl Default for PathRequestQueue {
    fn default() -> Self {
        Self {
            next_id: 1,
            seq: 0,
            heap: std::collections::BinaryHeap::new(),
            pending: HashMap::new(),
            agent_active: HashMap::new(),
            mailbox: HashMap::new(),
            cache: LruCache::new(256),
        }
    }
}

impl PathRequestQueue {
    pub fn with_cache_capacity(cap: usize) -> Self {
        Self { cache: LruCache::new(cap), ..Self::default() }
    }

    /// Enqueues a path request, superseding any in-flight request for the
    /// same agent (the superseded one is delivered `None`/cancelled
    /// immediately, so the agent never double-commits).
    pub fn request_path(
        &mut self,
        agent: AgentId,
        start: Vec2,
        goal: Vec2,
        profile: Profile,
        priority: i32,
        danger: Option<DangerOverlay>,
    ) -> RequestId {
        if let Some(old_id) = self.agent_active.remove(&agent) {
            self.pending.remove(&old_id);
            self.mailbox.insert(
                agent,
                PathDelivery { request: old_id, path: None, cancelled: true },
            );
        }

        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.seq += 1;

        let danger_hash = danger.as_ref().map(|d| d.fingerprint()).unwrap_or(0);
        self.pending.insert(
            id,
            PendingRequest { agent, start, goal, profile, danger, fingerprint_danger_hash: danger_hash },
        );
        self.agent_active.insert(agent, id);
        self.heap.push(QueuedKey { id, priority, seq: self.seq });
        id
    }

    /// Explicit cancellation (state change, death). Idempotent.
    pub fn cancel(&mut self, id: RequestId) {
        if let Some(req) = self.pending.remove(&id) {
            if self.agent_active.get(&req.agent) == Some(&id) {
                self.agent_active.remove(&req.agent);
            }
            self.mailbox.insert(req.agent, PathDelivery { request: id, path: None, cancelled: true });
        }
    }

    /// Drains one agent's mailbox slot, if a result is waiting.
    pub fn poll(&mut self, agent: AgentId) -> Option<PathDelivery> {
        self.mailbox.remove(&agent)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Processes queued requests under `budget`, consulting the LRU cache
    /// before running A*.
    pub fn drain(&mut self, grid: &WorldGrid, budget: Duration, max_expansions: u32) {
        let mut worker = DrainWorker { queue: self, grid, max_expansions };
        run_until(budget, &mut worker);
    }
}

struct DrainWorker<'a> {
    queue: &'a mut PathRequestQueue,
    grid: &'a WorldGrid,
    max_expansions: u32,
}

impl<'a> BudgetedWorker for DrainWorker<'a> {
    fn step(&mut self) -> bool {
        let Some(key) = self.queue.heap.pop() else { return false };
        let Some(req) = self.queue.pending.remove(&key.id) else {
            // Already superseded/cancelled; keep draining.
            return !self.queue.heap.is_empty();
        };

        let start_tile = self.grid.tile_at(req.start.x, req.start.y);
        let goal_tile = self.grid.tile_at(req.goal.x, req.goal.y);
        let fp = Fingerprint {
            start_tile,
            goal_tile,
            grid_version: self.grid.grid_version,
            profile: req.profile.into(),
            danger_hash: req.fingerprint_danger_hash,
        };

        let path = if let Some(cached) = self.queue.cache.get(&fp) {
            Some(cached)
        } else {
            let computed = find_path(self.grid, req.start, req.goal, req.profile, req.danger.as_ref(), self.max_expansions);
            if let Some(p) = &computed {
                self.queue.cache.put(fp, p.clone());
            }
            computed
        };

        if self.queue.agent_active.get(&req.agent) == Some(&key.id) {
            self.queue.agent_active.remove(&req.agent);
        }
        self.queue.mailbox.insert(
            req.agent,
            PathDelivery { request: key.id, path, cancelled: false },
        );

        !self.queue.heap.is_empty()
    }
}

/// `1 + random in [0, 0.5]` seconds, per `spec.md` 4.3's suggested back-off.
pub fn suggest_backoff(config: &KernelConfig, rng: &mut impl Rng) -> Duration {
    let jitter = rng.gen_range(0.0..=config.pathing.path_retry_backoff_jitter_sec);
    Duration::from_secs_f32(config.pathing.path_retry_backoff_base_sec + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::WorldGrid;

    fn grid() -> WorldGrid {
        WorldGrid::new(10, 10, 32.0, 8)
    }

    #[test]
    fn newer_request_supersedes_older_for_same_agent() {
        let mut q = PathRequestQueue::default();
        let a = AgentId(1);
        let old = q.request_path(a, Vec2::new(16.0, 16.0), Vec2::new(48.0, 16.0), Profile::Agent, 10, None);
        let _new = q.request_path(a, Vec2::new(16.0, 16.0), Vec2::new(80.0, 16.0), Profile::Agent, 10, None);
        let delivery = q.poll(a).unwrap();
        assert_eq!(delivery.request, old);
        assert!(delivery.cancelled);
        assert!(delivery.path.is_none());
    }

    #[test]
    fn higher_priority_drains_before_lower() {
        let g = grid();
        let mut q = PathRequestQueue::default();
        let low = q.request_path(AgentId(1), Vec2::new(16.0, 16.0), Vec2::new(48.0, 16.0), Profile::Agent, 1, None);
        let high = q.request_path(AgentId(2), Vec2::new(16.0, 16.0), Vec2::new(48.0, 16.0), Profile::Agent, 10, None);
        // Drain exactly one unit of work by using a near-zero budget that
        // still performs a single step.
        q.drain(&g, Duration::ZERO, 20_000);
        let high_delivery = q.poll(AgentId(2));
        let low_delivery = q.poll(AgentId(1));
        assert!(high_delivery.is_some());
        assert!(low_delivery.is_none());
        let _ = (low, high);
    }

    #[test]
    fn cache_hit_bypasses_recompute_but_returns_same_path() {
        let g = grid();
        let mut q = PathRequestQueue::default();
        q.request_path(AgentId(1), Vec2::new(16.0, 16.0), Vec2::new(304.0, 16.0), Profile::Agent, 5, None);
        q.drain(&g, Duration::from_millis(5), 20_000);
        let first = q.poll(AgentId(1)).unwrap().path.unwrap();

        q.request_path(AgentId(1), Vec2::new(16.0, 16.0), Vec2::new(304.0, 16.0), Profile::Agent, 5, None);
        q.drain(&g, Duration::from_millis(5), 20_000);
        let second = q.poll(AgentId(1)).unwrap().path.unwrap();
        assert_eq!(first, second);
    }
}
