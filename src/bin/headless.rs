// src/bin/headless.rs - minimal headless driver. Trimmed from the teacher's
// `main.rs` `App::new().add_plugins(...).add_systems(...)` shape down to
// just the kernel: no window, no rendering, no input.
use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;
use std::time::Duration;

use colony_kernel::agents::{AgentId, ColonistData, TargetHandle};
use colony_kernel::config::KernelConfig;
use colony_kernel::fsm::agent::{Perception, WorkGiver, WorkKind};
use colony_kernel::fsm::intruder::DamageSink;
use colony_kernel::kernel::{Kernel, PerceptionSource, ThreatSource};
use colony_kernel::plugin::{DamageSinkRes, KernelPlugin, PerceptionSourceRes, ThreatSourceRes, WorkGiverRes};

/// Placeholder content policy: nobody has work, nothing perceives threats.
/// A real game supplies its own `WorkGiver`/`DamageSink`/`PerceptionSource`/
/// `ThreatSource` impls backed by its job board, combat system, and faction
/// vision, per `spec.md` 4.5/4.9's "compose by ownership" notes.
struct NullWorkGiver;
impl WorkGiver for NullWorkGiver {
    fn candidates(&self, _agent: &ColonistData) -> Vec<(WorkKind, TargetHandle, i32)> {
        Vec::new()
    }
}

struct NullDamageSink;
impl DamageSink for NullDamageSink {
    fn apply_damage(&mut self, _target: TargetHandle, _amount: f32) {}
}

struct NullPerception;
impl PerceptionSource for NullPerception {
    fn perception_for(&self, _agent: AgentId, _data: &ColonistData) -> Perception {
        Perception::default()
    }
}

struct NullThreat;
impl ThreatSource for NullThreat {
    fn nearest_threat(&self, _intruder: colony_kernel::agents::IntruderId, _position: Vec2) -> Option<Vec2> {
        None
    }
}

fn spawn_demo_colonists(mut kernel: ResMut<Kernel>) {
    for i in 0..4 {
        kernel.spawn_agent(Vec2::new(64.0 + i as f32 * 32.0, 64.0));
    }
}

fn main() {
    let config = KernelConfig::load("kernel_config.ron");
    App::new()
        .add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f32(1.0 / 30.0))))
        .insert_resource(WorkGiverRes(Box::new(NullWorkGiver)))
        .insert_resource(DamageSinkRes(Box::new(NullDamageSink)))
        .insert_resource(PerceptionSourceRes(Box::new(NullPerception)))
        .insert_resource(ThreatSourceRes(Box::new(NullThreat)))
        .add_plugins(KernelPlugin::new(config, 64, 64, 32.0, 1))
        .add_systems(Startup, spawn_demo_colonists)
        .run();
}
