// src/config.rs - kernel tunables and balancing
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// All constants enumerated in the kernel spec's configuration section,
/// grouped the way `GameConfig` groups gameplay/combat/ai sub-tables.
#[derive(Resource, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KernelConfig {
    pub clock: ClockConfig,
    pub budgets: BudgetConfig,
    pub fsm: FsmConfig,
    pub pathing: PathingConfig,
    pub regions: RegionConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClockConfig {
    pub tick_rate: u32,
    pub frame_tick_catchup: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BudgetConfig {
    pub path_budget_ms: f32,
    pub ai_budget_ms: f32,
    pub rebuild_budget_ms: f32,
    pub region_cache_budget_ms: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FsmConfig {
    pub soft_lock_sec: f32,
    pub stuck_window_sec: f32,
    pub stuck_eps_world: f32,
    pub arrival_eps_world: f32,
    pub repath_goal_moved_tiles: f32,
    pub stagger_speed_mult: f32,
    pub stagger_duration_sec: f32,
    pub work_timeout_sec: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PathingConfig {
    pub path_max_expansions: u32,
    pub path_retry_backoff_base_sec: f32,
    pub path_retry_backoff_jitter_sec: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RegionConfig {
    pub region_chunk_tiles: u32,
    pub section_tiles: u32,
}

impl KernelConfig {
    /// Load from a RON file, falling back to defaults on missing/invalid
    /// content (mirrors `GameConfig::load`'s `serde_json` + `Default` path).
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => ron::from_str(&content)
                .map_err(|e| error!("Failed to parse kernel config {path}: {e}"))
                .unwrap_or_else(|_| Self::default()),
            Err(e) => {
                warn!("Failed to read kernel config {path}: {e}, using defaults");
                Self::default()
            }
        }
    }

    pub fn tick_dt(&self) -> f32 {
        1.0 / self.clock.tick_rate as f32
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig {
                tick_rate: 30,
                frame_tick_catchup: 5,
            },
            budgets: BudgetConfig {
                path_budget_ms: 2.0,
                ai_budget_ms: 3.0,
                rebuild_budget_ms: 1.0,
                region_cache_budget_ms: 0.5,
            },
            fsm: FsmConfig {
                soft_lock_sec: 0.4,
                stuck_window_sec: 0.75,
                stuck_eps_world: 4.0,
                arrival_eps_world: 4.0,
                repath_goal_moved_tiles: 1.5,
                stagger_speed_mult: 1.0 / 6.0,
                stagger_duration_sec: 0.5,
                work_timeout_sec: 15.0,
            },
            pathing: PathingConfig {
                path_max_expansions: 20_000,
                path_retry_backoff_base_sec: 1.0,
                path_retry_backoff_jitter_sec: 0.5,
            },
            regions: RegionConfig {
                region_chunk_tiles: 12,
                section_tiles: 8,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.clock.tick_rate, 30);
        assert_eq!(cfg.budgets.path_budget_ms, 2.0);
        assert_eq!(cfg.fsm.soft_lock_sec, 0.4);
        assert_eq!(cfg.pathing.path_max_expansions, 20_000);
        assert_eq!(cfg.regions.region_chunk_tiles, 12);
    }

    #[test]
    fn load_missing_file_falls_back_to_default() {
        let cfg = KernelConfig::load("/nonexistent/kernel_config_test.ron");
        assert_eq!(cfg, KernelConfig::default());
    }
}
