use serde::{Deserialize, Serialize};

use crate::{
    adapter::AdapterConfig, bias::BiasWindowConfig, controller::ControllerConfig,
    estimator::FilterTuning, phase::PhaseConfig,
};

/// Everything the flight computer needs to know before power-on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    pub cycle_period_us: u64,
    /// m ASL, used until the barometer bias tells better
    pub launch_site_altitude_asl: f32,
    /// seeded cycles without a single fused measurement before the estimate
    /// is considered degraded; an unseeded filter gets the pad bias window
    /// on top
    pub degraded_after_cycles: u32,
    pub adapter: AdapterConfig,
    pub bias: BiasWindowConfig,
    pub filter: FilterTuning,
    pub phase: PhaseConfig,
    pub controller: ControllerConfig,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            cycle_period_us: 100_000,
            launch_site_altitude_asl: 0.0,
            degraded_after_cycles: 10,
            adapter: AdapterConfig::default(),
            bias: BiasWindowConfig::default(),
            filter: FilterTuning::default(),
            phase: PhaseConfig::default(),
            controller: ControllerConfig::default(),
        }
    }
}

impl GuidanceConfig {
    pub fn cycle_period_s(&self) -> f32 {
        self.cycle_period_us as f32 / 1e6
    }
}
