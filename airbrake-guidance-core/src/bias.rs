use heapless::{Deque, Vec};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{
    adapter::MAX_SENSORS,
    measurement::{Measurement, QuantityKind, SensorId},
    welford::Welford,
};

/// Upper bound for both the delay line and the averaging window.
pub const BIAS_WINDOW_CAPACITY: usize = 64;
pub const MAX_BIAS_CHANNELS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasWindowConfig {
    /// samples discarded after enabling, also the length of the rolling delay line
    pub ignore_samples: usize,
    /// samples averaged into the estimate
    pub average_samples: usize,
}

impl Default for BiasWindowConfig {
    fn default() -> Self {
        Self {
            ignore_samples: 10,
            average_samples: 20,
        }
    }
}

impl BiasWindowConfig {
    fn clamped(&self) -> Self {
        Self {
            ignore_samples: self.ignore_samples.min(BIAS_WINDOW_CAPACITY - 1),
            average_samples: self.average_samples.clamp(1, BIAS_WINDOW_CAPACITY),
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasState {
    Disabled,
    Settling { remaining: usize },
    Averaging,
    Rolling,
}

/// Offset estimate for one quantity of one sensor.
#[derive(Debug, Clone)]
pub struct BiasEstimate {
    sensor: SensorId,
    kind: QuantityKind,
    enabled: bool,
    state: BiasState,
    offset: Option<Vector3<f32>>,
    sample_count: u32,
    initial: Welford<3>,
    delay_line: Deque<Vector3<f32>, BIAS_WINDOW_CAPACITY>,
    window: Deque<Vector3<f32>, BIAS_WINDOW_CAPACITY>,
}

impl BiasEstimate {
    fn new(sensor: SensorId, kind: QuantityKind, config: &BiasWindowConfig) -> Self {
        let mut estimate = Self {
            sensor,
            kind,
            enabled: false,
            state: BiasState::Disabled,
            offset: None,
            sample_count: 0,
            initial: Welford::new(),
            delay_line: Deque::new(),
            window: Deque::new(),
        };
        estimate.enable(config);
        estimate
    }

    fn enable(&mut self, config: &BiasWindowConfig) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.state = if self.offset.is_some() {
            BiasState::Rolling
        } else {
            settling(config)
        };
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.state = BiasState::Disabled;
    }

    fn reset(&mut self, config: &BiasWindowConfig) {
        self.offset = None;
        self.sample_count = 0;
        self.initial.reset();
        self.delay_line.clear();
        self.window.clear();
        self.state = if self.enabled {
            settling(config)
        } else {
            BiasState::Disabled
        };
    }

    fn accumulate(&mut self, raw: Vector3<f32>, config: &BiasWindowConfig) {
        self.sample_count = self.sample_count.saturating_add(1);
        match self.state {
            BiasState::Disabled => {}
            BiasState::Settling { remaining } => {
                self.state = if remaining <= 1 {
                    BiasState::Averaging
                } else {
                    BiasState::Settling {
                        remaining: remaining - 1,
                    }
                };
            }
            BiasState::Averaging => {
                self.initial.update(&raw);
                let _ = self.window.push_back(raw);
                if self.initial.count() as usize >= config.average_samples {
                    let offset = self.initial.mean();
                    log_info!(
                        "bias formed for sensor {}: [{}, {}, {}], noise {}",
                        self.sensor.0,
                        offset.x,
                        offset.y,
                        offset.z,
                        libm::sqrtf(self.initial.variance_magnitude().unwrap_or(0.0))
                    );
                    self.offset = Some(offset);
                    self.state = BiasState::Rolling;
                }
            }
            BiasState::Rolling => {
                let _ = self.delay_line.push_back(raw);
                while self.delay_line.len() > config.ignore_samples {
                    let Some(released) = self.delay_line.pop_front() else {
                        break;
                    };
                    if self.window.len() >= config.average_samples {
                        self.window.pop_front();
                    }
                    let _ = self.window.push_back(released);
                }
                if !self.window.is_empty() {
                    let sum = self
                        .window
                        .iter()
                        .fold(Vector3::zeros(), |acc, sample| acc + sample);
                    self.offset = Some(sum / self.window.len() as f32);
                }
            }
        }
    }

    fn correct(&mut self, measurement: &Measurement, config: &BiasWindowConfig) -> Measurement {
        let mut corrected = *measurement;
        if !measurement.valid || !self.enabled {
            return corrected;
        }
        let Some(raw) = measurement.quantity.components() else {
            return corrected;
        };

        self.accumulate(raw, config);

        let offset = self.offset.unwrap_or_else(Vector3::zeros);
        corrected.quantity = measurement.quantity.offset_by(&offset);
        if self.state == BiasState::Rolling {
            corrected.bias_corrected = true;
        } else {
            corrected.valid = false;
        }
        corrected
    }

    pub fn sensor(&self) -> SensorId {
        self.sensor
    }

    pub fn kind(&self) -> QuantityKind {
        self.kind
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> BiasState {
        self.state
    }

    pub fn offset(&self) -> Option<Vector3<f32>> {
        self.offset
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }
}

fn settling(config: &BiasWindowConfig) -> BiasState {
    if config.ignore_samples == 0 {
        BiasState::Averaging
    } else {
        BiasState::Settling {
            remaining: config.ignore_samples,
        }
    }
}

/// Learns and removes constant sensor offsets while the rocket sits on the pad.
///
/// Estimates are kept per sensor and quantity. Once disabled, the last
/// estimate stays available through [`BiasCorrector::frozen_offset`].
#[derive(Debug, Clone)]
pub struct BiasCorrector {
    config: BiasWindowConfig,
    enabled_sensors: Vec<SensorId, MAX_SENSORS>,
    channels: Vec<BiasEstimate, MAX_BIAS_CHANNELS>,
}

impl BiasCorrector {
    pub fn new(config: &BiasWindowConfig) -> Self {
        Self {
            config: config.clamped(),
            enabled_sensors: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn enable(&mut self, sensor: SensorId) {
        if !self.enabled_sensors.contains(&sensor) && self.enabled_sensors.push(sensor).is_err() {
            log_warn!("bias corrector full, sensor {} stays raw", sensor.0);
            return;
        }
        for channel in self.channels.iter_mut().filter(|c| c.sensor == sensor) {
            channel.enable(&self.config);
        }
        log_debug!("bias correction enabled for sensor {}", sensor.0);
    }

    pub fn disable(&mut self, sensor: SensorId) {
        self.enabled_sensors.retain(|s| *s != sensor);
        for channel in self.channels.iter_mut().filter(|c| c.sensor == sensor) {
            channel.disable();
        }
        log_debug!("bias correction disabled for sensor {}", sensor.0);
    }

    /// Forgets the estimate, the next enable has to settle again.
    pub fn reset(&mut self, sensor: SensorId) {
        for channel in self.channels.iter_mut().filter(|c| c.sensor == sensor) {
            channel.reset(&self.config);
        }
    }

    pub fn is_enabled(&self, sensor: SensorId) -> bool {
        self.enabled_sensors.contains(&sensor)
    }

    pub fn correct(&mut self, measurement: &Measurement) -> Measurement {
        let kind = measurement.quantity.kind();
        if let Some(channel) = self
            .channels
            .iter_mut()
            .find(|c| c.sensor == measurement.sensor && c.kind == kind)
        {
            return channel.correct(measurement, &self.config);
        }

        if !self.is_enabled(measurement.sensor) || measurement.quantity.components().is_none() {
            return *measurement;
        }

        let channel = BiasEstimate::new(measurement.sensor, kind, &self.config);
        match self.channels.push(channel) {
            Ok(()) => match self.channels.last_mut() {
                Some(channel) => channel.correct(measurement, &self.config),
                None => *measurement,
            },
            Err(_) => {
                log_warn!("no bias channel left for sensor {}", measurement.sensor.0);
                *measurement
            }
        }
    }

    /// Current estimate, formed or not yet.
    pub fn estimate(&self, sensor: SensorId, kind: QuantityKind) -> Option<Vector3<f32>> {
        self.channel(sensor, kind).and_then(|c| c.offset)
    }

    /// Estimate left behind by a sensor whose correction has been switched off.
    pub fn frozen_offset(&self, sensor: SensorId, kind: QuantityKind) -> Option<Vector3<f32>> {
        self.channel(sensor, kind)
            .filter(|c| !c.enabled)
            .and_then(|c| c.offset)
    }

    pub fn channel(&self, sensor: SensorId, kind: QuantityKind) -> Option<&BiasEstimate> {
        self.channels
            .iter()
            .find(|c| c.sensor == sensor && c.kind == kind)
    }
}
