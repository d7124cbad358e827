use std::{cell::Cell, rc::Rc, vec::Vec};

#[cfg(feature = "log")]
use log::LevelFilter;

use crate::{
    Actuator, Alert, Collaborators, RawValue, Sensor, SensorError, SensorKind, SensorSample,
    StatusIndicator, TelemetryRecord, TelemetrySink,
};


pub fn init_logger() {
    #[cfg(feature = "log")]
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter(Some("airbrake_guidance_core"), LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

/// Standard atmosphere pressure (Pa) at an altitude ASL, troposphere only.
pub fn isa_pressure(altitude_asl: f32) -> f32 {
    101_325.0 * libm::powf(1.0 - 2.255_77e-5 * altitude_asl, 5.255_88)
}

/// Shared time source for scripted sensors, microseconds.
#[derive(Clone, Default)]
pub struct Clock(Rc<Cell<u64>>);

impl Clock {
    pub fn set(&self, now_us: u64) {
        self.0.set(now_us);
    }

    pub fn now(&self) -> u64 {
        self.0.get()
    }
}

/// Sensor whose output is a function of time in seconds.
/// `None` from the signal produces an invalid sample.
pub struct ScriptedSensor {
    kind: SensorKind,
    name: &'static str,
    clock: Clock,
    init_result: Result<(), SensorError>,
    signal: Box<dyn FnMut(f32) -> Option<RawValue>>,
    pub bias_modes: Vec<bool>,
}

impl ScriptedSensor {
    pub fn new(
        kind: SensorKind,
        name: &'static str,
        clock: &Clock,
        signal: impl FnMut(f32) -> Option<RawValue> + 'static,
    ) -> Self {
        Self {
            kind,
            name,
            clock: clock.clone(),
            init_result: Ok(()),
            signal: Box::new(signal),
            bias_modes: Vec::new(),
        }
    }

    pub fn failing(mut self, error: SensorError) -> Self {
        self.init_result = Err(error);
        self
    }
}

impl Sensor for ScriptedSensor {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self) -> Result<(), SensorError> {
        self.init_result
    }

    fn poll(&mut self) -> SensorSample {
        let now = self.clock.now();
        match (self.signal)(now as f32 / 1e6) {
            Some(value) => SensorSample::new(now).with(value),
            None => SensorSample::invalid(now),
        }
    }

    fn set_bias_correction_mode(&mut self, enabled: bool) {
        self.bias_modes.push(enabled);
    }
}

#[derive(Default)]
pub struct RecordingActuator(pub Vec<f32>);

impl Actuator for RecordingActuator {
    fn set_commanded_angle(&mut self, fraction: f32) {
        self.0.push(fraction);
    }
}

#[derive(Default)]
pub struct RecordingTelemetry(pub Vec<TelemetryRecord>);

impl TelemetrySink for RecordingTelemetry {
    fn record(&mut self, record: &TelemetryRecord) {
        self.0.push(record.clone());
    }
}

#[derive(Default)]
pub struct RecordingIndicator(pub Vec<Alert>);

impl StatusIndicator for RecordingIndicator {
    fn alert(&mut self, alert: Alert) {
        self.0.push(alert);
    }
}

#[derive(Default)]
pub struct Outputs {
    pub actuator: RecordingActuator,
    pub telemetry: RecordingTelemetry,
    pub indicator: RecordingIndicator,
}

impl Outputs {
    pub fn io(&mut self) -> Collaborators<'_> {
        Collaborators {
            actuator: &mut self.actuator,
            telemetry: &mut self.telemetry,
            indicator: &mut self.indicator,
        }
    }

    pub fn count(&self, alert: Alert) -> usize {
        self.indicator.0.iter().filter(|a| **a == alert).count()
    }
}
