use heapless::Vec;
use serde::Serialize;

use crate::{
    adapter::{BiasPolicy, MAX_MEASUREMENTS, MeasurementAdapter, RegistryFull},
    bias::BiasCorrector,
    config::GuidanceConfig,
    controller::{AirbrakeCommand, AirbrakeController},
    estimator::{FusedState, FusionFilter},
    measurement::{Measurement, QuantityKind, SensorId},
    phase::{FlightPhase, PhaseInput, PhaseStateMachine, PhaseTransition},
    sensor::{Sensor, SensorKind},
};

/// Airbrake servo or whatever moves the brakes.
pub trait Actuator {
    /// 0.0 fully retracted - 1.0 fully deployed
    fn set_commanded_angle(&mut self, fraction: f32);
}

pub trait TelemetrySink {
    fn record(&mut self, record: &TelemetryRecord);
}

/// Buzzer, LED, radio beacon...
pub trait StatusIndicator {
    fn alert(&mut self, alert: Alert);
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    InitSucceeded,
    InitFailed,
    SensorFault(SensorId),
    PhaseChanged(FlightPhase),
    EstimatorDegraded,
}

/// Handles owned by the application root, lent to the flight computer
/// for the duration of one call.
pub struct Collaborators<'c> {
    pub actuator: &'c mut dyn Actuator,
    pub telemetry: &'c mut dyn TelemetrySink,
    pub indicator: &'c mut dyn StatusIndicator,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub time_us: u64,
    pub altitude: f32,
    pub vertical_velocity: f32,
    pub vertical_acceleration: f32,
    pub accel_bias: f32,
    pub altitude_variance: f32,
    pub velocity_variance: f32,
    pub phase: FlightPhase,
    pub commanded_extension: f32,
    pub commanded_angle_deg: f32,
    pub predicted_apogee: Option<f32>,
    pub applied_measurements: u8,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitReport {
    pub active_sensors: usize,
    pub failed_sensors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub transition: Option<PhaseTransition>,
    pub command: AirbrakeCommand,
    pub applied_measurements: usize,
    pub degraded: bool,
}

/// One guidance cycle: acquire, correct, fuse, classify, command, record.
pub struct FlightComputer<'a> {
    config: GuidanceConfig,
    adapter: MeasurementAdapter<'a>,
    bias: BiasCorrector,
    filter: FusionFilter,
    phases: PhaseStateMachine,
    controller: AirbrakeController,
    measurements: Vec<Measurement, MAX_MEASUREMENTS>,
    starved_cycles: u32,
    degraded: bool,
}

impl<'a> FlightComputer<'a> {
    pub fn new(config: GuidanceConfig) -> Self {
        Self {
            adapter: MeasurementAdapter::new(config.adapter.clone()),
            bias: BiasCorrector::new(&config.bias),
            filter: FusionFilter::new(
                &config.filter,
                config.cycle_period_s(),
                config.launch_site_altitude_asl,
            ),
            phases: PhaseStateMachine::new(config.phase.clone()),
            controller: AirbrakeController::new(
                config.controller.clone(),
                config.launch_site_altitude_asl,
            ),
            measurements: Vec::new(),
            starved_cycles: 0,
            degraded: false,
            config,
        }
    }

    /// Sensors are fused in registration order.
    pub fn register_sensor(
        &mut self,
        sensor: &'a mut dyn Sensor,
        bias_policy: BiasPolicy,
    ) -> Result<SensorId, RegistryFull> {
        self.adapter.register(sensor, bias_policy)
    }

    pub fn init(&mut self, io: &mut Collaborators<'_>) -> InitReport {
        let faults = self.adapter.init_all();
        for fault in faults.iter() {
            io.indicator.alert(Alert::SensorFault(fault.sensor()));
        }

        for sensor in self.adapter.pad_corrected_sensors() {
            self.bias.enable(sensor);
        }

        let report = InitReport {
            active_sensors: self.adapter.active_count(),
            failed_sensors: faults.len(),
        };

        if report.active_sensors == 0 {
            log_error!("State Failed to Initialize: no sensor available");
            self.degraded = true;
            io.indicator.alert(Alert::InitFailed);
        } else if report.failed_sensors > 0 {
            log_warn!(
                "State Failed to Initialize: {} of {} sensors failed",
                report.failed_sensors,
                self.adapter.registered_count()
            );
            io.indicator.alert(Alert::InitFailed);
        } else {
            log_info!("initialized {} sensors", report.active_sensors);
            io.indicator.alert(Alert::InitSucceeded);
        }

        io.actuator.set_commanded_angle(0.0);
        report
    }

    pub fn step(&mut self, now_us: u64, io: &mut Collaborators<'_>) -> CycleReport {
        self.measurements.clear();
        let faults = self.adapter.acquire(now_us, &mut self.measurements);
        for fault in faults.iter() {
            io.indicator.alert(Alert::SensorFault(fault.sensor()));
        }

        for measurement in self.measurements.iter_mut() {
            *measurement = self.bias.correct(measurement);
        }

        self.filter.predict(now_us);
        let launch_site = self.launch_site_altitude();
        self.filter.set_launch_site_altitude(launch_site);
        let mut applied = 0;
        for measurement in self.measurements.iter() {
            if self.filter.correct(measurement, &self.bias).applied() {
                applied += 1;
            }
        }
        self.track_health(applied, io);

        let state = self.filter.state();
        let transition = self.phases.update(&PhaseInput::from(&state));
        if let Some(transition) = &transition {
            self.on_transition(transition, io);
        }

        let command = if self.degraded {
            self.controller.retract(now_us)
        } else {
            self.controller.update(self.phases.phase(), &state)
        };
        io.actuator.set_commanded_angle(command.extension);

        io.telemetry.record(&self.telemetry_record(&state, &command, applied));

        CycleReport {
            transition,
            command,
            applied_measurements: applied,
            degraded: self.degraded,
        }
    }

    /// Forces a phase and runs its edge side effects.
    pub fn override_phase(
        &mut self,
        phase: FlightPhase,
        now_us: u64,
        io: &mut Collaborators<'_>,
    ) -> PhaseTransition {
        let transition = self.phases.override_phase(phase, now_us);
        self.on_transition(&transition, io);
        transition
    }

    fn on_transition(&mut self, transition: &PhaseTransition, io: &mut Collaborators<'_>) {
        log_info!(
            "{} -> {} at {} us ({:?})",
            transition.from.label(),
            transition.to.label(),
            transition.time_us,
            transition.trigger
        );
        io.indicator.alert(Alert::PhaseChanged(transition.to));

        if transition.from < FlightPhase::Boost && transition.to >= FlightPhase::Boost {
            self.set_pad_bias_correction(false);
        } else if transition.from > FlightPhase::Pad && transition.to == FlightPhase::Pad {
            self.set_pad_bias_correction(true);
        }

        if transition.to == FlightPhase::Coast {
            let launch_site = self.launch_site_altitude();
            self.controller.activate(launch_site);
        } else {
            self.controller.deactivate();
        }
    }

    fn set_pad_bias_correction(&mut self, enabled: bool) {
        for sensor in self.adapter.pad_corrected_sensors() {
            if enabled {
                self.bias.enable(sensor);
            } else {
                self.bias.disable(sensor);
            }
            self.adapter.set_bias_correction_mode(sensor, enabled);
        }
    }

    fn track_health(&mut self, applied: usize, io: &mut Collaborators<'_>) {
        if self.adapter.active_count() == 0 {
            return;
        }

        if !self.filter.is_seeded() {
            // pad bias windows hold altitude back until they form
            let bias = &self.config.bias;
            let grace = (bias.ignore_samples + bias.average_samples) as u32;
            self.starved_cycles = self.starved_cycles.saturating_add(1);
            if !self.degraded
                && self.starved_cycles >= grace.saturating_add(self.config.degraded_after_cycles)
            {
                log_warn!(
                    "no altitude fused after {} cycles, estimate degraded",
                    self.starved_cycles
                );
                self.degrade(io);
            }
            return;
        }

        if applied > 0 {
            if self.degraded {
                log_info!("estimator recovered after {} cycles", self.starved_cycles);
            }
            self.starved_cycles = 0;
            self.degraded = false;
            return;
        }

        self.starved_cycles = self.starved_cycles.saturating_add(1);
        if !self.degraded && self.starved_cycles >= self.config.degraded_after_cycles {
            log_warn!(
                "no measurement fused for {} cycles, estimate degraded",
                self.starved_cycles
            );
            self.degrade(io);
        }
    }

    fn degrade(&mut self, io: &mut Collaborators<'_>) {
        self.degraded = true;
        io.indicator.alert(Alert::EstimatorDegraded);
    }

    fn telemetry_record(
        &self,
        state: &FusedState,
        command: &AirbrakeCommand,
        applied: usize,
    ) -> TelemetryRecord {
        TelemetryRecord {
            time_us: state.time_us,
            altitude: state.altitude,
            vertical_velocity: state.vertical_velocity,
            vertical_acceleration: state.vertical_acceleration,
            accel_bias: state.accel_bias,
            altitude_variance: state.altitude_variance(),
            velocity_variance: state.velocity_variance(),
            phase: self.phases.phase(),
            commanded_extension: command.extension,
            commanded_angle_deg: command.angle_deg,
            predicted_apogee: self.controller.last_prediction().map(|p| p.retracted),
            applied_measurements: applied.min(u8::MAX as usize) as u8,
            degraded: self.degraded,
        }
    }

    /// Pad altitude ASL from the first barometer's bias estimate, falling
    /// back to the configured value.
    pub fn launch_site_altitude(&self) -> f32 {
        self.adapter
            .first_of_kind(SensorKind::Barometer)
            .and_then(|sensor| self.bias.estimate(sensor, QuantityKind::PressureAltitude))
            .map(|offset| offset.x)
            .unwrap_or(self.config.launch_site_altitude_asl)
    }

    pub fn phase(&self) -> FlightPhase {
        self.phases.phase()
    }

    pub fn transition_time(&self, phase: FlightPhase) -> Option<u64> {
        self.phases.transition_time(phase)
    }

    pub fn fused_state(&self) -> FusedState {
        self.filter.state()
    }

    pub fn last_command(&self) -> &AirbrakeCommand {
        self.controller.last_command()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn bias_corrector(&self) -> &BiasCorrector {
        &self.bias
    }

    pub fn config(&self) -> &GuidanceConfig {
        &self.config
    }
}
