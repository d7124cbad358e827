use std::{cell::Cell, io::Write, rc::Rc};

use airbrake_guidance_core::{
    Alert, BiasPolicy, Collaborators, CycleTimer, FlightComputer, FlightPhase, PhaseTransition,
    RegistryFull, SensorError,
};
use anyhow::{Result, anyhow};
use log::{info, warn};

use crate::{
    actuator::RateLimitedActuator,
    config::SitlConfig,
    indicator::Buzzer,
    physics::{SimulatedRocket, Truth},
    sensors::{SimulatedAhrs, SimulatedBarometer, SimulatedGnss, SimulatedImu},
    telemetry::CsvTelemetrySink,
};

#[derive(Debug, Clone)]
pub struct FlightSummary {
    pub target_apogee: f32,
    /// m AGL, true apogee of the simulated rocket
    pub apogee: Option<f32>,
    pub transitions: Vec<PhaseTransition>,
    pub final_phase: FlightPhase,
    pub max_extension: f32,
    pub cycles: u32,
    pub overruns: u32,
    pub telemetry_records: usize,
    pub alerts: Vec<Alert>,
    pub beeps: u32,
}

impl FlightSummary {
    pub fn reached(&self, phase: FlightPhase) -> bool {
        self.transitions.iter().any(|t| t.to == phase)
    }

    pub fn log(&self) {
        for transition in self.transitions.iter() {
            info!(
                "{:>8.2} s  {} -> {}",
                transition.time_us as f32 / 1e6,
                transition.from.label(),
                transition.to.label()
            );
        }
        match self.apogee {
            Some(apogee) => info!(
                "apogee {:.1} m AGL, target {:.1} m, error {:+.1} m",
                apogee,
                self.target_apogee,
                apogee - self.target_apogee
            ),
            None => warn!("simulation ended before apogee"),
        }
        info!(
            "{} cycles ({} late), {} telemetry records, max extension {:.2}, final phase {}",
            self.cycles,
            self.overruns,
            self.telemetry_records,
            self.max_extension,
            self.final_phase.label()
        );
    }
}

/// Flies one simulated launch against the guidance core on a simulated
/// microsecond clock.
pub fn run<W: Write>(
    config: &SitlConfig,
    telemetry: &mut CsvTelemetrySink<W>,
) -> Result<FlightSummary> {
    let guidance = &config.guidance;
    let sim = &config.simulation;
    let noise = &config.sensors;
    let seed = sim.seed;
    let site = guidance.launch_site_altitude_asl;

    let truth = Rc::new(Cell::new(Truth::at_rest(site)));
    let mut rocket = SimulatedRocket::new(
        guidance.controller.rocket.clone(),
        config.motor.clone(),
        site,
        (sim.ignition_time_s * 1e6) as u64,
    );

    let mut baro1 = SimulatedBarometer::new("dps310", &truth, seed, noise.baro_noise, 0.0)?;
    let mut baro2 = SimulatedBarometer::new(
        "ms5611",
        &truth,
        seed + 1,
        noise.baro_noise,
        noise.secondary_baro_offset,
    )?;
    let mut ahrs = SimulatedAhrs::new("vn100", &truth, seed + 2, noise.attitude_noise)?;
    let mut imu = SimulatedImu::new(
        "bmi088",
        &truth,
        seed + 3,
        noise.accel_noise,
        noise.accel_bias,
        noise.gyro_noise,
    )?;
    if noise.imu_fails_init {
        imu = imu.failing(SensorError::NotResponding);
    }
    let mut gnss = SimulatedGnss::new(
        "max-m10s",
        &truth,
        seed + 4,
        noise.gnss_altitude_noise,
        noise.gnss_velocity_noise,
        (noise.gnss_fix_time_s * 1e6) as u64,
    )?;

    let mut fc = FlightComputer::new(guidance.clone());
    let registry_full = |e: RegistryFull| anyhow!("{}", e);
    fc.register_sensor(&mut baro1, BiasPolicy::CorrectOnPad)
        .map_err(registry_full)?;
    fc.register_sensor(&mut baro2, BiasPolicy::CorrectOnPad)
        .map_err(registry_full)?;
    // attitude before the IMU so body accelerations rotate with this cycle's attitude
    fc.register_sensor(&mut ahrs, BiasPolicy::Raw)
        .map_err(registry_full)?;
    fc.register_sensor(&mut imu, BiasPolicy::Raw)
        .map_err(registry_full)?;
    fc.register_sensor(&mut gnss, BiasPolicy::CorrectOnPad)
        .map_err(registry_full)?;

    let mut actuator = RateLimitedActuator::new(sim.actuator_rate);
    let mut buzzer = Buzzer::new();

    let init = fc.init(&mut Collaborators {
        actuator: &mut actuator,
        telemetry: &mut *telemetry,
        indicator: &mut buzzer,
    });
    info!(
        "{} sensors active, {} failed",
        init.active_sensors, init.failed_sensors
    );

    let mut timer = CycleTimer::new(guidance.cycle_period_us);
    let dt_us = sim.physics_dt_us.max(1);
    let dt = dt_us as f32 / 1e6;
    let max_time_us = (sim.max_time_s * 1e6) as u64;
    let stop_after_apogee_us = (sim.stop_after_apogee_s * 1e6) as u64;

    let mut transitions = Vec::new();
    let mut cycles = 0u32;
    let mut max_extension = 0.0f32;
    let mut now_us = 0u64;

    loop {
        truth.set(rocket.truth());
        buzzer.tick(now_us);

        if timer.poll(now_us) {
            let report = fc.step(
                now_us,
                &mut Collaborators {
                    actuator: &mut actuator,
                    telemetry: &mut *telemetry,
                    indicator: &mut buzzer,
                },
            );
            cycles += 1;
            max_extension = max_extension.max(report.command.extension);
            if let Some(transition) = report.transition {
                transitions.push(transition);
            }
        }

        if let Some(apogee) = rocket.apogee() {
            if now_us >= apogee.time_us + stop_after_apogee_us {
                break;
            }
        }
        if rocket.landed() {
            break;
        }
        if now_us >= max_time_us {
            warn!("simulation time limit reached at {} s", now_us as f32 / 1e6);
            break;
        }

        actuator.advance(dt);
        rocket.step(dt_us, actuator.position());
        now_us += dt_us;
    }

    // let the last pattern finish
    while !buzzer.is_idle() && now_us < max_time_us {
        now_us += dt_us;
        buzzer.tick(now_us);
    }
    telemetry.flush()?;

    Ok(FlightSummary {
        target_apogee: guidance.controller.target_apogee,
        apogee: rocket.apogee().map(|a| a.altitude),
        transitions,
        final_phase: fc.phase(),
        max_extension,
        cycles,
        overruns: timer.overruns(),
        telemetry_records: telemetry.records(),
        alerts: buzzer.alerts().to_vec(),
        beeps: buzzer.beeps(),
    })
}

#[cfg(test)]
mod tests {
    use airbrake_guidance_core::ControlMode;

    use super::*;
    use crate::tests::init_logger;

    fn fly(config: &SitlConfig) -> FlightSummary {
        init_logger();
        let mut sink = CsvTelemetrySink::new(Vec::new());
        let summary = run(config, &mut sink).unwrap();
        summary.log();
        summary
    }

    fn phases(summary: &FlightSummary) -> Vec<FlightPhase> {
        summary.transitions.iter().map(|t| t.to).collect()
    }

    #[test]
    fn guided_flight_lands_apogee_near_target() {
        let config = SitlConfig::default();
        let summary = fly(&config);

        assert_eq!(
            phases(&summary)[..3],
            [FlightPhase::Boost, FlightPhase::Coast, FlightPhase::Apogee]
        );
        assert!(summary.max_extension > 0.0);
        let apogee = summary.apogee.unwrap();
        assert!(
            (apogee - config.guidance.controller.target_apogee).abs() < 60.0,
            "apogee {}",
            apogee
        );

        assert_eq!(summary.telemetry_records, summary.cycles as usize);
        assert_eq!(summary.overruns, 0);
        assert_eq!(summary.alerts[0], Alert::InitSucceeded);
        assert!(!summary.alerts.contains(&Alert::EstimatorDegraded));
        assert!(summary.beeps >= 1);
    }

    #[test]
    fn retracted_flight_overshoots() {
        let mut config = SitlConfig::default();
        config.guidance.controller.mode = ControlMode::Retracted;
        let summary = fly(&config);

        assert!(summary.reached(FlightPhase::Coast));
        assert_eq!(summary.max_extension, 0.0);
        assert!(summary.apogee.unwrap() > config.guidance.controller.target_apogee + 100.0);
    }

    #[test]
    fn boost_detected_shortly_after_ignition() {
        let config = SitlConfig::default();
        let summary = fly(&config);

        let boost = summary
            .transitions
            .iter()
            .find(|t| t.to == FlightPhase::Boost)
            .unwrap();
        let ignition_us = (config.simulation.ignition_time_s * 1e6) as u64;
        assert!(boost.time_us > ignition_us);
        assert!(boost.time_us - ignition_us <= 300_000);
    }

    #[test]
    fn imu_failure_is_reported_and_flight_continues() {
        let mut config = SitlConfig::default();
        config.sensors.imu_fails_init = true;
        let summary = fly(&config);

        assert!(summary.alerts.contains(&Alert::InitFailed));
        assert!(
            summary
                .alerts
                .iter()
                .any(|a| matches!(a, Alert::SensorFault(_)))
        );
        assert!(summary.beeps >= 3);
        assert!(summary.apogee.is_some());
        assert_eq!(summary.telemetry_records, summary.cycles as usize);
    }
}
