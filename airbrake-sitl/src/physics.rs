use std::{cell::Cell, rc::Rc};

use airbrake_guidance_core::{RocketParameters, STANDARD_GRAVITY, approximate_air_density};
use log::info;

use crate::config::MotorConfig;

/// What the simulated world looks like right now, read by the simulated sensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Truth {
    pub time_us: u64,
    /// m AGL
    pub altitude: f32,
    /// m/s, up
    pub vertical_velocity: f32,
    /// m/s^2, kinematic
    pub vertical_acceleration: f32,
    pub launch_site_altitude_asl: f32,
}

impl Truth {
    pub fn at_rest(launch_site_altitude_asl: f32) -> Self {
        Self {
            time_us: 0,
            altitude: 0.0,
            vertical_velocity: 0.0,
            vertical_acceleration: 0.0,
            launch_site_altitude_asl,
        }
    }

    pub fn altitude_asl(&self) -> f32 {
        self.altitude + self.launch_site_altitude_asl
    }

    /// What an ideal accelerometer on the vertical axis reads.
    pub fn specific_force(&self) -> f32 {
        self.vertical_acceleration + STANDARD_GRAVITY
    }
}

pub type SharedTruth = Rc<Cell<Truth>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Apogee {
    pub time_us: u64,
    /// m AGL
    pub altitude: f32,
}

/// Vertical point mass on a rail: pad hold, constant thrust burn, coast with
/// quadratic drag whose cd follows the actual airbrake position.
pub struct SimulatedRocket {
    rocket: RocketParameters,
    motor: MotorConfig,
    ignition_us: u64,
    state: Truth,
    apogee: Option<Apogee>,
    landed: bool,
}

impl SimulatedRocket {
    pub fn new(
        rocket: RocketParameters,
        motor: MotorConfig,
        launch_site_altitude_asl: f32,
        ignition_us: u64,
    ) -> Self {
        Self {
            rocket,
            motor,
            ignition_us,
            state: Truth::at_rest(launch_site_altitude_asl),
            apogee: None,
            landed: false,
        }
    }

    pub fn truth(&self) -> Truth {
        self.state
    }

    pub fn apogee(&self) -> Option<Apogee> {
        self.apogee
    }

    pub fn landed(&self) -> bool {
        self.landed
    }

    fn burn_time_s(&self, time_us: u64) -> Option<f32> {
        (time_us >= self.ignition_us).then(|| (time_us - self.ignition_us) as f32 / 1e6)
    }

    fn mass(&self, since_ignition: f32) -> f32 {
        let burnt = (since_ignition / self.motor.burn_time).clamp(0.0, 1.0);
        self.rocket.burnout_mass + self.motor.propellant_mass * (1.0 - burnt)
    }

    /// Advances by `dt_us` with the airbrakes at `extension`.
    pub fn step(&mut self, dt_us: u64, extension: f32) {
        let dt = dt_us as f32 / 1e6;
        let next_time_us = self.state.time_us + dt_us;

        let Some(since_ignition) = self.burn_time_s(self.state.time_us) else {
            self.state.time_us = next_time_us;
            return;
        };
        if self.landed {
            self.state.time_us = next_time_us;
            self.state.vertical_acceleration = 0.0;
            return;
        }

        let thrust = if since_ignition < self.motor.burn_time {
            self.motor.thrust
        } else {
            0.0
        };
        let velocity = self.state.vertical_velocity;
        let air_density = approximate_air_density(self.state.altitude_asl());
        let drag = 0.5
            * air_density
            * velocity
            * velocity.abs()
            * self.rocket.cd_at_extension(extension)
            * self.rocket.reference_area;
        let mut acceleration = (thrust - drag) / self.mass(since_ignition) - STANDARD_GRAVITY;

        // the rail holds the rocket until thrust beats weight
        if self.state.altitude <= 0.0 && velocity <= 0.0 && acceleration < 0.0 {
            acceleration = 0.0;
        }

        // semi-implicit euler
        let next_velocity = velocity + acceleration * dt;
        let next_altitude = self.state.altitude + next_velocity * dt;

        if self.apogee.is_none() && velocity > 0.0 && next_velocity <= 0.0 {
            info!(
                "true apogee {:.1} m AGL at {:.2} s",
                self.state.altitude,
                self.state.time_us as f32 / 1e6
            );
            self.apogee = Some(Apogee {
                time_us: self.state.time_us,
                altitude: self.state.altitude,
            });
        }

        self.state = Truth {
            time_us: next_time_us,
            altitude: next_altitude,
            vertical_velocity: next_velocity,
            vertical_acceleration: acceleration,
            launch_site_altitude_asl: self.state.launch_site_altitude_asl,
        };

        if self.apogee.is_some() && next_altitude <= 0.0 {
            info!("touchdown at {:.2} s", next_time_us as f32 / 1e6);
            self.landed = true;
            self.state.altitude = 0.0;
            self.state.vertical_velocity = 0.0;
            self.state.vertical_acceleration = 0.0;
        }
    }
}
