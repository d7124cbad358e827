use crate::{
    controller::{ApogeePredictor, CoastState, RocketParameters},
    utils::{STANDARD_GRAVITY, approximate_air_density},
};

/// Integration step of the apogee prediction, seconds.
pub const DEFAULT_INTEGRATION_DT: f32 = 0.1;

/// Safety net on the prediction loop, 300 s of flight at the default step.
const MAX_STEPS: usize = 3000;

#[derive(Debug, Clone, Copy)]
struct Derivative {
    velocity: f32,
    acceleration: f32,
}

/// Ballistic 1-D coast with quadratic drag, integrated with RK2 (midpoint).
#[derive(Debug, Clone)]
pub struct BallisticPredictor {
    parameters: RocketParameters,
    launch_site_altitude_asl: f32,
    dt: f32,
}

impl BallisticPredictor {
    pub fn new(parameters: RocketParameters, launch_site_altitude_asl: f32, dt: f32) -> Self {
        Self {
            parameters,
            launch_site_altitude_asl,
            dt,
        }
    }

    pub fn parameters(&self) -> &RocketParameters {
        &self.parameters
    }

    fn derivatives(&self, cd: f32, altitude_agl: f32, velocity: f32) -> Derivative {
        let air_density = approximate_air_density(altitude_agl + self.launch_site_altitude_asl);
        let drag_force =
            0.5 * cd * air_density * velocity * velocity * self.parameters.reference_area;
        let drag_acceleration = drag_force / self.parameters.burnout_mass;
        // drag always opposes motion
        let drag_acceleration = if velocity >= 0.0 {
            -drag_acceleration
        } else {
            drag_acceleration
        };

        Derivative {
            velocity,
            acceleration: drag_acceleration - STANDARD_GRAVITY,
        }
    }

    /// Integrates until the vertical velocity crosses zero and returns the
    /// apogee altitude AGL.
    pub fn simulate_apogee_rk2(&self, state: &CoastState, extension: f32) -> f32 {
        // already descending or stationary
        if state.vertical_velocity <= 0.0 {
            return state.altitude;
        }

        let cd = self.parameters.cd_at_extension(extension);
        let dt = self.dt;
        let mut altitude = state.altitude;
        let mut velocity = state.vertical_velocity;

        for _ in 0..MAX_STEPS {
            let k1 = self.derivatives(cd, altitude, velocity);

            let mid_altitude = altitude + k1.velocity * (0.5 * dt);
            let mid_velocity = velocity + k1.acceleration * (0.5 * dt);
            let k2 = self.derivatives(cd, mid_altitude, mid_velocity);

            let next_altitude = altitude + k2.velocity * dt;
            let next_velocity = velocity + k2.acceleration * dt;

            if next_velocity <= 0.0 {
                // interpolate the velocity zero crossing inside the step
                let delta_v = next_velocity - velocity;
                if libm::fabsf(delta_v) < f32::EPSILON {
                    return next_altitude.max(altitude);
                }
                let t_zero = dt * (-velocity) / delta_v;
                return altitude + velocity * t_zero + 0.5 * (delta_v / dt) * t_zero * t_zero;
            }

            altitude = next_altitude;
            velocity = next_velocity;
        }

        log_warn!("apogee prediction did not converge, v={}", velocity);
        altitude
    }
}

impl ApogeePredictor for BallisticPredictor {
    fn predict_apogee(&self, state: &CoastState, extension: f32) -> f32 {
        self.simulate_apogee_rk2(state, extension)
    }

    fn set_launch_site_altitude(&mut self, altitude_asl: f32) {
        self.launch_site_altitude_asl = altitude_asl;
    }
}
