use airbrake_guidance_core::Actuator;
use log::warn;

/// Servo that slews toward the last command at a bounded rate.
#[derive(Debug, Clone)]
pub struct RateLimitedActuator {
    /// full extensions per second
    rate: f32,
    commanded: f32,
    position: f32,
}

impl RateLimitedActuator {
    pub fn new(rate: f32) -> Self {
        Self {
            rate,
            commanded: 0.0,
            position: 0.0,
        }
    }

    pub fn advance(&mut self, dt: f32) {
        let max_step = self.rate * dt;
        self.position += (self.commanded - self.position).clamp(-max_step, max_step);
    }

    pub fn position(&self) -> f32 {
        self.position
    }

}

impl Actuator for RateLimitedActuator {
    fn set_commanded_angle(&mut self, fraction: f32) {
        if !fraction.is_finite() {
            warn!("ignoring non-finite airbrake command, retracting");
            self.commanded = 0.0;
            return;
        }
        self.commanded = fraction.clamp(0.0, 1.0);
    }
}
