use serde::{Deserialize, Serialize};

use crate::{estimator::FusedState, utils::STANDARD_GRAVITY};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FlightPhase {
    Pad = 0,
    Boost = 1,
    Coast = 2,
    Apogee = 3,
    Descent = 4,
    Landed = 5,
}

pub const NUM_PHASES: usize = 6;

impl FlightPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Pad => "PAD",
            Self::Boost => "BOOST",
            Self::Coast => "COAST",
            Self::Apogee => "APOGEE",
            Self::Descent => "DESCENT",
            Self::Landed => "LANDED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// m/s^2, kinematic vertical acceleration
    pub liftoff_accel_threshold: f32,
    pub liftoff_debounce_us: u64,
    /// m/s^2, kinematic vertical acceleration
    pub burnout_accel_threshold: f32,
    pub burnout_debounce_us: u64,
    /// m/s, descent needs v < -deadband
    pub descent_velocity_deadband: f32,
    pub descent_debounce_us: u64,
    pub landing_velocity_threshold: f32,
    /// m AGL
    pub landing_altitude_threshold: f32,
    pub landing_debounce_us: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            liftoff_accel_threshold: 3.0 * STANDARD_GRAVITY,
            liftoff_debounce_us: 100_000,
            burnout_accel_threshold: 0.0,
            burnout_debounce_us: 100_000,
            descent_velocity_deadband: 1.0,
            descent_debounce_us: 0,
            landing_velocity_threshold: 1.0,
            landing_altitude_threshold: 100.0,
            landing_debounce_us: 2_000_000,
        }
    }
}

/// Slice of the fused state the phase logic looks at.
#[derive(Debug, Clone, Copy)]
pub struct PhaseInput {
    pub time_us: u64,
    /// m AGL
    pub altitude: f32,
    pub vertical_velocity: f32,
    pub vertical_acceleration: f32,
}

impl From<&FusedState> for PhaseInput {
    fn from(state: &FusedState) -> Self {
        Self {
            time_us: state.time_us,
            altitude: state.altitude,
            vertical_velocity: state.vertical_velocity,
            vertical_acceleration: state.vertical_acceleration,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionTrigger {
    LiftoffAcceleration,
    Burnout,
    VelocityApex,
    DescentConfirmed,
    LandingConfirmed,
    Override,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: FlightPhase,
    pub to: FlightPhase,
    pub time_us: u64,
    pub trigger: TransitionTrigger,
}

/// Forward-only flight phase tracker.
///
/// Every condition has to hold continuously for its debounce time before
/// the phase advances; a cycle where it does not hold restarts the timer.
pub struct PhaseStateMachine {
    config: PhaseConfig,
    phase: FlightPhase,
    phase_entered_us: u64,
    transition_times: [Option<u64>; NUM_PHASES],
    condition_since_us: Option<u64>,
}

impl Default for PhaseStateMachine {
    fn default() -> Self {
        Self::new(PhaseConfig::default())
    }
}

impl PhaseStateMachine {
    pub fn new(config: PhaseConfig) -> Self {
        let mut transition_times = [None; NUM_PHASES];
        transition_times[FlightPhase::Pad as usize] = Some(0);

        Self {
            config,
            phase: FlightPhase::Pad,
            phase_entered_us: 0,
            transition_times,
            condition_since_us: None,
        }
    }

    /// Returns the transition taken this cycle, if any.
    pub fn update(&mut self, input: &PhaseInput) -> Option<PhaseTransition> {
        let now = input.time_us;
        let next = match self.phase {
            FlightPhase::Pad => {
                let accelerating = input.vertical_acceleration > self.config.liftoff_accel_threshold;
                self.debounced(accelerating, now, self.config.liftoff_debounce_us)
                    .then_some((FlightPhase::Boost, TransitionTrigger::LiftoffAcceleration))
            }
            FlightPhase::Boost => {
                let burnt_out = input.vertical_acceleration < self.config.burnout_accel_threshold;
                self.debounced(burnt_out, now, self.config.burnout_debounce_us)
                    .then_some((FlightPhase::Coast, TransitionTrigger::Burnout))
            }
            FlightPhase::Coast => (input.vertical_velocity <= 0.0)
                .then_some((FlightPhase::Apogee, TransitionTrigger::VelocityApex)),
            FlightPhase::Apogee => {
                let descending = input.vertical_velocity < -self.config.descent_velocity_deadband;
                self.debounced(descending, now, self.config.descent_debounce_us)
                    .then_some((FlightPhase::Descent, TransitionTrigger::DescentConfirmed))
            }
            FlightPhase::Descent => {
                let still = libm::fabsf(input.vertical_velocity)
                    < self.config.landing_velocity_threshold
                    && input.altitude < self.config.landing_altitude_threshold;
                self.debounced(still, now, self.config.landing_debounce_us)
                    .then_some((FlightPhase::Landed, TransitionTrigger::LandingConfirmed))
            }
            FlightPhase::Landed => None,
        };

        next.map(|(to, trigger)| self.transition_to(to, now, trigger))
    }

    /// Forces a phase, the only way to move backwards.
    pub fn override_phase(&mut self, phase: FlightPhase, time_us: u64) -> PhaseTransition {
        log_warn!(
            "phase override {} -> {}",
            self.phase.label(),
            phase.label()
        );
        if phase < self.phase {
            for later in self.transition_times[(phase as usize + 1)..].iter_mut() {
                *later = None;
            }
        }
        self.transition_to(phase, time_us, TransitionTrigger::Override)
    }

    fn transition_to(
        &mut self,
        to: FlightPhase,
        time_us: u64,
        trigger: TransitionTrigger,
    ) -> PhaseTransition {
        let transition = PhaseTransition {
            from: self.phase,
            to,
            time_us,
            trigger,
        };
        self.phase = to;
        self.phase_entered_us = time_us;
        self.transition_times[to as usize] = Some(time_us);
        self.condition_since_us = None;
        transition
    }

    fn debounced(&mut self, condition: bool, now_us: u64, debounce_us: u64) -> bool {
        if !condition {
            self.condition_since_us = None;
            return false;
        }
        let since = *self.condition_since_us.get_or_insert(now_us);
        now_us.saturating_sub(since) >= debounce_us
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn phase_entered(&self) -> u64 {
        self.phase_entered_us
    }

    pub fn transition_time(&self, phase: FlightPhase) -> Option<u64> {
        self.transition_times[phase as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(time_ms: u64, altitude: f32, velocity: f32, acceleration: f32) -> PhaseInput {
        PhaseInput {
            time_us: time_ms * 1_000,
            altitude,
            vertical_velocity: velocity,
            vertical_acceleration: acceleration,
        }
    }

    #[test]
    fn liftoff_needs_sustained_acceleration() {
        let mut phases = PhaseStateMachine::default();
        let boost = 5.0 * STANDARD_GRAVITY;

        assert!(phases.update(&input(0, 0.0, 0.0, 0.0)).is_none());
        // single spike
        assert!(phases.update(&input(100, 0.0, 0.0, boost)).is_none());
        assert!(phases.update(&input(200, 0.0, 0.0, 0.0)).is_none());
        assert_eq!(phases.phase(), FlightPhase::Pad);

        assert!(phases.update(&input(300, 0.0, 0.0, boost)).is_none());
        let transition = phases.update(&input(400, 0.0, 0.0, boost)).unwrap();
        assert_eq!(transition.from, FlightPhase::Pad);
        assert_eq!(transition.to, FlightPhase::Boost);
        assert_eq!(transition.trigger, TransitionTrigger::LiftoffAcceleration);
        assert_eq!(phases.transition_time(FlightPhase::Boost), Some(400_000));
    }

    #[test]
    fn full_flight_sequence_fires_each_edge_once() {
        let mut phases = PhaseStateMachine::default();
        let mut transitions = std::vec::Vec::new();
        let mut last_phase = phases.phase();

        for i in 0..600u64 {
            let t = i as f32 * 0.1;
            let (h, v, a) = match t {
                t if t < 1.0 => (0.0, 0.0, 0.0),
                t if t < 4.0 => (100.0 * (t - 1.0), 50.0, 60.0),
                t if t < 15.0 => (500.0, 150.0 - 14.0 * (t - 4.0), -14.0),
                t if t < 40.0 => (500.0 - 5.0 * (t - 15.0), -5.0, 0.0),
                _ => (10.0, 0.0, 0.0),
            };
            if let Some(transition) = phases.update(&input(i * 100, h, v, a)) {
                transitions.push(transition);
            }
            assert!(phases.phase() >= last_phase);
            last_phase = phases.phase();
        }

        let sequence: std::vec::Vec<_> = transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            sequence,
            [
                FlightPhase::Boost,
                FlightPhase::Coast,
                FlightPhase::Apogee,
                FlightPhase::Descent,
                FlightPhase::Landed
            ]
        );
    }

    #[test]
    fn apogee_fires_once_at_first_non_positive_velocity() {
        let mut phases = PhaseStateMachine::default();
        phases.override_phase(FlightPhase::Coast, 0);

        let mut apogees = 0;
        for i in 0..200u64 {
            let v = 12.0 - i as f32 * 0.1;
            if let Some(transition) = phases.update(&input(i * 100, 1000.0, v, -9.8)) {
                if transition.to == FlightPhase::Apogee {
                    apogees += 1;
                    assert!(v <= 0.0);
                    assert!(v > -0.1 - 1e-3);
                }
            }
        }
        assert_eq!(apogees, 1);
    }

    #[test]
    fn satisfied_condition_does_not_refire() {
        let mut phases = PhaseStateMachine::new(PhaseConfig {
            liftoff_debounce_us: 0,
            ..Default::default()
        });
        assert!(phases.update(&input(1_000, 0.0, 0.0, 100.0)).is_some());
        for i in 1..=10 {
            assert!(phases.update(&input(1_000 + i * 100, 0.0, 0.0, 100.0)).is_none());
        }
        assert_eq!(phases.phase(), FlightPhase::Boost);
    }

    #[test]
    fn override_is_the_only_way_back() {
        let mut phases = PhaseStateMachine::default();
        phases.override_phase(FlightPhase::Descent, 100_000);
        for i in 2..7 {
            phases.update(&input(i * 100, 500.0, -10.0, 0.0));
        }
        assert_eq!(phases.phase(), FlightPhase::Descent);

        let back = phases.override_phase(FlightPhase::Pad, 1_000_000);
        assert_eq!(back.trigger, TransitionTrigger::Override);
        assert_eq!(back.from, FlightPhase::Descent);
        assert_eq!(phases.phase(), FlightPhase::Pad);
        assert_eq!(phases.transition_time(FlightPhase::Descent), None);
    }

    #[test]
    fn landing_needs_the_full_window() {
        let mut phases = PhaseStateMachine::default();
        phases.override_phase(FlightPhase::Descent, 0);
        let mut landed_at = None;
        for i in 1..=40u64 {
            if phases.update(&input(i * 100, 2.0, 0.1, 0.0)).is_some() {
                landed_at = Some(i * 100);
            }
        }
        assert_eq!(landed_at, Some(2_100));
    }
}
