// only use std when feature = "std" is enabled or during testing
#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod fmt;

mod adapter;
mod bias;
mod config;
mod controller;
mod estimator;
mod flight_computer;
mod measurement;
mod phase;
mod sensor;
mod timer;
mod utils;
mod welford;

pub use adapter::{
    AdapterConfig, BiasPolicy, ChannelStatus, MAX_MEASUREMENTS, MAX_SENSORS, MeasurementAdapter,
    RegistryFull, SensorFault, pressure_altitude,
};
pub use bias::{BiasCorrector, BiasEstimate, BiasState, BiasWindowConfig};
pub use config::GuidanceConfig;
pub use controller::{
    AirbrakeCommand, AirbrakeController, ApogeePrediction, ApogeePredictor, BallisticPredictor,
    CoastState, ControlMode, ControllerConfig, RocketParameters,
};
pub use estimator::{FilterStatus, FilterTuning, FusedState, FusionFilter};
pub use flight_computer::{
    Actuator, Alert, Collaborators, CycleReport, FlightComputer, InitReport, StatusIndicator,
    TelemetryRecord, TelemetrySink,
};
pub use measurement::{Measurement, Quantity, QuantityKind, SensorId};
pub use phase::{
    FlightPhase, PhaseConfig, PhaseInput, PhaseStateMachine, PhaseTransition, TransitionTrigger,
};
pub use sensor::{Frame, MAX_VALUES_PER_SAMPLE, RawValue, Sensor, SensorError, SensorKind, SensorSample};
pub use timer::CycleTimer;
pub use utils::{STANDARD_GRAVITY, approximate_air_density, approximate_speed_of_sound, lerp};

#[cfg(test)]
mod tests;
