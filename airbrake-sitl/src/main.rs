use std::io;

use anyhow::Result;
use airbrake_guidance_core::FlightPhase;
use log::{LevelFilter, info, warn};

use crate::{config::SitlConfig, telemetry::CsvTelemetrySink};

mod actuator;
mod config;
mod indicator;
mod physics;
mod sensors;
mod sim;
mod telemetry;

#[cfg(test)]
mod tests;

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter(Some("airbrake_sitl"), LevelFilter::Info)
        .filter(Some("airbrake_guidance_core"), LevelFilter::Info)
        .parse_default_env()
        .try_init()?;

    let config = SitlConfig::load()?;

    let summary = match &config.output.telemetry_csv {
        Some(path) => {
            info!("writing telemetry to {}", path);
            let mut sink = CsvTelemetrySink::create(path)?;
            sim::run(&config, &mut sink)?
        }
        None => sim::run(&config, &mut CsvTelemetrySink::new(io::sink()))?,
    };

    summary.log();
    if !summary.reached(FlightPhase::Coast) {
        warn!("guidance never reached {}", FlightPhase::Coast.label());
    }
    Ok(())
}
