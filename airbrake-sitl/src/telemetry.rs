use std::{
    fs::File,
    io::{self, Write},
    path::Path,
};

use airbrake_guidance_core::{TelemetryRecord, TelemetrySink};
use anyhow::{Context, Result};
use csv::Writer;
use log::error;

/// One CSV row per guidance cycle, header taken from the record fields.
pub struct CsvTelemetrySink<W: Write> {
    writer: Writer<W>,
    records: usize,
    failed: bool,
}

impl CsvTelemetrySink<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let writer = Writer::from_path(path)
            .with_context(|| format!("failed to create telemetry file {}", path.display()))?;
        Ok(Self::from_csv_writer(writer))
    }
}

impl<W: Write> CsvTelemetrySink<W> {
    pub fn new(inner: W) -> Self {
        Self::from_csv_writer(Writer::from_writer(inner))
    }

    fn from_csv_writer(writer: Writer<W>) -> Self {
        Self {
            writer,
            records: 0,
            failed: false,
        }
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush telemetry: {}", e.error()))
    }
}

impl<W: Write> TelemetrySink for CsvTelemetrySink<W> {
    fn record(&mut self, record: &TelemetryRecord) {
        match self.writer.serialize(record) {
            Ok(()) => self.records += 1,
            Err(e) => {
                // the flight goes on without telemetry
                if !self.failed {
                    error!("telemetry write failed: {}", e);
                }
                self.failed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use airbrake_guidance_core::FlightPhase;

    use super::*;

    fn record(time_us: u64, predicted_apogee: Option<f32>) -> TelemetryRecord {
        TelemetryRecord {
            time_us,
            altitude: 12.5,
            vertical_velocity: 3.0,
            vertical_acceleration: -9.8,
            accel_bias: 0.01,
            altitude_variance: 0.2,
            velocity_variance: 0.1,
            phase: FlightPhase::Coast,
            commanded_extension: 0.25,
            commanded_angle_deg: -2.5,
            predicted_apogee,
            applied_measurements: 4,
            degraded: false,
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let mut sink = CsvTelemetrySink::new(Vec::new());
        sink.record(&record(100_000, Some(2800.0)));
        sink.record(&record(200_000, None));
        assert_eq!(sink.records(), 2);

        let csv = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("time_us,altitude,vertical_velocity"));
        assert!(lines[0].ends_with("predicted_apogee,applied_measurements,degraded"));
        assert!(lines[1].starts_with("100000,12.5,3.0"));
        assert!(lines[1].contains("Coast"));
        assert!(lines[2].contains(",,4,false"));
    }
}
