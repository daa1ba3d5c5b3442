//! The serialisable outcome of a session.

use crate::bench::{BenchResult, Direction, SweepResult};
use crate::config::SessionConfig;
use crate::control::{DeviceInfo, RegionInfo};
use crate::inspect::Inspection;
use log::info;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Everything a session measured and observed.
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    /// RFC 3339 timestamp of the run
    pub date: String,
    /// Configuration the session ran with
    pub config: SessionConfig,
    /// Device metadata
    pub device_info: DeviceInfo,
    /// Metadata of the mapped region
    pub region: RegionInfo,
    /// Length of the mapped window
    pub window_len: usize,
    /// Fixed-iteration benchmark results
    pub benchmarks: Vec<BenchResult>,
    /// Block-size sweep, if configured
    pub sweep: Option<SweepResult>,
    /// Probe dumps
    pub inspections: Vec<Inspection>,
}

impl SessionReport {
    pub(crate) fn new(
        config: SessionConfig,
        device_info: DeviceInfo,
        region: RegionInfo,
        window_len: usize,
    ) -> Self {
        SessionReport {
            date: chrono::Local::now().to_rfc3339(),
            config,
            device_info,
            region,
            window_len,
            benchmarks: vec![],
            sweep: None,
            inspections: vec![],
        }
    }

    /// Writes the report as pretty-printed JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, filename: P) -> std::io::Result<()> {
        let file = File::create(filename.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Results saved to {:?}", filename.as_ref());
        Ok(())
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device {}: {}", self.config.device, self.device_info)?;
        writeln!(f, "{}", self.region)?;
        writeln!(f, "Mapped window: 0x{:x} bytes", self.window_len)?;
        for result in &self.benchmarks {
            writeln!(f, "{}", result)?;
        }
        if let Some(sweep) = &self.sweep {
            writeln!(f, "Block size sweep:")?;
            for result in &sweep.results {
                writeln!(f, "  {}", result)?;
            }
            for direction in [Direction::DeviceToHost, Direction::HostToDevice] {
                if let Some(best) = sweep.best(direction) {
                    writeln!(
                        f,
                        "  Best {}: {:.2} MiB/s at {} B",
                        direction,
                        best.bandwidth_mib_s(),
                        best.block_size
                    )?;
                }
            }
        }
        for inspection in &self.inspections {
            write!(f, "{}", inspection)?;
        }
        Ok(())
    }
}
