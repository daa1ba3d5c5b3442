//! Command-line arguments.

use clap::Parser;
use serde::Serialize;
use std::num::ParseIntError;
use std::path::PathBuf;
use vfio_bench_core::util::{PciAddress, Size};
use vfio_bench_core::{IommuModel, SessionConfig};

fn parse_u64(s: &str) -> Result<u64, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// CLI arguments for the `vfio-bench` binary.
///
/// Every session parameter is optional here. Unset parameters keep the value from the
/// `--config` file, or the built-in default if there is no file.
#[derive(Debug, Parser, Serialize, Clone)]
#[clap(version, about = "Map a PCI BAR through VFIO and measure copy bandwidth")]
pub struct CliArgs {
    /// JSON configuration file.
    #[clap(long = "config")]
    pub config: Option<PathBuf>,
    /// VFIO container node.
    #[clap(long = "container")]
    pub container: Option<PathBuf>,
    /// VFIO group node. Looked up in sysfs if unset.
    #[clap(long = "group")]
    pub group: Option<PathBuf>,
    /// PCI address of the device, e.g. 0000:22:00.0.
    #[clap(long = "device", short = 'd')]
    pub device: Option<PciAddress>,
    /// Index of the region to map.
    #[clap(long = "region")]
    pub region: Option<u32>,
    /// Length of the mapped window, e.g. 0x5000 or 16K.
    #[clap(long = "map-len")]
    pub map_len: Option<Size>,
    /// IOMMU model (type1 or type1v2).
    #[clap(long = "iommu")]
    pub iommu: Option<IommuModel>,
    /// Bytes shown per probe dump.
    #[clap(long = "dump-len")]
    pub dump_len: Option<Size>,
    /// Probe offset. Repeat for several probes.
    #[clap(long = "probe")]
    pub probes: Vec<Size>,
    /// 64-bit value written at each probe offset.
    #[clap(long = "pattern", value_parser = parse_u64)]
    pub pattern: Option<u64>,
    /// Never write to the device: skip all host-to-device copies, including the sweep, and the probe writes.
    #[clap(long = "no-write")]
    pub no_write: bool,
    /// Skip the copy benchmarks.
    #[clap(long = "skip-bench")]
    pub skip_bench: bool,
    /// Bytes per device-to-host copy.
    #[clap(long = "read-block")]
    pub read_block: Option<Size>,
    /// Number of device-to-host copies.
    #[clap(long = "read-iterations")]
    pub read_iterations: Option<usize>,
    /// Bytes per host-to-device copy.
    #[clap(long = "write-block")]
    pub write_block: Option<Size>,
    /// Number of host-to-device copies.
    #[clap(long = "write-iterations")]
    pub write_iterations: Option<usize>,
    /// Block sizes to sweep, comma separated (e.g. 64,4K,64K).
    #[clap(long = "sweep", value_delimiter = ',')]
    pub sweep: Vec<Size>,
    /// Volume moved per block size in the sweep.
    #[clap(long = "sweep-bytes")]
    pub sweep_bytes: Option<Size>,
    /// sysfs mount point used to look up the IOMMU group.
    #[clap(long = "sysfs", default_value = "/sys")]
    pub sysfs: PathBuf,
    /// Output file for the report (JSON format).
    #[clap(long = "output")]
    pub output: Option<PathBuf>,
    /// Verbose output.
    #[clap(long = "verbose", short = 'v')]
    pub verbose: bool,
}

impl CliArgs {
    /// Loads the configuration file, if any, and applies the command-line overrides.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let config = match &self.config {
            Some(path) => SessionConfig::from_jsonfile(path)?,
            None => SessionConfig::default(),
        };
        Ok(self.apply(config))
    }

    /// Overrides the values of `config` that were given on the command line.
    pub fn apply(&self, mut config: SessionConfig) -> SessionConfig {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        set(&mut config.container_path, &self.container);
        if self.group.is_some() {
            config.group_path = self.group.clone();
        }
        set(&mut config.device, &self.device);
        set(&mut config.region, &self.region);
        set(&mut config.map_len, &self.map_len);
        set(&mut config.iommu, &self.iommu);
        set(&mut config.dump_len, &self.dump_len);
        if !self.probes.is_empty() {
            config.probe_offsets = self.probes.clone();
        }
        set(&mut config.pattern, &self.pattern);
        if self.no_write {
            config.write = false;
        }
        let bench = &mut config.bench;
        if self.skip_bench {
            bench.skip = true;
        }
        set(&mut bench.read_block, &self.read_block);
        set(&mut bench.read_iterations, &self.read_iterations);
        set(&mut bench.write_block, &self.write_block);
        set(&mut bench.write_iterations, &self.write_iterations);
        if !self.sweep.is_empty() {
            bench.sweep_blocks = self.sweep.clone();
        }
        set(&mut bench.sweep_bytes, &self.sweep_bytes);
        config
    }
}
