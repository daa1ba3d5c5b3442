//! Session configuration.
//!
//! A [`SessionConfig`] can be built in code, starting from [`Default`], or loaded from a JSON
//! file with [`SessionConfig::from_jsonfile`]. Missing keys in the file take their default.
//!
//! ```json
//! {
//!   "device": "0000:22:00.0",
//!   "group_path": "/dev/vfio/16",
//!   "map_len": "0x5000",
//!   "probe_offsets": [0, "0x4000"],
//!   "bench": { "read_iterations": 4096, "sweep_blocks": ["64", "4K", "64K"] }
//! }
//! ```

use crate::control::IommuModel;
use crate::error::Error;
use crate::util::{PciAddress, Size};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON or has unexpected keys.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Parameters of the copy benchmarks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Skip the benchmarks entirely
    pub skip: bool,
    /// Bytes copied per device-to-host iteration
    pub read_block: Size,
    /// Number of device-to-host iterations
    pub read_iterations: usize,
    /// Bytes copied per host-to-device iteration
    pub write_block: Size,
    /// Number of host-to-device iterations
    pub write_iterations: usize,
    /// Block sizes of the sweep. An empty list disables the sweep.
    pub sweep_blocks: Vec<Size>,
    /// Nominal volume moved per block size and direction in the sweep
    pub sweep_bytes: Size,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            skip: false,
            read_block: Size::KB(4),
            read_iterations: 1024,
            write_block: Size::KB(4),
            write_iterations: 4,
            sweep_blocks: vec![],
            sweep_bytes: Size::MB(4),
        }
    }
}

/// Everything a session needs to know.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Container node
    pub container_path: PathBuf,
    /// IOMMU group node. When unset, front ends resolve it from sysfs.
    pub group_path: Option<PathBuf>,
    /// Bus address of the device to claim
    pub device: PciAddress,
    /// Index of the region to map
    pub region: u32,
    /// Length of the mapped window
    pub map_len: Size,
    /// IOMMU model to select
    pub iommu: IommuModel,
    /// Bytes shown per probe dump
    pub dump_len: Size,
    /// Window offsets that are dumped and written
    pub probe_offsets: Vec<Size>,
    /// 64-bit value written at each probe offset
    pub pattern: u64,
    /// Write to the device. When false, every host-to-device copy (benchmark and sweep) and
    /// the probe writes are skipped and only dumps are taken.
    pub write: bool,
    /// Benchmark parameters
    pub bench: BenchConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            container_path: PathBuf::from("/dev/vfio/vfio"),
            group_path: None,
            device: PciAddress::default(),
            region: 0,
            map_len: Size::B(0x5000),
            iommu: IommuModel::default(),
            dump_len: Size::B(64),
            probe_offsets: vec![Size::B(0), Size::B(0x4000)],
            pattern: 0x1234567890abcdef,
            write: true,
            bench: BenchConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_jsonfile<P: AsRef<Path>>(filepath: P) -> Result<SessionConfig, ConfigError> {
        let mut file = File::open(filepath.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: SessionConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Rejects configurations that cannot produce a meaningful run.
    ///
    /// Window bounds of probes and blocks are checked later against the actual mapping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending parameter.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |what: &str| Err(Error::InvalidConfig(what.to_string()));
        if self.map_len.bytes() == 0 {
            return invalid("map_len must be non-zero");
        }
        if self.group_path.is_none() {
            return invalid("no IOMMU group path configured");
        }
        let bench = &self.bench;
        if bench.skip {
            return Ok(());
        }
        if bench.read_block.bytes() == 0 || bench.write_block.bytes() == 0 {
            return invalid("benchmark block sizes must be non-zero");
        }
        if bench.read_iterations == 0 || bench.write_iterations == 0 {
            return invalid("benchmark iteration counts must be non-zero");
        }
        if bench.sweep_blocks.iter().any(|b| b.bytes() == 0) {
            return invalid("sweep block sizes must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.container_path, Path::new("/dev/vfio/vfio"));
        assert_eq!(config.map_len.bytes(), 0x5000);
        assert_eq!(config.dump_len.bytes(), 64);
        assert_eq!(config.probe_offsets, vec![Size::B(0), Size::B(0x4000)]);
        assert_eq!(config.bench.read_block.bytes(), 4096);
        assert_eq!(config.bench.read_iterations, 1024);
        assert_eq!(config.bench.write_iterations, 4);
        assert_eq!(config.iommu, IommuModel::Type1);
    }

    #[test]
    fn partial_json_keeps_defaults() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("vfio-bench-config-{}.json", std::process::id()));
        let mut file = File::create(&path)?;
        write!(
            file,
            r#"{{"device": "03:00.1", "group_path": "/dev/vfio/7", "map_len": "16K",
               "iommu": "type1v2", "bench": {{"read_iterations": 8}}}}"#
        )?;
        drop(file);
        let config = SessionConfig::from_jsonfile(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(config.device.to_string(), "0000:03:00.1");
        assert_eq!(config.group_path, Some(PathBuf::from("/dev/vfio/7")));
        assert_eq!(config.map_len, Size::KB(16));
        assert_eq!(config.iommu, IommuModel::Type1v2);
        assert_eq!(config.bench.read_iterations, 8);
        assert_eq!(config.bench.write_iterations, 4);
        assert_eq!(config.pattern, 0x1234567890abcdef);
        Ok(())
    }

    #[test]
    fn unknown_keys_rejected() {
        let res: Result<SessionConfig, _> = serde_json::from_str(r#"{"regoin": 1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        let mut config = SessionConfig {
            group_path: Some("/dev/vfio/1".into()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.bench.read_iterations = 0;
        assert_eq!(config.validate().unwrap_err().code(), libc::EINVAL);
        config.bench.skip = true;
        assert!(config.validate().is_ok());
        config.map_len = Size::B(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_length_rejected_at_load() {
        let res: Result<SessionConfig, _> =
            serde_json::from_str(r#"{"group_path": "/dev/vfio/1", "map_len": "99999999999999G"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn validate_requires_group() {
        let err = SessionConfig::default().validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
