//! # vfio-bench
//!
//! Command-line front end of vfio-bench. It claims one PCI device through VFIO, maps one
//! of its BAR regions and reports the copy bandwidth between host memory and that region,
//! followed by hex dumps of a few probe offsets before and after a test write.
//!
//! ## Quickstart guide
//!
//! Bind the device to `vfio-pci` first (for example with `driverctl set-override
//! 0000:22:00.0 vfio-pci`), then run:
//!
//! ```sh
//! cargo build --release
//! sudo target/release/vfio-bench --device 0000:22:00.0 --map-len 0x5000
//!```
//!
//! The IOMMU group node is looked up in sysfs unless `--group` is given. All parameters
//! can also be read from a JSON file with `--config`; flags given on the command line take
//! precedence. `--output results.json` additionally stores the report.
//!
//! **Writes are destructive.** Use `--no-write` unless the region is scratch memory.
//!
//! ## Modules
//!
//! - `cli`: Command-line arguments and how they override the configuration file.

pub mod cli;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

/// Sets up `env_logger` behind a progress-bar aware log bridge.
///
/// The default filter is `info`, or `debug` with `verbose`. `RUST_LOG` overrides both.
pub fn init_logging_with_progress(verbose: bool) -> anyhow::Result<MultiProgress> {
    let default_filter = if verbose { "debug" } else { "info" };
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
            .build();
    let level = logger.filter();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    log::set_max_level(level);
    Ok(progress)
}
