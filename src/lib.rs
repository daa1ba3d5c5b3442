//! # vfio-bench
//!
//! Maps a BAR region of a PCI device through the Linux VFIO userspace interface and
//! measures copy bandwidth between host memory and the region.
//!
//! This crate re-exports [`vfio_bench_core`] and, behind features, the backends:
//!
//! - `ioctl` (default): [`ioctl::VfioIoctl`], the real Linux backend, and sysfs lookup
//! - `mock`: [`mock::MockControl`], a scripted backend for tests
//!
//! ```
//! use vfio_bench::{DeviceControl, Session, SessionConfig};
//!
//! fn bench<C: DeviceControl>(ctl: C) -> vfio_bench::Result<f64> {
//!     let config = SessionConfig {
//!         group_path: Some("/dev/vfio/16".into()),
//!         write: false,
//!         ..Default::default()
//!     };
//!     let report = Session::new(ctl, config).run()?;
//!     Ok(report.benchmarks[0].bandwidth_mib_s())
//! }
//! ```

#![warn(missing_docs)]

pub use vfio_bench_core::*;

/// The Linux VFIO backend.
#[cfg(feature = "ioctl")]
pub mod ioctl {
    pub use vfio_bench_ioctl::*;
}

/// The scripted test backend.
#[cfg(feature = "mock")]
pub mod mock {
    pub use vfio_bench_mock::*;
}
