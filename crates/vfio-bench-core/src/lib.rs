//! # vfio-bench core
//!
//! `vfio-bench-core` drives the Linux VFIO userspace passthrough interface far enough to map
//! one BAR region of a PCI device, and measures copy bandwidth between host memory and
//! that region.
//!
//! ## Architecture Overview
//!
//! - [`control::DeviceControl`] - The capability trait through which every request reaches
//!   the kernel. The `vfio-bench-ioctl` backend implements it with real ioctls; the
//!   `vfio-bench-mock` backend scripts it for tests.
//!
//! - [`handle`] - Owning wrappers [`Container`], [`Group`] and [`Device`]. They nest by
//!   borrowing and close their handle on drop, so resources are always released
//!   inner-to-outer.
//!
//! - [`Mapping`] - A bounds-checked read/write window onto a mapped region.
//!
//! - [`Session`] - The linear sequence: container, group, device, region, mapping, then the
//!   [`bench`] copy loops and the [`inspect`] probe dumps. Produces a [`SessionReport`].
//!
//! ## Platform Support
//!
//! The real backend needs Linux with the `vfio-pci` driver bound to the target device and
//! read/write access to `/dev/vfio/*`. Everything in this crate also runs against the mock.

#![warn(missing_docs)]

pub mod bench;
pub mod config;
pub mod control;
mod error;
pub mod handle;
pub mod inspect;
mod mapping;
mod report;
mod session;
#[cfg(test)]
mod testing;
pub mod util;

pub use crate::config::{BenchConfig, ConfigError, SessionConfig};
pub use crate::control::{DeviceControl, DeviceInfo, GroupStatus, Handle, IommuModel, RegionInfo};
pub use crate::error::{Error, ErrorKind, Result, Step};
pub use crate::handle::{Container, Device, Group};
pub use crate::mapping::Mapping;
pub use crate::report::SessionReport;
pub use crate::session::Session;
