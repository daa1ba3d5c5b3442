//! Linux VFIO backend for vfio-bench.
//!
//! [`VfioIoctl`] implements [`vfio_bench_core::DeviceControl`] with the VFIO container,
//! group and device ioctls and `mmap(2)` on the device descriptor. [`Sysfs`] finds the IOMMU
//! group and the bound driver of a PCI device.
//!
//! # Requirements
//!
//! - Linux with the `vfio` and `vfio-pci` modules loaded
//! - The target device (and every device of its IOMMU group) bound to `vfio-pci`
//! - Read/write access to `/dev/vfio/vfio` and `/dev/vfio/<group>`

#![warn(missing_docs)]

mod linux;
mod sys;
mod sysfs;

pub use linux::VfioIoctl;
pub use sysfs::{Sysfs, SysfsError};
