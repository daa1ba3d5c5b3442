//! The device-control capability.
//!
//! This module defines the [`DeviceControl`] trait, the narrow boundary between the
//! acquisition sequence and the kernel. Everything the sequence needs from VFIO (opening
//! container and group nodes, the container/group/device ioctls, and mapping a region) is
//! expressed as one method on this trait, so the sequence can run against the real ioctl
//! backend (`vfio-bench-ioctl`) or a scripted fake (`vfio-bench-mock`).
//!
//! The value types returned by the control channel ([`GroupStatus`], [`DeviceInfo`],
//! [`RegionInfo`]) and the flag constants they are decoded with also live here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use std::ptr::NonNull;

/// VFIO API version this tool was written against.
pub const VFIO_API_VERSION: i32 = 0;

/// Group status flag: all devices in the group are bound to vfio-pci.
pub const VFIO_GROUP_FLAGS_VIABLE: u32 = 1 << 0;
/// Group status flag: the group is attached to a container.
pub const VFIO_GROUP_FLAGS_CONTAINER_SET: u32 = 1 << 1;

/// Region flag: the region supports `read()`.
pub const VFIO_REGION_INFO_FLAG_READ: u32 = 1 << 0;
/// Region flag: the region supports `write()`.
pub const VFIO_REGION_INFO_FLAG_WRITE: u32 = 1 << 1;
/// Region flag: the region supports `mmap()`.
pub const VFIO_REGION_INFO_FLAG_MMAP: u32 = 1 << 2;

/// An open descriptor on the device-control channel.
///
/// A newtype around the raw descriptor number. Handles are plain values; ownership and
/// release are the job of the wrappers in [`crate::handle`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Handle(i32);

impl Handle {
    /// Wraps a raw descriptor number.
    pub const fn new(raw: i32) -> Self {
        Handle(raw)
    }

    /// Returns the raw descriptor number.
    pub const fn as_raw(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// IOMMU backend model selected on the container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IommuModel {
    /// `VFIO_TYPE1_IOMMU`
    #[default]
    Type1,
    /// `VFIO_TYPE1v2_IOMMU`
    Type1v2,
}

impl IommuModel {
    /// Returns the extension number passed to `VFIO_CHECK_EXTENSION` and `VFIO_SET_IOMMU`.
    pub const fn extension(&self) -> u32 {
        match self {
            IommuModel::Type1 => 1,
            IommuModel::Type1v2 => 3,
        }
    }
}

impl fmt::Display for IommuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IommuModel::Type1 => write!(f, "VFIO_TYPE1_IOMMU"),
            IommuModel::Type1v2 => write!(f, "VFIO_TYPE1v2_IOMMU"),
        }
    }
}

impl std::str::FromStr for IommuModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "type1" | "1" => Ok(IommuModel::Type1),
            "type1v2" | "3" => Ok(IommuModel::Type1v2),
            other => Err(format!("unknown IOMMU model: {other}")),
        }
    }
}

/// Status of an IOMMU group as reported by `VFIO_GROUP_GET_STATUS`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    /// Raw status flags
    pub flags: u32,
}

impl GroupStatus {
    /// True if every device in the group is bound to vfio-pci.
    pub const fn is_viable(&self) -> bool {
        self.flags & VFIO_GROUP_FLAGS_VIABLE != 0
    }

    /// True if the group is already attached to a container.
    pub const fn container_set(&self) -> bool {
        self.flags & VFIO_GROUP_FLAGS_CONTAINER_SET != 0
    }
}

/// Device metadata as reported by `VFIO_DEVICE_GET_INFO`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Raw device flags
    pub flags: u32,
    /// Number of addressable regions
    pub num_regions: u32,
    /// Number of interrupt sources
    pub num_irqs: u32,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device has {} regions and {} IRQs",
            self.num_regions, self.num_irqs
        )
    }
}

/// Region metadata as reported by `VFIO_DEVICE_GET_REGION_INFO`.
///
/// A descriptor, not a resource: holding one keeps nothing open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegionInfo {
    /// Region index (0..=5 are the PCI BARs)
    pub index: u32,
    /// Raw capability flags
    pub flags: u32,
    /// Region size in bytes
    pub size: u64,
    /// Offset of the region within the device file descriptor
    pub offset: u64,
}

impl RegionInfo {
    /// True if the region may be mapped with `mmap()`.
    pub const fn is_mappable(&self) -> bool {
        self.flags & VFIO_REGION_INFO_FLAG_MMAP != 0
    }

    /// True if the region is readable.
    pub const fn is_readable(&self) -> bool {
        self.flags & VFIO_REGION_INFO_FLAG_READ != 0
    }

    /// True if the region is writable.
    pub const fn is_writable(&self) -> bool {
        self.flags & VFIO_REGION_INFO_FLAG_WRITE != 0
    }
}

impl fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Region {}: size=0x{:x}, offset=0x{:x}, flags=0x{:x}",
            self.index, self.size, self.offset, self.flags
        )
    }
}

/// Trait for the VFIO device-control channel.
///
/// Implementors translate each request into the corresponding kernel operation (or a
/// scripted response). Methods report failures as [`std::io::Error`] so that the errno of
/// the failing call survives up to the process exit code.
///
/// The trait hands out [`Handle`]s and raw mapping addresses but never tracks them. The
/// wrappers in [`crate::handle`] and [`crate::Mapping`] release them in the right order.
///
/// # Required Methods
///
/// Container requests:
/// * [`open_container()`](DeviceControl::open_container)
/// * [`api_version()`](DeviceControl::api_version)
/// * [`check_extension()`](DeviceControl::check_extension)
/// * [`set_iommu()`](DeviceControl::set_iommu)
///
/// Group requests:
/// * [`open_group()`](DeviceControl::open_group)
/// * [`group_status()`](DeviceControl::group_status)
/// * [`set_container()`](DeviceControl::set_container)
/// * [`device()`](DeviceControl::device)
///
/// Device requests:
/// * [`device_info()`](DeviceControl::device_info)
/// * [`region_info()`](DeviceControl::region_info)
/// * [`map_region()`](DeviceControl::map_region)
/// * [`unmap_region()`](DeviceControl::unmap_region)
///
/// And [`close()`](DeviceControl::close) for any handle.
pub trait DeviceControl {
    /// Opens the container node (normally `/dev/vfio/vfio`).
    fn open_container(&self, path: &Path) -> io::Result<Handle>;

    /// Returns the kernel's VFIO API version (`VFIO_GET_API_VERSION`).
    fn api_version(&self, container: Handle) -> io::Result<i32>;

    /// Checks whether the container supports an IOMMU model (`VFIO_CHECK_EXTENSION`).
    fn check_extension(&self, container: Handle, model: IommuModel) -> io::Result<bool>;

    /// Selects the IOMMU model for the container (`VFIO_SET_IOMMU`).
    ///
    /// Only valid once at least one group is attached.
    fn set_iommu(&self, container: Handle, model: IommuModel) -> io::Result<()>;

    /// Opens an IOMMU group node (`/dev/vfio/<group>`).
    fn open_group(&self, path: &Path) -> io::Result<Handle>;

    /// Returns the group status (`VFIO_GROUP_GET_STATUS`).
    fn group_status(&self, group: Handle) -> io::Result<GroupStatus>;

    /// Attaches the group to the container (`VFIO_GROUP_SET_CONTAINER`).
    fn set_container(&self, group: Handle, container: Handle) -> io::Result<()>;

    /// Claims a device of the group by its bus address (`VFIO_GROUP_GET_DEVICE_FD`).
    fn device(&self, group: Handle, name: &str) -> io::Result<Handle>;

    /// Returns the device metadata (`VFIO_DEVICE_GET_INFO`).
    fn device_info(&self, device: Handle) -> io::Result<DeviceInfo>;

    /// Returns the metadata of one region (`VFIO_DEVICE_GET_REGION_INFO`).
    fn region_info(&self, device: Handle, index: u32) -> io::Result<RegionInfo>;

    /// Maps `len` bytes of the device file at `offset`, read/write and shared.
    fn map_region(&self, device: Handle, len: usize, offset: u64) -> io::Result<NonNull<u8>>;

    /// Releases a mapping produced by [`map_region()`](DeviceControl::map_region).
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe exactly one live mapping returned by
    /// `map_region()` on this control channel, and nothing may access it afterwards.
    unsafe fn unmap_region(&self, addr: NonNull<u8>, len: usize) -> io::Result<()>;

    /// Closes a handle.
    fn close(&self, handle: Handle) -> io::Result<()>;
}

impl<T: DeviceControl + ?Sized> DeviceControl for &T {
    fn open_container(&self, path: &Path) -> io::Result<Handle> {
        (**self).open_container(path)
    }
    fn api_version(&self, container: Handle) -> io::Result<i32> {
        (**self).api_version(container)
    }
    fn check_extension(&self, container: Handle, model: IommuModel) -> io::Result<bool> {
        (**self).check_extension(container, model)
    }
    fn set_iommu(&self, container: Handle, model: IommuModel) -> io::Result<()> {
        (**self).set_iommu(container, model)
    }
    fn open_group(&self, path: &Path) -> io::Result<Handle> {
        (**self).open_group(path)
    }
    fn group_status(&self, group: Handle) -> io::Result<GroupStatus> {
        (**self).group_status(group)
    }
    fn set_container(&self, group: Handle, container: Handle) -> io::Result<()> {
        (**self).set_container(group, container)
    }
    fn device(&self, group: Handle, name: &str) -> io::Result<Handle> {
        (**self).device(group, name)
    }
    fn device_info(&self, device: Handle) -> io::Result<DeviceInfo> {
        (**self).device_info(device)
    }
    fn region_info(&self, device: Handle, index: u32) -> io::Result<RegionInfo> {
        (**self).region_info(device, index)
    }
    fn map_region(&self, device: Handle, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
        (**self).map_region(device, len, offset)
    }
    unsafe fn unmap_region(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        unsafe { (**self).unmap_region(addr, len) }
    }
    fn close(&self, handle: Handle) -> io::Result<()> {
        (**self).close(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_flags() {
        let region = RegionInfo {
            index: 0,
            flags: VFIO_REGION_INFO_FLAG_READ | VFIO_REGION_INFO_FLAG_MMAP,
            size: 0x4000,
            offset: 0,
        };
        assert!(region.is_mappable());
        assert!(region.is_readable());
        assert!(!region.is_writable());
        assert_eq!(
            region.to_string(),
            "Region 0: size=0x4000, offset=0x0, flags=0x5"
        );
    }

    #[test]
    fn group_flags() {
        assert!(!GroupStatus { flags: 0 }.is_viable());
        let status = GroupStatus {
            flags: VFIO_GROUP_FLAGS_VIABLE | VFIO_GROUP_FLAGS_CONTAINER_SET,
        };
        assert!(status.is_viable());
        assert!(status.container_set());
    }

    #[test]
    fn iommu_model_parse() {
        assert_eq!("type1".parse::<IommuModel>(), Ok(IommuModel::Type1));
        assert_eq!("Type1v2".parse::<IommuModel>(), Ok(IommuModel::Type1v2));
        assert!("spapr".parse::<IommuModel>().is_err());
        assert_eq!(IommuModel::Type1v2.extension(), 3);
    }
}
