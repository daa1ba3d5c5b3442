//! Request numbers and argument layouts from `linux/vfio.h`.

use libc::c_ulong;

/// `_IO(type, nr)`: no size or direction bits.
const fn io(ty: u8, nr: u8) -> c_ulong {
    ((ty as c_ulong) << 8) | (nr as c_ulong)
}

pub const VFIO_TYPE: u8 = b';';
pub const VFIO_BASE: u8 = 100;

pub const VFIO_GET_API_VERSION: c_ulong = io(VFIO_TYPE, VFIO_BASE);
pub const VFIO_CHECK_EXTENSION: c_ulong = io(VFIO_TYPE, VFIO_BASE + 1);
pub const VFIO_SET_IOMMU: c_ulong = io(VFIO_TYPE, VFIO_BASE + 2);
pub const VFIO_GROUP_GET_STATUS: c_ulong = io(VFIO_TYPE, VFIO_BASE + 3);
pub const VFIO_GROUP_SET_CONTAINER: c_ulong = io(VFIO_TYPE, VFIO_BASE + 4);
pub const VFIO_GROUP_GET_DEVICE_FD: c_ulong = io(VFIO_TYPE, VFIO_BASE + 6);
pub const VFIO_DEVICE_GET_INFO: c_ulong = io(VFIO_TYPE, VFIO_BASE + 7);
pub const VFIO_DEVICE_GET_REGION_INFO: c_ulong = io(VFIO_TYPE, VFIO_BASE + 8);

/// `struct vfio_group_status`
#[repr(C)]
#[derive(Debug, Default)]
pub struct VfioGroupStatus {
    // Read by the kernel only.
    #[allow(dead_code)]
    pub argsz: u32,
    pub flags: u32,
}

/// `struct vfio_device_info`
#[repr(C)]
#[derive(Debug, Default)]
pub struct VfioDeviceInfo {
    // Read by the kernel only.
    #[allow(dead_code)]
    pub argsz: u32,
    pub flags: u32,
    pub num_regions: u32,
    pub num_irqs: u32,
}

/// `struct vfio_region_info`
#[repr(C)]
#[derive(Debug, Default)]
pub struct VfioRegionInfo {
    // Read by the kernel only.
    #[allow(dead_code)]
    pub argsz: u32,
    pub flags: u32,
    pub index: u32,
    #[allow(dead_code)]
    pub cap_offset: u32,
    pub size: u64,
    pub offset: u64,
}

impl VfioGroupStatus {
    pub fn new() -> Self {
        VfioGroupStatus {
            argsz: size_of::<Self>() as u32,
            ..Default::default()
        }
    }
}

impl VfioDeviceInfo {
    pub fn new() -> Self {
        VfioDeviceInfo {
            argsz: size_of::<Self>() as u32,
            ..Default::default()
        }
    }
}

impl VfioRegionInfo {
    pub fn new(index: u32) -> Self {
        VfioRegionInfo {
            argsz: size_of::<Self>() as u32,
            index,
            ..Default::default()
        }
    }
}
