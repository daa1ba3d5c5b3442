use crate::sys::*;
use libc::{c_int, c_ulong};
use log::{debug, trace};
use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::IntoRawFd;
use std::path::Path;
use std::ptr::{NonNull, null_mut};
use vfio_bench_core::{DeviceControl, DeviceInfo, GroupStatus, Handle, IommuModel, RegionInfo};

/// The Linux VFIO control channel.
///
/// Every method is a single system call on the handle it is given. The type holds no
/// state; handles are closed by the owning wrappers of `vfio-bench-core`.
#[derive(Clone, Copy, Debug, Default)]
pub struct VfioIoctl;

impl VfioIoctl {
    /// Creates the control channel.
    pub fn new() -> Self {
        VfioIoctl
    }
}

fn check(ret: c_int) -> io::Result<c_int> {
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret)
}

fn open_rw(path: &Path) -> io::Result<Handle> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let fd = file.into_raw_fd();
    trace!("Opened {:?} as fd {}", path, fd);
    Ok(Handle::new(fd))
}

/// # Safety
///
/// `request` must take no argument or a plain integer argument.
unsafe fn ioctl_val(handle: Handle, request: c_ulong, arg: c_ulong) -> io::Result<c_int> {
    check(unsafe { libc::ioctl(handle.as_raw(), request as _, arg) })
}

/// # Safety
///
/// `arg` must have the layout the kernel expects for `request`.
unsafe fn ioctl_ptr<T>(handle: Handle, request: c_ulong, arg: *mut T) -> io::Result<c_int> {
    check(unsafe { libc::ioctl(handle.as_raw(), request as _, arg) })
}

impl DeviceControl for VfioIoctl {
    fn open_container(&self, path: &Path) -> io::Result<Handle> {
        open_rw(path)
    }

    fn api_version(&self, container: Handle) -> io::Result<i32> {
        // SAFETY: VFIO_GET_API_VERSION takes no argument.
        unsafe { ioctl_val(container, VFIO_GET_API_VERSION, 0) }
    }

    fn check_extension(&self, container: Handle, model: IommuModel) -> io::Result<bool> {
        // SAFETY: VFIO_CHECK_EXTENSION takes the extension number by value.
        let ret = unsafe {
            ioctl_val(container, VFIO_CHECK_EXTENSION, model.extension() as c_ulong)
        }?;
        Ok(ret > 0)
    }

    fn set_iommu(&self, container: Handle, model: IommuModel) -> io::Result<()> {
        // SAFETY: VFIO_SET_IOMMU takes the extension number by value.
        unsafe { ioctl_val(container, VFIO_SET_IOMMU, model.extension() as c_ulong) }?;
        Ok(())
    }

    fn open_group(&self, path: &Path) -> io::Result<Handle> {
        open_rw(path)
    }

    fn group_status(&self, group: Handle) -> io::Result<GroupStatus> {
        let mut status = VfioGroupStatus::new();
        // SAFETY: status is a vfio_group_status with argsz set.
        unsafe { ioctl_ptr(group, VFIO_GROUP_GET_STATUS, &raw mut status) }?;
        Ok(GroupStatus {
            flags: status.flags,
        })
    }

    fn set_container(&self, group: Handle, container: Handle) -> io::Result<()> {
        let mut fd: c_int = container.as_raw();
        // SAFETY: VFIO_GROUP_SET_CONTAINER reads an int holding the container fd.
        unsafe { ioctl_ptr(group, VFIO_GROUP_SET_CONTAINER, &raw mut fd) }?;
        Ok(())
    }

    fn device(&self, group: Handle, name: &str) -> io::Result<Handle> {
        let name = CString::new(name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: VFIO_GROUP_GET_DEVICE_FD reads a NUL-terminated device name.
        let fd = unsafe {
            ioctl_ptr(group, VFIO_GROUP_GET_DEVICE_FD, name.as_ptr() as *mut libc::c_char)
        }?;
        debug!("Device {:?} is fd {}", name, fd);
        Ok(Handle::new(fd))
    }

    fn device_info(&self, device: Handle) -> io::Result<DeviceInfo> {
        let mut info = VfioDeviceInfo::new();
        // SAFETY: info is a vfio_device_info with argsz set.
        unsafe { ioctl_ptr(device, VFIO_DEVICE_GET_INFO, &raw mut info) }?;
        Ok(DeviceInfo {
            flags: info.flags,
            num_regions: info.num_regions,
            num_irqs: info.num_irqs,
        })
    }

    fn region_info(&self, device: Handle, index: u32) -> io::Result<RegionInfo> {
        let mut info = VfioRegionInfo::new(index);
        // SAFETY: info is a vfio_region_info with argsz and index set.
        unsafe { ioctl_ptr(device, VFIO_DEVICE_GET_REGION_INFO, &raw mut info) }?;
        Ok(RegionInfo {
            index: info.index,
            flags: info.flags,
            size: info.size,
            offset: info.offset,
        })
    }

    fn map_region(&self, device: Handle, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
        let offset = libc::off_t::try_from(offset)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let p = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                device.as_raw(),
                offset,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(p as *mut u8).ok_or_else(|| io::Error::from_raw_os_error(libc::EFAULT))
    }

    unsafe fn unmap_region(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        check(unsafe { libc::munmap(addr.as_ptr() as *mut libc::c_void, len) })?;
        Ok(())
    }

    fn close(&self, handle: Handle) -> io::Result<()> {
        check(unsafe { libc::close(handle.as_raw()) })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfio_bench_core::control::VFIO_API_VERSION;

    #[test]
    fn open_missing_node() {
        let err = VfioIoctl::new()
            .open_container(Path::new("/nonexistent/vfio"))
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn ioctl_on_regular_file_fails_with_errno() -> anyhow::Result<()> {
        let ctl = VfioIoctl::new();
        let handle = ctl.open_container(Path::new("/dev/null"))?;
        let err = ctl.api_version(handle).unwrap_err();
        assert!(err.raw_os_error().is_some());
        ctl.close(handle)?;
        Ok(())
    }

    #[test]
    #[ignore = "needs /dev/vfio/vfio"]
    fn container_api_version() -> anyhow::Result<()> {
        let ctl = VfioIoctl::new();
        let handle = ctl.open_container(Path::new("/dev/vfio/vfio"))?;
        assert_eq!(ctl.api_version(handle)?, VFIO_API_VERSION);
        ctl.close(handle)?;
        Ok(())
    }
}
