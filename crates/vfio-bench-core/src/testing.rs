//! A minimal in-crate control channel for unit tests.

use crate::control::{
    DeviceControl, DeviceInfo, GroupStatus, Handle, IommuModel, RegionInfo,
    VFIO_GROUP_FLAGS_VIABLE, VFIO_REGION_INFO_FLAG_MMAP, VFIO_REGION_INFO_FLAG_READ,
    VFIO_REGION_INFO_FLAG_WRITE,
};
use crate::handle::Container;
use crate::mapping::Mapping;
use crate::util::PciAddress;
use std::cell::{Cell, RefCell};
use std::io;
use std::path::Path;
use std::ptr::NonNull;

pub(crate) const REGION_SIZE: usize = 0x1000;

/// Hands out sequential handles and maps every region onto one zeroed host buffer.
pub(crate) struct FakeControl {
    next_handle: Cell<i32>,
    pub(crate) set_container_calls: Cell<u32>,
    pub(crate) set_iommu_calls: Cell<u32>,
    pub(crate) closed: RefCell<Vec<Handle>>,
    pub(crate) region_flags: Cell<u32>,
    backing: NonNull<u64>,
}

impl FakeControl {
    pub(crate) fn new() -> Self {
        let words = vec![0u64; REGION_SIZE / 8].into_boxed_slice();
        let backing = NonNull::new(Box::into_raw(words) as *mut u64)
            .expect("boxed slice is never null");
        FakeControl {
            next_handle: Cell::new(3),
            set_container_calls: Cell::new(0),
            set_iommu_calls: Cell::new(0),
            closed: RefCell::new(Vec::new()),
            region_flags: Cell::new(
                VFIO_REGION_INFO_FLAG_READ | VFIO_REGION_INFO_FLAG_WRITE | VFIO_REGION_INFO_FLAG_MMAP,
            ),
            backing,
        }
    }

    fn handle(&self) -> Handle {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        Handle::new(raw)
    }
}

impl Drop for FakeControl {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.backing.as_ptr(), REGION_SIZE / 8);
        // SAFETY: backing came from Box::into_raw in new() and is freed exactly once.
        drop(unsafe { Box::from_raw(slice) });
    }
}

impl DeviceControl for FakeControl {
    fn open_container(&self, _path: &Path) -> io::Result<Handle> {
        Ok(self.handle())
    }
    fn api_version(&self, _container: Handle) -> io::Result<i32> {
        Ok(crate::control::VFIO_API_VERSION)
    }
    fn check_extension(&self, _container: Handle, _model: IommuModel) -> io::Result<bool> {
        Ok(true)
    }
    fn set_iommu(&self, _container: Handle, _model: IommuModel) -> io::Result<()> {
        self.set_iommu_calls.set(self.set_iommu_calls.get() + 1);
        Ok(())
    }
    fn open_group(&self, _path: &Path) -> io::Result<Handle> {
        Ok(self.handle())
    }
    fn group_status(&self, _group: Handle) -> io::Result<GroupStatus> {
        Ok(GroupStatus {
            flags: VFIO_GROUP_FLAGS_VIABLE,
        })
    }
    fn set_container(&self, _group: Handle, _container: Handle) -> io::Result<()> {
        self.set_container_calls.set(self.set_container_calls.get() + 1);
        Ok(())
    }
    fn device(&self, _group: Handle, _name: &str) -> io::Result<Handle> {
        Ok(self.handle())
    }
    fn device_info(&self, _device: Handle) -> io::Result<DeviceInfo> {
        Ok(DeviceInfo {
            flags: 0,
            num_regions: 1,
            num_irqs: 0,
        })
    }
    fn region_info(&self, _device: Handle, index: u32) -> io::Result<RegionInfo> {
        Ok(RegionInfo {
            index,
            flags: self.region_flags.get(),
            size: REGION_SIZE as u64,
            offset: 0,
        })
    }
    fn map_region(&self, _device: Handle, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
        if offset != 0 || len > REGION_SIZE {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(self.backing.cast())
    }
    unsafe fn unmap_region(&self, _addr: NonNull<u8>, _len: usize) -> io::Result<()> {
        Ok(())
    }
    fn close(&self, handle: Handle) -> io::Result<()> {
        self.closed.borrow_mut().push(handle);
        Ok(())
    }
}

/// Runs `f` on a window of `len` bytes over region 0, acquired in the usual order.
pub(crate) fn with_window<R>(
    ctl: &FakeControl,
    len: usize,
    f: impl FnOnce(&mut Mapping<'_, &FakeControl>) -> R,
) -> R {
    let container = Container::open(ctl, Path::new("/dev/vfio/vfio")).unwrap();
    let group = container.open_group(Path::new("/dev/vfio/1")).unwrap();
    group.attach().unwrap();
    container.set_iommu(IommuModel::Type1).unwrap();
    let device = group.device(&PciAddress::default()).unwrap();
    let region = device.region(0).unwrap();
    let mut window = device.map(&region, len).unwrap();
    f(&mut window)
}
