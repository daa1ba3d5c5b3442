use log::trace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::ptr::NonNull;
use vfio_bench_core::control::{
    VFIO_GROUP_FLAGS_CONTAINER_SET, VFIO_GROUP_FLAGS_VIABLE, VFIO_REGION_INFO_FLAG_MMAP,
    VFIO_REGION_INFO_FLAG_READ, VFIO_REGION_INFO_FLAG_WRITE,
};
use vfio_bench_core::{
    DeviceControl, DeviceInfo, GroupStatus, Handle, IommuModel, RegionInfo, Step,
};

/// What a handle refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// A container node
    Container,
    /// A group node
    Group,
    /// A device descriptor
    Device,
}

/// One entry of the mock's journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A request reached the mock, whether it succeeded or not
    Call(Step),
    /// A handle was handed out
    Acquired(HandleKind, Handle),
    /// A handle was closed
    Released(HandleKind, Handle),
    /// A region was mapped
    Mapped {
        /// Region index
        index: u32,
        /// Window length
        len: usize,
    },
    /// A mapping was released
    Unmapped {
        /// Window length
        len: usize,
    },
}

struct Backing {
    ptr: NonNull<u8>,
    len: usize,
}

impl Backing {
    fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let ptr = NonNull::new(Box::into_raw(boxed) as *mut u8).unwrap_or(NonNull::dangling());
        Backing { ptr, len }
    }

    fn contents(&self) -> Vec<u8> {
        // SAFETY: ptr/len come from a live boxed slice owned by this Backing.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }.to_vec()
    }
}

impl Drop for Backing {
    fn drop(&mut self) {
        // SAFETY: reconstructs the boxed slice leaked in zeroed().
        drop(unsafe {
            Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            ))
        });
    }
}

#[derive(Default)]
struct State {
    next_handle: i32,
    open: HashMap<Handle, HandleKind>,
    mappings: HashMap<usize, usize>,
    backing: HashMap<u32, Backing>,
    journal: Vec<Event>,
}

/// A scripted VFIO control channel.
///
/// The default script describes a healthy setup: API version 0, both IOMMU models
/// supported, a viable group holding device `0000:22:00.0` with 9 regions and 5 IRQs,
/// and region 0 being 0x4000 bytes, readable, writable and mappable.
///
/// Mapping a region hands out a pointer into a zeroed host buffer that lives as long as
/// the mock, so its contents can be checked with [`memory()`](MockControl::memory) after
/// the session has released everything.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use vfio_bench_core::{DeviceControl, Step};
/// use vfio_bench_mock::MockControl;
///
/// let mock = MockControl::new().fail_at(Step::OpenGroup, libc::ENOENT);
/// let err = mock.open_group(Path::new("/dev/vfio/16")).unwrap_err();
/// assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
/// ```
pub struct MockControl {
    api_version: i32,
    extensions: Vec<IommuModel>,
    group_flags: u32,
    device_name: String,
    device_info: DeviceInfo,
    regions: HashMap<u32, RegionInfo>,
    failures: HashMap<Step, i32>,
    state: RefCell<State>,
}

impl Default for MockControl {
    fn default() -> Self {
        MockControl::new()
    }
}

impl MockControl {
    /// Creates a mock with the default script.
    pub fn new() -> Self {
        let region = RegionInfo {
            index: 0,
            flags: VFIO_REGION_INFO_FLAG_READ
                | VFIO_REGION_INFO_FLAG_WRITE
                | VFIO_REGION_INFO_FLAG_MMAP,
            size: 0x4000,
            offset: 0,
        };
        MockControl {
            api_version: 0,
            extensions: vec![IommuModel::Type1, IommuModel::Type1v2],
            group_flags: VFIO_GROUP_FLAGS_VIABLE,
            device_name: "0000:22:00.0".to_string(),
            device_info: DeviceInfo {
                flags: 0,
                num_regions: 9,
                num_irqs: 5,
            },
            regions: HashMap::from([(0, region)]),
            failures: HashMap::new(),
            state: RefCell::new(State {
                next_handle: 3,
                ..Default::default()
            }),
        }
    }

    /// Reports `version` as the kernel API version.
    pub fn with_api_version(mut self, version: i32) -> Self {
        self.api_version = version;
        self
    }

    /// Reports the IOMMU models the container supports.
    pub fn with_extensions(mut self, models: &[IommuModel]) -> Self {
        self.extensions = models.to_vec();
        self
    }

    /// Reports `flags` as the group status.
    pub fn with_group_flags(mut self, flags: u32) -> Self {
        self.group_flags = flags;
        self
    }

    /// Names the one device of the group.
    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device_name = name.to_string();
        self
    }

    /// Reports `info` as the device metadata.
    pub fn with_device_info(mut self, info: DeviceInfo) -> Self {
        self.device_info = info;
        self
    }

    /// Adds or replaces a region. Regions must not share an offset.
    pub fn with_region(mut self, region: RegionInfo) -> Self {
        self.regions.insert(region.index, region);
        self
    }

    /// Makes the request of `step` fail with `errno`.
    pub fn fail_at(mut self, step: Step, errno: i32) -> Self {
        self.failures.insert(step, errno);
        self
    }

    /// All requests and resource events so far, in order.
    pub fn journal(&self) -> Vec<Event> {
        self.state.borrow().journal.clone()
    }

    /// The steps requested so far, in order.
    pub fn calls(&self) -> Vec<Step> {
        self.state
            .borrow()
            .journal
            .iter()
            .filter_map(|e| match e {
                Event::Call(step) => Some(*step),
                _ => None,
            })
            .collect()
    }

    /// The kinds of handles closed so far, in close order.
    pub fn released(&self) -> Vec<HandleKind> {
        self.state
            .borrow()
            .journal
            .iter()
            .filter_map(|e| match e {
                Event::Released(kind, _) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    /// Number of handles and mappings not yet released.
    pub fn outstanding(&self) -> usize {
        let state = self.state.borrow();
        state.open.len() + state.mappings.len()
    }

    /// A copy of the backing memory of a region, if it was ever mapped.
    pub fn memory(&self, index: u32) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .backing
            .get(&index)
            .map(Backing::contents)
    }

    fn call(&self, step: Step) -> io::Result<()> {
        trace!("mock: {}", step);
        self.state.borrow_mut().journal.push(Event::Call(step));
        match self.failures.get(&step) {
            Some(&errno) => Err(io::Error::from_raw_os_error(errno)),
            None => Ok(()),
        }
    }

    fn acquire(&self, kind: HandleKind) -> Handle {
        let mut state = self.state.borrow_mut();
        let handle = Handle::new(state.next_handle);
        state.next_handle += 1;
        state.open.insert(handle, kind);
        state.journal.push(Event::Acquired(kind, handle));
        handle
    }

    fn expect_kind(&self, handle: Handle, kind: HandleKind) -> io::Result<()> {
        match self.state.borrow().open.get(&handle) {
            Some(k) if *k == kind => Ok(()),
            _ => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }
}

impl DeviceControl for MockControl {
    fn open_container(&self, _path: &Path) -> io::Result<Handle> {
        self.call(Step::OpenContainer)?;
        Ok(self.acquire(HandleKind::Container))
    }

    fn api_version(&self, container: Handle) -> io::Result<i32> {
        self.call(Step::ApiVersion)?;
        self.expect_kind(container, HandleKind::Container)?;
        Ok(self.api_version)
    }

    fn check_extension(&self, container: Handle, model: IommuModel) -> io::Result<bool> {
        self.call(Step::CheckExtension)?;
        self.expect_kind(container, HandleKind::Container)?;
        Ok(self.extensions.contains(&model))
    }

    fn set_iommu(&self, container: Handle, model: IommuModel) -> io::Result<()> {
        self.call(Step::SetIommu)?;
        self.expect_kind(container, HandleKind::Container)?;
        if !self.extensions.contains(&model) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(())
    }

    fn open_group(&self, _path: &Path) -> io::Result<Handle> {
        self.call(Step::OpenGroup)?;
        Ok(self.acquire(HandleKind::Group))
    }

    fn group_status(&self, group: Handle) -> io::Result<GroupStatus> {
        self.call(Step::GroupStatus)?;
        self.expect_kind(group, HandleKind::Group)?;
        Ok(GroupStatus {
            flags: self.group_flags,
        })
    }

    fn set_container(&self, group: Handle, container: Handle) -> io::Result<()> {
        self.call(Step::SetContainer)?;
        self.expect_kind(group, HandleKind::Group)?;
        self.expect_kind(container, HandleKind::Container)?;
        if self.group_flags & VFIO_GROUP_FLAGS_CONTAINER_SET != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        Ok(())
    }

    fn device(&self, group: Handle, name: &str) -> io::Result<Handle> {
        self.call(Step::GetDevice)?;
        self.expect_kind(group, HandleKind::Group)?;
        if name != self.device_name {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        Ok(self.acquire(HandleKind::Device))
    }

    fn device_info(&self, device: Handle) -> io::Result<DeviceInfo> {
        self.call(Step::DeviceInfo)?;
        self.expect_kind(device, HandleKind::Device)?;
        Ok(self.device_info)
    }

    fn region_info(&self, device: Handle, index: u32) -> io::Result<RegionInfo> {
        self.call(Step::RegionInfo)?;
        self.expect_kind(device, HandleKind::Device)?;
        self.regions
            .get(&index)
            .copied()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
    }

    fn map_region(&self, device: Handle, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
        self.call(Step::Map)?;
        self.expect_kind(device, HandleKind::Device)?;
        let region = self
            .regions
            .values()
            .find(|r| r.offset == offset)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        if len == 0 || len as u64 > region.size {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let mut state = self.state.borrow_mut();
        let ptr = state
            .backing
            .entry(region.index)
            .or_insert_with(|| Backing::zeroed(region.size as usize))
            .ptr;
        state.mappings.insert(ptr.as_ptr() as usize, len);
        state.journal.push(Event::Mapped {
            index: region.index,
            len,
        });
        Ok(ptr)
    }

    unsafe fn unmap_region(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        self.call(Step::Unmap)?;
        let mut state = self.state.borrow_mut();
        match state.mappings.remove(&(addr.as_ptr() as usize)) {
            Some(mapped) if mapped == len => {
                state.journal.push(Event::Unmapped { len });
                Ok(())
            }
            Some(mapped) => {
                state.mappings.insert(addr.as_ptr() as usize, mapped);
                Err(io::Error::from_raw_os_error(libc::EINVAL))
            }
            None => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }

    fn close(&self, handle: Handle) -> io::Result<()> {
        let res = self.call(Step::Close);
        let mut state = self.state.borrow_mut();
        let kind = state
            .open
            .remove(&handle)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        state.journal.push(Event::Released(kind, handle));
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_start_at_three() -> anyhow::Result<()> {
        let mock = MockControl::new();
        let container = mock.open_container(Path::new("/dev/vfio/vfio"))?;
        let group = mock.open_group(Path::new("/dev/vfio/16"))?;
        assert_eq!(container.as_raw(), 3);
        assert_eq!(group.as_raw(), 4);
        assert_eq!(mock.outstanding(), 2);
        mock.close(group)?;
        mock.close(container)?;
        assert_eq!(mock.released(), vec![HandleKind::Group, HandleKind::Container]);
        assert_eq!(mock.outstanding(), 0);
        Ok(())
    }

    #[test]
    fn injected_failure_keeps_errno() {
        let mock = MockControl::new().fail_at(Step::ApiVersion, libc::EACCES);
        let container = mock.open_container(Path::new("/dev/vfio/vfio")).unwrap();
        let err = mock.api_version(container).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        assert_eq!(mock.calls(), vec![Step::OpenContainer, Step::ApiVersion]);
    }

    #[test]
    fn unknown_device_and_region() -> anyhow::Result<()> {
        let mock = MockControl::new();
        let group = mock.open_group(Path::new("/dev/vfio/16"))?;
        let err = mock.device(group, "0000:23:00.0").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENODEV));
        let device = mock.device(group, "0000:22:00.0")?;
        let err = mock.region_info(device, 5).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        Ok(())
    }

    #[test]
    fn mapped_memory_is_zeroed_and_persists() -> anyhow::Result<()> {
        let mock = MockControl::new();
        let group = mock.open_group(Path::new("/dev/vfio/16"))?;
        let device = mock.device(group, "0000:22:00.0")?;
        let ptr = mock.map_region(device, 0x1000, 0)?;
        unsafe { ptr.as_ptr().write(0xab) };
        unsafe { mock.unmap_region(ptr, 0x1000) }?;
        let memory = mock.memory(0).unwrap();
        assert_eq!(memory.len(), 0x4000);
        assert_eq!(memory[0], 0xab);
        assert!(memory[1..].iter().all(|&b| b == 0));
        assert!(mock.map_region(device, 0x4001, 0).is_err());
        Ok(())
    }

    #[test]
    fn close_unknown_handle() {
        let mock = MockControl::new();
        let err = mock.close(Handle::new(42)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}
