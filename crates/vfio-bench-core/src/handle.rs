//! Owning wrappers for VFIO container, group and device handles.
//!
//! The wrappers nest by borrowing: a [`Group`] borrows the [`Container`] it was opened
//! against, a [`Device`] borrows its [`Group`], and a [`Mapping`](crate::Mapping)
//! borrows its [`Device`]. Dropping a wrapper closes its handle, so resources are always
//! released inner-to-outer, on the success path and on every early return alike, and an
//! outer handle can never be closed while an inner one is alive.

use crate::control::{DeviceControl, DeviceInfo, GroupStatus, Handle, IommuModel, RegionInfo};
use crate::error::{Error, Result, Step};
use crate::mapping::Mapping;
use crate::util::PciAddress;
use log::{debug, info, warn};
use std::cell::Cell;
use std::path::{Path, PathBuf};

fn release<C: DeviceControl>(ctl: &C, handle: Handle, what: &str) {
    debug!("Closing {} ({})", what, handle);
    if let Err(e) = ctl.close(handle) {
        warn!("Failed to close {} ({}): {}", what, handle, e);
    }
}

/// An open VFIO container.
///
/// Owns the control channel and the container handle. Must outlive every [`Group`]
/// opened against it, which the borrow checker enforces.
pub struct Container<C: DeviceControl> {
    ctl: C,
    handle: Handle,
    path: PathBuf,
    attached_groups: Cell<u32>,
    iommu: Cell<Option<IommuModel>>,
}

impl<C: DeviceControl> Container<C> {
    /// Opens the container node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Os`] if the node is missing or access is denied.
    pub fn open(ctl: C, path: &Path) -> Result<Self> {
        info!("Opening VFIO container {:?}", path);
        let handle = ctl
            .open_container(path)
            .map_err(|e| Error::os(Step::OpenContainer, e))?;
        Ok(Container {
            ctl,
            handle,
            path: path.to_path_buf(),
            attached_groups: Cell::new(0),
            iommu: Cell::new(None),
        })
    }

    /// Verifies that the kernel speaks the expected VFIO API version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ApiVersionMismatch`] if the versions differ, or [`Error::Os`] if
    /// the request itself fails.
    pub fn check_api_version(&self, expected: i32) -> Result<i32> {
        let found = self
            .ctl
            .api_version(self.handle)
            .map_err(|e| Error::os(Step::ApiVersion, e))?;
        debug!("VFIO API version {}", found);
        if found != expected {
            return Err(Error::ApiVersionMismatch { found, expected });
        }
        Ok(found)
    }

    /// Verifies that the container supports an IOMMU model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IommuUnsupported`] if the extension is missing.
    pub fn check_extension(&self, model: IommuModel) -> Result<()> {
        let supported = self
            .ctl
            .check_extension(self.handle, model)
            .map_err(|e| Error::os(Step::CheckExtension, e))?;
        if !supported {
            return Err(Error::IommuUnsupported(model));
        }
        debug!("Container supports {}", model);
        Ok(())
    }

    /// Selects the IOMMU model.
    ///
    /// The kernel only accepts this once a group is attached; the wrapper refuses
    /// earlier calls without asking the control channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if no group is attached yet, or [`Error::Os`].
    pub fn set_iommu(&self, model: IommuModel) -> Result<()> {
        if self.attached_groups.get() == 0 {
            return Err(Error::InvalidConfig(
                "IOMMU model must be selected after a group is attached".into(),
            ));
        }
        info!("Enabling {}", model);
        self.ctl
            .set_iommu(self.handle, model)
            .map_err(|e| Error::os(Step::SetIommu, e))?;
        self.iommu.set(Some(model));
        Ok(())
    }

    /// Opens an IOMMU group against this container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Os`] if the group node is missing (device not bound to
    /// vfio-pci) or access is denied.
    pub fn open_group(&self, path: &Path) -> Result<Group<'_, C>> {
        info!("Opening VFIO group {:?}", path);
        let handle = self
            .ctl
            .open_group(path)
            .map_err(|e| Error::os(Step::OpenGroup, e))?;
        Ok(Group {
            container: self,
            handle,
            path: path.to_path_buf(),
            attached: Cell::new(false),
        })
    }

    /// The selected IOMMU model, if any.
    pub fn iommu(&self) -> Option<IommuModel> {
        self.iommu.get()
    }

    /// The container handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The control channel.
    pub fn ctl(&self) -> &C {
        &self.ctl
    }

    /// The container node path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<C: DeviceControl> Drop for Container<C> {
    fn drop(&mut self) {
        release(&self.ctl, self.handle, "container");
    }
}

/// An open IOMMU group, bound to at most one container.
pub struct Group<'a, C: DeviceControl> {
    container: &'a Container<C>,
    handle: Handle,
    path: PathBuf,
    attached: Cell<bool>,
}

impl<'a, C: DeviceControl> Group<'a, C> {
    /// Queries the group status.
    pub fn status(&self) -> Result<GroupStatus> {
        self.container
            .ctl
            .group_status(self.handle)
            .map_err(|e| Error::os(Step::GroupStatus, e))
    }

    /// Verifies that every device of the group is bound to vfio-pci.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GroupNotViable`] if the viable flag is clear.
    pub fn ensure_viable(&self) -> Result<GroupStatus> {
        let status = self.status()?;
        if !status.is_viable() {
            return Err(Error::GroupNotViable(self.path.clone()));
        }
        debug!("Group {:?} is viable (flags 0x{:x})", self.path, status.flags);
        Ok(status)
    }

    /// Attaches the group to its container.
    ///
    /// Calling this again on an attached group does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Os`] if the group is already bound to another container.
    pub fn attach(&self) -> Result<()> {
        if self.attached.get() {
            return Ok(());
        }
        info!("Setting container for group {:?}", self.path);
        self.container
            .ctl
            .set_container(self.handle, self.container.handle)
            .map_err(|e| Error::os(Step::SetContainer, e))?;
        self.attached.set(true);
        self.container
            .attached_groups
            .set(self.container.attached_groups.get() + 1);
        Ok(())
    }

    /// Claims a device of this group by bus address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the group is not attached or the container
    /// has no IOMMU model yet, and [`Error::Os`] if the device is not a member of the group.
    pub fn device(&self, address: &PciAddress) -> Result<Device<'_, C>> {
        if !self.attached.get() || self.container.iommu().is_none() {
            return Err(Error::InvalidConfig(
                "the group must be attached and the IOMMU model selected before claiming a device"
                    .into(),
            ));
        }
        let name = address.to_string();
        info!("Getting device {}", name);
        let handle = self
            .container
            .ctl
            .device(self.handle, &name)
            .map_err(|e| Error::os(Step::GetDevice, e))?;
        Ok(Device {
            group: self,
            handle,
            address: *address,
            num_regions: Cell::new(None),
        })
    }

    /// The group handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The container this group was opened against.
    pub fn container(&self) -> &'a Container<C> {
        self.container
    }
}

impl<C: DeviceControl> Drop for Group<'_, C> {
    fn drop(&mut self) {
        release(&self.container.ctl, self.handle, "group");
    }
}

/// A claimed passthrough device.
pub struct Device<'a, C: DeviceControl> {
    group: &'a Group<'a, C>,
    handle: Handle,
    address: PciAddress,
    num_regions: Cell<Option<u32>>,
}

impl<'a, C: DeviceControl> Device<'a, C> {
    /// Queries the device metadata.
    pub fn info(&self) -> Result<DeviceInfo> {
        let info = self
            .ctl()
            .device_info(self.handle)
            .map_err(|e| Error::os(Step::DeviceInfo, e))?;
        self.num_regions.set(Some(info.num_regions));
        Ok(info)
    }

    /// Queries the metadata of one region.
    ///
    /// If [`info()`](Device::info) was called before, indices beyond the device's
    /// region count are rejected without asking the control channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchRegion`] or [`Error::Os`].
    pub fn region(&self, index: u32) -> Result<RegionInfo> {
        if let Some(num_regions) = self.num_regions.get() {
            if index >= num_regions {
                return Err(Error::NoSuchRegion { index, num_regions });
            }
        }
        self.ctl()
            .region_info(self.handle, index)
            .map_err(|e| Error::os(Step::RegionInfo, e))
    }

    /// Maps the first `len` bytes of a region.
    ///
    /// # Panics
    ///
    /// Panics if the region is not mappable. Callers check
    /// [`RegionInfo::is_mappable()`] first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WindowTooLarge`] if `len` exceeds the region,
    /// [`Error::InvalidConfig`] if `len` is zero, and [`Error::Os`] if the kernel
    /// rejects the mapping.
    pub fn map(&self, region: &RegionInfo, len: usize) -> Result<Mapping<'_, C>> {
        assert!(
            region.is_mappable(),
            "Device::map called on non-mappable region {} (flags 0x{:x})",
            region.index,
            region.flags
        );
        if len == 0 {
            return Err(Error::InvalidConfig("mapping length must be non-zero".into()));
        }
        if len as u64 > region.size {
            return Err(Error::WindowTooLarge {
                index: region.index,
                len,
                size: region.size,
            });
        }
        let ptr = self
            .ctl()
            .map_region(self.handle, len, region.offset)
            .map_err(|e| Error::os(Step::Map, e))?;
        info!(
            "Mapped 0x{:x} bytes of region {} of {} at {:p}",
            len, region.index, self.address, ptr
        );
        Ok(Mapping::new(self, ptr, len, *region))
    }

    /// The device handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The device bus address.
    pub fn address(&self) -> &PciAddress {
        &self.address
    }

    pub(crate) fn ctl(&self) -> &'a C {
        self.group.container.ctl()
    }
}

impl<C: DeviceControl> Drop for Device<'_, C> {
    fn drop(&mut self) {
        release(self.ctl(), self.handle, "device");
    }
}
