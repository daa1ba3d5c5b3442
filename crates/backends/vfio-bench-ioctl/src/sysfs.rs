use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use vfio_bench_core::util::PciAddress;

/// Errors while reading PCI device information from sysfs.
#[derive(Debug, Error)]
pub enum SysfsError {
    /// No PCI device with this address exists.
    #[error("PCI device {0} not found in sysfs")]
    NoDevice(PciAddress),
    /// The device has no IOMMU group, typically because the IOMMU is disabled.
    #[error("PCI device {0} has no IOMMU group (is the IOMMU enabled?)")]
    NoIommuGroup(PciAddress),
    /// The IOMMU group link does not end in a group number.
    #[error("Malformed IOMMU group link {0:?}")]
    BadGroupLink(PathBuf),
    /// Any other I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Read-only view of the PCI devices in sysfs.
///
/// Never writes: binding a device to `vfio-pci` is left to the administrator.
#[derive(Clone, Debug)]
pub struct Sysfs {
    root: PathBuf,
    vfio_dir: PathBuf,
}

impl Default for Sysfs {
    fn default() -> Self {
        Sysfs::new("/sys", "/dev/vfio")
    }
}

impl Sysfs {
    /// Creates a view rooted at `root` (normally `/sys`) resolving group nodes in
    /// `vfio_dir` (normally `/dev/vfio`).
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(root: P, vfio_dir: Q) -> Self {
        Sysfs {
            root: root.into(),
            vfio_dir: vfio_dir.into(),
        }
    }

    fn device_dir(&self, address: &PciAddress) -> Result<PathBuf, SysfsError> {
        let dir = self.root.join("bus/pci/devices").join(address.to_string());
        if !dir.exists() {
            return Err(SysfsError::NoDevice(*address));
        }
        Ok(dir)
    }

    /// Returns the IOMMU group number of a device.
    pub fn iommu_group(&self, address: &PciAddress) -> Result<u32, SysfsError> {
        let link = self.device_dir(address)?.join("iommu_group");
        let target = match std::fs::read_link(&link) {
            Ok(target) => target,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SysfsError::NoIommuGroup(*address));
            }
            Err(e) => return Err(e.into()),
        };
        let group = target
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse().ok())
            .ok_or_else(|| SysfsError::BadGroupLink(target.clone()))?;
        debug!("{} is in IOMMU group {}", address, group);
        Ok(group)
    }

    /// Returns the VFIO group node of a device, e.g. `/dev/vfio/16`.
    pub fn group_path(&self, address: &PciAddress) -> Result<PathBuf, SysfsError> {
        Ok(self.vfio_dir.join(self.iommu_group(address)?.to_string()))
    }

    /// Returns the name of the driver bound to a device, if any.
    pub fn bound_driver(&self, address: &PciAddress) -> Result<Option<String>, SysfsError> {
        let link = self.device_dir(address)?.join("driver");
        match std::fs::read_link(&link) {
            Ok(target) => Ok(target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The sysfs root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
