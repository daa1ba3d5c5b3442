//! Errors of the acquisition sequence.

use crate::control::IommuModel;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A step of the acquisition, benchmark and inspection sequence.
///
/// Every error names the step it happened in, which stands in for a source location
/// in the failure log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[allow(missing_docs)]
pub enum Step {
    OpenContainer,
    ApiVersion,
    CheckExtension,
    OpenGroup,
    GroupStatus,
    SetContainer,
    SetIommu,
    GetDevice,
    DeviceInfo,
    RegionInfo,
    Map,
    Unmap,
    Close,
    Benchmark,
    Inspect,
    Config,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::OpenContainer => "open VFIO container",
            Step::ApiVersion => "check VFIO API version",
            Step::CheckExtension => "check IOMMU extension",
            Step::OpenGroup => "open VFIO group",
            Step::GroupStatus => "get group status",
            Step::SetContainer => "set container for group",
            Step::SetIommu => "set IOMMU model",
            Step::GetDevice => "get device FD",
            Step::DeviceInfo => "get device info",
            Step::RegionInfo => "get region info",
            Step::Map => "mmap device region",
            Step::Unmap => "munmap device region",
            Step::Close => "close handle",
            Step::Benchmark => "benchmark",
            Step::Inspect => "inspect",
            Step::Config => "configuration",
        };
        f.write_str(s)
    }
}

/// Taxonomy of failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// A node is missing or access was denied
    ResourceUnavailable,
    /// API version, IOMMU model or region capabilities do not match
    CapabilityMismatch,
    /// The group is not viable
    DeviceState,
    /// The kernel rejected the mapping request
    MappingFailure,
    /// Any other control request failed
    Control,
    /// An access outside the window or an invalid configuration
    Access,
}

/// Errors that can occur while acquiring, using or releasing VFIO resources.
///
/// All of them are fatal for the run. [`Error::code()`] yields the code the process
/// exits with.
#[derive(Debug, Error)]
pub enum Error {
    /// A control request failed with an OS error.
    #[error("Error during {step}: {source}")]
    Os {
        /// The failing step
        step: Step,
        /// The underlying system error
        #[source]
        source: std::io::Error,
    },
    /// The kernel speaks a different VFIO API version.
    #[error("VFIO API version {found} does not match expected {expected}")]
    ApiVersionMismatch {
        /// Version reported by the kernel
        found: i32,
        /// Version this tool expects
        expected: i32,
    },
    /// The container does not support the requested IOMMU model.
    #[error("Container doesn't support {0}")]
    IommuUnsupported(IommuModel),
    /// Not all devices of the group are bound to vfio-pci.
    #[error("Group {0:?} is not viable (are all group devices bound to vfio-pci?)")]
    GroupNotViable(PathBuf),
    /// The region does not support mmap.
    #[error("Region {index} is not mappable (flags 0x{flags:x})")]
    RegionNotMappable {
        /// Region index
        index: u32,
        /// Region flags
        flags: u32,
    },
    /// The requested region index does not exist on the device.
    #[error("Region {index} does not exist, device has {num_regions} regions")]
    NoSuchRegion {
        /// Requested index
        index: u32,
        /// Regions reported by the device
        num_regions: u32,
    },
    /// The requested window is longer than the region.
    #[error("Window of 0x{len:x} bytes exceeds region {index} of 0x{size:x} bytes")]
    WindowTooLarge {
        /// Region index
        index: u32,
        /// Requested window length
        len: usize,
        /// Region size
        size: u64,
    },
    /// An access does not fit into the mapped window.
    #[error("Access of {len} bytes at offset 0x{offset:x} exceeds window of 0x{window:x} bytes")]
    OutOfBounds {
        /// Start of the access
        offset: usize,
        /// Length of the access
        len: usize,
        /// Window length
        window: usize,
    },
    /// The configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type of the acquisition sequence.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps an OS error with the step it happened in.
    pub fn os(step: Step, source: std::io::Error) -> Self {
        Error::Os { step, source }
    }

    /// The step the error happened in.
    pub fn step(&self) -> Step {
        match self {
            Error::Os { step, .. } => *step,
            Error::ApiVersionMismatch { .. } => Step::ApiVersion,
            Error::IommuUnsupported(_) => Step::CheckExtension,
            Error::GroupNotViable(_) => Step::GroupStatus,
            Error::RegionNotMappable { .. }
            | Error::NoSuchRegion { .. }
            | Error::WindowTooLarge { .. } => Step::RegionInfo,
            Error::OutOfBounds { .. } => Step::Inspect,
            Error::InvalidConfig(_) => Step::Config,
        }
    }

    /// The taxonomy class of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Os { step, source } => match step {
                Step::OpenContainer | Step::OpenGroup | Step::GetDevice => {
                    ErrorKind::ResourceUnavailable
                }
                Step::Map => ErrorKind::MappingFailure,
                _ => match source.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                        ErrorKind::ResourceUnavailable
                    }
                    _ => ErrorKind::Control,
                },
            },
            Error::ApiVersionMismatch { .. }
            | Error::IommuUnsupported(_)
            | Error::RegionNotMappable { .. }
            | Error::NoSuchRegion { .. } => ErrorKind::CapabilityMismatch,
            Error::GroupNotViable(_) => ErrorKind::DeviceState,
            Error::WindowTooLarge { .. } | Error::OutOfBounds { .. } | Error::InvalidConfig(_) => {
                ErrorKind::Access
            }
        }
    }

    /// The originating error code.
    ///
    /// The errno for OS errors, a fixed errno value for failures the tool detects itself.
    pub fn code(&self) -> i32 {
        match self {
            Error::Os { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Error::ApiVersionMismatch { .. } => libc::EPROTO,
            Error::IommuUnsupported(_) => libc::ENOTSUP,
            Error::GroupNotViable(_) => libc::EBUSY,
            Error::RegionNotMappable { .. } => libc::EINVAL,
            Error::NoSuchRegion { .. } => libc::EINVAL,
            Error::WindowTooLarge { .. } => libc::EINVAL,
            Error::OutOfBounds { .. } => libc::EFAULT,
            Error::InvalidConfig(_) => libc::EINVAL,
        }
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_error_keeps_errno() {
        let err = Error::os(
            Step::OpenGroup,
            std::io::Error::from_raw_os_error(libc::ENOENT),
        );
        assert_eq!(err.code(), libc::ENOENT);
        assert_eq!(err.step(), Step::OpenGroup);
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert!(err.to_string().starts_with("Error during open VFIO group"));
    }

    #[test]
    fn synthesized_codes() {
        let err = Error::RegionNotMappable { index: 0, flags: 3 };
        assert_eq!(err.code(), libc::EINVAL);
        assert_eq!(err.kind(), ErrorKind::CapabilityMismatch);
        assert_eq!(Error::GroupNotViable("/dev/vfio/16".into()).code(), libc::EBUSY);
        assert_eq!(Error::IommuUnsupported(IommuModel::Type1).code(), libc::ENOTSUP);
    }

    #[test]
    fn os_error_without_errno() {
        let err = Error::os(Step::Map, std::io::Error::other("no errno"));
        assert_eq!(err.code(), libc::EIO);
        assert_eq!(err.kind(), ErrorKind::MappingFailure);
    }
}
