//! Utility types used throughout the benchmark.
//!
//! - [`Size`] - Byte quantities with binary units
//! - [`PciAddress`] - Validated PCI bus addresses
//! - [`hex_lines`] - Offset-prefixed hex dumps
//! - Progress reporting utilities ([`NamedProgress`])

mod hexdump;
mod named_progress;
mod pci;
mod size;

pub use self::hexdump::{BYTES_PER_LINE, hex_lines};
pub use self::named_progress::NamedProgress;
pub use self::pci::{ParsePciAddressError, PciAddress};
pub use self::size::{ParseSizeError, Size};

/// Bytes per mebibyte, the unit bandwidth is reported in.
pub const MIB: f64 = (1 << 20) as f64;
