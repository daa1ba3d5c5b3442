use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A PCI bus address (`domain:bus:device.function`).
///
/// The kernel names VFIO devices by this address, so its [`Display`](fmt::Display) form is
/// the canonical lowercase `dddd:bb:dd.f`.
///
/// # Examples
///
/// ```
/// use vfio_bench_core::util::PciAddress;
///
/// let addr: PciAddress = "22:00.0".parse().unwrap();
/// assert_eq!(addr.to_string(), "0000:22:00.0");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PciAddress {
    /// PCI domain (segment)
    pub domain: u16,
    /// Bus number
    pub bus: u8,
    /// Device number, at most 0x1f
    pub device: u8,
    /// Function number, at most 7
    pub function: u8,
}

/// Error returned when a PCI address string is malformed.
#[derive(Debug, thiserror::Error)]
#[error("invalid PCI address {0:?} (expected [dddd:]bb:dd.f)")]
pub struct ParsePciAddressError(String);

impl PciAddress {
    /// Creates an address, validating the device and function ranges.
    pub fn new(domain: u16, bus: u8, device: u8, function: u8) -> Option<Self> {
        (device <= 0x1f && function <= 7).then_some(PciAddress {
            domain,
            bus,
            device,
            function,
        })
    }
}

impl FromStr for PciAddress {
    type Err = ParsePciAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePciAddressError(s.to_string());
        let (head, function) = s.trim().rsplit_once('.').ok_or_else(err)?;
        let parts: Vec<&str> = head.split(':').collect();
        let (domain, bus, device) = match parts.as_slice() {
            [bus, device] => ("0", *bus, *device),
            [domain, bus, device] => (*domain, *bus, *device),
            _ => return Err(err()),
        };
        let hex = |s: &str, max_digits: usize| {
            if s.is_empty() || s.len() > max_digits {
                return Err(err());
            }
            u16::from_str_radix(s, 16).map_err(|_| err())
        };
        let domain = hex(domain, 4)?;
        let bus = hex(bus, 2)? as u8;
        let device = hex(device, 2)? as u8;
        let function = hex(function, 1)? as u8;
        PciAddress::new(domain, bus, device, function).ok_or_else(err)
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl Default for PciAddress {
    fn default() -> Self {
        PciAddress {
            domain: 0,
            bus: 0x22,
            device: 0,
            function: 0,
        }
    }
}

impl Serialize for PciAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PciAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_short_and_full() {
        let short: PciAddress = "22:00.0".parse().unwrap();
        let full: PciAddress = "0000:22:00.0".parse().unwrap();
        assert_eq!(short, full);
        let addr: PciAddress = "000A:Bf:1f.7".parse().unwrap();
        assert_eq!(addr.to_string(), "000a:bf:1f.7");
    }

    #[test]
    fn reject_malformed() {
        for s in ["", "22:00", "0000:22:20.0", "22:00.8", "x:00.0", "00000:22:00.0", "1:2:3:4.0"] {
            assert!(s.parse::<PciAddress>().is_err(), "{:?} parsed", s);
        }
    }

    #[test]
    fn serde_as_string() {
        let addr: PciAddress = serde_json::from_str("\"0000:03:00.1\"").unwrap();
        assert_eq!(addr.function, 1);
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"0000:03:00.1\"");
    }
}
