use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Memory size representation supporting common units.
///
/// Window lengths, block sizes and dump lengths are given as `Size`. All units use binary
/// (base-2) multipliers (1 KB = 1024 bytes).
///
/// # Examples
///
/// ```
/// use vfio_bench_core::util::Size;
///
/// let size = Size::KB(16);
/// assert_eq!(size.bytes(), 16 * 1024);
///
/// let parsed: Size = "0x5000".parse().unwrap();
/// assert_eq!(parsed.bytes(), 0x5000);
///
/// let large: Size = "4M".parse().unwrap();
/// assert_eq!(large.bytes(), 4 * (1 << 20));
/// ```
#[derive(Clone, Copy, Debug)]
pub enum Size {
    /// Size in bytes
    B(usize),
    /// Size in kilobytes (1 KB = 1024 bytes)
    KB(usize),
    /// Size in megabytes (1 MB = 1024 KB)
    MB(usize),
    /// Size in gigabytes (1 GB = 1024 MB)
    GB(usize),
}

impl Size {
    /// Converts this size to bytes.
    ///
    /// Saturates at `usize::MAX` instead of overflowing.
    ///
    /// # Examples
    ///
    /// ```
    /// use vfio_bench_core::util::Size;
    ///
    /// assert_eq!(Size::B(100).bytes(), 100);
    /// assert_eq!(Size::KB(1).bytes(), 1024);
    /// assert_eq!(Size::MB(1).bytes(), 1048576);
    /// assert_eq!(Size::GB(1).bytes(), 1073741824);
    /// ```
    pub const fn bytes(&self) -> usize {
        match self {
            Size::B(bytes) => *bytes,
            Size::KB(kb) => kb.saturating_mul(1 << 10),
            Size::MB(mb) => mb.saturating_mul(1 << 20),
            Size::GB(gb) => gb.saturating_mul(1 << 30),
        }
    }
}

impl PartialEq for Size {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for Size {}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Size::B(bytes) => write!(f, "{} B", bytes),
            Size::KB(kb) => write!(f, "{} KiB", kb),
            Size::MB(mb) => write!(f, "{} MiB", mb),
            Size::GB(gb) => write!(f, "{} GiB", gb),
        }
    }
}

/// Error returned when a size string cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid size {0:?} (expected e.g. 4096, 0x5000, 16K, 4M, 1G)")]
pub struct ParseSizeError(String);

impl FromStr for Size {
    type Err = ParseSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSizeError(s.to_string());
        let t = s.trim();
        if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            return usize::from_str_radix(hex, 16).map(Size::B).map_err(|_| err());
        }
        let t = t.trim_end_matches(['B', 'b']).trim_end_matches(['i', 'I']);
        let (digits, unit, shift): (&str, fn(usize) -> Size, u32) = match t.chars().last() {
            Some('k' | 'K') => (&t[..t.len() - 1], Size::KB, 10),
            Some('m' | 'M') => (&t[..t.len() - 1], Size::MB, 20),
            Some('g' | 'G') => (&t[..t.len() - 1], Size::GB, 30),
            _ => (t, Size::B, 0),
        };
        let count = digits.trim().parse::<usize>().map_err(|_| err())?;
        // The byte count must fit into usize.
        count.checked_mul(1 << shift).ok_or_else(err)?;
        Ok(unit(count))
    }
}

impl Serialize for Size {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bytes() as u64)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Bytes(usize),
    Text(String),
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match SizeRepr::deserialize(deserializer)? {
            SizeRepr::Bytes(bytes) => Ok(Size::B(bytes)),
            SizeRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::util::Size;

    #[test]
    fn size_conversions() {
        let bytes = Size::B(12);
        assert_eq!(bytes.bytes(), 12);
        let mb = Size::MB(12);
        assert_eq!(mb.bytes(), 12 * (1 << 20));
        let gb = Size::GB(12);
        assert_eq!(gb.bytes(), 12 * (1 << 30));
    }

    #[test]
    fn size_parse() {
        assert_eq!("4096".parse::<Size>().unwrap().bytes(), 4096);
        assert_eq!("0x4000".parse::<Size>().unwrap().bytes(), 0x4000);
        assert_eq!("16K".parse::<Size>().unwrap(), Size::KB(16));
        assert_eq!("16KiB".parse::<Size>().unwrap(), Size::KB(16));
        assert_eq!("4 MB".parse::<Size>().unwrap(), Size::MB(4));
        assert!("lots".parse::<Size>().is_err());
        assert!("0xzz".parse::<Size>().is_err());
    }

    #[test]
    fn size_parse_rejects_overflow() {
        assert!("99999999999999G".parse::<Size>().is_err());
        assert!(format!("{}K", usize::MAX).parse::<Size>().is_err());
        assert!(format!("{}", usize::MAX).parse::<Size>().is_ok());
        let res: Result<Vec<Size>, _> = serde_json::from_str(r#"["99999999999999G"]"#);
        assert!(res.is_err());
    }

    #[test]
    fn bytes_saturates() {
        assert_eq!(Size::GB(usize::MAX).bytes(), usize::MAX);
        assert_eq!(Size::KB(usize::MAX / 1024).bytes(), usize::MAX / 1024 * 1024);
    }

    #[test]
    fn size_serde() {
        let sizes: Vec<Size> = serde_json::from_str(r#"[64, "0x5000", "4K"]"#).unwrap();
        assert_eq!(sizes, vec![Size::B(64), Size::B(0x5000), Size::KB(4)]);
        assert_eq!(serde_json::to_string(&Size::KB(4)).unwrap(), "4096");
    }
}
