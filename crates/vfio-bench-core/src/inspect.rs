//! Sample dumps and test writes at probe offsets.
//!
//! Writing is destructive. Only probe windows backed by scratch memory.

use crate::control::DeviceControl;
use crate::error::Result;
use crate::mapping::Mapping;
use crate::util::hex_lines;
use log::{info, warn};
use serde::Serialize;
use std::fmt;

/// Dumps and write outcome of one probe offset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Inspection {
    /// Window offset of the probe
    pub offset: usize,
    /// Bytes before the write
    pub before: Vec<u8>,
    /// Value written, if the write happened
    pub written: Option<u64>,
    /// Value read back at the offset after the write
    pub readback: Option<u64>,
    /// Bytes after the write
    pub after: Option<Vec<u8>>,
}

impl Inspection {
    /// Whether the value read back equals the value written.
    ///
    /// True when nothing was written.
    pub fn readback_matches(&self) -> bool {
        self.written == self.readback
    }
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory at offset 0x{:x}:", self.offset)?;
        for line in hex_lines(&self.before, self.offset) {
            writeln!(f, "{}", line)?;
        }
        if let (Some(value), Some(after)) = (self.written, &self.after) {
            writeln!(f, "After writing 0x{:016x} at 0x{:x}:", value, self.offset)?;
            for line in hex_lines(after, self.offset) {
                writeln!(f, "{}", line)?;
            }
        }
        Ok(())
    }
}

/// Dumps `dump_len` bytes at `offset`, writes `pattern` there and dumps again.
///
/// With `pattern` unset, or if the region lacks the WRITE flag, only the first dump is
/// taken. A readback that differs from the pattern is logged, not treated as failure.
///
/// # Errors
///
/// Returns [`Error::OutOfBounds`](crate::Error::OutOfBounds) before any access if the dump
/// or the write does not fit into the window.
pub fn inspect<C: DeviceControl>(
    window: &mut Mapping<'_, C>,
    offset: usize,
    dump_len: usize,
    pattern: Option<u64>,
) -> Result<Inspection> {
    window.check_range(offset, dump_len)?;
    let pattern = match pattern {
        Some(_) if !window.region().is_writable() => {
            warn!(
                "Region {} is not writable (flags 0x{:x}), skipping write at 0x{:x}",
                window.region().index,
                window.region().flags,
                offset
            );
            None
        }
        p => p,
    };
    if pattern.is_some() {
        window.check_range(offset, 8)?;
    }
    let before = window.read_vec(offset, dump_len)?;
    let mut inspection = Inspection {
        offset,
        before,
        written: None,
        readback: None,
        after: None,
    };
    if let Some(value) = pattern {
        info!("Writing 0x{:016x} at offset 0x{:x}", value, offset);
        window.write_u64(offset, value)?;
        let readback = window.read_u64(offset)?;
        if readback != value {
            warn!(
                "Readback at 0x{:x} is 0x{:016x}, wrote 0x{:016x}",
                offset, readback, value
            );
        }
        inspection.written = Some(value);
        inspection.readback = Some(readback);
        inspection.after = Some(window.read_vec(offset, dump_len)?);
    }
    Ok(inspection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shows_both_dumps() {
        let mut after = vec![0u8; 32];
        after[..8].copy_from_slice(&0x1234567890abcdefu64.to_le_bytes());
        let inspection = Inspection {
            offset: 0x4000,
            before: vec![0u8; 32],
            written: Some(0x1234567890abcdef),
            readback: Some(0x1234567890abcdef),
            after: Some(after),
        };
        assert!(inspection.readback_matches());
        let text = inspection.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "Memory at offset 0x4000:");
        assert!(lines[1].starts_with("4000: 00 00"));
        assert!(lines[4].starts_with("4000: ef cd ab 90 78 56 34 12 00"));
        assert!(lines[5].starts_with("4010: 00"));
    }

    #[test]
    fn no_write_shows_one_dump() {
        let inspection = Inspection {
            offset: 0,
            before: vec![0xffu8; 4],
            written: None,
            readback: None,
            after: None,
        };
        assert!(inspection.readback_matches());
        assert_eq!(inspection.to_string(), "Memory at offset 0x0:\n0000: ff ff ff ff\n");
    }
}
