//! The mapped window onto a device region.

use crate::control::{DeviceControl, RegionInfo};
use crate::error::{Error, Result};
use crate::handle::Device;
use log::{debug, warn};
use std::ptr::NonNull;

/// A read/write window onto the backing memory of a device region.
///
/// The window is owned by the [`Device`] it was mapped from and is unmapped when dropped.
/// It holds a raw pointer and is therefore neither `Send` nor `Sync`.
///
/// # Memory semantics
///
/// The backing memory may be MMIO. Bulk copies ([`read_bytes`](Mapping::read_bytes),
/// [`write_bytes`](Mapping::write_bytes)) are plain `memcpy`; single words
/// ([`read_u64`](Mapping::read_u64), [`write_u64`](Mapping::write_u64)) are volatile.
/// No fence is issued: a store is observed by the device only once the CPU retires it,
/// and reading back a value is only an identity on memory without read side effects.
pub struct Mapping<'a, C: DeviceControl> {
    device: &'a Device<'a, C>,
    ptr: NonNull<u8>,
    len: usize,
    region: RegionInfo,
}

impl<'a, C: DeviceControl> Mapping<'a, C> {
    pub(crate) fn new(
        device: &'a Device<'a, C>,
        ptr: NonNull<u8>,
        len: usize,
        region: RegionInfo,
    ) -> Self {
        Mapping {
            device,
            ptr,
            len,
            region,
        }
    }

    /// Returns a pointer to the start of the window.
    pub fn ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns the window length in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the region descriptor this window was mapped from.
    pub fn region(&self) -> &RegionInfo {
        &self.region
    }

    /// Returns a pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is outside the window.
    pub fn addr(&self, offset: usize) -> *mut u8 {
        assert!(
            offset < self.len,
            "Mapping::addr failed. Offset {} >= {}",
            offset,
            self.len
        );
        unsafe { self.ptr.as_ptr().byte_add(offset) }
    }

    /// Checks that `len` bytes starting at `offset` lie inside the window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] otherwise.
    pub fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::OutOfBounds {
                offset,
                len,
                window: self.len,
            }),
        }
    }

    /// Copies bytes out of the window.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        // SAFETY: the range is inside the live mapping; buf is a distinct host allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(self.addr(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copies bytes into the window.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        // SAFETY: see read_bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.addr(offset), data.len());
        }
        Ok(())
    }

    /// Reads `count` bytes with one volatile load per byte.
    pub fn read_vec(&self, offset: usize, count: usize) -> Result<Vec<u8>> {
        self.check_range(offset, count)?;
        Ok((0..count)
            .map(|i| unsafe { std::ptr::read_volatile(self.addr(offset + i)) })
            .collect())
    }

    /// Reads a little-endian 64-bit value.
    ///
    /// Uses a single volatile load if `offset` is 8-byte aligned, byte loads otherwise.
    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        self.check_range(offset, 8)?;
        let p = self.addr(offset);
        if p as usize % std::mem::align_of::<u64>() == 0 {
            let raw = unsafe { std::ptr::read_volatile(p as *const u64) };
            Ok(u64::from_le(raw))
        } else {
            let mut bytes = [0u8; 8];
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = unsafe { std::ptr::read_volatile(p.byte_add(i)) };
            }
            Ok(u64::from_le_bytes(bytes))
        }
    }

    /// Writes a 64-bit value in little-endian byte order.
    ///
    /// Uses a single volatile store if `offset` is 8-byte aligned, byte stores otherwise.
    pub fn write_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        self.check_range(offset, 8)?;
        let p = self.addr(offset);
        if p as usize % std::mem::align_of::<u64>() == 0 {
            unsafe { std::ptr::write_volatile(p as *mut u64, value.to_le()) };
        } else {
            for (i, b) in value.to_le_bytes().into_iter().enumerate() {
                unsafe { std::ptr::write_volatile(p.byte_add(i), b) };
            }
        }
        Ok(())
    }
}

impl<C: DeviceControl> Drop for Mapping<'_, C> {
    fn drop(&mut self) {
        debug!("Unmapping 0x{:x} bytes at {:p}", self.len, self.ptr);
        // SAFETY: ptr/len are exactly what map_region returned and the window is going away.
        if let Err(e) = unsafe { self.device.ctl().unmap_region(self.ptr, self.len) } {
            warn!("Error unmapping memory: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeControl, with_window};

    #[test]
    fn u64_round_trip_aligned_and_unaligned() {
        let ctl = FakeControl::new();
        with_window(&ctl, 0x100, |window| {
            for offset in [0, 3, 0x100 - 8] {
                window.write_u64(offset, 0x1234567890abcdef).unwrap();
                assert_eq!(window.read_u64(offset).unwrap(), 0x1234567890abcdef);
                assert_eq!(
                    window.read_vec(offset, 8).unwrap(),
                    vec![0xef, 0xcd, 0xab, 0x90, 0x78, 0x56, 0x34, 0x12]
                );
            }
        });
    }

    #[test]
    fn unaligned_write_leaves_neighbours() {
        let ctl = FakeControl::new();
        with_window(&ctl, 0x20, |window| {
            window.write_u64(3, u64::MAX).unwrap();
            let bytes = window.read_vec(0, 16).unwrap();
            assert_eq!(&bytes[..3], &[0, 0, 0]);
            assert_eq!(&bytes[3..11], &[0xff; 8]);
            assert_eq!(&bytes[11..], &[0; 5]);
        });
    }

    #[test]
    fn range_checks() {
        let ctl = FakeControl::new();
        with_window(&ctl, 0x100, |window| {
            assert!(window.check_range(0, 0x100).is_ok());
            assert!(window.check_range(0x100, 0).is_ok());
            assert!(matches!(
                window.check_range(usize::MAX, 8),
                Err(Error::OutOfBounds {
                    offset: usize::MAX,
                    len: 8,
                    window: 0x100
                })
            ));
            assert!(window.read_u64(0xf9).is_err());
            assert!(window.write_u64(0x100, 0).is_err());
            let mut buf = [0u8; 2];
            assert!(window.read_bytes(0xff, &mut buf).is_err());
            assert!(window.write_bytes(0xff, &buf).is_err());
            assert!(window.read_vec(0, 0x101).is_err());
        });
    }

    #[test]
    fn bulk_copies() {
        let ctl = FakeControl::new();
        with_window(&ctl, 0x100, |window| {
            window.write_bytes(0x10, &[1, 2, 3]).unwrap();
            let mut buf = [0u8; 5];
            window.read_bytes(0x0f, &mut buf).unwrap();
            assert_eq!(buf, [0, 1, 2, 3, 0]);
            window.read_bytes(0x100, &mut []).unwrap();
        });
    }
}
