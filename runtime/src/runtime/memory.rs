//! Bounds-checked access to a guest's linear memory.
//!
//! A [`GuestMemory`] borrows the instance's memory for the length of one
//! syscall. Every access is an offset+length pair checked against the
//! current memory size; out-of-range or misaligned requests come back as
//! `Errno::Inval` and touch nothing.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::wasi_syscalls::types::{Errno, WasiResult, IOVEC_SIZE};

/// One `iovec`/`ciovec` read out of guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    pub ptr: u32,
    pub len: u32,
}

pub struct GuestMemory<'a> {
    bytes: &'a mut [u8],
}

impl<'a> GuestMemory<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        GuestMemory { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, ptr: u32, len: u32, align: u32) -> WasiResult<Range<usize>> {
        if ptr % align != 0 {
            debug!("guest pointer {:#x} not aligned to {}", ptr, align);
            return Err(Errno::Inval);
        }
        let start = ptr as usize;
        let end = start.checked_add(len as usize).ok_or(Errno::Inval)?;
        if end > self.bytes.len() {
            debug!(
                "guest range {:#x}..{:#x} outside memory of {} bytes",
                start,
                end,
                self.bytes.len()
            );
            return Err(Errno::Inval);
        }
        Ok(start..end)
    }

    /// Validates a range without reading or writing it.
    pub fn check(&self, ptr: u32, len: u32, align: u32) -> WasiResult<()> {
        self.range(ptr, len, align).map(|_| ())
    }

    pub fn slice(&self, ptr: u32, len: u32) -> WasiResult<&[u8]> {
        let range = self.range(ptr, len, 1)?;
        Ok(&self.bytes[range])
    }

    pub fn slice_mut(&mut self, ptr: u32, len: u32) -> WasiResult<&mut [u8]> {
        let range = self.range(ptr, len, 1)?;
        Ok(&mut self.bytes[range])
    }

    pub fn read_u32(&self, ptr: u32) -> WasiResult<u32> {
        let range = self.range(ptr, 4, 4)?;
        Ok(LittleEndian::read_u32(&self.bytes[range]))
    }

    pub fn write_u32(&mut self, ptr: u32, value: u32) -> WasiResult<()> {
        let range = self.range(ptr, 4, 4)?;
        LittleEndian::write_u32(&mut self.bytes[range], value);
        Ok(())
    }

    pub fn write_u64(&mut self, ptr: u32, value: u64) -> WasiResult<()> {
        let range = self.range(ptr, 8, 8)?;
        LittleEndian::write_u64(&mut self.bytes[range], value);
        Ok(())
    }

    pub fn write_bytes(&mut self, ptr: u32, data: &[u8]) -> WasiResult<()> {
        let len = u32::try_from(data.len()).map_err(|_| Errno::Inval)?;
        self.slice_mut(ptr, len)?.copy_from_slice(data);
        Ok(())
    }

    /// Reads a UTF-8 string such as a path argument.
    pub fn read_str(&self, ptr: u32, len: u32) -> WasiResult<&str> {
        std::str::from_utf8(self.slice(ptr, len)?).map_err(|_| Errno::Ilseq)
    }

    /// Decodes an iovec array and checks that every buffer it names lies
    /// inside memory.
    pub fn read_iovecs(&self, ptr: u32, count: u32) -> WasiResult<Vec<IoVec>> {
        let table_len = count.checked_mul(IOVEC_SIZE).ok_or(Errno::Inval)?;
        let table = self.range(ptr, table_len, 4)?;
        let iovs: Vec<IoVec> = self.bytes[table]
            .chunks_exact(IOVEC_SIZE as usize)
            .map(|raw| IoVec {
                ptr: LittleEndian::read_u32(&raw[0..4]),
                len: LittleEndian::read_u32(&raw[4..8]),
            })
            .collect();
        for iov in &iovs {
            self.range(iov.ptr, iov.len, 1)?;
        }
        Ok(iovs)
    }

    /// Concatenates the buffers named by `iovs`.
    pub fn gather(&self, iovs: &[IoVec]) -> WasiResult<Vec<u8>> {
        let mut out = Vec::new();
        for iov in iovs {
            out.extend_from_slice(self.slice(iov.ptr, iov.len)?);
        }
        Ok(out)
    }

    /// Spreads `data` across `iovs` in order; returns the bytes placed.
    pub fn scatter(&mut self, iovs: &[IoVec], data: &[u8]) -> WasiResult<usize> {
        let mut placed = 0;
        for iov in iovs {
            if placed == data.len() {
                break;
            }
            let take = (iov.len as usize).min(data.len() - placed);
            self.slice_mut(iov.ptr, take as u32)?
                .copy_from_slice(&data[placed..placed + take]);
            placed += take;
        }
        Ok(placed)
    }
}

/// Sum of iovec lengths, saturating.
pub fn iovecs_len(iovs: &[IoVec]) -> usize {
    iovs.iter().fold(0usize, |acc, iov| acc.saturating_add(iov.len as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ranges_past_the_end_without_touching_memory() {
        let mut raw = vec![7u8; 16];
        let mut mem = GuestMemory::new(&mut raw);
        assert_eq!(mem.write_bytes(14, b"abc"), Err(Errno::Inval));
        assert_eq!(mem.slice(u32::MAX, 2), Err(Errno::Inval));
        assert_eq!(mem.write_u32(16, 1), Err(Errno::Inval));
        assert!(raw.iter().all(|b| *b == 7));
    }

    #[test]
    fn rejects_misaligned_scalars() {
        let mut raw = vec![0u8; 16];
        let mut mem = GuestMemory::new(&mut raw);
        assert_eq!(mem.read_u32(2), Err(Errno::Inval));
        assert_eq!(mem.write_u64(4, 1), Err(Errno::Inval));
        mem.write_u64(8, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(mem.read_u32(8).unwrap(), 0x0506_0708);
    }

    #[test]
    fn iovecs_gather_and_scatter() {
        let mut raw = vec![0u8; 64];
        // two iovecs at 0: {32, 3} and {40, 4}
        raw[0..4].copy_from_slice(&32u32.to_le_bytes());
        raw[4..8].copy_from_slice(&3u32.to_le_bytes());
        raw[8..12].copy_from_slice(&40u32.to_le_bytes());
        raw[12..16].copy_from_slice(&4u32.to_le_bytes());
        raw[32..35].copy_from_slice(b"abc");
        raw[40..44].copy_from_slice(b"defg");

        let mut mem = GuestMemory::new(&mut raw);
        let iovs = mem.read_iovecs(0, 2).unwrap();
        assert_eq!(iovecs_len(&iovs), 7);
        assert_eq!(mem.gather(&iovs).unwrap(), b"abcdefg");

        assert_eq!(mem.scatter(&iovs, b"XYZQ").unwrap(), 4);
        assert_eq!(mem.slice(32, 3).unwrap(), b"XYZ");
        assert_eq!(mem.slice(40, 4).unwrap(), b"Qefg");
    }

    #[test]
    fn iovec_pointing_outside_memory_is_rejected() {
        let mut raw = vec![0u8; 32];
        raw[0..4].copy_from_slice(&30u32.to_le_bytes());
        raw[4..8].copy_from_slice(&8u32.to_le_bytes());
        let mem = GuestMemory::new(&mut raw);
        assert_eq!(mem.read_iovecs(0, 1), Err(Errno::Inval));
        assert_eq!(mem.read_iovecs(0, u32::MAX), Err(Errno::Inval));
    }

    #[test]
    fn invalid_utf8_path_is_ilseq() {
        let mut raw = vec![0xffu8, 0xfe, b'a'];
        let mem = GuestMemory::new(&mut raw);
        assert_eq!(mem.read_str(0, 3), Err(Errno::Ilseq));
        assert_eq!(mem.read_str(2, 1), Ok("a"));
    }
}
