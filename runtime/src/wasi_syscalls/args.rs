use log::debug;

use crate::runtime::memory::GuestMemory;
use crate::runtime::process::ProcessData;
use crate::wasi_syscalls::types::{Errno, WasiResult};

/// Count and total NUL-terminated byte size of a string list.
fn sizes(strings: &[String]) -> WasiResult<(u32, u32)> {
    let count = u32::try_from(strings.len()).map_err(|_| Errno::Overflow)?;
    let size = strings
        .iter()
        .try_fold(0u32, |acc, s| {
            u32::try_from(s.len() + 1).ok().and_then(|len| acc.checked_add(len))
        })
        .ok_or(Errno::Overflow)?;
    Ok((count, size))
}

/// Writes `strings` NUL-terminated and back to back at `buf_ptr`, and a
/// pointer to each at `ptrs_ptr`. The whole destination is checked first.
fn write_strings(
    mem: &mut GuestMemory<'_>,
    strings: &[String],
    ptrs_ptr: u32,
    buf_ptr: u32,
) -> WasiResult<()> {
    let (count, size) = sizes(strings)?;
    mem.check(ptrs_ptr, count.checked_mul(4).ok_or(Errno::Overflow)?, 4)?;
    mem.check(buf_ptr, size, 1)?;

    let mut offset = buf_ptr;
    for (i, s) in strings.iter().enumerate() {
        mem.write_u32(ptrs_ptr + i as u32 * 4, offset)?;
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        mem.write_bytes(offset, &bytes)?;
        offset += bytes.len() as u32;
    }
    Ok(())
}

fn write_sizes(
    mem: &mut GuestMemory<'_>,
    strings: &[String],
    count_ptr: u32,
    size_ptr: u32,
) -> WasiResult<()> {
    let (count, size) = sizes(strings)?;
    mem.check(count_ptr, 4, 4)?;
    mem.check(size_ptr, 4, 4)?;
    mem.write_u32(count_ptr, count)?;
    mem.write_u32(size_ptr, size)
}

pub fn args_sizes_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    argc_ptr: u32,
    argv_buf_size_ptr: u32,
) -> WasiResult<()> {
    debug!("args_sizes_get: argc_ptr={}, argv_buf_size_ptr={}", argc_ptr, argv_buf_size_ptr);
    write_sizes(mem, data.config().args(), argc_ptr, argv_buf_size_ptr)
}

pub fn args_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    argv_ptr: u32,
    argv_buf_ptr: u32,
) -> WasiResult<()> {
    debug!("args_get: argv_ptr={}, argv_buf_ptr={}", argv_ptr, argv_buf_ptr);
    write_strings(mem, data.config().args(), argv_ptr, argv_buf_ptr)
}

pub fn environ_sizes_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    count_ptr: u32,
    buf_size_ptr: u32,
) -> WasiResult<()> {
    write_sizes(mem, &data.config().environ(), count_ptr, buf_size_ptr)
}

pub fn environ_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    environ_ptr: u32,
    environ_buf_ptr: u32,
) -> WasiResult<()> {
    debug!("environ_get: environ_ptr={}, environ_buf_ptr={}", environ_ptr, environ_buf_ptr);
    write_strings(mem, &data.config().environ(), environ_ptr, environ_buf_ptr)
}
