use log::debug;

use crate::runtime::memory::GuestMemory;
use crate::runtime::process::ProcessData;
use crate::wasi_syscalls::types::WasiResult;

pub fn clock_res_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    clock_id: u32,
    resolution_ptr: u32,
) -> WasiResult<()> {
    debug!("clock_res_get: clock_id={}", clock_id);
    mem.check(resolution_ptr, 8, 8)?;
    let resolution = data.clock.resolution(clock_id)?;
    mem.write_u64(resolution_ptr, resolution)
}

/// `precision` is a hint and is ignored.
pub fn clock_time_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    clock_id: u32,
    _precision: u64,
    time_ptr: u32,
) -> WasiResult<()> {
    mem.check(time_ptr, 8, 8)?;
    let now = data.clock.now(clock_id)?;
    mem.write_u64(time_ptr, now)
}
