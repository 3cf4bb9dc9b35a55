use anyhow::Result;
use log::{debug, info};
use rand::RngCore;

use crate::runtime::error::ProcExit;
use crate::runtime::memory::GuestMemory;
use crate::runtime::process::{ProcessData, ProcessState};
use crate::wasi_syscalls::types::{Errno, WasiResult};

/// Records the exit code and ends the run. The returned error unwinds the
/// guest out of `_start`; no further syscall is dispatched afterwards.
pub fn proc_exit(data: &mut ProcessData, code: i32) -> Result<()> {
    data.ensure_running("proc_exit")?;
    info!("proc_exit: code={}", code);
    data.exit_code = Some(code);
    data.state = ProcessState::Terminated;
    Err(ProcExit(code).into())
}

/// There is no signal delivery; a guest that raises one keeps running.
pub fn proc_raise(_data: &mut ProcessData, sig: u32) -> WasiResult<()> {
    debug!("proc_raise: sig={}", sig);
    Err(Errno::Nosys)
}

pub fn sched_yield(_data: &mut ProcessData) -> WasiResult<()> {
    debug!("sched_yield");
    Ok(())
}

/// Fills the buffer from the thread-local CSPRNG.
pub fn random_get(
    _data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    buf_ptr: u32,
    buf_len: u32,
) -> WasiResult<()> {
    debug!("random_get: buf_ptr={}, buf_len={}", buf_ptr, buf_len);
    let buf = mem.slice_mut(buf_ptr, buf_len)?;
    rand::thread_rng().fill_bytes(buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::RuntimeConfig;
    use crate::runtime::error::RuntimeError;

    fn running() -> ProcessData {
        let mut data = ProcessData::new(RuntimeConfig::default()).unwrap();
        data.state = ProcessState::Running;
        data
    }

    #[test]
    fn proc_exit_terminates_with_code() {
        let mut data = running();
        let err = proc_exit(&mut data, 42).unwrap_err();
        assert_eq!(err.downcast::<ProcExit>().unwrap(), ProcExit(42));
        assert_eq!(data.exit_code, Some(42));
        assert_eq!(data.state, ProcessState::Terminated);

        let again = proc_exit(&mut data, 1).unwrap_err();
        assert!(matches!(again.downcast_ref::<RuntimeError>(), Some(RuntimeError::Terminated)));
        assert_eq!(data.exit_code, Some(42));
    }

    #[test]
    fn random_get_fills_only_the_requested_range() {
        let mut data = running();
        let mut raw = vec![0u8; 64];
        let mut mem = GuestMemory::new(&mut raw);
        random_get(&mut data, &mut mem, 16, 32).unwrap();
        assert!(mem.slice(0, 16).unwrap().iter().all(|b| *b == 0));
        assert!(mem.slice(48, 16).unwrap().iter().all(|b| *b == 0));
        assert!(mem.slice(16, 32).unwrap().iter().any(|b| *b != 0));
        assert_eq!(random_get(&mut data, &mut mem, 60, 8), Err(Errno::Inval));
    }

    #[test]
    fn raised_signals_are_not_delivered() {
        let mut data = running();
        assert_eq!(proc_raise(&mut data, 15), Err(Errno::Nosys));
        assert_eq!(data.state, ProcessState::Running);
        assert_eq!(data.exit_code, None);
    }
}
