//! Socket calls. No descriptor in this runtime is a socket, so each call
//! only tells a dead fd apart from a live non-socket one.

use log::debug;

use crate::runtime::process::ProcessData;
use crate::wasi_syscalls::types::{Errno, WasiResult};

fn not_a_socket(data: &ProcessData, call: &str, fd: u32) -> WasiResult<()> {
    debug!("{}: fd={}", call, fd);
    data.fd_table.get(fd)?;
    Err(Errno::Notsock)
}

pub fn sock_accept(data: &mut ProcessData, fd: u32, _flags: u32, _fd_out: u32) -> WasiResult<()> {
    not_a_socket(data, "sock_accept", fd)
}

pub fn sock_recv(
    data: &mut ProcessData,
    fd: u32,
    _ri_data: u32,
    _ri_data_len: u32,
    _ri_flags: u32,
    _ro_datalen: u32,
    _ro_flags: u32,
) -> WasiResult<()> {
    not_a_socket(data, "sock_recv", fd)
}

pub fn sock_send(
    data: &mut ProcessData,
    fd: u32,
    _si_data: u32,
    _si_data_len: u32,
    _si_flags: u32,
    _so_datalen: u32,
) -> WasiResult<()> {
    not_a_socket(data, "sock_send", fd)
}

pub fn sock_shutdown(data: &mut ProcessData, fd: u32, _how: u32) -> WasiResult<()> {
    not_a_socket(data, "sock_shutdown", fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::RuntimeConfig;
    use crate::runtime::fd_table::{STDIN, STDOUT};

    #[test]
    fn stdio_is_not_a_socket() {
        let mut data = ProcessData::new(RuntimeConfig::default()).unwrap();
        assert_eq!(sock_accept(&mut data, STDIN, 0, 0), Err(Errno::Notsock));
        assert_eq!(sock_recv(&mut data, STDIN, 0, 1, 0, 0, 0), Err(Errno::Notsock));
        assert_eq!(sock_send(&mut data, STDOUT, 0, 1, 0, 0), Err(Errno::Notsock));
        assert_eq!(sock_shutdown(&mut data, STDOUT, 2), Err(Errno::Notsock));
    }

    #[test]
    fn closed_descriptors_are_badf() {
        let mut data = ProcessData::new(RuntimeConfig::default()).unwrap();
        assert_eq!(sock_accept(&mut data, 30, 0, 0), Err(Errno::Badf));
        assert_eq!(sock_recv(&mut data, 30, 0, 1, 0, 0, 0), Err(Errno::Badf));
        assert_eq!(sock_send(&mut data, 30, 0, 1, 0, 0), Err(Errno::Badf));
        assert_eq!(sock_shutdown(&mut data, 30, 2), Err(Errno::Badf));
    }
}
