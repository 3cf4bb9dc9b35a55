//! `poll_oneoff` over in-memory descriptors and the runtime clock.
//!
//! Descriptors never block here: every fd subscription is ready the moment
//! it is polled. Clock subscriptions are the only thing that waits, and only
//! when no descriptor event is ready.

use std::thread;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::runtime::fd_table::{Access, FDEntry};
use crate::runtime::memory::GuestMemory;
use crate::runtime::process::ProcessData;
use crate::wasi_syscalls::types::{
    Errno, EventType, SubclockFlags, WasiResult, EVENT_SIZE, SUBSCRIPTION_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    Clock { userdata: u64, clock_id: u32, timeout: u64, flags: SubclockFlags },
    Fd { userdata: u64, kind: EventType, fd: u32 },
}

impl Subscription {
    fn decode(raw: &[u8]) -> WasiResult<Self> {
        let userdata = LittleEndian::read_u64(&raw[0..8]);
        match EventType::try_from(raw[8])? {
            EventType::Clock => Ok(Subscription::Clock {
                userdata,
                clock_id: LittleEndian::read_u32(&raw[16..20]),
                timeout: LittleEndian::read_u64(&raw[24..32]),
                flags: SubclockFlags::from_bits_truncate(LittleEndian::read_u16(&raw[40..42])),
            }),
            kind => Ok(Subscription::Fd {
                userdata,
                kind,
                fd: LittleEndian::read_u32(&raw[16..20]),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Event {
    userdata: u64,
    error: Errno,
    kind: EventType,
    nbytes: u64,
}

impl Event {
    fn encode(&self) -> [u8; EVENT_SIZE as usize] {
        let mut buf = [0u8; EVENT_SIZE as usize];
        LittleEndian::write_u64(&mut buf[0..8], self.userdata);
        LittleEndian::write_u16(&mut buf[8..10], self.error as u16);
        buf[10] = self.kind as u8;
        LittleEndian::write_u64(&mut buf[16..24], self.nbytes);
        buf
    }
}

/// Bytes a read on `fd` would return right now; writes report 0.
fn fd_event(data: &ProcessData, userdata: u64, kind: EventType, fd: u32) -> Event {
    let readiness = data.fd_table.get(fd).and_then(|entry| {
        let needed = if kind == EventType::FdRead { Access::READ } else { Access::WRITE };
        if !entry.access().contains(needed) {
            return Err(Errno::Badf);
        }
        if kind == EventType::FdWrite {
            return Ok(0);
        }
        match entry {
            FDEntry::Stream { buffer, read_ptr, .. } => {
                Ok(buffer.len().saturating_sub(*read_ptr) as u64)
            }
            FDEntry::File(file) if file.is_directory() => Ok(0),
            FDEntry::File(file) => {
                Ok(file.vfs.stat(&file.path)?.size.saturating_sub(file.offset))
            }
        }
    });
    match readiness {
        Ok(nbytes) => Event { userdata, error: Errno::Success, kind, nbytes },
        Err(error) => Event { userdata, error, kind, nbytes: 0 },
    }
}

pub fn poll_oneoff(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    in_ptr: u32,
    out_ptr: u32,
    nsubscriptions: u32,
    nevents_ptr: u32,
) -> WasiResult<()> {
    debug!("poll_oneoff: in={}, out={}, nsubscriptions={}", in_ptr, out_ptr, nsubscriptions);
    if nsubscriptions == 0 {
        return Err(Errno::Inval);
    }
    let in_len = nsubscriptions.checked_mul(SUBSCRIPTION_SIZE).ok_or(Errno::Inval)?;
    let out_len = nsubscriptions.checked_mul(EVENT_SIZE).ok_or(Errno::Inval)?;
    mem.check(in_ptr, in_len, 8)?;
    mem.check(out_ptr, out_len, 8)?;
    mem.check(nevents_ptr, 4, 4)?;
    let subscriptions = mem
        .slice(in_ptr, in_len)?
        .chunks_exact(SUBSCRIPTION_SIZE as usize)
        .map(Subscription::decode)
        .collect::<WasiResult<Vec<_>>>()?;

    let mut ready = Vec::new();
    // (userdata, nanoseconds left) for every well-formed clock
    let mut timers = Vec::new();
    for sub in &subscriptions {
        match *sub {
            Subscription::Fd { userdata, kind, fd } => {
                ready.push(fd_event(data, userdata, kind, fd))
            }
            Subscription::Clock { userdata, clock_id, timeout, flags } => {
                match data.clock.now(clock_id) {
                    Ok(now) if flags.contains(SubclockFlags::ABSTIME) => {
                        timers.push((userdata, timeout.saturating_sub(now)))
                    }
                    Ok(_) => timers.push((userdata, timeout)),
                    Err(error) => ready.push(Event {
                        userdata,
                        error,
                        kind: EventType::Clock,
                        nbytes: 0,
                    }),
                }
            }
        }
    }

    let wait = if ready.is_empty() {
        timers.iter().map(|(_, left)| *left).min().unwrap_or(0)
    } else {
        0
    };
    if wait > 0 {
        debug!("poll_oneoff: sleeping {} ns", wait);
        thread::sleep(Duration::from_nanos(wait));
    }
    ready.extend(timers.iter().filter(|(_, left)| *left <= wait).map(|(userdata, _)| Event {
        userdata: *userdata,
        error: Errno::Success,
        kind: EventType::Clock,
        nbytes: 0,
    }));

    for (i, event) in ready.iter().enumerate() {
        mem.write_bytes(out_ptr + i as u32 * EVENT_SIZE, &event.encode())?;
    }
    mem.write_u32(nevents_ptr, ready.len() as u32)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::runtime::clock::{CLOCK_MONOTONIC, CLOCK_REALTIME};
    use crate::runtime::config::RuntimeConfig;
    use crate::runtime::fd_table::{STDIN, STDOUT};

    const IN: u32 = 0;
    const OUT: u32 = 512;
    const NEVENTS: u32 = 1020;

    fn clock_sub(raw: &mut [u8], index: usize, userdata: u64, timeout: u64, flags: u16) {
        let sub = &mut raw[index * SUBSCRIPTION_SIZE as usize..][..SUBSCRIPTION_SIZE as usize];
        LittleEndian::write_u64(&mut sub[0..8], userdata);
        sub[8] = EventType::Clock as u8;
        LittleEndian::write_u32(&mut sub[16..20], CLOCK_MONOTONIC);
        LittleEndian::write_u64(&mut sub[24..32], timeout);
        LittleEndian::write_u16(&mut sub[40..42], flags);
    }

    fn fd_sub(raw: &mut [u8], index: usize, userdata: u64, kind: EventType, fd: u32) {
        let sub = &mut raw[index * SUBSCRIPTION_SIZE as usize..][..SUBSCRIPTION_SIZE as usize];
        LittleEndian::write_u64(&mut sub[0..8], userdata);
        sub[8] = kind as u8;
        LittleEndian::write_u32(&mut sub[16..20], fd);
    }

    fn events(mem: &GuestMemory<'_>) -> Vec<(u64, u16, u8, u64)> {
        let n = mem.read_u32(NEVENTS).unwrap();
        (0..n)
            .map(|i| {
                let ev = mem.slice(OUT + i * EVENT_SIZE, EVENT_SIZE).unwrap();
                (
                    LittleEndian::read_u64(&ev[0..8]),
                    LittleEndian::read_u16(&ev[8..10]),
                    ev[10],
                    LittleEndian::read_u64(&ev[16..24]),
                )
            })
            .collect()
    }

    fn process() -> ProcessData {
        let config = RuntimeConfig::builder().stdin("four").build().unwrap();
        ProcessData::new(config).unwrap()
    }

    #[test]
    fn earliest_clock_fires_alone() {
        let mut data = process();
        let mut raw = vec![0u8; 1024];
        clock_sub(&mut raw, 0, 7, 1_000_000, 0);
        clock_sub(&mut raw, 1, 8, 60_000_000_000, 0);
        let mut mem = GuestMemory::new(&mut raw);

        let started = Instant::now();
        poll_oneoff(&mut data, &mut mem, IN, OUT, 2, NEVENTS).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1));
        assert_eq!(events(&mem), [(7, 0, EventType::Clock as u8, 0)]);
    }

    #[test]
    fn absolute_deadline_in_the_past_fires_immediately() {
        let mut data = process();
        let mut raw = vec![0u8; 1024];
        clock_sub(&mut raw, 0, 3, 0, SubclockFlags::ABSTIME.bits());
        let mut mem = GuestMemory::new(&mut raw);
        poll_oneoff(&mut data, &mut mem, IN, OUT, 1, NEVENTS).unwrap();
        assert_eq!(events(&mem), [(3, 0, 0, 0)]);
    }

    #[test]
    fn ready_descriptors_preempt_timers() {
        let mut data = process();
        let mut raw = vec![0u8; 1024];
        clock_sub(&mut raw, 0, 1, 60_000_000_000, 0);
        fd_sub(&mut raw, 1, 2, EventType::FdRead, STDIN);
        fd_sub(&mut raw, 2, 3, EventType::FdWrite, STDOUT);
        fd_sub(&mut raw, 3, 4, EventType::FdRead, 42);
        let mut mem = GuestMemory::new(&mut raw);

        poll_oneoff(&mut data, &mut mem, IN, OUT, 4, NEVENTS).unwrap();
        assert_eq!(
            events(&mem),
            [
                (2, 0, EventType::FdRead as u8, 4),
                (3, 0, EventType::FdWrite as u8, 0),
                (4, Errno::Badf as u16, EventType::FdRead as u8, 0),
            ]
        );
    }

    #[test]
    fn malformed_requests_are_inval() {
        let mut data = process();
        let mut raw = vec![0u8; 1024];
        clock_sub(&mut raw, 0, 1, 0, 0);
        raw[8] = 9;
        let mut mem = GuestMemory::new(&mut raw);
        assert_eq!(poll_oneoff(&mut data, &mut mem, IN, OUT, 1, NEVENTS), Err(Errno::Inval));
        assert_eq!(poll_oneoff(&mut data, &mut mem, IN, OUT, 0, NEVENTS), Err(Errno::Inval));
        assert_eq!(poll_oneoff(&mut data, &mut mem, IN, OUT, 20, NEVENTS), Err(Errno::Inval));
        assert_eq!(mem.read_u32(NEVENTS).unwrap(), 0);

        let unknown_clock = CLOCK_REALTIME + 9;
        LittleEndian::write_u32(mem.slice_mut(16, 4).unwrap(), unknown_clock);
        mem.slice_mut(8, 1).unwrap()[0] = EventType::Clock as u8;
        poll_oneoff(&mut data, &mut mem, IN, OUT, 1, NEVENTS).unwrap();
        assert_eq!(events(&mem), [(1, Errno::Inval as u16, 0, 0)]);
    }
}
