use anyhow::Result;
use log::debug;
use wasmtime::{Caller, Extern, Linker};

use crate::runtime::error::RuntimeError;
use crate::runtime::memory::GuestMemory;
use crate::runtime::process::ProcessData;
use crate::wasi_syscalls::types::{Errno, WasiResult};

pub mod args;
pub mod clock;
pub mod fd;
pub mod fs;
pub mod poll;
pub mod process;
pub mod sock;
pub mod types;

type Host<'a> = Caller<'a, ProcessData>;

/// Turns a syscall outcome into the errno handed back to the guest.
fn errno(name: &str, result: WasiResult<()>) -> i32 {
    match result {
        Ok(()) => Errno::Success.raw(),
        Err(e) => {
            debug!("{} -> {}", name, e);
            e.raw()
        }
    }
}

/// Runs a syscall body that needs guest memory. Host faults (no exported
/// memory, not running) trap instead of returning an errno.
fn with_memory<F>(caller: &mut Host<'_>, name: &'static str, body: F) -> Result<i32>
where
    F: FnOnce(&mut ProcessData, &mut GuestMemory<'_>) -> WasiResult<()>,
{
    caller.data().ensure_running(name)?;
    let memory = match caller.get_export("memory") {
        Some(Extern::Memory(mem)) => mem,
        _ => return Err(RuntimeError::MissingMemory.into()),
    };
    let (bytes, data) = memory.data_and_store_mut(&mut *caller);
    let mut mem = GuestMemory::new(bytes);
    Ok(errno(name, body(data, &mut mem)))
}

/// Same as [`with_memory`] for syscalls that only touch process state.
fn without_memory<F>(caller: &mut Host<'_>, name: &'static str, body: F) -> Result<i32>
where
    F: FnOnce(&mut ProcessData) -> WasiResult<()>,
{
    caller.data().ensure_running(name)?;
    Ok(errno(name, body(caller.data_mut())))
}

/// Registers every supported syscall under `namespace`. Pointers and sizes
/// arrive as `i32` and are reinterpreted as unsigned guest addresses.
pub fn register(linker: &mut Linker<ProcessData>, namespace: &str) -> Result<()> {
    register_args(linker, namespace)?;
    register_fd(linker, namespace)?;
    register_path(linker, namespace)?;
    register_misc(linker, namespace)?;
    Ok(())
}

fn register_args(linker: &mut Linker<ProcessData>, namespace: &str) -> Result<()> {
    linker.func_wrap(namespace, "args_sizes_get", |mut caller: Host<'_>, argc: i32, size: i32| {
        with_memory(&mut caller, "args_sizes_get", |d, m| {
            args::args_sizes_get(d, m, argc as u32, size as u32)
        })
    })?;
    linker.func_wrap(namespace, "args_get", |mut caller: Host<'_>, argv: i32, buf: i32| {
        with_memory(&mut caller, "args_get", |d, m| {
            args::args_get(d, m, argv as u32, buf as u32)
        })
    })?;
    linker.func_wrap(
        namespace,
        "environ_sizes_get",
        |mut caller: Host<'_>, count: i32, size: i32| {
            with_memory(&mut caller, "environ_sizes_get", |d, m| {
                args::environ_sizes_get(d, m, count as u32, size as u32)
            })
        },
    )?;
    linker.func_wrap(namespace, "environ_get", |mut caller: Host<'_>, env: i32, buf: i32| {
        with_memory(&mut caller, "environ_get", |d, m| {
            args::environ_get(d, m, env as u32, buf as u32)
        })
    })?;
    Ok(())
}

fn register_fd(linker: &mut Linker<ProcessData>, namespace: &str) -> Result<()> {
    linker.func_wrap(
        namespace,
        "fd_write",
        |mut caller: Host<'_>, fd: i32, iovs: i32, iovs_len: i32, nwritten: i32| {
            with_memory(&mut caller, "fd_write", |d, m| {
                fd::fd_write(d, m, fd as u32, iovs as u32, iovs_len as u32, nwritten as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "fd_read",
        |mut caller: Host<'_>, fd: i32, iovs: i32, iovs_len: i32, nread: i32| {
            with_memory(&mut caller, "fd_read", |d, m| {
                fd::fd_read(d, m, fd as u32, iovs as u32, iovs_len as u32, nread as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "fd_pread",
        |mut caller: Host<'_>, fd: i32, iovs: i32, iovs_len: i32, offset: i64, nread: i32| {
            with_memory(&mut caller, "fd_pread", |d, m| {
                let (iovs, iovs_len) = (iovs as u32, iovs_len as u32);
                fd::fd_pread(d, m, fd as u32, iovs, iovs_len, offset as u64, nread as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "fd_pwrite",
        |mut caller: Host<'_>, fd: i32, iovs: i32, iovs_len: i32, offset: i64, nwritten: i32| {
            with_memory(&mut caller, "fd_pwrite", |d, m| {
                let (iovs, iovs_len) = (iovs as u32, iovs_len as u32);
                fd::fd_pwrite(d, m, fd as u32, iovs, iovs_len, offset as u64, nwritten as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "fd_seek",
        |mut caller: Host<'_>, fd: i32, offset: i64, whence: i32, newoffset: i32| {
            with_memory(&mut caller, "fd_seek", |d, m| {
                fd::fd_seek(d, m, fd as u32, offset, whence, newoffset as u32)
            })
        },
    )?;
    linker.func_wrap(namespace, "fd_tell", |mut caller: Host<'_>, fd: i32, offset: i32| {
        with_memory(&mut caller, "fd_tell", |d, m| fd::fd_tell(d, m, fd as u32, offset as u32))
    })?;
    linker.func_wrap(namespace, "fd_close", |mut caller: Host<'_>, fd: i32| {
        without_memory(&mut caller, "fd_close", |d| fd::fd_close(d, fd as u32))
    })?;
    linker.func_wrap(namespace, "fd_renumber", |mut caller: Host<'_>, from: i32, to: i32| {
        without_memory(&mut caller, "fd_renumber", |d| {
            fd::fd_renumber(d, from as u32, to as u32)
        })
    })?;
    linker.func_wrap(namespace, "fd_sync", |mut caller: Host<'_>, fd: i32| {
        without_memory(&mut caller, "fd_sync", |d| fd::fd_sync(d, fd as u32))
    })?;
    linker.func_wrap(namespace, "fd_datasync", |mut caller: Host<'_>, fd: i32| {
        without_memory(&mut caller, "fd_datasync", |d| fd::fd_sync(d, fd as u32))
    })?;
    linker.func_wrap(
        namespace,
        "fd_advise",
        |mut caller: Host<'_>, fd: i32, offset: i64, len: i64, advice: i32| {
            without_memory(&mut caller, "fd_advise", |d| {
                fd::fd_advise(d, fd as u32, offset as u64, len as u64, advice as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "fd_allocate",
        |mut caller: Host<'_>, fd: i32, offset: i64, len: i64| {
            without_memory(&mut caller, "fd_allocate", |d| {
                fd::fd_allocate(d, fd as u32, offset as u64, len as u64)
            })
        },
    )?;
    linker.func_wrap(namespace, "fd_fdstat_get", |mut caller: Host<'_>, fd: i32, buf: i32| {
        with_memory(&mut caller, "fd_fdstat_get", |d, m| {
            fd::fd_fdstat_get(d, m, fd as u32, buf as u32)
        })
    })?;
    linker.func_wrap(
        namespace,
        "fd_fdstat_set_flags",
        |mut caller: Host<'_>, fd: i32, flags: i32| {
            without_memory(&mut caller, "fd_fdstat_set_flags", |d| {
                fd::fd_fdstat_set_flags(d, fd as u32, flags as u32)
            })
        },
    )?;
    linker.func_wrap(namespace, "fd_filestat_get", |mut caller: Host<'_>, fd: i32, buf: i32| {
        with_memory(&mut caller, "fd_filestat_get", |d, m| {
            fd::fd_filestat_get(d, m, fd as u32, buf as u32)
        })
    })?;
    linker.func_wrap(
        namespace,
        "fd_filestat_set_size",
        |mut caller: Host<'_>, fd: i32, size: i64| {
            without_memory(&mut caller, "fd_filestat_set_size", |d| {
                fd::fd_filestat_set_size(d, fd as u32, size as u64)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "fd_filestat_set_times",
        |mut caller: Host<'_>, fd: i32, atim: i64, mtim: i64, fst_flags: i32| {
            without_memory(&mut caller, "fd_filestat_set_times", |d| {
                fd::fd_filestat_set_times(d, fd as u32, atim as u64, mtim as u64, fst_flags as u32)
            })
        },
    )?;
    linker.func_wrap(namespace, "fd_prestat_get", |mut caller: Host<'_>, fd: i32, buf: i32| {
        with_memory(&mut caller, "fd_prestat_get", |d, m| {
            fd::fd_prestat_get(d, m, fd as u32, buf as u32)
        })
    })?;
    linker.func_wrap(
        namespace,
        "fd_prestat_dir_name",
        |mut caller: Host<'_>, fd: i32, path: i32, path_len: i32| {
            with_memory(&mut caller, "fd_prestat_dir_name", |d, m| {
                fd::fd_prestat_dir_name(d, m, fd as u32, path as u32, path_len as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "fd_readdir",
        |mut caller: Host<'_>, fd: i32, buf: i32, buf_len: i32, cookie: i64, bufused: i32| {
            with_memory(&mut caller, "fd_readdir", |d, m| {
                let (buf, buf_len) = (buf as u32, buf_len as u32);
                fs::fd_readdir(d, m, fd as u32, buf, buf_len, cookie as u64, bufused as u32)
            })
        },
    )?;
    Ok(())
}

fn register_path(linker: &mut Linker<ProcessData>, namespace: &str) -> Result<()> {
    linker.func_wrap(
        namespace,
        "path_open",
        |mut caller: Host<'_>,
         dirfd: i32,
         dirflags: i32,
         path: i32,
         path_len: i32,
         oflags: i32,
         rights_base: i64,
         rights_inheriting: i64,
         fdflags: i32,
         opened_fd: i32| {
            with_memory(&mut caller, "path_open", |d, m| {
                fs::path_open(
                    d,
                    m,
                    dirfd as u32,
                    dirflags as u32,
                    path as u32,
                    path_len as u32,
                    oflags as u32,
                    rights_base as u64,
                    rights_inheriting as u64,
                    fdflags as u32,
                    opened_fd as u32,
                )
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "path_create_directory",
        |mut caller: Host<'_>, fd: i32, path: i32, path_len: i32| {
            with_memory(&mut caller, "path_create_directory", |d, m| {
                fs::path_create_directory(d, m, fd as u32, path as u32, path_len as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "path_remove_directory",
        |mut caller: Host<'_>, fd: i32, path: i32, path_len: i32| {
            with_memory(&mut caller, "path_remove_directory", |d, m| {
                fs::path_remove_directory(d, m, fd as u32, path as u32, path_len as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "path_unlink_file",
        |mut caller: Host<'_>, fd: i32, path: i32, path_len: i32| {
            with_memory(&mut caller, "path_unlink_file", |d, m| {
                fs::path_unlink_file(d, m, fd as u32, path as u32, path_len as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "path_rename",
        |mut caller: Host<'_>,
         old_fd: i32,
         old_path: i32,
         old_len: i32,
         new_fd: i32,
         new_path: i32,
         new_len: i32| {
            with_memory(&mut caller, "path_rename", |d, m| {
                fs::path_rename(
                    d,
                    m,
                    old_fd as u32,
                    old_path as u32,
                    old_len as u32,
                    new_fd as u32,
                    new_path as u32,
                    new_len as u32,
                )
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "path_filestat_get",
        |mut caller: Host<'_>, fd: i32, flags: i32, path: i32, path_len: i32, buf: i32| {
            with_memory(&mut caller, "path_filestat_get", |d, m| {
                let (path, path_len) = (path as u32, path_len as u32);
                fs::path_filestat_get(d, m, fd as u32, flags as u32, path, path_len, buf as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "path_filestat_set_times",
        |mut caller: Host<'_>,
         fd: i32,
         flags: i32,
         path: i32,
         path_len: i32,
         atim: i64,
         mtim: i64,
         fst_flags: i32| {
            with_memory(&mut caller, "path_filestat_set_times", |d, m| {
                fs::path_filestat_set_times(
                    d,
                    m,
                    fd as u32,
                    flags as u32,
                    path as u32,
                    path_len as u32,
                    atim as u64,
                    mtim as u64,
                    fst_flags as u32,
                )
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "path_link",
        |mut caller: Host<'_>,
         old_fd: i32,
         old_flags: i32,
         old_path: i32,
         old_len: i32,
         new_fd: i32,
         new_path: i32,
         new_len: i32| {
            with_memory(&mut caller, "path_link", |d, m| {
                fs::path_link(
                    d,
                    m,
                    old_fd as u32,
                    old_flags as u32,
                    old_path as u32,
                    old_len as u32,
                    new_fd as u32,
                    new_path as u32,
                    new_len as u32,
                )
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "path_symlink",
        |mut caller: Host<'_>, old_path: i32, old_len: i32, fd: i32, new_path: i32, new_len: i32| {
            with_memory(&mut caller, "path_symlink", |d, m| {
                let (old_path, old_len) = (old_path as u32, old_len as u32);
                let (new_path, new_len) = (new_path as u32, new_len as u32);
                fs::path_symlink(d, m, old_path, old_len, fd as u32, new_path, new_len)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "path_readlink",
        |mut caller: Host<'_>,
         fd: i32,
         path: i32,
         path_len: i32,
         buf: i32,
         buf_len: i32,
         bufused: i32| {
            with_memory(&mut caller, "path_readlink", |d, m| {
                fs::path_readlink(
                    d,
                    m,
                    fd as u32,
                    path as u32,
                    path_len as u32,
                    buf as u32,
                    buf_len as u32,
                    bufused as u32,
                )
            })
        },
    )?;
    Ok(())
}

fn register_misc(linker: &mut Linker<ProcessData>, namespace: &str) -> Result<()> {
    // clocks and polling
    linker.func_wrap(namespace, "clock_res_get", |mut caller: Host<'_>, id: i32, out: i32| {
        with_memory(&mut caller, "clock_res_get", |d, m| {
            clock::clock_res_get(d, m, id as u32, out as u32)
        })
    })?;
    linker.func_wrap(
        namespace,
        "clock_time_get",
        |mut caller: Host<'_>, id: i32, precision: i64, out: i32| {
            with_memory(&mut caller, "clock_time_get", |d, m| {
                clock::clock_time_get(d, m, id as u32, precision as u64, out as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "poll_oneoff",
        |mut caller: Host<'_>, subs: i32, events: i32, nsubscriptions: i32, nevents: i32| {
            with_memory(&mut caller, "poll_oneoff", |d, m| {
                let (subs, events) = (subs as u32, events as u32);
                poll::poll_oneoff(d, m, subs, events, nsubscriptions as u32, nevents as u32)
            })
        },
    )?;

    // randomness, scheduling, process
    linker.func_wrap(namespace, "random_get", |mut caller: Host<'_>, buf: i32, len: i32| {
        with_memory(&mut caller, "random_get", |d, m| {
            process::random_get(d, m, buf as u32, len as u32)
        })
    })?;
    linker.func_wrap(namespace, "sched_yield", |mut caller: Host<'_>| {
        without_memory(&mut caller, "sched_yield", process::sched_yield)
    })?;
    linker.func_wrap(namespace, "proc_raise", |mut caller: Host<'_>, sig: i32| {
        without_memory(&mut caller, "proc_raise", |d| process::proc_raise(d, sig as u32))
    })?;
    linker.func_wrap(namespace, "proc_exit", |mut caller: Host<'_>, code: i32| {
        process::proc_exit(caller.data_mut(), code)
    })?;

    // sockets
    linker.func_wrap(
        namespace,
        "sock_accept",
        |mut caller: Host<'_>, fd: i32, flags: i32, fd_out: i32| {
            without_memory(&mut caller, "sock_accept", |d| {
                sock::sock_accept(d, fd as u32, flags as u32, fd_out as u32)
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "sock_recv",
        |mut caller: Host<'_>,
         fd: i32,
         ri_data: i32,
         ri_data_len: i32,
         ri_flags: i32,
         ro_datalen: i32,
         ro_flags: i32| {
            without_memory(&mut caller, "sock_recv", |d| {
                sock::sock_recv(
                    d,
                    fd as u32,
                    ri_data as u32,
                    ri_data_len as u32,
                    ri_flags as u32,
                    ro_datalen as u32,
                    ro_flags as u32,
                )
            })
        },
    )?;
    linker.func_wrap(
        namespace,
        "sock_send",
        |mut caller: Host<'_>,
         fd: i32,
         si_data: i32,
         si_data_len: i32,
         si_flags: i32,
         so_datalen: i32| {
            without_memory(&mut caller, "sock_send", |d| {
                sock::sock_send(
                    d,
                    fd as u32,
                    si_data as u32,
                    si_data_len as u32,
                    si_flags as u32,
                    so_datalen as u32,
                )
            })
        },
    )?;
    linker.func_wrap(namespace, "sock_shutdown", |mut caller: Host<'_>, fd: i32, how: i32| {
        without_memory(&mut caller, "sock_shutdown", |d| {
            sock::sock_shutdown(d, fd as u32, how as u32)
        })
    })?;
    Ok(())
}
