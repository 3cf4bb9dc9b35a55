//! In-memory WASI preview1 shim for wasmtime.
//!
//! A guest module runs against a [`Runtime`]: its files live in a [`Vfs`]
//! owned by the host, its stdout and stderr are captured in memory, and it
//! can only reach the directories preopened in its [`RuntimeConfig`].

pub mod runtime;
pub mod wasi_syscalls;

pub use runtime::config::{Preopen, RuntimeConfig, RuntimeConfigBuilder};
pub use runtime::error::{ProcExit, RuntimeError};
pub use runtime::preload::preload_host_dir;
pub use runtime::process::{ExitStatus, ProcessState, Runtime};
pub use runtime::vfs::{Vfs, VfsError, VfsPath};
pub use wasi_syscalls::types::Errno;
