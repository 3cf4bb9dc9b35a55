use thiserror::Error;

/// Host-level faults and lifecycle misuse. None of these reach the guest as
/// an errno; they end the run and surface to whoever drives the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime is already running or has run")]
    AlreadyRunning,
    #[error("imports have not been linked; call link() first")]
    NotLinked,
    #[error("imports are already linked")]
    AlreadyLinked,
    #[error("syscall `{0}` dispatched while the guest is not running")]
    NotRunning(&'static str),
    #[error("runtime has terminated")]
    Terminated,
    #[error("module has no `_start` export: {0}")]
    MissingEntryPoint(String),
    #[error("module does not export a `memory`")]
    MissingMemory,
    #[error("guest exhausted its fuel budget")]
    FuelExhausted,
    #[error("guest trapped: {0}")]
    Trap(String),
    #[error("internal invariant violated: {0}")]
    Corrupted(String),
}

/// Raised by `proc_exit`. Travels up through wasmtime as the error of the
/// host call and is matched by `Runtime::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guest exited with status {0}")]
pub struct ProcExit(pub i32);
