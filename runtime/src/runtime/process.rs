use std::fmt;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use wasmtime::{Engine, Instance, Linker, Module, Store, Trap};

use crate::runtime::clock::Clock;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::error::{ProcExit, RuntimeError};
use crate::runtime::fd_table::{FDEntry, FDTable, OpenFile, STDERR, STDOUT};
use crate::wasi_syscalls;

/// Lifecycle of a guest: `Configured → Linked → Running → Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Configured,
    Linked,
    Running,
    Terminated,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Exit status reported by a guest, either from `proc_exit` or 0 when
/// `_start` returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    pub fn code(self) -> i32 {
        self.0
    }

    pub fn success(self) -> bool {
        self.0 == 0
    }
}

/// Holds all per-process runtime data that the syscalls can access.
pub struct ProcessData {
    config: RuntimeConfig,
    pub fd_table: FDTable,
    pub clock: Clock,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
}

impl ProcessData {
    /// Binds stdio and every configured preopen, creating preopened
    /// subtrees that do not exist yet.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let mut fd_table = FDTable::new(config.stdin().to_vec());
        for preopen in config.preopens() {
            preopen
                .vfs
                .mkdirp(&preopen.subtree)
                .with_context(|| format!("cannot prepare preopen {}", preopen.guest_path))?;
            let fd = fd_table
                .alloc(FDEntry::File(OpenFile::preopened_dir(
                    preopen.vfs.clone(),
                    preopen.subtree.clone(),
                    preopen.guest_path.clone(),
                )))
                .map_err(|e| anyhow!("cannot preopen {}: {}", preopen.guest_path, e))?;
            debug!("Preopened {} ({}) as fd {}", preopen.guest_path, preopen.subtree, fd);
        }
        Ok(ProcessData {
            config,
            fd_table,
            clock: Clock::new(),
            state: ProcessState::Configured,
            exit_code: None,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Gate in front of every syscall: only a running guest may dispatch.
    pub fn ensure_running(&self, syscall: &'static str) -> Result<(), RuntimeError> {
        match self.state {
            ProcessState::Running => Ok(()),
            ProcessState::Terminated => {
                warn!("{}: called after termination", syscall);
                Err(RuntimeError::Terminated)
            }
            state => {
                warn!("{}: called while {}", syscall, state);
                Err(RuntimeError::NotRunning(syscall))
            }
        }
    }
}

/// One guest module run: the wasmtime engine and store, the linker holding
/// the WASI imports, and the process data behind them.
pub struct Runtime {
    engine: Engine,
    store: Store<ProcessData>,
    linker: Option<Linker<ProcessData>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let mut wasm_config = wasmtime::Config::new();
        wasm_config.consume_fuel(config.fuel().is_some());
        let engine = Engine::new(&wasm_config)?;
        debug!("WASM engine created");

        let fuel = config.fuel();
        let args = config.args().len();
        let mut store = Store::new(&engine, ProcessData::new(config)?);
        if let Some(fuel) = fuel {
            store.set_fuel(fuel)?;
            debug!("Fuel budget set to {}", fuel);
        }
        info!("Runtime configured with {} args", args);
        Ok(Runtime { engine, store, linker: None })
    }

    pub fn state(&self) -> ProcessState {
        self.store.data().state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.store.data().exit_code
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn data(&self) -> &ProcessData {
        self.store.data()
    }

    /// Builds the import object: every syscall under each configured
    /// namespace.
    pub fn link(&mut self) -> Result<()> {
        match self.state() {
            ProcessState::Configured => {}
            ProcessState::Terminated => return Err(RuntimeError::Terminated.into()),
            _ => return Err(RuntimeError::AlreadyLinked.into()),
        }
        let mut linker: Linker<ProcessData> = Linker::new(&self.engine);
        for namespace in self.store.data().config().namespaces() {
            wasi_syscalls::register(&mut linker, namespace)?;
            debug!("WASI syscalls registered under {}", namespace);
        }
        self.store.data_mut().state = ProcessState::Linked;
        self.linker = Some(linker);
        info!("Runtime linked");
        Ok(())
    }

    /// Compiles `wasm` (binary or text) and instantiates it against the
    /// linked imports.
    pub fn instantiate(&mut self, wasm: &[u8]) -> Result<Instance> {
        match self.state() {
            ProcessState::Linked => {}
            ProcessState::Configured => return Err(RuntimeError::NotLinked.into()),
            ProcessState::Running => return Err(RuntimeError::AlreadyRunning.into()),
            ProcessState::Terminated => return Err(RuntimeError::Terminated.into()),
        }
        let linker = self.linker.as_ref().ok_or(RuntimeError::NotLinked)?;
        let module = Module::new(&self.engine, wasm).context("failed to compile module")?;
        debug!("WASM module compiled");
        let instance = linker
            .instantiate(&mut self.store, &module)
            .context("failed to instantiate module")?;
        debug!("WASM module instantiated");
        Ok(instance)
    }

    /// Runs `_start` to completion. Enters `Running` exactly once and always
    /// leaves the runtime `Terminated`, whether the guest returned, called
    /// `proc_exit`, or faulted.
    pub fn start(&mut self, instance: Instance) -> Result<ExitStatus> {
        match self.state() {
            ProcessState::Linked => {}
            ProcessState::Configured => return Err(RuntimeError::NotLinked.into()),
            ProcessState::Running | ProcessState::Terminated => {
                return Err(RuntimeError::AlreadyRunning.into())
            }
        }
        let start_func = match instance.get_typed_func::<(), ()>(&mut self.store, "_start") {
            Ok(func) => func,
            Err(e) => {
                error!("Missing _start function: {:?}", e);
                return Err(RuntimeError::MissingEntryPoint(e.to_string()).into());
            }
        };

        self.store.data_mut().state = ProcessState::Running;
        info!("Guest running");
        let outcome = start_func.call(&mut self.store, ());
        let data = self.store.data_mut();
        data.state = ProcessState::Terminated;

        let status = match outcome {
            Ok(()) => ExitStatus(0),
            Err(err) => match err.downcast::<ProcExit>() {
                Ok(ProcExit(code)) => ExitStatus(code),
                Err(err) => return Err(Self::classify_fault(err)),
            },
        };
        data.exit_code = Some(status.code());
        info!("Guest terminated with exit code {}", status.code());
        Ok(status)
    }

    fn classify_fault(err: anyhow::Error) -> anyhow::Error {
        if let Some(runtime_err) = err.downcast_ref::<RuntimeError>() {
            error!("Host fault during guest execution: {}", runtime_err);
            return err;
        }
        if err.downcast_ref::<Trap>() == Some(&Trap::OutOfFuel) {
            error!("Guest ran out of fuel");
            return RuntimeError::FuelExhausted.into();
        }
        error!("Error executing wasm: {:?}", err);
        RuntimeError::Trap(format!("{:#}", err)).into()
    }

    /// Link (if needed), instantiate and start in one go.
    pub fn run(&mut self, wasm: &[u8]) -> Result<ExitStatus> {
        if self.state() == ProcessState::Configured {
            self.link()?;
        }
        let instance = self.instantiate(wasm)?;
        self.start(instance)
    }

    /// Drains everything the guest wrote to stdout so far, in write order.
    pub fn take_stdout(&mut self) -> Result<Vec<u8>> {
        Ok(self.store.data_mut().fd_table.take_stream(STDOUT)?)
    }

    pub fn take_stderr(&mut self) -> Result<Vec<u8>> {
        Ok(self.store.data_mut().fd_table.take_stream(STDERR)?)
    }
}
