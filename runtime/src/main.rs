use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, info};

use wasi_shim::{preload_host_dir, Runtime, RuntimeConfig, Vfs, VfsPath};

/// Run a WASI preview1 module against an in-memory filesystem.
#[derive(Parser, Debug)]
#[command(name = "wasi-shim", version, about)]
struct Cli {
    /// Module to run (binary `.wasm` or text `.wat`).
    module: PathBuf,

    /// Arguments passed to the guest after its program name.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Guest environment variable, KEY=VALUE. Repeatable.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Copy a host directory into the VFS and preopen it, GUEST=HOSTDIR.
    #[arg(long = "preload", value_name = "GUEST=HOSTDIR")]
    preload: Vec<String>,

    /// Instruction budget; the guest is aborted when it runs out.
    #[arg(long)]
    fuel: Option<u64>,

    /// File whose contents become the guest's stdin.
    #[arg(long)]
    stdin: Option<PathBuf>,
}

fn split_pair<'a>(flag: &str, value: &'a str) -> Result<(&'a str, &'a str)> {
    value
        .split_once('=')
        .ok_or_else(|| anyhow!("--{} expects KEY=VALUE, got {:?}", flag, value))
}

fn build_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut builder = RuntimeConfig::builder()
        .arg(cli.module.to_string_lossy())
        .args(cli.args.iter().cloned());

    for pair in &cli.env {
        let (key, value) = split_pair("env", pair)?;
        builder = builder.env(key, value);
    }

    if !cli.preload.is_empty() {
        let vfs = Vfs::new();
        for pair in &cli.preload {
            let (guest, host) = split_pair("preload", pair)?;
            let subtree = VfsPath::parse(guest)
                .map_err(|e| anyhow!("bad guest path {:?}: {}", guest, e))?;
            preload_host_dir(&vfs, Path::new(host), &subtree)?;
            builder = builder.preopen(guest, vfs.clone(), subtree);
        }
    }

    if let Some(path) = &cli.stdin {
        let contents =
            std::fs::read(path).with_context(|| format!("reading stdin file {:?}", path))?;
        builder = builder.stdin(contents);
    }
    if let Some(fuel) = cli.fuel {
        builder = builder.fuel(fuel);
    }
    builder.build()
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("{:?}", cli);

    let wasm = std::fs::read(&cli.module)
        .with_context(|| format!("reading module {:?}", cli.module))?;
    let mut runtime = Runtime::new(build_config(&cli)?)?;
    let status = runtime.run(&wasm);

    // Whatever the guest managed to write is shown even if it trapped.
    std::io::stdout().write_all(&runtime.take_stdout()?)?;
    std::io::stderr().write_all(&runtime.take_stderr()?)?;
    std::io::stdout().flush()?;

    let status = status?;
    info!("{:?} exited with {}", cli.module, status.code());
    std::process::exit(status.code());
}
