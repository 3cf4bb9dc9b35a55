//! Immutable configuration for one guest run: arguments, environment,
//! preopened directories, stdin contents and resource limits.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::runtime::vfs::{Vfs, VfsPath};

pub const WASI_SNAPSHOT_PREVIEW1: &str = "wasi_snapshot_preview1";
pub const WASI_UNSTABLE: &str = "wasi_unstable";

/// A directory handed to the guest before it starts: `subtree` of `vfs`,
/// visible to the guest under `guest_path`.
#[derive(Debug, Clone)]
pub struct Preopen {
    pub guest_path: String,
    pub vfs: Vfs,
    pub subtree: VfsPath,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    args: Vec<String>,
    env: BTreeMap<String, String>,
    preopens: Vec<Preopen>,
    stdin: Vec<u8>,
    fuel: Option<u64>,
    namespaces: Vec<&'static str>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            args: Vec::new(),
            env: BTreeMap::new(),
            preopens: Vec::new(),
            stdin: Vec::new(),
            fuel: None,
            namespaces: vec![WASI_SNAPSHOT_PREVIEW1, WASI_UNSTABLE],
        }
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder { config: RuntimeConfig::default() }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Environment as `KEY=VALUE` strings, in key order.
    pub fn environ(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    pub fn preopens(&self) -> &[Preopen] {
        &self.preopens
    }

    pub fn stdin(&self) -> &[u8] {
        &self.stdin
    }

    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    pub fn namespaces(&self) -> &[&'static str] {
        &self.namespaces
    }
}

pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.config.env.insert(k.into(), v.into());
        }
        self
    }

    pub fn preopen(mut self, guest_path: impl Into<String>, vfs: Vfs, subtree: VfsPath) -> Self {
        self.config.preopens.push(Preopen { guest_path: guest_path.into(), vfs, subtree });
        self
    }

    pub fn stdin(mut self, contents: impl Into<Vec<u8>>) -> Self {
        self.config.stdin = contents.into();
        self
    }

    /// Instruction budget; the guest is aborted once it runs out.
    pub fn fuel(mut self, fuel: u64) -> Self {
        self.config.fuel = Some(fuel);
        self
    }

    pub fn namespaces(mut self, namespaces: &[&'static str]) -> Self {
        self.config.namespaces = namespaces.to_vec();
        self
    }

    pub fn build(self) -> Result<RuntimeConfig> {
        let config = self.config;
        if let Some(arg) = config.args.iter().find(|a| a.contains('\0')) {
            bail!("argument {:?} contains a NUL byte", arg);
        }
        for (key, value) in &config.env {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                bail!("invalid environment variable name {:?}", key);
            }
            if value.contains('\0') {
                bail!("environment variable {} contains a NUL byte", key);
            }
        }
        for preopen in &config.preopens {
            if preopen.guest_path.is_empty() {
                bail!("preopen of {} has an empty guest path", preopen.subtree);
            }
        }
        if config.namespaces.is_empty() {
            bail!("at least one import namespace is required");
        }
        if let Some(ns) = config
            .namespaces
            .iter()
            .find(|ns| **ns != WASI_SNAPSHOT_PREVIEW1 && **ns != WASI_UNSTABLE)
        {
            bail!("unknown WASI namespace {:?}", ns);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_args_env_and_preopens() {
        let vfs = Vfs::new();
        let config = RuntimeConfig::builder()
            .args(["prog", "Hello World!"])
            .env("B", "2")
            .envs([("A", "1")])
            .preopen("/", vfs, VfsPath::root())
            .fuel(10)
            .build()
            .unwrap();

        assert_eq!(config.args(), ["prog", "Hello World!"]);
        assert_eq!(config.environ(), ["A=1", "B=2"]);
        assert_eq!(config.preopens().len(), 1);
        assert_eq!(config.fuel(), Some(10));
        assert_eq!(config.namespaces(), [WASI_SNAPSHOT_PREVIEW1, WASI_UNSTABLE]);
    }

    #[test]
    fn rejects_values_the_guest_cannot_represent() {
        assert!(RuntimeConfig::builder().arg("a\0b").build().is_err());
        assert!(RuntimeConfig::builder().env("A=B", "c").build().is_err());
        assert!(RuntimeConfig::builder().env("", "c").build().is_err());
        assert!(RuntimeConfig::builder().namespaces(&[]).build().is_err());
        assert!(RuntimeConfig::builder().namespaces(&["env"]).build().is_err());
    }
}
