// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime configuration.
//!
//! Passed to `run_with`; shared by every worker of that run.

use std::env;

use thiserror::Error;

/// Default size of a single receive on a stream.
pub const DEFAULT_READ_CHUNK: usize = 65536;

/// Tuning knobs for one `run()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name prefix for the scheduler thread and spawned worker threads.
    pub thread_name: String,
    /// Stack size for spawned worker threads. `None` uses the std default.
    pub stack_size: Option<usize>,
    /// Size of the first receive issued by stream reads.
    pub read_chunk: usize,
}

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("read chunk must be at least one byte")]
    ZeroReadChunk,
    #[error("worker stack size must be non-zero")]
    ZeroStackSize,
    #[error("invalid value `{value}` for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

impl Config {
    pub fn new() -> Self {
        Self {
            thread_name: "strand".to_string(),
            stack_size: None,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }

    /// Defaults overridden by `STRAND_THREAD_NAME`, `STRAND_STACK_SIZE`
    /// and `STRAND_READ_CHUNK`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();
        if let Ok(name) = env::var("STRAND_THREAD_NAME") {
            config.thread_name = name;
        }
        if let Some(size) = parse_env("STRAND_STACK_SIZE")? {
            config.stack_size = Some(size);
        }
        if let Some(chunk) = parse_env("STRAND_READ_CHUNK")? {
            config.read_chunk = chunk;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn read_chunk(mut self, chunk: usize) -> Self {
        self.read_chunk = chunk;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_chunk == 0 {
            return Err(ConfigError::ZeroReadChunk);
        }
        if self.stack_size == Some(0) {
            return Err(ConfigError::ZeroStackSize);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env(var: &'static str) -> Result<Option<usize>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}
