// ChainTester - IPC test harness for EOSIO chain debuggers
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Debugger endpoint configuration.
//!
//! The chain tester talks to the debugger over three TCP connections. Their
//! addresses and the buffer capacity shared by every connection are collected in
//! [`DebuggerConfig`], which is assembled from (lowest precedence first):
//!
//! 1. built-in defaults matching the debugger's own defaults,
//! 2. an optional TOML file named by [`CHAINTESTER_CONFIG`](crate::env::CHAINTESTER_CONFIG),
//! 3. individual environment variables from [`crate::env`].
//!
//! ```toml
//! control_addr = "127.0.0.1:9090"
//! apply_request_addr = "127.0.0.1:9091"
//! vm_api_addr = "127.0.0.1:9092"
//! buffer_size = 8192
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::env::{
    CHAINTESTER_APPLY_REQUEST_ADDR, CHAINTESTER_BUFFER_SIZE, CHAINTESTER_CONFIG,
    CHAINTESTER_CONTROL_ADDR, CHAINTESTER_VM_API_ADDR,
};

/// Default address of the debugger control service
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:9090";
/// Default address of the apply-request callback listener
pub const DEFAULT_APPLY_REQUEST_ADDR: &str = "127.0.0.1:9091";
/// Default address of the debugger VM-API service
pub const DEFAULT_VM_API_ADDR: &str = "127.0.0.1:9092";
/// Default transport buffer capacity (8 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Errors raised while loading or validating a [`DebuggerConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for this schema
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path of the file
        path: PathBuf,
        /// Underlying TOML error
        #[source]
        source: toml::de::Error,
    },

    /// A setting holds an unusable value
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Setting or environment variable name
        key: String,
        /// Offending value
        value: String,
        /// Why the value was rejected
        reason: String,
    },
}

/// Addresses and transport settings used to reach the debugger
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    /// Debugger control service (outbound)
    pub control_addr: String,
    /// Apply-request callback listener (inbound, bound locally)
    pub apply_request_addr: String,
    /// Debugger VM-API service (outbound, used during apply)
    pub vm_api_addr: String,
    /// Capacity of the read and write buffers of every connection
    pub buffer_size: usize,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            control_addr: DEFAULT_CONTROL_ADDR.to_string(),
            apply_request_addr: DEFAULT_APPLY_REQUEST_ADDR.to_string(),
            vm_api_addr: DEFAULT_VM_API_ADDR.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl DebuggerConfig {
    /// Load the configuration from the file named by `CHAINTESTER_CONFIG` (if any)
    /// and apply the individual environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var(CHAINTESTER_CONFIG) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        base.with_env_overrides()
    }

    /// Read a TOML configuration file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

        debug!(path = %path.display(), "Loaded debugger config file");
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(CHAINTESTER_CONTROL_ADDR) {
            self.control_addr = addr;
        }
        if let Some(addr) = lookup(CHAINTESTER_APPLY_REQUEST_ADDR) {
            self.apply_request_addr = addr;
        }
        if let Some(addr) = lookup(CHAINTESTER_VM_API_ADDR) {
            self.vm_api_addr = addr;
        }
        if let Some(size) = lookup(CHAINTESTER_BUFFER_SIZE) {
            self.buffer_size = size.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: CHAINTESTER_BUFFER_SIZE.to_string(),
                value: size.clone(),
                reason: format!("{e}"),
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check that every setting is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("control_addr", &self.control_addr),
            ("apply_request_addr", &self.apply_request_addr),
            ("vm_api_addr", &self.vm_api_addr),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.clone(),
                    reason: "address must not be empty".to_string(),
                });
            }
        }

        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "buffer_size".to_string(),
                value: "0".to_string(),
                reason: "buffer size must be positive".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::{collections::HashMap, io::Write};

    #[test]
    fn test_defaults_match_debugger() {
        let config = DebuggerConfig::default();
        assert_eq!(config.control_addr, "127.0.0.1:9090");
        assert_eq!(config.apply_request_addr, "127.0.0.1:9091");
        assert_eq!(config.vm_api_addr, "127.0.0.1:9092");
        assert_eq!(config.buffer_size, 8192);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "control_addr = \"10.1.1.1:7000\"").unwrap();
        writeln!(file, "buffer_size = 4096").unwrap();

        let config = DebuggerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.control_addr, "10.1.1.1:7000");
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.vm_api_addr, DEFAULT_VM_API_ADDR);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffer_size = \"lots\"").unwrap();

        let err = DebuggerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = DebuggerConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (CHAINTESTER_CONTROL_ADDR, "127.0.0.1:19090"),
            (CHAINTESTER_BUFFER_SIZE, "1024"),
        ]);

        let config = DebuggerConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.control_addr, "127.0.0.1:19090");
        assert_eq!(config.apply_request_addr, DEFAULT_APPLY_REQUEST_ADDR);
        assert_eq!(config.buffer_size, 1024);
    }

    #[test]
    fn test_invalid_buffer_size_rejected() {
        let err = DebuggerConfig::default()
            .with_overrides(|key| (key == CHAINTESTER_BUFFER_SIZE).then(|| "big".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = DebuggerConfig::default()
            .with_overrides(|key| (key == CHAINTESTER_BUFFER_SIZE).then(|| "0".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("buffer size must be positive"));
    }

    #[test]
    #[serial]
    fn test_load_from_environment() {
        std::env::remove_var(CHAINTESTER_CONFIG);
        std::env::set_var(CHAINTESTER_VM_API_ADDR, "127.0.0.1:29092");

        let config = DebuggerConfig::load().unwrap();
        std::env::remove_var(CHAINTESTER_VM_API_ADDR);

        assert_eq!(config.vm_api_addr, "127.0.0.1:29092");
        assert_eq!(config.control_addr, DEFAULT_CONTROL_ADDR);
    }

    #[test]
    #[serial]
    fn test_load_from_config_env_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "apply_request_addr = \"127.0.0.1:39091\"").unwrap();

        std::env::set_var(CHAINTESTER_CONFIG, file.path());
        let config = DebuggerConfig::load();
        std::env::remove_var(CHAINTESTER_CONFIG);

        assert_eq!(config.unwrap().apply_request_addr, "127.0.0.1:39091");
    }
}
