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

//! Environment variable name constants for chain tester configuration.
//!
//! This module provides constant string names for all environment variables read by
//! the chain tester. Keeping them here gives a single source of truth for the
//! configuration loader, the CLI and the tests.
//!
//! # Environment Variables
//!
//! ## Endpoint Configuration
//! - [`CHAINTESTER_CONTROL_ADDR`] - Address of the debugger's control service
//! - [`CHAINTESTER_APPLY_REQUEST_ADDR`] - Address the apply-request callback listener binds to
//! - [`CHAINTESTER_VM_API_ADDR`] - Address of the debugger's VM-API service
//!
//! ## Transport Configuration
//! - [`CHAINTESTER_BUFFER_SIZE`] - Read/write buffer capacity of every connection
//!
//! ## Files
//! - [`CHAINTESTER_CONFIG`] - Path of an optional TOML configuration file

/// Environment variable for the debugger control endpoint.
///
/// The chain tester connects to this address to create chains, push actions and
/// query state.
///
/// # Default
///
/// `127.0.0.1:9090`
///
/// # Examples
///
/// ```bash
/// CHAINTESTER_CONTROL_ADDR=10.0.0.5:9090 cargo test
/// ```
pub const CHAINTESTER_CONTROL_ADDR: &str = "CHAINTESTER_CONTROL_ADDR";

/// Environment variable for the apply-request callback listener.
///
/// The chain tester binds a listening socket on this address and the debugger
/// connects back into it to deliver `apply_request` and `apply_end` calls.
///
/// # Default
///
/// `127.0.0.1:9091`
pub const CHAINTESTER_APPLY_REQUEST_ADDR: &str = "CHAINTESTER_APPLY_REQUEST_ADDR";

/// Environment variable for the debugger VM-API endpoint.
///
/// Native apply handlers reach the running contract's host functions through a
/// dedicated connection to this address.
///
/// # Default
///
/// `127.0.0.1:9092`
pub const CHAINTESTER_VM_API_ADDR: &str = "CHAINTESTER_VM_API_ADDR";

/// Environment variable for the transport buffer capacity in bytes.
///
/// Must be a positive integer. Invalid values are reported as configuration errors.
///
/// # Default
///
/// `8192`
pub const CHAINTESTER_BUFFER_SIZE: &str = "CHAINTESTER_BUFFER_SIZE";

/// Environment variable naming a TOML configuration file.
///
/// Values from the file sit between the built-in defaults and the individual
/// environment variables above.
///
/// # Examples
///
/// ```bash
/// CHAINTESTER_CONFIG=./chaintester.toml cargo test
/// ```
pub const CHAINTESTER_CONFIG: &str = "CHAINTESTER_CONFIG";
