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

//! ChainTester Common - Shared functionality for chain tester components
//!
//! This crate provides the ambient pieces used by both the `chaintester`
//! library and its command-line front end: logging setup, configuration of the
//! debugger endpoints, environment variable names and account-name encoding.

/// Debugger endpoint configuration loaded from defaults, TOML files and the environment
pub mod config;
/// Environment variable name constants used to configure the chain tester
pub mod env;
/// Logging setup and utilities for consistent logging across chain tester components
pub mod logging;
/// EOSIO account-name encoding between 64-bit values and their base32 text form
pub mod name;

pub use config::*;
pub use logging::*;
pub use name::*;
