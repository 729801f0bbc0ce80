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

//! Integration test support for the chain tester
//!
//! The centerpiece is [`mock_debugger::MockDebugger`], an in-process debugger
//! that speaks the control, callback and VM-API protocols over real sockets.
//! End-to-end tests in `tests/` and the CLI tests drive it through the public
//! chain tester API.

pub mod mock_debugger;

pub use mock_debugger::{Event, MockBehavior, MockDebugger};

/// Initialization utilities for tests
pub mod init {
    /// Initialize logging for a test run; safe to call from every test
    pub fn init_test_environment() {
        chaintester_common::logging::ensure_test_logging(None);
    }
}

/// Contract files on disk for deployment tests
pub mod fixtures {
    use std::{fs, path::PathBuf};

    use eyre::Result;
    use tempfile::TempDir;

    /// Smallest valid WASM module: magic number and version
    pub const HELLO_WASM: &[u8] = b"\0asm\x01\0\0\0";

    /// ABI of the `hello` counter contract
    pub const HELLO_ABI: &str = r#"{
        "version": "eosio::abi/1.1",
        "structs": [
            {"name": "inc", "base": "", "fields": [{"name": "name", "type": "name"}]},
            {"name": "test", "base": "", "fields": []},
            {"name": "counter", "base": "", "fields": [{"name": "id", "type": "uint64"}, {"name": "count", "type": "uint64"}]}
        ],
        "actions": [
            {"name": "inc", "type": "inc", "ricardian_contract": ""},
            {"name": "test", "type": "test", "ricardian_contract": ""}
        ],
        "tables": [
            {"name": "counter", "index_type": "i64", "key_names": [], "key_types": [], "type": "counter"}
        ]
    }"#;

    /// WASM and ABI files living in a temporary directory
    #[derive(Debug)]
    pub struct ContractFiles {
        _dir: TempDir,
        /// Path of the WASM file
        pub wasm: PathBuf,
        /// Path of the ABI file
        pub abi: PathBuf,
    }

    /// Write the `hello` contract to a fresh temporary directory
    pub fn hello_contract() -> Result<ContractFiles> {
        let dir = tempfile::tempdir()?;
        let wasm = dir.path().join("test.wasm");
        let abi = dir.path().join("test.abi");
        fs::write(&wasm, HELLO_WASM)?;
        fs::write(&abi, HELLO_ABI)?;
        Ok(ContractFiles { _dir: dir, wasm, abi })
    }
}
