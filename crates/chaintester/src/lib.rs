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

//! ChainTester - drive an EOSIO chain debugger from Rust tests.
//!
//! The debugger runs chains in a separate process and talks to the tester over
//! three TCP connections. This crate wraps them in a [`Session`] and exposes one
//! [`ChainTester`] per chain instance:
//!
//! ```rust,ignore
//! use chaintester::{native_apply, ChainTester};
//!
//! let tester = ChainTester::new()?;
//! tester.deploy_contract("hello", "hello.wasm", Some("hello.abi".as_ref()))?;
//! tester.enable_debug_contract("hello", true)?;
//! tester.set_native_apply("hello", Some(native_apply(|api, _request| api.prints("hi"))))?;
//! tester.push_action("hello", "test", "{}", r#"{"hello":"active"}"#)?;
//! ```

pub mod action;
pub mod apply;
pub mod error;
pub mod json;
pub mod rpc;
pub mod session;
pub mod tester;

pub use action::{signer_permissions, Action, ActionArguments, ActionBuilder};
pub use apply::{
    native_apply, ApplyDispatcher, ApplyRequest, HandlerRegistry, NativeApply, APPLY_STATUS_FAILED,
    APPLY_STATUS_OK,
};
pub use chaintester_common::{n2s, s2n, DebuggerConfig, Name, NameError};
pub use error::{
    lift_json_response, AssertionError, ChainTesterError, ProtocolError, ProtocolErrorKind, Result,
    TransactionError,
};
pub use json::{JsonError, JsonValue, PathKey};
pub use rpc::{TableRowsQuery, VmApiClient};
pub use session::{lock_session, Session, SharedSession};
pub use tester::ChainTester;
