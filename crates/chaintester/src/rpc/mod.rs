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

//! RPC plumbing between the tester and the debugger.
//!
//! Three connections are involved:
//!
//! - the **control** channel ([`control`]), outbound, drives chains;
//! - the **callback** channel ([`callback`]), inbound, delivers apply cycles
//!   while a transaction executes;
//! - the **VM-API** channel ([`vm_api`]), outbound, serves host functions to
//!   native apply handlers.
//!
//! All of them share the framing in [`channel`] and the value codec in [`codec`].

pub mod callback;
pub mod channel;
pub mod codec;
pub mod control;
pub mod vm_api;

pub use callback::{ApplyRequestHandler, CallbackServer};
pub use channel::{IncomingCall, RpcChannel};
pub use codec::{FromReply, WireStruct, WireValue};
pub use control::{ControlClient, NewAccount, PendingCall, TableRowsQuery};
pub use vm_api::{ApplyContext, VmApiClient};
