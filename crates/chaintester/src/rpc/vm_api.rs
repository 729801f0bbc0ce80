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

//! VM-API channel client.
//!
//! Native apply handlers reach the host functions of the contract being executed
//! through this client. Every call requires an active apply context; outside of
//! one the call fails with [`ChainTesterError::Usage`] before anything is written.

use chaintester_common::Name;
use tracing::{debug, trace};

use super::{
    channel::RpcChannel,
    codec::{FromReply, WireStruct, WireValue},
};
use crate::error::{AssertionError, ChainTesterError, Result};

/// Label of the VM-API channel in logs and errors
pub const VM_API_CHANNEL: &str = "vm_api";

/// Apply context tracked while a native handler runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyContext {
    chain_id: Option<i32>,
}

impl ApplyContext {
    /// Whether an apply is in progress
    pub fn in_apply(&self) -> bool {
        self.chain_id.is_some()
    }

    /// Chain of the apply in progress
    pub fn chain_id(&self) -> Option<i32> {
        self.chain_id
    }
}

/// Typed client of the debugger VM-API service
#[derive(Debug)]
pub struct VmApiClient {
    channel: RpcChannel,
    context: ApplyContext,
}

impl VmApiClient {
    /// Dial the VM-API service
    pub fn connect(addr: &str, buffer_size: usize) -> Result<Self> {
        let channel = RpcChannel::connect(VM_API_CHANNEL, addr, buffer_size)?;
        debug!(addr, "Connected VM-API channel");
        Ok(Self::from_channel(channel))
    }

    /// Wrap an existing channel
    pub fn from_channel(channel: RpcChannel) -> Self {
        Self { channel, context: ApplyContext::default() }
    }

    /// Whether a native apply handler is running
    pub fn in_apply(&self) -> bool {
        self.context.in_apply()
    }

    /// Current apply context
    pub fn context(&self) -> ApplyContext {
        self.context
    }

    /// Last sequence id used on the VM-API channel
    pub fn seq_id(&self) -> i32 {
        self.channel.seq_id()
    }

    pub(crate) fn enter_apply(&mut self, chain_id: i32) {
        self.context.chain_id = Some(chain_id);
    }

    pub(crate) fn leave_apply(&mut self) {
        self.context.chain_id = None;
    }

    fn call<R: FromReply>(&mut self, method: &str, args: WireStruct) -> Result<R> {
        if !self.context.in_apply() {
            return Err(ChainTesterError::Usage(format!(
                "VM-API call `{method}` issued outside of an apply context"
            )));
        }
        trace!(method, "VM-API call");
        self.channel.call(method, args)
    }

    /// Tell the debugger the native handler finished
    pub(crate) fn end_apply(&mut self) -> Result<()> {
        self.call("end_apply", WireStruct::new())
    }

    /// Print a string to the contract console
    pub fn prints(&mut self, message: &str) -> Result<()> {
        self.call("prints", WireStruct::new().with(1, WireValue::string(message)))
    }

    /// Print a signed integer to the contract console
    pub fn printi(&mut self, value: i64) -> Result<()> {
        self.call("printi", WireStruct::new().with(1, WireValue::I64(value)))
    }

    /// Print an unsigned integer to the contract console
    pub fn printui(&mut self, value: u64) -> Result<()> {
        self.call("printui", WireStruct::new().with(1, WireValue::uint64(value)))
    }

    /// Size of the packed action data
    pub fn action_data_size(&mut self) -> Result<i32> {
        self.call("action_data_size", WireStruct::new())
    }

    /// Packed action data
    pub fn read_action_data(&mut self) -> Result<Vec<u8>> {
        self.call("read_action_data", WireStruct::new())
    }

    /// Account whose code is running
    pub fn current_receiver(&mut self) -> Result<Name> {
        self.call::<u64>("current_receiver", WireStruct::new()).map(Name)
    }

    /// Abort unless `account` authorized the action
    pub fn require_auth(&mut self, account: Name) -> Result<()> {
        self.call("require_auth", WireStruct::new().with(1, WireValue::uint64(account.value())))
    }

    /// Whether `account` authorized the action
    pub fn has_auth(&mut self, account: Name) -> Result<bool> {
        self.call("has_auth", WireStruct::new().with(1, WireValue::uint64(account.value())))
    }

    /// Whether `account` exists
    pub fn is_account(&mut self, account: Name) -> Result<bool> {
        self.call("is_account", WireStruct::new().with(1, WireValue::uint64(account.value())))
    }

    /// Block time in microseconds since the epoch
    pub fn current_time(&mut self) -> Result<u64> {
        self.call("current_time", WireStruct::new())
    }

    /// Host-side assertion; the debugger aborts the action when `test` is false
    pub fn eosio_assert(&mut self, test: bool, message: &str) -> Result<()> {
        self.call(
            "eosio_assert",
            WireStruct::new().with(1, WireValue::Bool(test)).with(2, WireValue::string(message)),
        )
    }

    /// Local check for use with `?` inside native handlers
    pub fn check(&self, condition: bool, message: impl Into<String>) -> Result<(), AssertionError> {
        if condition {
            Ok(())
        } else {
            Err(AssertionError::new(message))
        }
    }

    /// Shut the connection down
    pub fn close(&mut self) {
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::channel::testing::channel;

    #[test]
    fn test_calls_outside_apply_write_nothing() {
        let (channel, sink) = channel(VM_API_CHANNEL, Vec::new());
        let mut api = VmApiClient::from_channel(channel);

        let err = api.prints("hello").unwrap_err();
        assert!(err.is_usage());
        assert!(err.to_string().contains("prints"));
        assert!(api.has_auth(Name(1)).unwrap_err().is_usage());
        assert!(sink.0.lock().is_empty());
        assert_eq!(api.seq_id(), 0);
    }

    #[test]
    fn test_apply_context_toggles() {
        let (channel, _) = channel(VM_API_CHANNEL, Vec::new());
        let mut api = VmApiClient::from_channel(channel);
        assert!(!api.in_apply());

        api.enter_apply(3);
        assert!(api.in_apply());
        assert_eq!(api.context().chain_id(), Some(3));

        api.leave_apply();
        assert!(!api.in_apply());
        assert_eq!(api.context(), ApplyContext::default());
    }

    #[test]
    fn test_check() {
        let (channel, _) = channel(VM_API_CHANNEL, Vec::new());
        let api = VmApiClient::from_channel(channel);
        assert!(api.check(true, "fine").is_ok());
        assert_eq!(api.check(false, "boom").unwrap_err().message, "boom");
    }
}
