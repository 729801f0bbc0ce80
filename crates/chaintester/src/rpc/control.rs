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

//! Control channel client.
//!
//! The control channel is the outbound connection to the debugger's chain
//! service. Calls that cannot trigger contract execution are plain
//! request/response. Calls that execute transactions are split into
//! [`ControlClient::begin`] and [`ControlClient::finish`] so the caller can serve
//! the callback channel while the debugger is executing.

use thrift::protocol::TType;
use tracing::debug;

use super::{
    channel::RpcChannel,
    codec::{FromReply, WireStruct, WireValue},
};
use crate::{action::Action, action::ActionArguments, error::Result};

/// Label of the control channel in logs and errors
pub const CONTROL_CHANNEL: &str = "control";

/// Method names served by the debugger's control service
pub mod methods {
    #![allow(missing_docs)]

    pub const INIT_VM_API: &str = "init_vm_api";
    pub const INIT_APPLY_REQUEST: &str = "init_apply_request";
    pub const ENABLE_DEBUG_CONTRACT: &str = "enable_debug_contract";
    pub const PACK_ABI: &str = "pack_abi";
    pub const PACK_ACTION_ARGS: &str = "pack_action_args";
    pub const UNPACK_ACTION_ARGS: &str = "unpack_action_args";
    pub const NEW_CHAIN: &str = "new_chain";
    pub const FREE_CHAIN: &str = "free_chain";
    pub const GET_INFO: &str = "get_info";
    pub const CREATE_KEY: &str = "create_key";
    pub const CREATE_ACCOUNT: &str = "create_account";
    pub const GET_ACCOUNT: &str = "get_account";
    pub const GET_TABLE_ROWS: &str = "get_table_rows";
    pub const PRODUCE_BLOCK: &str = "produce_block";
    pub const PUSH_ACTION: &str = "push_action";
    pub const PUSH_ACTIONS: &str = "push_actions";
}

/// Parameters of a new account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    /// Paying account
    pub creator: String,
    /// Account to create
    pub account: String,
    /// Owner public key
    pub owner_key: String,
    /// Active public key
    pub active_key: String,
    /// RAM bytes to buy for the account
    pub ram_bytes: i64,
    /// Staked NET
    pub stake_net: i64,
    /// Staked CPU
    pub stake_cpu: i64,
}

/// A table query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRowsQuery {
    /// Decode rows with the contract ABI; raw hex otherwise
    pub json: bool,
    /// Contract owning the table
    pub code: String,
    /// Table scope
    pub scope: String,
    /// Table name
    pub table: String,
    /// Inclusive lower bound of the key
    pub lower_bound: String,
    /// Exclusive upper bound of the key
    pub upper_bound: String,
    /// Maximum number of rows
    pub limit: i64,
    /// Key type of secondary indices
    pub key_type: String,
    /// Index position, `""` or `"1"` for the primary index
    pub index_position: String,
    /// Iterate from the upper bound down
    pub reverse: bool,
    /// Include the RAM payer of each row
    pub show_payer: bool,
}

impl TableRowsQuery {
    /// Query `table` of contract `code` in `scope` with default options
    pub fn new(code: impl Into<String>, scope: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            json: true,
            code: code.into(),
            scope: scope.into(),
            table: table.into(),
            lower_bound: String::new(),
            upper_bound: String::new(),
            limit: 10,
            key_type: String::new(),
            index_position: String::new(),
            reverse: false,
            show_payer: false,
        }
    }

    fn to_args(&self, chain_id: i32) -> WireStruct {
        WireStruct::new()
            .with(1, WireValue::I32(chain_id))
            .with(2, WireValue::Bool(self.json))
            .with(3, WireValue::string(&self.code))
            .with(4, WireValue::string(&self.scope))
            .with(5, WireValue::string(&self.table))
            .with(6, WireValue::string(&self.lower_bound))
            .with(7, WireValue::string(&self.upper_bound))
            .with(8, WireValue::I64(self.limit))
            .with(9, WireValue::string(&self.key_type))
            .with(10, WireValue::string(&self.index_position))
            .with(11, WireValue::Bool(self.reverse))
            .with(12, WireValue::Bool(self.show_payer))
    }
}

/// A request written to the control channel whose reply has not been read yet
#[must_use = "the reply of a pending call must be read with ControlClient::finish"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCall {
    /// Method that was called
    pub method: &'static str,
    /// Sequence id of the request
    pub seq_id: i32,
}

/// Typed client of the debugger control service
#[derive(Debug)]
pub struct ControlClient {
    channel: RpcChannel,
}

impl ControlClient {
    /// Dial the control service
    pub fn connect(addr: &str, buffer_size: usize) -> Result<Self> {
        let channel = RpcChannel::connect(CONTROL_CHANNEL, addr, buffer_size)?;
        debug!(addr, "Connected control channel");
        Ok(Self { channel })
    }

    /// Wrap an existing channel
    pub fn from_channel(channel: RpcChannel) -> Self {
        Self { channel }
    }

    /// Last sequence id used on the control channel
    pub fn seq_id(&self) -> i32 {
        self.channel.seq_id()
    }

    /// Write a request without waiting for its reply
    pub fn begin(&mut self, method: &'static str, args: &WireStruct) -> Result<PendingCall> {
        let seq_id = self.channel.next_seq_id();
        self.channel.send(method, seq_id, args)?;
        Ok(PendingCall { method, seq_id })
    }

    /// Read the reply of a request written by [`ControlClient::begin`]
    pub fn finish<R: FromReply>(&mut self, pending: PendingCall) -> Result<R> {
        let reply = self.channel.recv(pending.method, pending.seq_id)?;
        R::from_reply(pending.method, &reply)
    }

    /// Ask the debugger to open its VM-API service
    pub fn init_vm_api(&mut self) -> Result<()> {
        self.channel.call(methods::INIT_VM_API, WireStruct::new())
    }

    /// Ask the debugger to connect back to the callback listener
    pub fn init_apply_request(&mut self) -> Result<()> {
        self.channel.call(methods::INIT_APPLY_REQUEST, WireStruct::new())
    }

    /// Route `contract` through native apply handlers on `chain_id`
    pub fn enable_debug_contract(&mut self, chain_id: i32, contract: &str, enable: bool) -> Result<()> {
        let args = WireStruct::new()
            .with(1, WireValue::I32(chain_id))
            .with(2, WireValue::string(contract))
            .with(3, WireValue::Bool(enable));
        self.channel.call(methods::ENABLE_DEBUG_CONTRACT, args)
    }

    /// Serialize an ABI from its JSON form
    pub fn pack_abi(&mut self, abi: &str) -> Result<Vec<u8>> {
        self.channel.call(methods::PACK_ABI, WireStruct::new().with(1, WireValue::string(abi)))
    }

    /// Serialize JSON action arguments with the ABI of `contract`
    pub fn pack_action_args(&mut self, chain_id: i32, contract: &str, action: &str, args: &str) -> Result<Vec<u8>> {
        let args = WireStruct::new()
            .with(1, WireValue::I32(chain_id))
            .with(2, WireValue::string(contract))
            .with(3, WireValue::string(action))
            .with(4, WireValue::string(args));
        self.channel.call(methods::PACK_ACTION_ARGS, args)
    }

    /// Deserialize binary action arguments into JSON with the ABI of `contract`
    pub fn unpack_action_args(&mut self, chain_id: i32, contract: &str, action: &str, raw: &[u8]) -> Result<Vec<u8>> {
        let args = WireStruct::new()
            .with(1, WireValue::I32(chain_id))
            .with(2, WireValue::string(contract))
            .with(3, WireValue::string(action))
            .with(4, WireValue::Binary(raw.to_vec()));
        self.channel.call(methods::UNPACK_ACTION_ARGS, args)
    }

    /// Create a chain and return its id
    pub fn new_chain(&mut self, debug: bool) -> Result<i32> {
        self.channel.call(methods::NEW_CHAIN, WireStruct::new().with(1, WireValue::Bool(debug)))
    }

    /// Destroy a chain
    pub fn free_chain(&mut self, chain_id: i32) -> Result<i32> {
        self.channel.call(methods::FREE_CHAIN, WireStruct::new().with(1, WireValue::I32(chain_id)))
    }

    /// Chain info JSON
    pub fn get_info(&mut self, chain_id: i32) -> Result<Vec<u8>> {
        self.channel.call(methods::GET_INFO, WireStruct::new().with(1, WireValue::I32(chain_id)))
    }

    /// Generate a key pair
    pub fn create_key(&mut self, key_type: &str) -> Result<Vec<u8>> {
        self.channel.call(methods::CREATE_KEY, WireStruct::new().with(1, WireValue::string(key_type)))
    }

    /// Create an account
    pub fn create_account(&mut self, chain_id: i32, account: &NewAccount) -> Result<Vec<u8>> {
        let args = WireStruct::new()
            .with(1, WireValue::I32(chain_id))
            .with(2, WireValue::string(&account.creator))
            .with(3, WireValue::string(&account.account))
            .with(4, WireValue::string(&account.owner_key))
            .with(5, WireValue::string(&account.active_key))
            .with(6, WireValue::I64(account.ram_bytes))
            .with(7, WireValue::I64(account.stake_net))
            .with(8, WireValue::I64(account.stake_cpu));
        self.channel.call(methods::CREATE_ACCOUNT, args)
    }

    /// Account JSON
    pub fn get_account(&mut self, chain_id: i32, account: &str) -> Result<Vec<u8>> {
        let args = WireStruct::new().with(1, WireValue::I32(chain_id)).with(2, WireValue::string(account));
        self.channel.call(methods::GET_ACCOUNT, args)
    }

    /// Table rows JSON
    pub fn get_table_rows(&mut self, chain_id: i32, query: &TableRowsQuery) -> Result<Vec<u8>> {
        self.channel.call(methods::GET_TABLE_ROWS, query.to_args(chain_id))
    }

    /// Start executing a single action
    pub fn begin_push_action(
        &mut self,
        chain_id: i32,
        account: &str,
        action: &str,
        arguments: &ActionArguments,
        permissions: &str,
    ) -> Result<PendingCall> {
        let args = WireStruct::new()
            .with(1, WireValue::I32(chain_id))
            .with(2, WireValue::string(account))
            .with(3, WireValue::string(action))
            .with(4, arguments.to_wire())
            .with(5, WireValue::string(permissions));
        self.begin(methods::PUSH_ACTION, &args)
    }

    /// Start executing a list of actions as one transaction
    pub fn begin_push_actions(&mut self, chain_id: i32, actions: &[Action]) -> Result<PendingCall> {
        let items = actions.iter().map(Action::to_wire).collect();
        let args = WireStruct::new()
            .with(1, WireValue::I32(chain_id))
            .with(2, WireValue::List { element_type: TType::Struct, items });
        self.begin(methods::PUSH_ACTIONS, &args)
    }

    /// Start producing a block, advancing the clock by `skip_seconds` first
    pub fn begin_produce_block(&mut self, chain_id: i32, skip_seconds: i64) -> Result<PendingCall> {
        let args = WireStruct::new().with(1, WireValue::I32(chain_id)).with(2, WireValue::I64(skip_seconds));
        self.begin(methods::PRODUCE_BLOCK, &args)
    }

    /// Close the connection
    pub fn close(&mut self) {
        self.channel.close();
    }
}
