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

//! Per-chain test handle.

use std::{fmt, fs, path::Path};

use chaintester_common::Name;
use parking_lot::MutexGuard;
use serde_json::json;
use tracing::{debug, error};

use crate::{
    action::{Action, ActionArguments, ActionBuilder},
    apply::NativeApply,
    error::{ChainTesterError, Result},
    json::{JsonError, JsonValue},
    json_path,
    rpc::control::{NewAccount, TableRowsQuery},
    session::{lock_session, Session, SharedSession},
};

/// Default token contract queried by [`ChainTester::get_balance`]
pub const DEFAULT_TOKEN_ACCOUNT: &str = "eosio.token";
/// Default token symbol queried by [`ChainTester::get_balance`]
pub const DEFAULT_SYMBOL: &str = "EOS";

/// One chain instance on the debugger
pub struct ChainTester {
    session: SharedSession,
    id: i32,
    freed: bool,
}

impl fmt::Debug for ChainTester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainTester").field("id", &self.id).field("freed", &self.freed).finish()
    }
}

impl ChainTester {
    /// Create a chain on the process-wide session
    pub fn new() -> Result<Self> {
        Self::with_session(Session::global()?, false)
    }

    /// Create a chain on `session`
    pub fn with_session(session: SharedSession, debug: bool) -> Result<Self> {
        let id = lock_session(&session)?.new_chain(debug)?;
        Ok(Self { session, id, freed: false })
    }

    /// Chain id assigned by the debugger
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Session this chain lives on
    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session>> {
        lock_session(&self.session)
    }

    /// Chain info
    pub fn get_info(&self) -> Result<JsonValue> {
        self.lock()?.get_info(self.id)
    }

    /// Generate a key pair of `key_type` (`"K1"` or `"R1"`)
    pub fn create_key(&self, key_type: &str) -> Result<JsonValue> {
        self.lock()?.create_key(key_type)
    }

    /// Create `account`, paid for by `creator`
    #[allow(clippy::too_many_arguments)]
    pub fn create_account(
        &self,
        creator: &str,
        account: &str,
        owner_key: &str,
        active_key: &str,
        ram_bytes: i64,
        stake_net: i64,
        stake_cpu: i64,
    ) -> Result<JsonValue> {
        let params = NewAccount {
            creator: creator.to_string(),
            account: account.to_string(),
            owner_key: owner_key.to_string(),
            active_key: active_key.to_string(),
            ram_bytes,
            stake_net,
            stake_cpu,
        };
        self.lock()?.create_account(self.id, &params)
    }

    /// Account details
    pub fn get_account(&self, account: &str) -> Result<JsonValue> {
        self.lock()?.get_account(self.id, account)
    }

    /// Route `contract` through native handlers
    pub fn enable_debug_contract(&self, contract: &str, enable: bool) -> Result<()> {
        self.lock()?.enable_debug_contract(self.id, contract, enable)
    }

    /// Serialize an ABI
    pub fn pack_abi(&self, abi: &str) -> Result<Vec<u8>> {
        self.lock()?.pack_abi(abi)
    }

    /// Serialize JSON action arguments with the ABI of `contract`
    pub fn pack_action_args(&self, contract: &str, action: &str, args: &str) -> Result<Vec<u8>> {
        self.lock()?.pack_action_args(self.id, contract, action, args)
    }

    /// Deserialize binary action arguments with the ABI of `contract`
    pub fn unpack_action_args(&self, contract: &str, action: &str, raw: &[u8]) -> Result<JsonValue> {
        self.lock()?.unpack_action_args(self.id, contract, action, raw)
    }

    /// Query a table
    #[allow(clippy::too_many_arguments)]
    pub fn get_table_rows(
        &self,
        json: bool,
        code: &str,
        scope: &str,
        table: &str,
        lower_bound: &str,
        upper_bound: &str,
        limit: i64,
    ) -> Result<JsonValue> {
        let query = TableRowsQuery {
            json,
            lower_bound: lower_bound.to_string(),
            upper_bound: upper_bound.to_string(),
            limit,
            ..TableRowsQuery::new(code, scope, table)
        };
        self.get_table_rows_with(&query)
    }

    /// Query a table with every option
    pub fn get_table_rows_with(&self, query: &TableRowsQuery) -> Result<JsonValue> {
        self.lock()?.get_table_rows(self.id, query)
    }

    /// Execute one action with JSON or packed arguments
    pub fn push_action(
        &self,
        account: &str,
        action: &str,
        arguments: impl Into<ActionArguments>,
        permissions: &str,
    ) -> Result<JsonValue> {
        let arguments = arguments.into();
        self.lock()?.push_action(self.id, account, action, &arguments, permissions)
    }

    /// Execute actions as one transaction
    pub fn push_actions(&self, actions: &[Action]) -> Result<JsonValue> {
        self.lock()?.push_actions(self.id, actions)
    }

    /// Produce a block
    pub fn produce_block(&self) -> Result<()> {
        self.produce_block_with_skip(0)
    }

    /// Advance the clock by `skip_seconds` and produce a block
    pub fn produce_block_with_skip(&self, skip_seconds: i64) -> Result<()> {
        self.lock()?.produce_block(self.id, skip_seconds)
    }

    /// Start a batch of actions
    pub fn new_action_builder(&self) -> ActionBuilder<'_> {
        ActionBuilder::new(self)
    }

    /// Install (`Some`) or clear (`None`) the native handler of `receiver`
    pub fn set_native_apply(&self, receiver: &str, handler: Option<NativeApply>) -> Result<()> {
        let receiver = Name::new(receiver).map_err(|e| ChainTesterError::Usage(e.to_string()))?;
        self.lock()?.set_native_apply(self.id, receiver, handler);
        Ok(())
    }

    /// Deploy a contract: `setcode` with the WASM and, when an ABI is given,
    /// `setabi` with its packed form, both authorized by `account@active` and
    /// sent as one transaction.
    pub fn deploy_contract(
        &self,
        account: &str,
        wasm_file: impl AsRef<Path>,
        abi_file: Option<&Path>,
    ) -> Result<JsonValue> {
        let wasm_file = wasm_file.as_ref();
        let code = fs::read(wasm_file)
            .map_err(|source| ChainTesterError::Io { path: wasm_file.to_path_buf(), source })?;

        let setcode = json!({
            "account": account,
            "vmtype": 0,
            "vmversion": 0,
            "code": hex::encode(&code),
        });
        let mut actions = vec![Action::with_signer("eosio", "setcode", setcode.to_string(), account)];

        if let Some(abi_file) = abi_file {
            let abi = fs::read_to_string(abi_file)
                .map_err(|source| ChainTesterError::Io { path: abi_file.to_path_buf(), source })?;
            let packed = self.pack_abi(&abi)?;
            let setabi = json!({ "account": account, "abi": hex::encode(packed) });
            actions.push(Action::with_signer("eosio", "setabi", setabi.to_string(), account));
        }

        debug!(chain_id = self.id, account, wasm = %wasm_file.display(), bytes = code.len(), "Deploying contract");
        self.push_actions(&actions)
    }

    /// `account`'s balance of the default token, in the token's smallest unit
    pub fn get_balance(&self, account: &str) -> Result<u64> {
        self.get_balance_of(account, DEFAULT_TOKEN_ACCOUNT, DEFAULT_SYMBOL)
    }

    /// `account`'s balance of `symbol` issued by `token_account`.
    ///
    /// Reads the raw row of the `accounts` table and decodes the first eight
    /// bytes as a little-endian amount. An account without a row holds 0.
    pub fn get_balance_of(&self, account: &str, token_account: &str, symbol: &str) -> Result<u64> {
        let query = TableRowsQuery {
            json: false,
            lower_bound: symbol.to_string(),
            limit: 1,
            ..TableRowsQuery::new(token_account, account, "accounts")
        };
        let rows = self.get_table_rows_with(&query)?;

        let row = match rows.get(json_path!["rows", 0]) {
            Ok(row) => row,
            Err(JsonError::IndexOutOfRange { .. }) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let data = match row.as_map() {
            Some(_) => rows.get_string(json_path!["rows", 0, "data"])?,
            None => rows.get_string(json_path!["rows", 0])?,
        };
        decode_balance(&data)
    }

    /// Destroy the chain; later calls are no-ops
    pub fn free(&mut self) -> Result<()> {
        if self.freed {
            return Ok(());
        }
        self.freed = true;
        self.lock()?.free_chain(self.id).map(|_| ())
    }
}

impl Drop for ChainTester {
    fn drop(&mut self) {
        if let Err(err) = self.free() {
            error!(chain_id = self.id, %err, "Failed to free chain");
        }
    }
}

fn decode_balance(hex_row: &str) -> Result<u64> {
    let bytes = hex::decode(hex_row.trim())
        .map_err(|e| ChainTesterError::InvalidResponse(format!("balance row is not hex: {e}")))?;
    let amount: [u8; 8] = bytes
        .get(..8)
        .and_then(|head| head.try_into().ok())
        .ok_or_else(|| ChainTesterError::InvalidResponse(format!("balance row is {} bytes long", bytes.len())))?;
    Ok(u64::from_le_bytes(amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_balance_reads_little_endian_prefix() {
        // 1.0000 EOS: amount 10000, then the symbol
        let row = "102700000000000004454f5300000000";
        assert_eq!(decode_balance(row).unwrap(), 10000);
        assert_eq!(decode_balance("ffffffffffffffff").unwrap(), u64::MAX);
    }

    #[test]
    fn test_decode_balance_rejects_bad_rows() {
        assert!(matches!(decode_balance("zz"), Err(ChainTesterError::InvalidResponse(_))));
        assert!(matches!(decode_balance("0102"), Err(ChainTesterError::InvalidResponse(_))));
    }
}
