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

//! In-process mock of the chain debugger
//!
//! The mock binds its control and VM-API services on ephemeral local ports and
//! connects back to the tester's callback listener when asked to, exactly like
//! the real debugger. Chains are simulated in memory:
//!
//! - accounts `eosio`, `eosio.token`, `hello`, `alice` and `bob` exist at genesis
//!   and `eosio.token` has a token contract deployed;
//! - `eosio::setcode` / `eosio::setabi` deploy a contract;
//! - a deployed contract counts `inc` actions in its `counter` table, fails every
//!   `assert` action and tracks balances for `issue` / `transfer`;
//! - actions sent to a contract with debugging enabled are delivered to the
//!   tester as apply cycles instead.
//!
//! Every message the mock receives or completes is appended to an [`Event`] log
//! so tests can check ordering and sequence ids across channels.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use chaintester::{
    n2s,
    rpc::{control::methods, IncomingCall, RpcChannel, WireStruct, WireValue},
    s2n, Action, ActionArguments, ChainTesterError, DebuggerConfig, Session, SharedSession, APPLY_STATUS_OK,
};
use chrono::DateTime;
use eyre::Result;
use parking_lot::Mutex;
use serde_json::{json, Value};
use thrift::{ApplicationError, ApplicationErrorKind};
use tracing::{debug, info, warn};

/// Timestamp of the genesis block: 2018-06-01T12:00:00Z
const GENESIS_TIME_US: i64 = 1_527_854_400_000_000;
/// Block interval
const BLOCK_INTERVAL_US: i64 = 500_000;
/// Accounts present on every new chain
const GENESIS_ACCOUNTS: [&str; 5] = ["eosio", "eosio.token", "hello", "alice", "bob"];
/// Token contract deployed at genesis
const TOKEN_CONTRACT: &str = "eosio.token";

type Outcome = std::result::Result<Option<WireValue>, ApplicationError>;

/// Something the mock observed, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A control request was read
    ControlCall {
        /// Method name
        method: String,
        /// Sequence id chosen by the tester
        seq_id: i32,
    },
    /// A control reply is about to be written
    ControlReply {
        /// Method name
        method: String,
        /// Sequence id of the request
        seq_id: i32,
    },
    /// An `apply_request` is about to be delivered
    ApplyRequest {
        /// Chain executing the action
        chain_id: i32,
        /// Receiving contract
        receiver: String,
        /// Action name
        action: String,
    },
    /// The tester answered an `apply_request`
    ApplyReply {
        /// Chain executing the action
        chain_id: i32,
        /// Receiving contract
        receiver: String,
        /// Status returned by the tester
        status: i32,
    },
    /// The tester acknowledged `apply_end`
    ApplyEnd {
        /// Chain the burst belonged to
        chain_id: i32,
    },
    /// A VM-API request was read
    VmApi {
        /// Method name
        method: String,
        /// Sequence id chosen by the tester
        seq_id: i32,
    },
}

/// Fault injection for the mock
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Close the callback connection instead of delivering an apply cycle for
    /// actions with this name
    pub drop_callback_on: Option<String>,
}

/// A running mock debugger
#[derive(Debug)]
pub struct MockDebugger {
    config: DebuggerConfig,
    state: Arc<Mutex<MockState>>,
}

impl MockDebugger {
    /// Start a well-behaved mock
    pub fn start() -> Result<Self> {
        Self::start_with(MockBehavior::default())
    }

    /// Start a mock with fault injection
    pub fn start_with(behavior: MockBehavior) -> Result<Self> {
        let control = TcpListener::bind("127.0.0.1:0")?;
        let vm_api = TcpListener::bind("127.0.0.1:0")?;
        let config = DebuggerConfig {
            control_addr: control.local_addr()?.to_string(),
            apply_request_addr: free_local_addr()?,
            vm_api_addr: vm_api.local_addr()?.to_string(),
            ..DebuggerConfig::default()
        };
        let state = Arc::new(Mutex::new(MockState::default()));

        let control_state = state.clone();
        let callback_addr = config.apply_request_addr.clone();
        let buffer_size = config.buffer_size;
        thread::Builder::new().name("mock-control".to_string()).spawn(move || {
            serve_control(control, &callback_addr, buffer_size, &control_state, &behavior)
        })?;

        let vm_state = state.clone();
        thread::Builder::new()
            .name("mock-vm-api".to_string())
            .spawn(move || serve_vm_api(vm_api, buffer_size, &vm_state))?;

        info!(
            control = %config.control_addr,
            callback = %config.apply_request_addr,
            vm_api = %config.vm_api_addr,
            "Mock debugger started"
        );
        Ok(Self { config, state })
    }

    /// Configuration pointing a session at this mock
    pub fn config(&self) -> DebuggerConfig {
        self.config.clone()
    }

    /// Open a session against this mock
    pub fn connect(&self) -> chaintester::Result<SharedSession> {
        Session::connect_shared(self.config())
    }

    /// Events observed so far
    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    /// Return and forget the events observed so far
    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.state.lock().events)
    }

    /// Number of live chains
    pub fn chain_count(&self) -> usize {
        self.state.lock().chains.len()
    }
}

fn free_local_addr() -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.to_string())
}

fn accept_error(channel: &'static str) -> impl Fn(std::io::Error) -> ChainTesterError {
    move |e| ChainTesterError::Transport { channel, source: e.into() }
}

fn app_error(kind: ApplicationErrorKind, message: impl Into<String>) -> ApplicationError {
    ApplicationError::new(kind, message)
}

fn bad_args(err: impl Display) -> ApplicationError {
    app_error(ApplicationErrorKind::ProtocolError, err.to_string())
}

fn unknown_chain(chain_id: i32) -> ApplicationError {
    app_error(ApplicationErrorKind::InternalError, format!("chain {chain_id} does not exist"))
}

fn json_reply(value: &Value) -> Option<WireValue> {
    Some(WireValue::Binary(value.to_string().into_bytes()))
}

fn format_time(time_us: i64) -> String {
    DateTime::from_timestamp_micros(time_us)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
        .unwrap_or_default()
}

fn except(code: i64, name: &str, message: &str, detail: &str) -> Value {
    json!({
        "except": {
            "code": code,
            "name": name,
            "message": message,
            "stack": [{
                "context": {"level": "error", "file": "mock_debugger.rs", "method": "apply"},
                "format": detail,
                "data": {},
            }],
        }
    })
}

fn assertion_failure(message: &str) -> Value {
    except(
        3_050_003,
        "eosio_assert_message_exception",
        "eosio_assert_message assertion failure",
        &format!("assertion failure with message: {message}"),
    )
}

/// Token amount with its symbol
#[derive(Debug, Clone, PartialEq, Eq)]
struct Asset {
    amount: u64,
    precision: u8,
    symbol: String,
}

impl Asset {
    fn parse(text: &str) -> std::result::Result<Self, String> {
        let (amount, symbol) =
            text.trim().split_once(' ').ok_or_else(|| format!("asset {text:?} has no symbol"))?;
        let (int, frac) = amount.split_once('.').unwrap_or((amount, ""));
        let precision = u8::try_from(frac.len()).map_err(|_| format!("asset {text:?} is too precise"))?;
        let amount = format!("{int}{frac}")
            .parse()
            .map_err(|e| format!("invalid amount in {text:?}: {e}"))?;
        if symbol.is_empty() || symbol.len() > 7 || !symbol.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(format!("invalid symbol {symbol:?}"));
        }
        Ok(Self { amount, precision, symbol: symbol.to_string() })
    }

    /// Binary row of the `accounts` table: amount then symbol, both little-endian
    fn to_row_hex(&self) -> String {
        let mut row = self.amount.to_le_bytes().to_vec();
        row.push(self.precision);
        let mut symbol = self.symbol.as_bytes().to_vec();
        symbol.resize(7, 0);
        row.extend(symbol);
        hex::encode(row)
    }
}

impl Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.precision == 0 {
            return write!(f, "{} {}", self.amount, self.symbol);
        }
        let scale = 10u64.pow(u32::from(self.precision));
        write!(
            f,
            "{}.{:0width$} {}",
            self.amount / scale,
            self.amount % scale,
            self.symbol,
            width = usize::from(self.precision)
        )
    }
}

#[derive(Debug, Clone)]
struct AccountInfo {
    creator: String,
    owner_key: String,
    active_key: String,
    ram_bytes: i64,
    stake_net: i64,
    stake_cpu: i64,
    created_us: i64,
}

#[derive(Debug, Clone, Default)]
struct Contract {
    code_size: usize,
    abi: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct MockChain {
    debug: bool,
    accounts: BTreeMap<String, AccountInfo>,
    contracts: BTreeMap<String, Contract>,
    debug_contracts: BTreeSet<String>,
    counters: BTreeMap<String, u64>,
    /// Keyed by (token contract, owner, symbol)
    balances: BTreeMap<(String, String, String), Asset>,
    head_block_num: u64,
    head_block_time_us: i64,
}

impl MockChain {
    fn genesis(debug: bool) -> Self {
        let accounts = GENESIS_ACCOUNTS
            .iter()
            .map(|name| {
                let info = AccountInfo {
                    creator: "eosio".to_string(),
                    owner_key: String::new(),
                    active_key: String::new(),
                    ram_bytes: -1,
                    stake_net: -1,
                    stake_cpu: -1,
                    created_us: GENESIS_TIME_US,
                };
                (name.to_string(), info)
            })
            .collect();
        let token = Contract { code_size: 0, abi: Some(b"{}".to_vec()) };
        Self {
            debug,
            accounts,
            contracts: BTreeMap::from([(TOKEN_CONTRACT.to_string(), token)]),
            debug_contracts: BTreeSet::new(),
            counters: BTreeMap::new(),
            balances: BTreeMap::new(),
            head_block_num: 1,
            head_block_time_us: GENESIS_TIME_US,
        }
    }

    fn info(&self, chain_id: i32) -> Value {
        json!({
            "server_version": "d133c641",
            "chain_id": format!("{:064x}", chain_id),
            "head_block_num": self.head_block_num,
            "last_irreversible_block_num": self.head_block_num.saturating_sub(1),
            "head_block_time": format_time(self.head_block_time_us),
            "head_block_producer": "eosio",
            "debug": self.debug,
        })
    }

    fn account(&self, name: &str) -> Option<Value> {
        let info = self.accounts.get(name)?;
        Some(json!({
            "account_name": name,
            "head_block_num": self.head_block_num,
            "created": format_time(info.created_us),
            "creator": info.creator,
            "ram_quota": info.ram_bytes,
            "net_weight": info.stake_net,
            "cpu_weight": info.stake_cpu,
            "permissions": [
                {"perm_name": "active", "parent": "owner", "required_auth": {"keys": [{"key": info.active_key, "weight": 1}]}},
                {"perm_name": "owner", "parent": "", "required_auth": {"keys": [{"key": info.owner_key, "weight": 1}]}},
            ],
            "code_deployed": self.contracts.contains_key(name),
        }))
    }

    /// Execute `action` as the deployed contract would; returns the console output
    fn run_builtin(&mut self, action: &Action, authorizers: &[String]) -> std::result::Result<String, String> {
        let args = action_args(&action.arguments)?;
        let arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        let require_auth = |account: &str| {
            if authorizers.iter().any(|a| a == account) {
                Ok(())
            } else {
                Err(format!("missing authority of {account}"))
            }
        };

        match (action.account.as_str(), action.action.as_str()) {
            ("eosio", "setcode") => {
                let account = arg("account");
                require_auth(&account)?;
                let code = hex::decode(arg("code")).map_err(|e| format!("code is not hex: {e}"))?;
                self.contracts.entry(account).or_default().code_size = code.len();
                Ok(String::new())
            }
            ("eosio", "setabi") => {
                let account = arg("account");
                require_auth(&account)?;
                let abi = hex::decode(arg("abi")).map_err(|e| format!("abi is not hex: {e}"))?;
                self.contracts.entry(account).or_default().abi = Some(abi);
                Ok(String::new())
            }
            (contract, _) if !self.contracts.contains_key(contract) => Ok(String::new()),
            (contract, "inc") => {
                let count = self.counters.entry(contract.to_string()).or_default();
                *count += 1;
                Ok(format!("{} count: {count}", arg("name")))
            }
            (_, "assert") => Err("assert action always fails".to_string()),
            (contract, "issue") => {
                require_auth(contract)?;
                let asset = Asset::parse(&arg("quantity"))?;
                self.credit(contract, &arg("to"), asset)?;
                Ok(String::new())
            }
            (contract, "transfer") => {
                let (from, to) = (arg("from"), arg("to"));
                require_auth(&from)?;
                let asset = Asset::parse(&arg("quantity"))?;
                self.debit(contract, &from, &asset)?;
                self.credit(contract, &to, asset)?;
                Ok(String::new())
            }
            _ => Ok(String::new()),
        }
    }

    fn credit(&mut self, contract: &str, owner: &str, asset: Asset) -> std::result::Result<(), String> {
        if !self.accounts.contains_key(owner) {
            return Err(format!("to account {owner} does not exist"));
        }
        let key = (contract.to_string(), owner.to_string(), asset.symbol.clone());
        match self.balances.get_mut(&key) {
            Some(balance) if balance.precision != asset.precision => {
                Err("symbol precision mismatch".to_string())
            }
            Some(balance) => {
                balance.amount += asset.amount;
                Ok(())
            }
            None => {
                self.balances.insert(key, asset);
                Ok(())
            }
        }
    }

    fn debit(&mut self, contract: &str, owner: &str, asset: &Asset) -> std::result::Result<(), String> {
        let key = (contract.to_string(), owner.to_string(), asset.symbol.clone());
        match self.balances.get_mut(&key) {
            Some(balance) if balance.amount >= asset.amount => {
                balance.amount -= asset.amount;
                Ok(())
            }
            _ => Err("overdrawn balance".to_string()),
        }
    }

    fn table_rows(&self, args: &WireStruct) -> std::result::Result<Value, ApplicationError> {
        let json_rows = args.require_bool(2, "json").map_err(bad_args)?;
        let code = args.require_str(3, "code").map_err(bad_args)?;
        let scope = args.require_str(4, "scope").map_err(bad_args)?;
        let table = args.require_str(5, "table").map_err(bad_args)?;
        let lower_bound = args.require_str(6, "lower_bound").map_err(bad_args)?;
        let limit = args.require_i64(8, "limit").map_err(bad_args)?;
        let show_payer = args.field(12).and_then(WireValue::as_bool).unwrap_or(false);

        let mut rows: Vec<Value> = match table {
            "counter" => self
                .counters
                .get(code)
                .map(|count| {
                    if json_rows {
                        json!({"id": 0, "count": count})
                    } else {
                        Value::String(hex::encode([0u64.to_le_bytes(), count.to_le_bytes()].concat()))
                    }
                })
                .into_iter()
                .collect(),
            "accounts" => self
                .balances
                .iter()
                .filter(|((contract, owner, symbol), _)| {
                    contract == code && owner == scope && (lower_bound.is_empty() || symbol.as_str() >= lower_bound)
                })
                .map(|(_, asset)| {
                    if json_rows {
                        json!({"balance": asset.to_string()})
                    } else {
                        Value::String(asset.to_row_hex())
                    }
                })
                .collect(),
            _ => Vec::new(),
        };

        let limit = usize::try_from(limit).unwrap_or(0);
        let more = rows.len() > limit;
        rows.truncate(limit);
        if show_payer {
            rows = rows.into_iter().map(|row| json!({"data": row, "payer": code})).collect();
        }
        Ok(json!({"rows": rows, "more": more, "next_key": ""}))
    }
}

fn action_args(arguments: &ActionArguments) -> std::result::Result<Value, String> {
    let parsed = match arguments {
        ActionArguments::Json(text) => serde_json::from_str(text),
        ActionArguments::Raw(raw) => serde_json::from_slice(raw),
    };
    parsed.map_err(|e| format!("cannot unpack action arguments: {e}"))
}

fn parse_permissions(permissions: &str) -> std::result::Result<Vec<String>, String> {
    let value: Value =
        serde_json::from_str(permissions).map_err(|e| format!("invalid permissions {permissions:?}: {e}"))?;
    let map = value.as_object().ok_or_else(|| format!("permissions {permissions:?} are not an object"))?;
    Ok(map.keys().cloned().collect())
}

/// Apply cycle currently delivered to the tester
#[derive(Debug)]
struct CurrentApply {
    chain_id: i32,
    receiver: u64,
    data: Vec<u8>,
    authorizers: Vec<String>,
    console: String,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    next_chain_id: i32,
    next_key: u64,
    next_tx: u64,
    chains: BTreeMap<i32, MockChain>,
    current: Option<CurrentApply>,
    events: Vec<Event>,
}

impl MockState {
    fn chain_mut(&mut self, args: &WireStruct) -> std::result::Result<(i32, &mut MockChain), ApplicationError> {
        let chain_id = args.require_i32(1, "chain_id").map_err(bad_args)?;
        let chain = self.chains.get_mut(&chain_id).ok_or_else(|| unknown_chain(chain_id))?;
        Ok((chain_id, chain))
    }

    fn next_transaction(&mut self, block_num: u64, traces: Vec<Value>) -> Value {
        self.next_tx += 1;
        json!({
            "id": format!("{:064x}", self.next_tx),
            "block_num": block_num + 1,
            "elapsed": 100,
            "action_traces": traces,
        })
    }

    /// Control methods that never execute contract code
    fn query(&mut self, method: &str, args: &WireStruct) -> Outcome {
        match method {
            methods::NEW_CHAIN => {
                let debug = args.require_bool(1, "debug").map_err(bad_args)?;
                let chain_id = self.next_chain_id;
                self.next_chain_id += 1;
                self.chains.insert(chain_id, MockChain::genesis(debug));
                let debug_enabled = debug;
                debug!(chain_id, debug = debug_enabled, "Mock chain created");
                Ok(Some(WireValue::I32(chain_id)))
            }
            methods::FREE_CHAIN => {
                let chain_id = args.require_i32(1, "chain_id").map_err(bad_args)?;
                self.chains.remove(&chain_id).ok_or_else(|| unknown_chain(chain_id))?;
                Ok(Some(WireValue::I32(0)))
            }
            methods::GET_INFO => {
                let (chain_id, chain) = self.chain_mut(args)?;
                Ok(json_reply(&chain.info(chain_id)))
            }
            methods::CREATE_KEY => {
                let key_type = args.require_str(1, "key_type").map_err(bad_args)?.to_string();
                self.next_key += 1;
                let key = match key_type.as_str() {
                    "K1" => json!({
                        "public": format!("EOS{:050x}", self.next_key),
                        "private": format!("5K{:049x}", self.next_key),
                    }),
                    "R1" => json!({
                        "public": format!("PUB_R1_{:050x}", self.next_key),
                        "private": format!("PVT_R1_{:049x}", self.next_key),
                    }),
                    other => except(3_010_000, "key_type_exception", "unsupported key type", other),
                };
                Ok(json_reply(&key))
            }
            methods::CREATE_ACCOUNT => {
                let field = |id, what| args.require_str(id, what).map(str::to_string).map_err(bad_args);
                let creator = field(2, "creator")?;
                let account = field(3, "account")?;
                let info = AccountInfo {
                    creator: creator.clone(),
                    owner_key: field(4, "owner_key")?,
                    active_key: field(5, "active_key")?,
                    ram_bytes: args.require_i64(6, "ram_bytes").map_err(bad_args)?,
                    stake_net: args.require_i64(7, "stake_net").map_err(bad_args)?,
                    stake_cpu: args.require_i64(8, "stake_cpu").map_err(bad_args)?,
                    created_us: 0,
                };
                let (_, chain) = self.chain_mut(args)?;

                let failure = if !chain.accounts.contains_key(&creator) {
                    Some(except(3_010_001, "account_name_exception", "unknown creator", &creator))
                } else if chain.accounts.contains_key(&account) {
                    Some(except(3_050_001, "account_name_exists_exception", "account name already exists", &account))
                } else if s2n(&account).is_err() {
                    Some(except(3_010_001, "account_name_exception", "invalid account name", &account))
                } else {
                    None
                };
                if let Some(failure) = failure {
                    return Ok(json_reply(&failure));
                }

                let created_us = chain.head_block_time_us;
                let block_num = chain.head_block_num;
                chain.accounts.insert(account.clone(), AccountInfo { created_us, ..info });
                let trace = json!({
                    "receiver": "eosio",
                    "act": {"account": "eosio", "name": "newaccount", "data": {"creator": creator, "name": account}},
                    "console": "",
                });
                Ok(json_reply(&self.next_transaction(block_num, vec![trace])))
            }
            methods::GET_ACCOUNT => {
                let account = args.require_str(2, "account").map_err(bad_args)?.to_string();
                let (_, chain) = self.chain_mut(args)?;
                let reply = chain.account(&account).unwrap_or_else(|| {
                    except(3_060_002, "account_query_exception", "account query exception", &format!("unknown account {account}"))
                });
                Ok(json_reply(&reply))
            }
            methods::GET_TABLE_ROWS => {
                let (_, chain) = self.chain_mut(args)?;
                Ok(json_reply(&chain.table_rows(args)?))
            }
            methods::ENABLE_DEBUG_CONTRACT => {
                let contract = args.require_str(2, "contract").map_err(bad_args)?.to_string();
                let enable = args.require_bool(3, "enable").map_err(bad_args)?;
                let (_, chain) = self.chain_mut(args)?;
                if enable {
                    chain.debug_contracts.insert(contract);
                } else {
                    chain.debug_contracts.remove(&contract);
                }
                Ok(None)
            }
            methods::PACK_ABI => {
                let abi = args.require_str(1, "abi").map_err(bad_args)?;
                let parsed: Value = serde_json::from_str(abi)
                    .map_err(|e| app_error(ApplicationErrorKind::InternalError, format!("invalid abi: {e}")))?;
                Ok(Some(WireValue::Binary(parsed.to_string().into_bytes())))
            }
            methods::PACK_ACTION_ARGS | methods::UNPACK_ACTION_ARGS => {
                let contract = args.require_str(2, "contract").map_err(bad_args)?.to_string();
                let payload = args.require_bytes(4, "args").map_err(bad_args)?.to_vec();
                let (_, chain) = self.chain_mut(args)?;
                if chain.contracts.get(&contract).and_then(|c| c.abi.as_ref()).is_none() {
                    return Err(app_error(
                        ApplicationErrorKind::InternalError,
                        format!("contract {contract} has no abi"),
                    ));
                }
                let parsed: Value = serde_json::from_slice(&payload).map_err(|e| {
                    app_error(ApplicationErrorKind::InternalError, format!("cannot convert action arguments: {e}"))
                })?;
                Ok(Some(WireValue::Binary(parsed.to_string().into_bytes())))
            }
            other => Err(app_error(ApplicationErrorKind::UnknownMethod, format!("Unknown function {other}"))),
        }
    }
}

fn serve_control(
    listener: TcpListener,
    callback_addr: &str,
    buffer_size: usize,
    state: &Arc<Mutex<MockState>>,
    behavior: &MockBehavior,
) {
    for stream in listener.incoming() {
        let result = stream.map_err(accept_error("mock-control")).and_then(|stream| {
            ControlServer::new(stream, callback_addr, buffer_size, state.clone(), behavior.clone())
        });
        match result.and_then(|mut server| server.run()) {
            Ok(()) => debug!("Mock control connection closed"),
            Err(err) => warn!(%err, "Mock control connection failed"),
        }
    }
}

/// Serves one control connection
struct ControlServer {
    channel: RpcChannel,
    callback: Option<RpcChannel>,
    callback_addr: String,
    buffer_size: usize,
    state: Arc<Mutex<MockState>>,
    behavior: MockBehavior,
}

impl ControlServer {
    fn new(
        stream: TcpStream,
        callback_addr: &str,
        buffer_size: usize,
        state: Arc<Mutex<MockState>>,
        behavior: MockBehavior,
    ) -> chaintester::Result<Self> {
        Ok(Self {
            channel: RpcChannel::from_stream("mock-control", stream, buffer_size)?,
            callback: None,
            callback_addr: callback_addr.to_string(),
            buffer_size,
            state,
            behavior,
        })
    }

    fn record(&self, event: Event) {
        self.state.lock().events.push(event);
    }

    fn run(&mut self) -> chaintester::Result<()> {
        while let Some(call) = self.channel.read_call()? {
            self.record(Event::ControlCall { method: call.method.clone(), seq_id: call.seq_id });
            let outcome = self.dispatch(&call);
            self.record(Event::ControlReply { method: call.method.clone(), seq_id: call.seq_id });
            match outcome {
                Ok(Some(value)) => self.channel.reply(&call, &WireStruct::new().with(0, value))?,
                Ok(None) => self.channel.reply(&call, &WireStruct::new())?,
                Err(error) => self.channel.reply_exception(&call, &error)?,
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, call: &IncomingCall) -> Outcome {
        let args = &call.args;
        match call.method.as_str() {
            methods::INIT_VM_API => Ok(None),
            methods::INIT_APPLY_REQUEST => self.init_apply_request(),
            methods::PUSH_ACTION => {
                let chain_id = args.field(1).and_then(WireValue::as_i32).unwrap_or(-1);
                let actions = decode_push_action(args);
                self.run_transaction(chain_id, actions)
            }
            methods::PUSH_ACTIONS => {
                let chain_id = args.field(1).and_then(WireValue::as_i32).unwrap_or(-1);
                let actions = decode_push_actions(args);
                self.run_transaction(chain_id, actions)
            }
            methods::PRODUCE_BLOCK => {
                let chain_id = args.field(1).and_then(WireValue::as_i32).unwrap_or(-1);
                let produced = self.produce_block(args);
                self.apply_end(chain_id);
                produced
            }
            other => self.state.lock().query(other, args),
        }
    }

    fn init_apply_request(&mut self) -> Outcome {
        if self.callback.is_none() {
            let channel = RpcChannel::connect("mock-callback", &self.callback_addr, self.buffer_size)
                .map_err(|e| app_error(ApplicationErrorKind::InternalError, e.to_string()))?;
            debug!(addr = %self.callback_addr, "Mock connected to callback listener");
            self.callback = Some(channel);
        }
        Ok(None)
    }

    fn produce_block(&self, args: &WireStruct) -> Outcome {
        let skip_seconds = args.require_i64(2, "skip_seconds").map_err(bad_args)?;
        let mut state = self.state.lock();
        let (_, chain) = state.chain_mut(args)?;
        chain.head_block_num += 1;
        chain.head_block_time_us += BLOCK_INTERVAL_US + skip_seconds.max(0) * 1_000_000;
        Ok(None)
    }

    /// Execute a transaction, then close the callback burst with `apply_end`
    fn run_transaction(
        &mut self,
        chain_id: i32,
        actions: std::result::Result<Vec<Action>, ApplicationError>,
    ) -> Outcome {
        let outcome = actions.and_then(|actions| self.execute(chain_id, &actions));
        self.apply_end(chain_id);
        outcome.map(|value| json_reply(&value))
    }

    fn execute(&mut self, chain_id: i32, actions: &[Action]) -> std::result::Result<Value, ApplicationError> {
        let snapshot = self.state.lock().chains.get(&chain_id).cloned().ok_or_else(|| unknown_chain(chain_id))?;

        let mut traces = Vec::new();
        for action in actions {
            match self.execute_action(chain_id, action) {
                Ok(console) => traces.push(json!({
                    "receiver": action.account,
                    "act": {"account": action.account, "name": action.action},
                    "console": console,
                })),
                Err(failure) => {
                    // roll back the effects of earlier actions
                    self.state.lock().chains.insert(chain_id, snapshot);
                    return Ok(failure);
                }
            }
        }

        let mut state = self.state.lock();
        let block_num = snapshot.head_block_num;
        Ok(state.next_transaction(block_num, traces))
    }

    /// Run one action; the error is the `except` body of the failed transaction
    fn execute_action(&mut self, chain_id: i32, action: &Action) -> std::result::Result<String, Value> {
        let authorizers = parse_permissions(&action.permissions)
            .map_err(|e| except(3_040_000, "transaction_exception", "invalid permissions", &e))?;

        let debug_enabled = {
            let state = self.state.lock();
            let Some(chain) = state.chains.get(&chain_id) else {
                return Err(except(3_040_000, "transaction_exception", "chain freed", &chain_id.to_string()));
            };
            if let Some(missing) = authorizers.iter().find(|a| !chain.accounts.contains_key(*a)) {
                return Err(except(
                    3_090_003,
                    "unsatisfied_authorization",
                    "provided keys, permissions, and delays do not satisfy declared authorizations",
                    &format!("missing authority of {missing}"),
                ));
            }
            chain.debug_contracts.contains(&action.account)
        };

        if debug_enabled {
            return self.deliver_apply(chain_id, action, authorizers).map_err(|message| assertion_failure(&message));
        }

        let mut state = self.state.lock();
        let chain = state
            .chains
            .get_mut(&chain_id)
            .ok_or_else(|| except(3_040_000, "transaction_exception", "chain freed", &chain_id.to_string()))?;
        chain.run_builtin(action, &authorizers).map_err(|message| assertion_failure(&message))
    }

    /// Hand one apply cycle to the tester; returns its console output or failure
    fn deliver_apply(
        &mut self,
        chain_id: i32,
        action: &Action,
        authorizers: Vec<String>,
    ) -> std::result::Result<String, String> {
        let (Ok(receiver), Ok(action_name)) = (s2n(&action.account), s2n(&action.action)) else {
            return Err(format!("invalid action {}::{}", action.account, action.action));
        };
        if self.behavior.drop_callback_on.as_deref() == Some(action.action.as_str()) {
            if let Some(mut callback) = self.callback.take() {
                warn!(action = %action.action, "Mock dropping callback connection");
                callback.close();
            }
        }
        let Some(callback) = self.callback.as_mut() else {
            return Err("apply request connection is not available".to_string());
        };

        let data = match &action.arguments {
            ActionArguments::Json(text) => text.clone().into_bytes(),
            ActionArguments::Raw(raw) => raw.clone(),
        };
        {
            let mut state = self.state.lock();
            state.current =
                Some(CurrentApply { chain_id, receiver, data, authorizers, console: String::new(), failure: None });
            state.events.push(Event::ApplyRequest {
                chain_id,
                receiver: action.account.clone(),
                action: action.action.clone(),
            });
        }

        let args = WireStruct::new()
            .with(1, WireValue::uint64(receiver))
            .with(2, WireValue::uint64(receiver))
            .with(3, WireValue::uint64(action_name))
            .with(4, WireValue::I32(chain_id));
        let status = callback.call::<i32>("apply_request", args);

        let mut state = self.state.lock();
        let current = state.current.take();
        let status = match status {
            Ok(status) => status,
            Err(err) => {
                warn!(%err, "Mock lost the callback connection during apply");
                drop(state);
                self.callback = None;
                return Err("apply request connection lost".to_string());
            }
        };
        state.events.push(Event::ApplyReply { chain_id, receiver: action.account.clone(), status });

        match current {
            Some(CurrentApply { failure: Some(message), .. }) => Err(message),
            Some(current) if status == APPLY_STATUS_OK => Ok(current.console),
            _ => Err(format!("native apply of {} failed", n2s(receiver))),
        }
    }

    fn apply_end(&mut self, chain_id: i32) {
        let Some(callback) = self.callback.as_mut() else {
            return;
        };
        match callback.call::<i32>("apply_end", WireStruct::new().with(1, WireValue::I32(chain_id))) {
            Ok(_) => self.record(Event::ApplyEnd { chain_id }),
            Err(err) => {
                warn!(%err, "Mock lost the callback connection at apply_end");
                self.callback = None;
            }
        }
    }
}

fn decode_push_action(args: &WireStruct) -> std::result::Result<Vec<Action>, ApplicationError> {
    let arguments = args.field(4).ok_or_else(|| bad_args("push_action has no arguments"))?;
    Ok(vec![Action {
        account: args.require_str(2, "account").map_err(bad_args)?.to_string(),
        action: args.require_str(3, "action").map_err(bad_args)?.to_string(),
        arguments: ActionArguments::from_wire(arguments).map_err(bad_args)?,
        permissions: args.require_str(5, "permissions").map_err(bad_args)?.to_string(),
    }])
}

fn decode_push_actions(args: &WireStruct) -> std::result::Result<Vec<Action>, ApplicationError> {
    let items = args.field(2).and_then(WireValue::as_list).ok_or_else(|| bad_args("push_actions has no actions"))?;
    items.iter().map(|item| Action::from_wire(item).map_err(bad_args)).collect()
}

fn serve_vm_api(listener: TcpListener, buffer_size: usize, state: &Arc<Mutex<MockState>>) {
    for stream in listener.incoming() {
        let result = stream
            .map_err(accept_error("mock-vm-api"))
            .and_then(|stream| RpcChannel::from_stream("mock-vm-api", stream, buffer_size));
        match result.and_then(|channel| serve_vm_api_connection(channel, state)) {
            Ok(()) => debug!("Mock VM-API connection closed"),
            Err(err) => warn!(%err, "Mock VM-API connection failed"),
        }
    }
}

fn serve_vm_api_connection(mut channel: RpcChannel, state: &Arc<Mutex<MockState>>) -> chaintester::Result<()> {
    while let Some(call) = channel.read_call()? {
        let outcome = {
            let mut state = state.lock();
            state.events.push(Event::VmApi { method: call.method.clone(), seq_id: call.seq_id });
            handle_vm_api(&mut state, &call)
        };
        match outcome {
            Ok(Some(value)) => channel.reply(&call, &WireStruct::new().with(0, value))?,
            Ok(None) => channel.reply(&call, &WireStruct::new())?,
            Err(error) => channel.reply_exception(&call, &error)?,
        }
    }
    Ok(())
}

fn handle_vm_api(state: &mut MockState, call: &IncomingCall) -> Outcome {
    let MockState { current, chains, .. } = state;
    let Some(current) = current.as_mut() else {
        return Err(app_error(
            ApplicationErrorKind::InternalError,
            format!("{} called outside of an apply", call.method),
        ));
    };
    let args = &call.args;
    let account_arg = || args.require_uint64(1, "account").map(n2s).map_err(bad_args);

    match call.method.as_str() {
        "prints" => {
            current.console.push_str(args.require_str(1, "message").map_err(bad_args)?);
            Ok(None)
        }
        "printi" => {
            current.console.push_str(&args.require_i64(1, "value").map_err(bad_args)?.to_string());
            Ok(None)
        }
        "printui" => {
            current.console.push_str(&args.require_uint64(1, "value").map_err(bad_args)?.to_string());
            Ok(None)
        }
        "action_data_size" => {
            let size = i32::try_from(current.data.len()).map_err(bad_args)?;
            Ok(Some(WireValue::I32(size)))
        }
        "read_action_data" => Ok(Some(WireValue::Binary(current.data.clone()))),
        "current_receiver" => Ok(Some(WireValue::uint64(current.receiver))),
        "require_auth" => {
            let account = account_arg()?;
            if current.authorizers.contains(&account) {
                return Ok(None);
            }
            let message = format!("missing authority of {account}");
            current.failure = Some(message.clone());
            Err(app_error(ApplicationErrorKind::InternalError, message))
        }
        "has_auth" => Ok(Some(WireValue::Bool(current.authorizers.contains(&account_arg()?)))),
        "is_account" => {
            let account = account_arg()?;
            let exists = chains.get(&current.chain_id).is_some_and(|chain| chain.accounts.contains_key(&account));
            Ok(Some(WireValue::Bool(exists)))
        }
        "current_time" => {
            let time_us = chains.get(&current.chain_id).map_or(GENESIS_TIME_US, |chain| chain.head_block_time_us);
            Ok(Some(WireValue::uint64(u64::try_from(time_us).unwrap_or_default())))
        }
        "eosio_assert" => {
            let test = args.require_bool(1, "test").map_err(bad_args)?;
            if test {
                return Ok(None);
            }
            let message = args.require_str(2, "message").map_err(bad_args)?.to_string();
            current.failure = Some(message.clone());
            Err(app_error(
                ApplicationErrorKind::InternalError,
                format!("assertion failure with message: {message}"),
            ))
        }
        "end_apply" => Ok(None),
        other => Err(app_error(ApplicationErrorKind::UnknownMethod, format!("Unknown function {other}"))),
    }
}
