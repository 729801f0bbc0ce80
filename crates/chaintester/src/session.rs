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

//! Debugger session.
//!
//! A [`Session`] owns everything a process shares with the debugger: the control
//! connection, the callback listener and its accepted connection, the VM-API
//! connection and the native handler registry. Chain testers hold a
//! [`SharedSession`] and lock it for the duration of each call; callbacks are
//! served on the calling thread while the lock is held.
//!
//! Native handlers receive the VM-API client directly. Locking the session they
//! run under through [`lock_session`] fails with a usage error.

use std::{cell::Cell, net::SocketAddr, sync::Arc};

use chaintester_common::{DebuggerConfig, Name};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    action::{Action, ActionArguments},
    apply::{ApplyDispatcher, HandlerRegistry, NativeApply},
    error::{lift_json_response, ChainTesterError, Result},
    json::JsonValue,
    rpc::{
        callback::CallbackServer,
        codec::FromReply,
        control::{ControlClient, NewAccount, PendingCall, TableRowsQuery},
        vm_api::VmApiClient,
    },
};

/// A session shared between chain testers
pub type SharedSession = Arc<Mutex<Session>>;

static GLOBAL_SESSION: OnceCell<SharedSession> = OnceCell::new();

thread_local! {
    static SERVING_CALLBACKS: Cell<bool> = const { Cell::new(false) };
}

/// Lock `session` for one call.
///
/// Blocks while another thread holds the lock. On a thread that is serving
/// callbacks the lock can never be released, so this fails instead.
pub fn lock_session(session: &SharedSession) -> Result<MutexGuard<'_, Session>> {
    if let Some(guard) = session.try_lock() {
        return Ok(guard);
    }
    if SERVING_CALLBACKS.with(Cell::get) {
        return Err(ChainTesterError::Usage("session is busy serving an apply callback".to_string()));
    }
    Ok(session.lock())
}

/// Marks the current thread as serving callbacks until dropped
struct ServingCallbacks(bool);

impl ServingCallbacks {
    fn enter() -> Self {
        Self(SERVING_CALLBACKS.with(|flag| flag.replace(true)))
    }
}

impl Drop for ServingCallbacks {
    fn drop(&mut self) {
        SERVING_CALLBACKS.with(|flag| flag.set(self.0));
    }
}

/// Connections and state shared with one debugger
#[derive(Debug)]
pub struct Session {
    config: DebuggerConfig,
    control: ControlClient,
    callbacks: CallbackServer,
    vm_api: VmApiClient,
    registry: HandlerRegistry,
}

impl Session {
    /// Connect to the debugger.
    ///
    /// Binds the callback listener, connects the control channel, requests the
    /// VM-API service and connects to it, requests the callback connection and
    /// accepts it, in that order.
    pub fn connect(config: DebuggerConfig) -> Result<Self> {
        config.validate()?;

        let mut callbacks = CallbackServer::listen(&config.apply_request_addr, config.buffer_size)?;
        let mut control = ControlClient::connect(&config.control_addr, config.buffer_size)?;

        control.init_vm_api()?;
        let vm_api = VmApiClient::connect(&config.vm_api_addr, config.buffer_size)?;

        control.init_apply_request()?;
        callbacks.accept_once()?;

        info!(
            control = %config.control_addr,
            callback = %callbacks.local_addr(),
            vm_api = %config.vm_api_addr,
            "Debugger session established"
        );
        Ok(Self { config, control, callbacks, vm_api, registry: HandlerRegistry::default() })
    }

    /// Connect and wrap the session for sharing
    pub fn connect_shared(config: DebuggerConfig) -> Result<SharedSession> {
        Ok(Arc::new(Mutex::new(Self::connect(config)?)))
    }

    /// Process-wide session, connected on first use with [`DebuggerConfig::load`]
    pub fn global() -> Result<SharedSession> {
        GLOBAL_SESSION
            .get_or_try_init(|| {
                let config = DebuggerConfig::load()?;
                Self::connect_shared(config)
            })
            .cloned()
    }

    /// Configuration the session was created with
    pub fn config(&self) -> &DebuggerConfig {
        &self.config
    }

    /// Address of the callback listener
    pub fn callback_addr(&self) -> SocketAddr {
        self.callbacks.local_addr()
    }

    /// Whether a native apply handler is running
    pub fn in_apply(&self) -> bool {
        self.vm_api.in_apply()
    }

    /// VM-API client; calls fail unless a native handler is running
    pub fn vm_api(&mut self) -> &mut VmApiClient {
        &mut self.vm_api
    }

    /// Last sequence id used on the control channel
    pub fn control_seq_id(&self) -> i32 {
        self.control.seq_id()
    }

    /// Last sequence id used on the VM-API channel
    pub fn vm_api_seq_id(&self) -> i32 {
        self.vm_api.seq_id()
    }

    /// Native handler registry
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Install or clear the native handler of `receiver` on `chain_id`
    pub fn set_native_apply(&mut self, chain_id: i32, receiver: Name, handler: Option<NativeApply>) {
        debug!(chain_id, %receiver, installed = handler.is_some(), "set_native_apply");
        self.registry.set(chain_id, receiver, handler);
    }

    /// Create a chain
    pub fn new_chain(&mut self, debug: bool) -> Result<i32> {
        let chain_id = self.control.new_chain(debug)?;
        let debug_enabled = debug;
        info!(chain_id, debug = debug_enabled, "Created chain");
        Ok(chain_id)
    }

    /// Destroy a chain and forget its native handlers
    pub fn free_chain(&mut self, chain_id: i32) -> Result<i32> {
        self.registry.remove_chain(chain_id);
        let result = self.control.free_chain(chain_id)?;
        info!(chain_id, "Freed chain");
        Ok(result)
    }

    /// Chain info
    pub fn get_info(&mut self, chain_id: i32) -> Result<JsonValue> {
        lift_json_response(&self.control.get_info(chain_id)?)
    }

    /// Generate a key pair
    pub fn create_key(&mut self, key_type: &str) -> Result<JsonValue> {
        lift_json_response(&self.control.create_key(key_type)?)
    }

    /// Create an account
    pub fn create_account(&mut self, chain_id: i32, account: &NewAccount) -> Result<JsonValue> {
        lift_json_response(&self.control.create_account(chain_id, account)?)
    }

    /// Account details
    pub fn get_account(&mut self, chain_id: i32, account: &str) -> Result<JsonValue> {
        lift_json_response(&self.control.get_account(chain_id, account)?)
    }

    /// Table rows
    pub fn get_table_rows(&mut self, chain_id: i32, query: &TableRowsQuery) -> Result<JsonValue> {
        lift_json_response(&self.control.get_table_rows(chain_id, query)?)
    }

    /// Serialize an ABI
    pub fn pack_abi(&mut self, abi: &str) -> Result<Vec<u8>> {
        self.control.pack_abi(abi)
    }

    /// Serialize JSON action arguments
    pub fn pack_action_args(&mut self, chain_id: i32, contract: &str, action: &str, args: &str) -> Result<Vec<u8>> {
        self.control.pack_action_args(chain_id, contract, action, args)
    }

    /// Deserialize binary action arguments
    pub fn unpack_action_args(
        &mut self,
        chain_id: i32,
        contract: &str,
        action: &str,
        raw: &[u8],
    ) -> Result<JsonValue> {
        let unpacked = self.control.unpack_action_args(chain_id, contract, action, raw)?;
        Ok(JsonValue::parse(unpacked)?)
    }

    /// Route `contract` through native handlers
    pub fn enable_debug_contract(&mut self, chain_id: i32, contract: &str, enable: bool) -> Result<()> {
        self.control.enable_debug_contract(chain_id, contract, enable)
    }

    /// Execute one action, serving callbacks until the debugger is done
    pub fn push_action(
        &mut self,
        chain_id: i32,
        account: &str,
        action: &str,
        arguments: &ActionArguments,
        permissions: &str,
    ) -> Result<JsonValue> {
        let pending = self.control.begin_push_action(chain_id, account, action, arguments, permissions)?;
        let body: Vec<u8> = self.await_reply(pending)?;
        lift_json_response(&body)
    }

    /// Execute actions as one transaction, serving callbacks until the debugger is done
    pub fn push_actions(&mut self, chain_id: i32, actions: &[Action]) -> Result<JsonValue> {
        let pending = self.control.begin_push_actions(chain_id, actions)?;
        let body: Vec<u8> = self.await_reply(pending)?;
        lift_json_response(&body)
    }

    /// Produce a block, serving callbacks until the debugger is done
    pub fn produce_block(&mut self, chain_id: i32, skip_seconds: i64) -> Result<()> {
        let pending = self.control.begin_produce_block(chain_id, skip_seconds)?;
        self.await_reply(pending)
    }

    /// Serve the callback channel until `apply_end`, then read the control reply.
    ///
    /// A failing callback channel ends the burst early; the control reply is read
    /// regardless so both channels stay in step.
    fn await_reply<R: FromReply>(&mut self, pending: PendingCall) -> Result<R> {
        let mut dispatcher = ApplyDispatcher::new(&mut self.registry, &mut self.vm_api);
        let serving = ServingCallbacks::enter();
        if let Err(err) = self.callbacks.process_requests(&mut dispatcher) {
            warn!(method = pending.method, %err, "Callback channel failed, treating as end of apply");
        }
        drop(serving);
        self.control.finish(pending)
    }

    /// Force-close the VM-API connection
    pub fn close(&mut self) {
        self.vm_api.close();
        info!("Closed VM-API connection");
    }
}
