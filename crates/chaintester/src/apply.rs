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

//! Native apply handlers.
//!
//! Tests can shadow a contract with Rust code: a handler registered for
//! `(chain, receiver)` runs whenever the debugger delivers an `apply_request`
//! for that receiver. [`ApplyDispatcher`] is the callback handler that looks the
//! handler up, runs it inside an apply context and always closes the cycle with
//! `end_apply`, whether the handler returned, failed or panicked.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use chaintester_common::Name;
use tracing::{debug, error};

use crate::{
    error::Result,
    rpc::{callback::ApplyRequestHandler, vm_api::VmApiClient},
};

/// Status reported to the debugger for a completed apply
pub const APPLY_STATUS_OK: i32 = 1;
/// Status reported to the debugger for a failed apply
pub const APPLY_STATUS_FAILED: i32 = 0;

/// One apply cycle as delivered by the debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyRequest {
    /// Chain instance executing the action
    pub chain_id: i32,
    /// Account whose code runs
    pub receiver: Name,
    /// Account the action was sent to
    pub first_receiver: Name,
    /// Action name
    pub action: Name,
}

/// A native contract implementation
pub type NativeApply = Box<dyn FnMut(&mut VmApiClient, &ApplyRequest) -> Result<()> + Send>;

/// Box a closure as a [`NativeApply`]
pub fn native_apply<F>(handler: F) -> NativeApply
where
    F: FnMut(&mut VmApiClient, &ApplyRequest) -> Result<()> + Send + 'static,
{
    Box::new(handler)
}

/// Handlers keyed by chain and receiver
#[derive(Default)]
pub struct HandlerRegistry {
    chains: HashMap<i32, HashMap<Name, NativeApply>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (chain_id, handlers) in &self.chains {
            let receivers: Vec<String> = handlers.keys().map(Name::to_string).collect();
            map.entry(chain_id, &receivers);
        }
        map.finish()
    }
}

impl HandlerRegistry {
    /// Install a handler, or clear the slot with `None`
    pub fn set(&mut self, chain_id: i32, receiver: Name, handler: Option<NativeApply>) {
        match handler {
            Some(handler) => {
                self.chains.entry(chain_id).or_default().insert(receiver, handler);
            }
            None => {
                if let Some(handlers) = self.chains.get_mut(&chain_id) {
                    handlers.remove(&receiver);
                    if handlers.is_empty() {
                        self.chains.remove(&chain_id);
                    }
                }
            }
        }
    }

    /// Drop every handler of a chain; returns whether any existed
    pub fn remove_chain(&mut self, chain_id: i32) -> bool {
        self.chains.remove(&chain_id).is_some()
    }

    /// Whether a handler is installed for `(chain_id, receiver)`
    pub fn contains(&self, chain_id: i32, receiver: Name) -> bool {
        self.chains.get(&chain_id).is_some_and(|handlers| handlers.contains_key(&receiver))
    }

    /// Whether any handler is installed for `chain_id`
    pub fn has_chain(&self, chain_id: i32) -> bool {
        self.chains.contains_key(&chain_id)
    }

    fn get_mut(&mut self, chain_id: i32, receiver: Name) -> Option<&mut NativeApply> {
        self.chains.get_mut(&chain_id)?.get_mut(&receiver)
    }
}

/// Why a native handler did not complete
#[derive(Debug)]
enum ApplyFailure {
    Error(crate::error::ChainTesterError),
    Panic(String),
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => write!(f, "{err}"),
            Self::Panic(message) => write!(f, "panicked: {message}"),
        }
    }
}

/// Routes apply cycles to registered handlers
pub struct ApplyDispatcher<'a> {
    registry: &'a mut HandlerRegistry,
    vm_api: &'a mut VmApiClient,
}

impl<'a> ApplyDispatcher<'a> {
    /// Dispatch through `registry`, giving handlers access to `vm_api`
    pub fn new(registry: &'a mut HandlerRegistry, vm_api: &'a mut VmApiClient) -> Self {
        Self { registry, vm_api }
    }
}

impl ApplyRequestHandler for ApplyDispatcher<'_> {
    fn apply_request(&mut self, receiver: Name, first_receiver: Name, action: Name, chain_id: i32) -> i32 {
        let request = ApplyRequest { chain_id, receiver, first_receiver, action };
        debug!(chain_id, %receiver, %first_receiver, %action, "apply_request");

        self.vm_api.enter_apply(chain_id);
        let outcome = match self.registry.get_mut(chain_id, receiver) {
            Some(handler) => run_native_apply(handler, self.vm_api, &request),
            None => {
                debug!(chain_id, %receiver, "No native apply registered");
                Ok(())
            }
        };
        if let Err(err) = self.vm_api.end_apply() {
            error!(chain_id, %receiver, %err, "end_apply failed");
        }
        self.vm_api.leave_apply();

        match outcome {
            Ok(()) => APPLY_STATUS_OK,
            Err(failure) => {
                error!(chain_id, %receiver, %action, %failure, "Native apply failed");
                APPLY_STATUS_FAILED
            }
        }
    }

    fn apply_end(&mut self, chain_id: Option<i32>) -> i32 {
        debug!(?chain_id, "apply_end");
        APPLY_STATUS_OK
    }
}

fn run_native_apply(
    handler: &mut NativeApply,
    vm_api: &mut VmApiClient,
    request: &ApplyRequest,
) -> Result<(), ApplyFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(vm_api, request))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ApplyFailure::Error(err)),
        Err(payload) => Err(ApplyFailure::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{
        channel::testing::{channel, encode, SharedBuffer},
        codec::WireStruct,
        vm_api::VM_API_CHANNEL,
    };
    use std::{
        io::Cursor,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    };
    use thrift::protocol::{TBinaryInputProtocol, TInputProtocol, TMessageIdentifier, TMessageType};

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    /// VM-API client whose peer answers each of `replies` in order
    fn scripted_vm_api(replies: &[&str]) -> (VmApiClient, SharedBuffer) {
        let incoming = encode(|out| {
            for (i, method) in replies.iter().enumerate() {
                let seq_id = i32::try_from(i + 1).unwrap();
                out.write_message_begin(&TMessageIdentifier::new(*method, TMessageType::Reply, seq_id)).unwrap();
                WireStruct::new().write("result", out).unwrap();
                out.write_message_end().unwrap();
            }
        });
        let (channel, sink) = channel(VM_API_CHANNEL, incoming);
        (VmApiClient::from_channel(channel), sink)
    }

    fn sent_methods(sink: &SharedBuffer) -> Vec<String> {
        let bytes = sink.0.lock().clone();
        let len = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);
        let mut methods = Vec::new();
        while cursor.position() < len {
            let mut input = TBinaryInputProtocol::new(&mut cursor, false);
            let ident = input.read_message_begin().unwrap();
            WireStruct::read(&mut input).unwrap();
            input.read_message_end().unwrap();
            methods.push(ident.name);
        }
        methods
    }

    #[test]
    fn test_registry_set_and_clear() {
        let mut registry = HandlerRegistry::default();
        registry.set(1, name("hello"), Some(native_apply(|_, _| Ok(()))));
        registry.set(1, name("token"), Some(native_apply(|_, _| Ok(()))));
        assert!(registry.contains(1, name("hello")));
        assert!(!registry.contains(2, name("hello")));

        registry.set(1, name("hello"), None);
        assert!(!registry.contains(1, name("hello")));
        assert!(registry.has_chain(1));

        registry.set(1, name("token"), None);
        assert!(!registry.has_chain(1));

        registry.set(4, name("hello"), Some(native_apply(|_, _| Ok(()))));
        assert!(registry.remove_chain(4));
        assert!(!registry.remove_chain(4));
    }

    #[test]
    fn test_handler_runs_inside_apply_context() {
        let (mut vm_api, sink) = scripted_vm_api(&["prints", "end_apply"]);
        let mut registry = HandlerRegistry::default();
        let observed = Arc::new(AtomicBool::new(false));
        let seen = observed.clone();
        registry.set(
            0,
            name("hello"),
            Some(native_apply(move |api, request| {
                seen.store(api.in_apply(), Ordering::SeqCst);
                assert_eq!(request.action.to_string(), "test");
                api.prints("hi")
            })),
        );

        let status = ApplyDispatcher::new(&mut registry, &mut vm_api).apply_request(
            name("hello"),
            name("hello"),
            name("test"),
            0,
        );
        assert_eq!(status, APPLY_STATUS_OK);
        assert!(observed.load(Ordering::SeqCst));
        assert!(!vm_api.in_apply());
        assert_eq!(sent_methods(&sink), ["prints", "end_apply"]);
    }

    #[test]
    fn test_unregistered_receiver_only_ends_apply() {
        let (mut vm_api, sink) = scripted_vm_api(&["end_apply"]);
        let mut registry = HandlerRegistry::default();

        let status = ApplyDispatcher::new(&mut registry, &mut vm_api).apply_request(
            name("other"),
            name("other"),
            name("inc"),
            0,
        );
        assert_eq!(status, APPLY_STATUS_OK);
        assert_eq!(sent_methods(&sink), ["end_apply"]);
    }

    #[test]
    fn test_assertion_reports_failure_and_ends_apply() {
        let (mut vm_api, sink) = scripted_vm_api(&["end_apply"]);
        let mut registry = HandlerRegistry::default();
        registry.set(
            0,
            name("hello"),
            Some(native_apply(|api, _| {
                api.check(false, "amount must be positive")?;
                Ok(())
            })),
        );

        let status = ApplyDispatcher::new(&mut registry, &mut vm_api).apply_request(
            name("hello"),
            name("hello"),
            name("inc"),
            0,
        );
        assert_eq!(status, APPLY_STATUS_FAILED);
        assert!(!vm_api.in_apply());
        assert_eq!(sent_methods(&sink), ["end_apply"]);
    }

    #[test]
    fn test_panic_is_contained() {
        let (mut vm_api, sink) = scripted_vm_api(&["end_apply"]);
        let mut registry = HandlerRegistry::default();
        registry.set(0, name("hello"), Some(native_apply(|_, _| panic!("handler exploded"))));

        let status = ApplyDispatcher::new(&mut registry, &mut vm_api).apply_request(
            name("hello"),
            name("hello"),
            name("inc"),
            0,
        );
        assert_eq!(status, APPLY_STATUS_FAILED);
        assert!(!vm_api.in_apply());
        assert_eq!(sent_methods(&sink), ["end_apply"]);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
