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

//! Apply cycle guarantees observed from the debugger side
//!
//! The mock records every message in order, which lets these tests check how the
//! control, callback and VM-API channels interleave during a transaction.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chaintester::{json_path, lock_session, native_apply, ChainTester, Name};
use chaintester_integration_tests::{
    fixtures, init::init_test_environment, Event, MockBehavior, MockDebugger,
};
use eyre::Result;
use tracing::info;

const HELLO_PERMISSIONS: &str = r#"{"hello":"active"}"#;

/// Chain with `hello` deployed and routed through native handlers
fn debug_chain(mock: &MockDebugger) -> Result<ChainTester> {
    let tester = ChainTester::with_session(mock.connect()?, false)?;
    let files = fixtures::hello_contract()?;
    tester.deploy_contract("hello", &files.wasm, Some(files.abi.as_path()))?;
    tester.enable_debug_contract("hello", true)?;
    Ok(tester)
}

fn count(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

fn end_applies(events: &[Event]) -> usize {
    count(events, |e| matches!(e, Event::VmApi { method, .. } if method == "end_apply"))
}

fn apply_requests(events: &[Event]) -> usize {
    count(events, |e| matches!(e, Event::ApplyRequest { .. }))
}

#[test]
fn test_one_end_apply_per_apply_request() -> Result<()> {
    init_test_environment();
    info!("Testing end_apply pairing across outcomes");

    let mock = MockDebugger::start()?;
    let tester = debug_chain(&mock)?;
    tester.set_native_apply(
        "hello",
        Some(native_apply(|api, request| match request.action.to_string().as_str() {
            "ok" => api.prints("fine"),
            "check" => {
                api.check(false, "amount must be positive")?;
                Ok(())
            }
            "boom" => panic!("native handler exploded"),
            _ => Ok(()),
        })),
    )?;

    for (action, succeeds) in [("ok", true), ("check", false), ("boom", false), ("other", true)] {
        mock.take_events();
        let result = tester.push_action("hello", action, "{}", HELLO_PERMISSIONS);
        assert_eq!(result.is_ok(), succeeds, "{action}: {result:?}");

        let events = mock.events();
        assert_eq!(apply_requests(&events), 1, "{action}");
        assert_eq!(end_applies(&events), 1, "{action}");
        assert!(!tester.session().lock().in_apply());
    }
    Ok(())
}

#[test]
fn test_failed_apply_reports_status_zero() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = debug_chain(&mock)?;
    tester.set_native_apply("hello", Some(native_apply(|_, _| panic!("nope"))))?;

    mock.take_events();
    let err = tester.push_action("hello", "test", "{}", HELLO_PERMISSIONS).unwrap_err();
    assert!(err.as_transaction().is_some());

    let statuses: Vec<i32> = mock
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::ApplyReply { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, [0]);
    Ok(())
}

#[test]
fn test_host_assertion_fails_the_transaction() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = debug_chain(&mock)?;
    tester.set_native_apply(
        "hello",
        Some(native_apply(|api, _| {
            api.eosio_assert(true, "never shown")?;
            api.eosio_assert(false, "counter overflow")
        })),
    )?;

    let err = tester.push_action("hello", "inc", r#"{"name":"go"}"#, HELLO_PERMISSIONS).unwrap_err();
    let body = err.as_transaction().expect("transaction error").json()?;
    let detail = body.get_string(json_path!["except", "stack", 0, "format"])?;
    assert!(detail.contains("counter overflow"), "{detail}");
    Ok(())
}

#[test]
fn test_control_reply_follows_every_callback() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = debug_chain(&mock)?;
    tester.set_native_apply(
        "hello",
        Some(native_apply(|api, _| {
            api.printui(42)?;
            api.printi(-7)
        })),
    )?;

    mock.take_events();
    let mut builder = tester.new_action_builder();
    builder.add_action("hello", "test", "{}", HELLO_PERMISSIONS).add_action("hello", "test", "{}", HELLO_PERMISSIONS);
    let result = builder.send()?;
    assert_eq!(result.get_string(json_path!["action_traces", 0, "console"])?, "42-7");

    let events = mock.events();
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            Event::ControlCall { .. } => "call",
            Event::ControlReply { .. } => "reply",
            Event::ApplyRequest { .. } => "apply",
            Event::ApplyReply { .. } => "applied",
            Event::ApplyEnd { .. } => "end",
            Event::VmApi { method, .. } => method.as_str(),
        })
        .collect();
    assert_eq!(
        kinds,
        [
            "call", "apply", "printui", "printi", "end_apply", "applied", "apply", "printui", "printi", "end_apply",
            "applied", "end", "reply",
        ]
    );
    Ok(())
}

#[test]
fn test_vm_api_outside_apply_is_rejected_locally() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let session = mock.connect()?;
    mock.take_events();

    let err = session.lock().vm_api().prints("too early").unwrap_err();
    assert!(err.is_usage());
    let err = session.lock().vm_api().current_receiver().unwrap_err();
    assert!(err.is_usage());

    assert_eq!(session.lock().vm_api_seq_id(), 0);
    assert!(mock.events().iter().all(|e| !matches!(e, Event::VmApi { .. })));
    Ok(())
}

#[test]
fn test_sequence_ids_have_no_gaps() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = debug_chain(&mock)?;
    tester.set_native_apply(
        "hello",
        Some(native_apply(|api, _| {
            let size = api.action_data_size()?;
            let data = api.read_action_data()?;
            api.check(usize::try_from(size).is_ok_and(|s| s == data.len()), "size mismatch")?;
            api.current_time()?;
            Ok(())
        })),
    )?;
    for _ in 0..3 {
        tester.push_action("hello", "test", r#"{"n":1}"#, HELLO_PERMISSIONS)?;
    }
    tester.produce_block()?;

    let events = mock.events();
    let control: Vec<i32> = events
        .iter()
        .filter_map(|e| match e {
            Event::ControlCall { seq_id, .. } => Some(*seq_id),
            _ => None,
        })
        .collect();
    let vm_api: Vec<i32> = events
        .iter()
        .filter_map(|e| match e {
            Event::VmApi { seq_id, .. } => Some(*seq_id),
            _ => None,
        })
        .collect();

    assert_eq!(control, (1..=control.len() as i32).collect::<Vec<_>>());
    assert_eq!(vm_api, (1..=12).collect::<Vec<_>>());
    let session = tester.session().lock();
    assert_eq!(session.control_seq_id(), control.len() as i32);
    assert_eq!(session.vm_api_seq_id(), 12);
    Ok(())
}

#[test]
fn test_handler_sees_request_and_action_data() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = debug_chain(&mock)?;
    let packed = tester.pack_action_args("hello", "inc", r#"{"name":"go"}"#)?;
    let expected = packed.clone();
    let hello = Name::new("hello")?;
    let alice = Name::new("alice")?;

    tester.set_native_apply(
        "hello",
        Some(native_apply(move |api, request| {
            assert_eq!(request.receiver, hello);
            assert_eq!(request.first_receiver, hello);
            assert_eq!(api.current_receiver()?, hello);
            assert_eq!(api.read_action_data()?, expected);
            let hello_signed = api.has_auth(hello)?;
            api.check(hello_signed, "hello did not sign")?;
            let alice_signed = api.has_auth(alice)?;
            api.check(!alice_signed, "alice signed")?;
            let hello_is_account = api.is_account(hello)?;
            api.check(hello_is_account, "hello is not an account")?;
            api.require_auth(hello)
        })),
    )?;

    tester.push_action("hello", "inc", packed, HELLO_PERMISSIONS)?;
    Ok(())
}

#[test]
fn test_require_auth_failure() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = debug_chain(&mock)?;
    let alice = Name::new("alice")?;
    tester.set_native_apply("hello", Some(native_apply(move |api, _| api.require_auth(alice))))?;

    let err = tester.push_action("hello", "test", "{}", HELLO_PERMISSIONS).unwrap_err();
    let body = err.as_transaction().expect("transaction error").json()?;
    assert!(body.get_string(json_path!["except", "stack", 0, "format"])?.contains("missing authority of alice"));
    Ok(())
}

#[test]
fn test_cleared_handler_is_skipped() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = debug_chain(&mock)?;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    tester.set_native_apply(
        "hello",
        Some(native_apply(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })),
    )?;

    tester.push_action("hello", "test", "{}", HELLO_PERMISSIONS)?;
    tester.set_native_apply("hello", None)?;
    mock.take_events();
    tester.push_action("hello", "test", "{}", HELLO_PERMISSIONS)?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // the debugger still gets its end_apply
    assert_eq!(end_applies(&mock.events()), 1);
    Ok(())
}

#[test]
fn test_free_chain_clears_handlers() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let mut tester = debug_chain(&mock)?;
    let chain_id = tester.id();
    tester.set_native_apply("hello", Some(native_apply(|_, _| Ok(()))))?;
    assert!(tester.session().lock().registry().has_chain(chain_id));

    tester.free()?;
    assert!(!tester.session().lock().registry().has_chain(chain_id));
    assert_eq!(mock.chain_count(), 0);
    Ok(())
}

#[test]
fn test_handlers_are_per_chain() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let first = debug_chain(&mock)?;
    let second = ChainTester::with_session(first.session().clone(), false)?;
    let files = fixtures::hello_contract()?;
    second.deploy_contract("hello", &files.wasm, Some(files.abi.as_path()))?;
    second.enable_debug_contract("hello", true)?;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    first.set_native_apply(
        "hello",
        Some(native_apply(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })),
    )?;

    second.push_action("hello", "test", "{}", HELLO_PERMISSIONS)?;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    first.push_action("hello", "test", "{}", HELLO_PERMISSIONS)?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_callback_connection_lost_mid_transaction() -> Result<()> {
    init_test_environment();
    info!("Testing a debugger that drops the callback connection");

    let mock = MockDebugger::start_with(MockBehavior { drop_callback_on: Some("test".to_string()) })?;
    let tester = debug_chain(&mock)?;
    tester.set_native_apply("hello", Some(native_apply(|_, _| Ok(()))))?;

    // the control reply is still read after the callback loop ends early
    let err = tester.push_action("hello", "test", "{}", HELLO_PERMISSIONS).unwrap_err();
    assert!(err.as_transaction().is_some());

    // later calls keep working without callbacks
    tester.produce_block()?;
    assert_eq!(tester.get_info()?.get_u64(json_path!["head_block_num"])?, 2);
    Ok(())
}

#[test]
fn test_reentrant_session_use_is_usage_error() -> Result<()> {
    init_test_environment();
    info!("Testing a handler that reaches back into its own session");

    let mock = MockDebugger::start()?;
    let tester = debug_chain(&mock)?;
    let session = tester.session().clone();
    let rejected = Arc::new(AtomicUsize::new(0));
    let seen = rejected.clone();
    tester.set_native_apply(
        "hello",
        Some(native_apply(move |api, _| {
            if ChainTester::with_session(session.clone(), false).is_err_and(|e| e.is_usage()) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            if lock_session(&session).is_err_and(|e| e.is_usage()) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            api.prints("still serving")
        })),
    )?;

    tester.push_action("hello", "test", "{}", HELLO_PERMISSIONS)?;
    assert_eq!(rejected.load(Ordering::SeqCst), 2);
    assert_eq!(mock.chain_count(), 1);

    // outside the callback the session locks normally again
    assert!(tester.get_info()?.contains_key("server_version"));
    Ok(())
}
