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

//! End-to-end chain tester scenarios against the mock debugger
//!
//! Each test starts its own mock and session, so the tests are independent of
//! each other and of any debugger running on the default ports.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chaintester::{json_path, native_apply, ChainTester, ChainTesterError};
use chaintester_integration_tests::{fixtures, init::init_test_environment, Event, MockDebugger};
use eyre::Result;
use tracing::info;

const HELLO_PERMISSIONS: &str = r#"{"hello":"active"}"#;
const TOKEN_PERMISSIONS: &str = r#"{"eosio.token":"active"}"#;

fn new_tester(mock: &MockDebugger) -> Result<ChainTester> {
    let session = mock.connect()?;
    Ok(ChainTester::with_session(session, false)?)
}

fn deploy_hello(tester: &ChainTester) -> Result<fixtures::ContractFiles> {
    let files = fixtures::hello_contract()?;
    tester.deploy_contract("hello", &files.wasm, Some(files.abi.as_path()))?;
    Ok(files)
}

#[test]
fn test_new_chain_and_info() -> Result<()> {
    init_test_environment();
    info!("Testing new chain and get_info");

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    assert_eq!(tester.id(), 0);

    let info = tester.get_info()?;
    assert!(info.contains_key("server_version"));
    assert_eq!(info.get_u64(json_path!["head_block_num"])?, 1);
    assert_eq!(info.get_time(json_path!["head_block_time"])?.to_string(), "2018-06-01 12:00:00");
    Ok(())
}

#[test]
fn test_create_account() -> Result<()> {
    init_test_environment();
    info!("Testing create_account / get_account");

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;

    let key = tester.create_key("K1")?;
    let public_key = key.get_string(json_path!["public"])?;
    assert!(public_key.starts_with("EOS"));

    tester.create_account("eosio", "helloworld33", &public_key, &public_key, 10_485_760, 100_000, 100_000)?;

    let account = tester.get_account("helloworld33")?;
    assert_eq!(account.get_string(json_path!["account_name"])?, "helloworld33");
    assert_eq!(account.get_i64(json_path!["ram_quota"])?, 10_485_760);
    assert_eq!(account.get_string(json_path!["permissions", 0, "required_auth", "keys", 0, "key"])?, public_key);

    // creating it twice is rejected by the chain
    let err = tester
        .create_account("eosio", "helloworld33", &public_key, &public_key, 10_485_760, 100_000, 100_000)
        .unwrap_err();
    let body = err.as_transaction().expect("transaction error").json()?;
    assert_eq!(body.get_string(json_path!["except", "name"])?, "account_name_exists_exception");
    Ok(())
}

#[test]
fn test_get_unknown_account_is_transaction_error() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;

    let err = tester.get_account("nobody").unwrap_err();
    assert!(matches!(err, ChainTesterError::Transaction(_)));
    Ok(())
}

#[test]
fn test_deploy_and_inc() -> Result<()> {
    init_test_environment();
    info!("Testing deploy_contract and the counter table");

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    let _files = deploy_hello(&tester)?;

    let rows = tester.get_table_rows(true, "hello", "", "counter", "", "", 10)?;
    assert!(rows.get(json_path!["rows", 0]).is_err());

    tester.push_action("hello", "inc", r#"{"name":"go"}"#, HELLO_PERMISSIONS)?;
    let rows = tester.get_table_rows(true, "hello", "", "counter", "", "", 10)?;
    assert_eq!(rows.get_u64(json_path!["rows", 0, "count"])?, 1);

    let result = tester.push_action("hello", "inc", r#"{"name":"go"}"#, HELLO_PERMISSIONS)?;
    assert_eq!(result.get_string(json_path!["action_traces", 0, "console"])?, "go count: 2");
    let rows = tester.get_table_rows(true, "hello", "", "counter", "", "", 10)?;
    assert_eq!(rows.get_u64(json_path!["rows", 0, "count"])?, 2);
    Ok(())
}

#[test]
fn test_deploy_sends_setcode_and_setabi_in_one_transaction() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    mock.take_events();

    let files = fixtures::hello_contract()?;
    let result = tester.deploy_contract("hello", &files.wasm, Some(files.abi.as_path()))?;
    assert_eq!(result.get_string(json_path!["action_traces", 0, "act", "name"])?, "setcode");
    assert_eq!(result.get_string(json_path!["action_traces", 1, "act", "name"])?, "setabi");

    let methods: Vec<String> = mock
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::ControlCall { method, .. } => Some(method),
            _ => None,
        })
        .collect();
    assert_eq!(methods, ["pack_abi", "push_actions"]);

    // code without an ABI is a single setcode action
    let result = tester.deploy_contract("alice", &files.wasm, None)?;
    assert!(result.get(json_path!["action_traces", 1]).is_err());
    Ok(())
}

#[test]
fn test_deploy_missing_file_is_io_error() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    let dir = tempfile::tempdir()?;

    let err = tester.deploy_contract("hello", dir.path().join("missing.wasm"), None).unwrap_err();
    assert!(matches!(err, ChainTesterError::Io { .. }));
    Ok(())
}

#[test]
fn test_callback_interleave() -> Result<()> {
    init_test_environment();
    info!("Testing native apply interleaved with the control call");

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    let _files = deploy_hello(&tester)?;
    tester.enable_debug_contract("hello", true)?;

    let observed = Arc::new(AtomicBool::new(false));
    let seen = observed.clone();
    tester.set_native_apply(
        "hello",
        Some(native_apply(move |api, request| {
            seen.store(api.in_apply(), Ordering::SeqCst);
            assert_eq!(request.action.to_string(), "test");
            for i in 0..10 {
                api.prints(&format!("hello {i}"))?;
            }
            Ok(())
        })),
    )?;

    mock.take_events();
    let result = tester.push_action("hello", "test", "{}", HELLO_PERMISSIONS)?;
    assert!(observed.load(Ordering::SeqCst));
    assert!(!tester.session().lock().in_apply());

    let console = result.get_string(json_path!["action_traces", 0, "console"])?;
    assert!(console.starts_with("hello 0hello 1"));
    assert!(console.ends_with("hello 9"));

    let events = mock.events();
    let prints: Vec<i32> = events
        .iter()
        .filter_map(|event| match event {
            Event::VmApi { method, seq_id } if method == "prints" => Some(*seq_id),
            _ => None,
        })
        .collect();
    assert_eq!(prints, (1..=10).collect::<Vec<_>>());

    // every callback is handled before the control reply goes out
    let reply = events
        .iter()
        .position(|e| matches!(e, Event::ControlReply { method, .. } if method == "push_action"))
        .expect("push_action reply");
    let last_callback = events
        .iter()
        .rposition(|e| matches!(e, Event::VmApi { .. } | Event::ApplyReply { .. } | Event::ApplyEnd { .. }))
        .expect("callbacks");
    assert!(last_callback < reply);
    Ok(())
}

#[test]
fn test_assertion_surfaces_as_transaction_error() -> Result<()> {
    init_test_environment();
    info!("Testing assertion failures");

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    let _files = deploy_hello(&tester)?;

    let err = tester.push_action("hello", "assert", "{}", HELLO_PERMISSIONS).unwrap_err();
    let body = err.as_transaction().expect("transaction error").json()?;
    assert!(body.contains_key("except"));
    assert!(body.get(json_path!["except", "stack"])?.as_list().is_some());
    assert_eq!(body.get_string(json_path!["except", "name"])?, "eosio_assert_message_exception");
    assert!(err.to_string().contains("eosio_assert_message_exception"));

    // the failed transaction did not poison the session
    tester.push_action("hello", "inc", r#"{"name":"go"}"#, HELLO_PERMISSIONS)?;
    Ok(())
}

#[test]
fn test_balance_decode() -> Result<()> {
    init_test_environment();
    info!("Testing get_balance");

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;

    tester.push_action(
        "eosio.token",
        "issue",
        r#"{"to":"alice","quantity":"1.0000 EOS","memo":""}"#,
        TOKEN_PERMISSIONS,
    )?;
    assert_eq!(tester.get_balance("alice")?, 10000);
    assert_eq!(tester.get_balance("bob")?, 0);

    tester.push_action(
        "eosio.token",
        "transfer",
        r#"{"from":"alice","to":"bob","quantity":"0.2500 EOS","memo":""}"#,
        r#"{"alice":"active"}"#,
    )?;
    assert_eq!(tester.get_balance("alice")?, 7500);
    assert_eq!(tester.get_balance_of("bob", "eosio.token", "EOS")?, 2500);

    let rows = tester.get_table_rows(true, "eosio.token", "alice", "accounts", "", "", 10)?;
    assert_eq!(rows.get_string(json_path!["rows", 0, "balance"])?, "0.7500 EOS");

    // overdrawing rolls the whole transaction back
    let err = tester
        .push_action(
            "eosio.token",
            "transfer",
            r#"{"from":"bob","to":"alice","quantity":"1.0000 EOS","memo":""}"#,
            r#"{"bob":"active"}"#,
        )
        .unwrap_err();
    assert!(err.as_transaction().is_some());
    assert_eq!(tester.get_balance("bob")?, 2500);
    Ok(())
}

#[test]
fn test_balance_with_payer_rows() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    tester.push_action(
        "eosio.token",
        "issue",
        r#"{"to":"bob","quantity":"12.3456 EOS","memo":""}"#,
        TOKEN_PERMISSIONS,
    )?;

    let query = chaintester::TableRowsQuery {
        json: false,
        show_payer: true,
        ..chaintester::TableRowsQuery::new("eosio.token", "bob", "accounts")
    };
    let rows = tester.get_table_rows_with(&query)?;
    assert_eq!(rows.get_string(json_path!["rows", 0, "payer"])?, "eosio.token");
    assert_eq!(tester.get_balance("bob")?, 123_456);
    Ok(())
}

#[test]
fn test_action_builder_batches_actions() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    let _files = deploy_hello(&tester)?;

    let mut builder = tester.new_action_builder();
    builder
        .add_action_with_signer("hello", "inc", r#"{"name":"a"}"#, "hello")
        .add_action("hello", "inc", r#"{"name":"b"}"#, HELLO_PERMISSIONS);
    assert_eq!(builder.len(), 2);

    mock.take_events();
    let result = builder.send()?;
    assert_eq!(result.get_string(json_path!["action_traces", 1, "console"])?, "b count: 2");

    let pushes = mock
        .events()
        .iter()
        .filter(|e| matches!(e, Event::ControlCall { method, .. } if method == "push_actions"))
        .count();
    assert_eq!(pushes, 1);
    Ok(())
}

#[test]
fn test_pack_and_unpack_action_args() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    let _files = deploy_hello(&tester)?;

    let packed = tester.pack_action_args("hello", "inc", r#"{"name":"go"}"#)?;
    let unpacked = tester.unpack_action_args("hello", "inc", &packed)?;
    assert_eq!(unpacked.get_string(json_path!["name"])?, "go");

    // packed arguments travel as raw bytes
    tester.push_action("hello", "inc", packed, HELLO_PERMISSIONS)?;
    let rows = tester.get_table_rows(true, "hello", "", "counter", "", "", 10)?;
    assert_eq!(rows.get_u64(json_path!["rows", 0, "count"])?, 1);
    Ok(())
}

#[test]
fn test_debugger_exception_is_typed() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;

    let err = tester.pack_abi("not an abi").unwrap_err();
    match err {
        ChainTesterError::Exception { method, source, .. } => {
            assert_eq!(method, "pack_abi");
            assert!(source.message.contains("invalid abi"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // the control channel stays usable after an exception reply
    assert!(tester.get_info()?.contains_key("server_version"));
    Ok(())
}

#[test]
fn test_produce_block_advances_time() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let tester = new_tester(&mock)?;
    let before = tester.get_info()?.get_time(json_path!["head_block_time"])?;

    tester.produce_block()?;
    tester.produce_block_with_skip(10)?;

    let info = tester.get_info()?;
    assert_eq!(info.get_u64(json_path!["head_block_num"])?, 3);
    let after = info.get_time(json_path!["head_block_time"])?;
    assert_eq!((after - before).num_milliseconds(), 11_000);
    Ok(())
}

#[test]
fn test_two_chains_share_a_session() -> Result<()> {
    init_test_environment();

    let mock = MockDebugger::start()?;
    let session = mock.connect()?;
    let first = ChainTester::with_session(session.clone(), false)?;
    let mut second = ChainTester::with_session(session, true)?;
    assert_ne!(first.id(), second.id());
    assert_eq!(mock.chain_count(), 2);

    second.free()?;
    second.free()?;
    assert_eq!(mock.chain_count(), 1);

    drop(first);
    assert_eq!(mock.chain_count(), 0);
    Ok(())
}
