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

//! Deploy command - create a chain and deploy a contract to it

use std::path::Path;

use chaintester::ChainTester;
use eyre::Result;

/// Deploy `wasm` (and `abi`) to `account` on a fresh chain and print the transaction
pub fn deploy_contract(cli: &crate::Cli, account: &str, wasm: &Path, abi: Option<&Path>) -> Result<()> {
    let session = cli.connect()?;
    let mut tester = ChainTester::with_session(session, false)?;
    tracing::info!(chain_id = tester.id(), account, wasm = %wasm.display(), "Deploying contract");

    let result = tester.deploy_contract(account, wasm, abi);
    // free the chain even when the deployment failed
    tester.free()?;

    println!("{}", result?);
    Ok(())
}
