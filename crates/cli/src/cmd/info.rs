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

//! Info command - create a chain, print its info and free it

use chaintester::ChainTester;
use eyre::Result;

/// Print `get_info` of a fresh chain
pub fn show_chain_info(cli: &crate::Cli, debug: bool) -> Result<()> {
    let session = cli.connect()?;
    let mut tester = ChainTester::with_session(session, debug)?;
    tracing::info!(chain_id = tester.id(), "Created chain");

    let info = tester.get_info()?;
    println!("{info}");

    tester.free()?;
    Ok(())
}
