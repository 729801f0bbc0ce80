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

//! ChainTester CLI
//!
//! Small front end over the chain tester library: inspect a debugger, generate
//! keys, deploy contracts and convert account names.

use std::path::PathBuf;

use chaintester::{DebuggerConfig, Session, SharedSession};
use clap::{Parser, Subcommand};
use eyre::Result;

mod cmd;

/// Command-line interface for the chain tester
#[derive(Debug, Parser)]
#[command(name = "chaintester")]
#[command(about = "ChainTester - drive an EOSIO chain debugger over IPC")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file (overrides CHAINTESTER_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debugger control endpoint
    #[arg(long, global = true)]
    pub control_addr: Option<String>,

    /// Local address of the apply-request callback listener
    #[arg(long, global = true)]
    pub apply_request_addr: Option<String>,

    /// Debugger VM-API endpoint
    #[arg(long, global = true)]
    pub vm_api_addr: Option<String>,

    /// Also write logs to a daily rolling file in the temp directory
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a chain and print its info
    Info {
        /// Create the chain in debug mode
        #[arg(long)]
        debug: bool,
    },
    /// Generate a key pair
    CreateKey {
        /// Key type
        #[arg(long, default_value = "K1")]
        key_type: String,
    },
    /// Create a chain and deploy a contract to it
    Deploy {
        /// Account receiving the contract
        account: String,
        /// Compiled contract
        wasm: PathBuf,
        /// Contract ABI
        abi: Option<PathBuf>,
    },
    /// Convert between account names and their 64-bit values
    Name {
        /// Value to decode, or name to encode with --encode
        value: String,
        /// Encode a name instead of decoding a value
        #[arg(long)]
        encode: bool,
    },
}

impl Cli {
    /// Debugger configuration from file, environment and flags (highest precedence last)
    pub fn debugger_config(&self) -> Result<DebuggerConfig> {
        let mut config = match &self.config {
            Some(path) => DebuggerConfig::from_file(path)?.with_env_overrides()?,
            None => DebuggerConfig::load()?,
        };
        if let Some(addr) = &self.control_addr {
            config.control_addr = addr.clone();
        }
        if let Some(addr) = &self.apply_request_addr {
            config.apply_request_addr = addr.clone();
        }
        if let Some(addr) = &self.vm_api_addr {
            config.vm_api_addr = addr.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Connect a session with [`Cli::debugger_config`]
    pub fn connect(&self) -> Result<SharedSession> {
        let config = self.debugger_config()?;
        tracing::info!(control = %config.control_addr, "Connecting to debugger");
        Ok(Session::connect_shared(config)?)
    }
}

fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    chaintester_common::logging::init_logging("chaintester", cli.log_file)?;

    match &cli.command {
        Commands::Info { debug } => cmd::show_chain_info(&cli, *debug),
        Commands::CreateKey { key_type } => cmd::create_key(&cli, key_type),
        Commands::Deploy { account, wasm, abi } => cmd::deploy_contract(&cli, account, wasm, abi.as_deref()),
        Commands::Name { value, encode } => cmd::convert_name(value, *encode),
    }
}
