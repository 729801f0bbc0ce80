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

//! Callback channel server.
//!
//! The debugger connects back into the tester to deliver `apply_request` and
//! `apply_end` while it executes a transaction. The server binds at
//! construction, accepts exactly one connection and then serves it in bursts:
//! [`CallbackServer::process_requests`] runs until `apply_end` is observed and
//! returns with the connection still open for the next transaction.

use std::net::{SocketAddr, TcpListener};

use chaintester_common::Name;
use thrift::{ApplicationError, ApplicationErrorKind};
use tracing::{debug, info, warn};

use super::{
    channel::{IncomingCall, RpcChannel},
    codec::{WireStruct, WireValue},
};
use crate::error::{ChainTesterError, Result};

/// Label of the callback channel in logs and errors
pub const CALLBACK_CHANNEL: &str = "callback";

/// Inbound method delivering one apply cycle
pub const APPLY_REQUEST: &str = "apply_request";
/// Inbound method closing the current burst of apply cycles
pub const APPLY_END: &str = "apply_end";

/// Receiver of inbound callbacks
pub trait ApplyRequestHandler {
    /// Handle one apply cycle and return its status code
    fn apply_request(&mut self, receiver: Name, first_receiver: Name, action: Name, chain_id: i32) -> i32;

    /// Handle the end of the current burst and return its status code.
    ///
    /// `chain_id` is `None` when the debugger sends `apply_end` without a usable argument.
    fn apply_end(&mut self, chain_id: Option<i32>) -> i32;
}

/// Server side of the callback channel
#[derive(Debug)]
pub struct CallbackServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    buffer_size: usize,
    connection: Option<RpcChannel>,
    end_loop: bool,
}

impl CallbackServer {
    /// Bind the listening socket
    pub fn listen(addr: &str, buffer_size: usize) -> Result<Self> {
        let connect_err = |source| ChainTesterError::Connect {
            channel: CALLBACK_CHANNEL,
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(connect_err)?;
        let local_addr = listener.local_addr().map_err(connect_err)?;

        debug!(%local_addr, "Callback listener bound");
        Ok(Self { listener, local_addr, buffer_size, connection: None, end_loop: false })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the debugger connection has been accepted
    pub fn is_accepted(&self) -> bool {
        self.connection.is_some()
    }

    /// Block until the debugger connects; later calls return immediately
    pub fn accept_once(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        let (stream, peer) = self.listener.accept().map_err(|e| ChainTesterError::Transport {
            channel: CALLBACK_CHANNEL,
            source: e.into(),
        })?;
        info!(%peer, "Accepted debugger callback connection");
        self.connection = Some(RpcChannel::from_stream(CALLBACK_CHANNEL, stream, self.buffer_size)?);
        Ok(())
    }

    /// Serve an already established connection instead of accepting one
    pub fn attach(&mut self, channel: RpcChannel) {
        self.connection = Some(channel);
    }

    /// Serve callbacks until `apply_end` is handled or the debugger disconnects.
    ///
    /// Unknown methods and malformed arguments are answered with an exception
    /// and the loop continues. Transport failures abort the loop.
    pub fn process_requests(&mut self, handler: &mut dyn ApplyRequestHandler) -> Result<()> {
        let channel = self.connection.as_mut().ok_or_else(|| {
            ChainTesterError::Usage("callback connection has not been accepted".to_string())
        })?;

        self.end_loop = false;
        while !self.end_loop {
            let Some(call) = channel.read_call()? else {
                warn!("Debugger closed the callback connection");
                return Ok(());
            };

            let status = match call.method.as_str() {
                APPLY_REQUEST => decode_apply_request(&call.args).map(|(receiver, first_receiver, action, chain_id)| {
                    handler.apply_request(receiver, first_receiver, action, chain_id)
                }),
                APPLY_END => {
                    // the burst is over whatever the argument holds
                    self.end_loop = true;
                    Ok(handler.apply_end(call.args.field(1).and_then(WireValue::as_i32)))
                }
                other => {
                    warn!(method = other, "Unknown callback method");
                    reject(channel, &call, ApplicationErrorKind::UnknownMethod, format!("Unknown function {other}"))?;
                    continue;
                }
            };

            match status {
                Ok(status) if call.expects_reply() => {
                    channel.reply(&call, &WireStruct::new().with(0, WireValue::I32(status)))?;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(method = %call.method, %err, "Malformed callback arguments");
                    reject(channel, &call, ApplicationErrorKind::ProtocolError, err.to_string())?;
                }
            }
        }

        self.end_loop = false;
        Ok(())
    }
}

fn decode_apply_request(args: &WireStruct) -> Result<(Name, Name, Name, i32)> {
    Ok((
        Name(args.require_uint64(1, "receiver")?),
        Name(args.require_uint64(2, "first_receiver")?),
        Name(args.require_uint64(3, "action")?),
        args.require_i32(4, "chain_id")?,
    ))
}

fn reject(channel: &mut RpcChannel, call: &IncomingCall, kind: ApplicationErrorKind, message: String) -> Result<()> {
    if call.expects_reply() {
        channel.reply_exception(call, &ApplicationError::new(kind, message))?;
    }
    Ok(())
}
