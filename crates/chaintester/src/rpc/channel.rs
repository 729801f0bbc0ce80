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

//! Framed message channel over one TCP connection.
//!
//! A [`RpcChannel`] owns a buffered binary protocol pair. Client roles use
//! [`RpcChannel::call`] (or the split [`RpcChannel::send`] / [`RpcChannel::recv`]
//! pair when callbacks must be served in between); server roles use
//! [`RpcChannel::read_call`] and [`RpcChannel::reply`].

use std::net::{Shutdown, TcpStream};

use thrift::{
    protocol::{
        TBinaryInputProtocol, TBinaryOutputProtocol, TInputProtocol, TMessageIdentifier,
        TMessageType, TOutputProtocol,
    },
    transport::{TBufferedReadTransport, TBufferedWriteTransport},
    ApplicationError,
};
use tracing::trace;

use super::codec::{FromReply, WireStruct};
use crate::error::{is_disconnect, ChainTesterError, ProtocolError, ProtocolErrorKind, Result};

/// A call received by a server-side channel
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall {
    /// Method name
    pub method: String,
    /// Sequence id chosen by the caller
    pub seq_id: i32,
    /// `Call` or `OneWay`
    pub message_type: TMessageType,
    /// Argument struct
    pub args: WireStruct,
}

impl IncomingCall {
    /// Whether the caller waits for a reply
    pub fn expects_reply(&self) -> bool {
        self.message_type != TMessageType::OneWay
    }
}

/// One bidirectional message channel
pub struct RpcChannel {
    label: &'static str,
    input: Box<dyn TInputProtocol + Send>,
    output: Box<dyn TOutputProtocol + Send>,
    stream: Option<TcpStream>,
    seq_id: i32,
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("label", &self.label)
            .field("peer", &self.stream.as_ref().and_then(|s| s.peer_addr().ok()))
            .field("seq_id", &self.seq_id)
            .finish()
    }
}

impl RpcChannel {
    /// Build a channel over an arbitrary protocol pair
    pub fn new(
        label: &'static str,
        input: Box<dyn TInputProtocol + Send>,
        output: Box<dyn TOutputProtocol + Send>,
    ) -> Self {
        Self { label, input, output, stream: None, seq_id: 0 }
    }

    /// Dial `addr` and wrap the connection
    pub fn connect(label: &'static str, addr: &str, buffer_size: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|source| ChainTesterError::Connect {
            channel: label,
            addr: addr.to_string(),
            source,
        })?;
        Self::from_stream(label, stream, buffer_size)
    }

    /// Wrap an established connection with buffered binary framing
    pub fn from_stream(label: &'static str, stream: TcpStream, buffer_size: usize) -> Result<Self> {
        let transport_err =
            |e: std::io::Error| ChainTesterError::Transport { channel: label, source: e.into() };

        stream.set_nodelay(true).map_err(transport_err)?;
        let reader = stream.try_clone().map_err(transport_err)?;
        let writer = stream.try_clone().map_err(transport_err)?;

        let input = TBinaryInputProtocol::new(TBufferedReadTransport::with_capacity(buffer_size, reader), false);
        let output = TBinaryOutputProtocol::new(TBufferedWriteTransport::with_capacity(buffer_size, writer), true);

        let mut channel = Self::new(label, Box::new(input), Box::new(output));
        channel.stream = Some(stream);
        Ok(channel)
    }

    /// Channel label used in errors and logs
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Last sequence id handed out by [`RpcChannel::next_seq_id`]
    pub fn seq_id(&self) -> i32 {
        self.seq_id
    }

    /// Pre-increment and return the sequence id for the next call
    pub fn next_seq_id(&mut self) -> i32 {
        self.seq_id = self.seq_id.wrapping_add(1);
        self.seq_id
    }

    /// Write a `Call` message and flush
    pub fn send(&mut self, method: &str, seq_id: i32, args: &WireStruct) -> Result<()> {
        trace!(channel = self.label, method, seq_id, "send");
        let label = self.label;
        write_message(self.output.as_mut(), method, TMessageType::Call, seq_id, args)
            .map_err(|e| ChainTesterError::from_thrift(label, e))
    }

    /// Read the reply to `method` / `seq_id`.
    ///
    /// The method name is checked before the sequence id and the message type.
    /// Exceptions are decoded and returned as [`ChainTesterError::Exception`].
    pub fn recv(&mut self, method: &str, seq_id: i32) -> Result<WireStruct> {
        let label = self.label;
        let map = |e| ChainTesterError::from_thrift(label, e);
        let input = self.input.as_mut();

        let ident = input.read_message_begin().map_err(map)?;
        if ident.name != method {
            return Err(ProtocolError::new(
                ProtocolErrorKind::WrongMethodName,
                format!("{method}: wrong method name {:?}", ident.name),
            )
            .into());
        }
        if ident.sequence_number != seq_id {
            return Err(ProtocolError::new(
                ProtocolErrorKind::BadSequenceId,
                format!("{method}: out of order sequence response (expected {seq_id}, got {})", ident.sequence_number),
            )
            .into());
        }
        match ident.message_type {
            TMessageType::Reply => {}
            TMessageType::Exception => {
                let source = thrift::Error::read_application_error_from_in_protocol(&mut *input).map_err(map)?;
                input.read_message_end().map_err(map)?;
                return Err(ChainTesterError::Exception { channel: label, method: method.to_string(), source });
            }
            other => {
                return Err(ProtocolError::new(
                    ProtocolErrorKind::InvalidMessageType,
                    format!("{method}: invalid message type {other:?}"),
                )
                .into());
            }
        }

        let result = WireStruct::read(&mut *input).map_err(map)?;
        input.read_message_end().map_err(map)?;
        trace!(channel = label, method, seq_id, "recv");
        Ok(result)
    }

    /// Send a call and wait for its typed result
    pub fn call<R: FromReply>(&mut self, method: &str, args: WireStruct) -> Result<R> {
        let seq_id = self.next_seq_id();
        self.send(method, seq_id, &args)?;
        let reply = self.recv(method, seq_id)?;
        R::from_reply(method, &reply)
    }

    /// Read the next incoming call; `None` once the peer has disconnected
    pub fn read_call(&mut self) -> Result<Option<IncomingCall>> {
        let label = self.label;
        let map = |e| ChainTesterError::from_thrift(label, e);
        let input = self.input.as_mut();

        let ident = match input.read_message_begin() {
            Ok(ident) => ident,
            Err(e) if is_disconnect(&e) => return Ok(None),
            Err(e) => return Err(map(e)),
        };
        let args = WireStruct::read(&mut *input).map_err(map)?;
        input.read_message_end().map_err(map)?;

        trace!(channel = label, method = %ident.name, seq_id = ident.sequence_number, "incoming call");
        Ok(Some(IncomingCall {
            method: ident.name,
            seq_id: ident.sequence_number,
            message_type: ident.message_type,
            args,
        }))
    }

    /// Answer `call` with a result struct
    pub fn reply(&mut self, call: &IncomingCall, result: &WireStruct) -> Result<()> {
        let label = self.label;
        write_message(self.output.as_mut(), &call.method, TMessageType::Reply, call.seq_id, result)
            .map_err(|e| ChainTesterError::from_thrift(label, e))
    }

    /// Answer `call` with an application exception
    pub fn reply_exception(&mut self, call: &IncomingCall, error: &ApplicationError) -> Result<()> {
        let label = self.label;
        write_exception(self.output.as_mut(), call, error).map_err(|e| ChainTesterError::from_thrift(label, e))
    }

    /// Shut the underlying connection down; later calls fail with a transport error
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn write_exception(
    output: &mut dyn TOutputProtocol,
    call: &IncomingCall,
    error: &ApplicationError,
) -> thrift::Result<()> {
    output.write_message_begin(&TMessageIdentifier::new(
        call.method.as_str(),
        TMessageType::Exception,
        call.seq_id,
    ))?;
    thrift::Error::write_application_error_to_out_protocol(error, output)?;
    output.write_message_end()?;
    output.flush()
}

fn write_message(
    output: &mut dyn TOutputProtocol,
    method: &str,
    message_type: TMessageType,
    seq_id: i32,
    body: &WireStruct,
) -> thrift::Result<()> {
    output.write_message_begin(&TMessageIdentifier::new(method, message_type, seq_id))?;
    body.write(&format!("{method}_args"), output)?;
    output.write_message_end()?;
    output.flush()
}
