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

//! Dynamic values for the binary wire protocol.
//!
//! Every argument and result struct exchanged with the debugger is a flat struct
//! of numbered fields holding booleans, integers, byte strings, nested structs or
//! lists. Rather than generating one Rust type per message, the codec works on
//! [`WireStruct`] / [`WireValue`] trees and the typed clients build and take
//! them apart at the edges.

use thrift::protocol::{
    field_id, TFieldIdentifier, TInputProtocol, TListIdentifier, TOutputProtocol,
    TStructIdentifier, TType,
};

use crate::error::{ProtocolError, ProtocolErrorKind, Result};

/// Upper bound on the capacity pre-allocated for a decoded list
const MAX_PREALLOC: usize = 1024;

/// A single typed value on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// `bool`
    Bool(bool),
    /// `byte`
    I8(i8),
    /// `i16`
    I16(i16),
    /// `i32`
    I32(i32),
    /// `i64`
    I64(i64),
    /// `double`
    Double(f64),
    /// `string` / `binary`
    Binary(Vec<u8>),
    /// Nested struct
    Struct(WireStruct),
    /// Homogeneous list
    List {
        /// Wire type of every element
        element_type: TType,
        /// Elements
        items: Vec<WireValue>,
    },
}

impl WireValue {
    /// UTF-8 string value
    pub fn string(text: impl Into<String>) -> Self {
        Self::Binary(text.into().into_bytes())
    }

    /// 64-bit unsigned integer in its wire form: a struct whose field 1 holds the
    /// eight little-endian bytes of the value
    pub fn uint64(value: u64) -> Self {
        Self::Struct(WireStruct::new().with(1, Self::Binary(value.to_le_bytes().to_vec())))
    }

    /// Wire type tag of this value
    pub fn ttype(&self) -> TType {
        match self {
            Self::Bool(_) => TType::Bool,
            Self::I8(_) => TType::I08,
            Self::I16(_) => TType::I16,
            Self::I32(_) => TType::I32,
            Self::I64(_) => TType::I64,
            Self::Double(_) => TType::Double,
            Self::Binary(_) => TType::String,
            Self::Struct(_) => TType::Struct,
            Self::List { .. } => TType::List,
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// 32-bit integer payload
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// 64-bit integer payload
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Byte-string payload
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Byte-string payload decoded as UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Nested struct payload
    pub fn as_struct(&self) -> Option<&WireStruct> {
        match self {
            Self::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// List elements
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Decode the wire form produced by [`WireValue::uint64`]
    pub fn as_uint64(&self) -> Option<u64> {
        let raw = self.as_struct()?.field(1)?.as_bytes()?;
        let bytes: [u8; 8] = raw.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    /// Encode this value
    pub fn write(&self, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        match self {
            Self::Bool(v) => o.write_bool(*v),
            Self::I8(v) => o.write_i8(*v),
            Self::I16(v) => o.write_i16(*v),
            Self::I32(v) => o.write_i32(*v),
            Self::I64(v) => o.write_i64(*v),
            Self::Double(v) => o.write_double(*v),
            Self::Binary(v) => o.write_bytes(v),
            Self::Struct(s) => s.write("", o),
            Self::List { element_type, items } => {
                let size = i32::try_from(items.len()).map_err(|_| {
                    thrift::Error::Protocol(thrift::ProtocolError::new(
                        thrift::ProtocolErrorKind::SizeLimit,
                        format!("list of {} elements is too long", items.len()),
                    ))
                })?;
                o.write_list_begin(&TListIdentifier::new(*element_type, size))?;
                for item in items {
                    item.write(o)?;
                }
                o.write_list_end()
            }
        }
    }

    /// Decode a value of the given wire type
    pub fn read(ttype: TType, i: &mut dyn TInputProtocol) -> thrift::Result<Self> {
        match ttype {
            TType::Bool => Ok(Self::Bool(i.read_bool()?)),
            TType::I08 => Ok(Self::I8(i.read_i8()?)),
            TType::I16 => Ok(Self::I16(i.read_i16()?)),
            TType::I32 => Ok(Self::I32(i.read_i32()?)),
            TType::I64 => Ok(Self::I64(i.read_i64()?)),
            TType::Double => Ok(Self::Double(i.read_double()?)),
            TType::String => Ok(Self::Binary(i.read_bytes()?)),
            TType::Struct => Ok(Self::Struct(WireStruct::read(i)?)),
            TType::List => {
                let ident = i.read_list_begin()?;
                let len = usize::try_from(ident.size).unwrap_or(0);
                let mut items = Vec::with_capacity(len.min(MAX_PREALLOC));
                for _ in 0..len {
                    items.push(Self::read(ident.element_type, i)?);
                }
                i.read_list_end()?;
                Ok(Self::List { element_type: ident.element_type, items })
            }
            other => Err(thrift::Error::Protocol(thrift::ProtocolError::new(
                thrift::ProtocolErrorKind::NotImplemented,
                format!("unsupported wire type {other:?}"),
            ))),
        }
    }
}

/// A struct of numbered fields in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireStruct {
    fields: Vec<(i16, WireValue)>,
}

impl WireStruct {
    /// Empty struct
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field
    pub fn with(mut self, id: i16, value: WireValue) -> Self {
        self.fields.push((id, value));
        self
    }

    /// Append a field in place
    pub fn push(&mut self, id: i16, value: WireValue) {
        self.fields.push((id, value));
    }

    /// Look up a field by id
    pub fn field(&self, id: i16) -> Option<&WireValue> {
        self.fields.iter().find(|(fid, _)| *fid == id).map(|(_, v)| v)
    }

    /// All fields in wire order
    pub fn fields(&self) -> &[(i16, WireValue)] {
        &self.fields
    }

    /// Whether the struct has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Required string field
    pub fn require_str(&self, id: i16, what: &str) -> Result<&str> {
        self.field(id).and_then(WireValue::as_str).ok_or_else(|| missing_field(id, what))
    }

    /// Required byte-string field
    pub fn require_bytes(&self, id: i16, what: &str) -> Result<&[u8]> {
        self.field(id).and_then(WireValue::as_bytes).ok_or_else(|| missing_field(id, what))
    }

    /// Required 32-bit integer field
    pub fn require_i32(&self, id: i16, what: &str) -> Result<i32> {
        self.field(id).and_then(WireValue::as_i32).ok_or_else(|| missing_field(id, what))
    }

    /// Required 64-bit integer field
    pub fn require_i64(&self, id: i16, what: &str) -> Result<i64> {
        self.field(id).and_then(WireValue::as_i64).ok_or_else(|| missing_field(id, what))
    }

    /// Required boolean field
    pub fn require_bool(&self, id: i16, what: &str) -> Result<bool> {
        self.field(id).and_then(WireValue::as_bool).ok_or_else(|| missing_field(id, what))
    }

    /// Required 64-bit unsigned field in wire form
    pub fn require_uint64(&self, id: i16, what: &str) -> Result<u64> {
        self.field(id).and_then(WireValue::as_uint64).ok_or_else(|| missing_field(id, what))
    }

    /// Encode this struct
    pub fn write(&self, name: &str, o: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        o.write_struct_begin(&TStructIdentifier::new(name))?;
        for (id, value) in &self.fields {
            o.write_field_begin(&TFieldIdentifier {
                name: None,
                field_type: value.ttype(),
                id: Some(*id),
            })?;
            value.write(o)?;
            o.write_field_end()?;
        }
        o.write_field_stop()?;
        o.write_struct_end()
    }

    /// Decode a struct, skipping fields of unsupported types
    pub fn read(i: &mut dyn TInputProtocol) -> thrift::Result<Self> {
        i.read_struct_begin()?;
        let mut fields = Vec::new();
        loop {
            let ident = i.read_field_begin()?;
            if ident.field_type == TType::Stop {
                break;
            }
            let id = field_id(&ident)?;
            match ident.field_type {
                TType::Map | TType::Set => i.skip(ident.field_type)?,
                ttype => fields.push((id, WireValue::read(ttype, i)?)),
            }
            i.read_field_end()?;
        }
        i.read_struct_end()?;
        Ok(Self { fields })
    }
}

fn missing_field(id: i16, what: &str) -> crate::error::ChainTesterError {
    ProtocolError::new(ProtocolErrorKind::MissingResult, format!("missing or mistyped field {id} ({what})"))
        .into()
}

/// Typed extraction of a call result from a reply struct.
///
/// Results live in field 0; `void` methods send an empty struct.
pub trait FromReply: Sized {
    /// Extract the result of `method`
    fn from_reply(method: &str, reply: &WireStruct) -> Result<Self>;
}

impl FromReply for () {
    fn from_reply(_method: &str, _reply: &WireStruct) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_from_reply {
    ($ty:ty, $accessor:expr) => {
        impl FromReply for $ty {
            fn from_reply(method: &str, reply: &WireStruct) -> Result<Self> {
                reply.field(0).and_then($accessor).ok_or_else(|| {
                    ProtocolError::new(
                        ProtocolErrorKind::MissingResult,
                        format!("{method} failed: unknown result"),
                    )
                    .into()
                })
            }
        }
    };
}

impl_from_reply!(bool, WireValue::as_bool);
impl_from_reply!(i32, WireValue::as_i32);
impl_from_reply!(i64, WireValue::as_i64);
impl_from_reply!(u64, WireValue::as_uint64);
impl_from_reply!(Vec<u8>, |v: &WireValue| v.as_bytes().map(<[u8]>::to_vec));
