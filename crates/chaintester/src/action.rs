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

//! Actions and the batching [`ActionBuilder`].

use crate::{
    error::{ChainTesterError, ProtocolError, ProtocolErrorKind, Result},
    json::JsonValue,
    rpc::codec::{WireStruct, WireValue},
    tester::ChainTester,
};

/// Action payload: JSON text packed by the debugger, or bytes packed already
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionArguments {
    /// JSON arguments, packed with the contract ABI
    Json(String),
    /// Pre-packed binary arguments
    Raw(Vec<u8>),
}

impl ActionArguments {
    /// Wire form: a union with `json_args` in field 1 or `raw_args` in field 2
    pub fn to_wire(&self) -> WireValue {
        let inner = match self {
            Self::Json(json) => WireStruct::new().with(1, WireValue::string(json.as_str())),
            Self::Raw(raw) => WireStruct::new().with(2, WireValue::Binary(raw.clone())),
        };
        WireValue::Struct(inner)
    }

    /// Decode the wire form
    pub fn from_wire(value: &WireValue) -> Result<Self> {
        let inner = value.as_struct().ok_or_else(|| malformed("action arguments are not a struct"))?;
        if let Some(json) = inner.field(1).and_then(WireValue::as_str) {
            return Ok(Self::Json(json.to_string()));
        }
        if let Some(raw) = inner.field(2).and_then(WireValue::as_bytes) {
            return Ok(Self::Raw(raw.to_vec()));
        }
        Err(malformed("action arguments carry neither json_args nor raw_args"))
    }
}

impl From<&str> for ActionArguments {
    fn from(json: &str) -> Self {
        Self::Json(json.to_string())
    }
}

impl From<String> for ActionArguments {
    fn from(json: String) -> Self {
        Self::Json(json)
    }
}

impl From<Vec<u8>> for ActionArguments {
    fn from(raw: Vec<u8>) -> Self {
        Self::Raw(raw)
    }
}

fn malformed(message: &str) -> ChainTesterError {
    ProtocolError::new(ProtocolErrorKind::Codec, message).into()
}

/// Permissions JSON authorizing an action with `signer`'s active permission
pub fn signer_permissions(signer: &str) -> String {
    format!(r#"{{"{signer}":"active"}}"#)
}

/// A single contract invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Contract account
    pub account: String,
    /// Action name
    pub action: String,
    /// Payload
    pub arguments: ActionArguments,
    /// Permissions JSON, e.g. `{"hello":"active"}`
    pub permissions: String,
}

impl Action {
    /// Build an action with explicit permissions JSON
    pub fn new(
        account: impl Into<String>,
        action: impl Into<String>,
        arguments: impl Into<ActionArguments>,
        permissions: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            action: action.into(),
            arguments: arguments.into(),
            permissions: permissions.into(),
        }
    }

    /// Build an action authorized by `signer@active`
    pub fn with_signer(
        account: impl Into<String>,
        action: impl Into<String>,
        arguments: impl Into<ActionArguments>,
        signer: &str,
    ) -> Self {
        Self::new(account, action, arguments, signer_permissions(signer))
    }

    /// Wire form of the `Action` struct
    pub fn to_wire(&self) -> WireValue {
        WireValue::Struct(
            WireStruct::new()
                .with(1, WireValue::string(self.account.as_str()))
                .with(2, WireValue::string(self.action.as_str()))
                .with(3, self.arguments.to_wire())
                .with(4, WireValue::string(self.permissions.as_str())),
        )
    }

    /// Decode the wire form
    pub fn from_wire(value: &WireValue) -> Result<Self> {
        let inner = value.as_struct().ok_or_else(|| malformed("action is not a struct"))?;
        let arguments = inner.field(3).ok_or_else(|| malformed("action has no arguments"))?;
        Ok(Self {
            account: inner.require_str(1, "account")?.to_string(),
            action: inner.require_str(2, "action")?.to_string(),
            arguments: ActionArguments::from_wire(arguments)?,
            permissions: inner.require_str(4, "permissions")?.to_string(),
        })
    }
}

/// Accumulates actions and submits them as one `push_actions` transaction
#[derive(Debug)]
pub struct ActionBuilder<'a> {
    tester: &'a ChainTester,
    actions: Vec<Action>,
}

impl<'a> ActionBuilder<'a> {
    pub(crate) fn new(tester: &'a ChainTester) -> Self {
        Self { tester, actions: Vec::new() }
    }

    /// Add an action with JSON arguments and explicit permissions
    pub fn add_action(&mut self, account: &str, action: &str, args: &str, permissions: &str) -> &mut Self {
        self.push(Action::new(account, action, args, permissions))
    }

    /// Add an action with packed arguments and explicit permissions
    pub fn add_raw_action(&mut self, account: &str, action: &str, raw_args: &[u8], permissions: &str) -> &mut Self {
        self.push(Action::new(account, action, raw_args.to_vec(), permissions))
    }

    /// Add an action with JSON arguments authorized by `signer@active`
    pub fn add_action_with_signer(&mut self, account: &str, action: &str, args: &str, signer: &str) -> &mut Self {
        self.push(Action::with_signer(account, action, args, signer))
    }

    /// Add an action with packed arguments authorized by `signer@active`
    pub fn add_raw_action_with_signer(
        &mut self,
        account: &str,
        action: &str,
        raw_args: &[u8],
        signer: &str,
    ) -> &mut Self {
        self.push(Action::with_signer(account, action, raw_args.to_vec(), signer))
    }

    /// Add a prepared action
    pub fn push(&mut self, action: Action) -> &mut Self {
        self.actions.push(action);
        self
    }

    /// Actions collected so far
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of collected actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no action was added
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Submit every collected action as a single transaction
    pub fn send(self) -> Result<JsonValue> {
        self.tester.push_actions(&self.actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signer_permissions() {
        assert_eq!(signer_permissions("hello"), r#"{"hello":"active"}"#);
        let action = Action::with_signer("hello", "inc", r#"{"name":"go"}"#, "alice");
        assert_eq!(action.permissions, r#"{"alice":"active"}"#);
    }

    #[test]
    fn test_argument_variant_preserved_on_wire() {
        let json = Action::new("hello", "inc", r#"{"name":"go"}"#, "{}");
        let raw = Action::new("hello", "inc", vec![0u8, 1, 2], "{}");

        let json_wire = json.to_wire();
        let args = json_wire.as_struct().unwrap().field(3).unwrap().as_struct().unwrap();
        assert!(args.field(1).is_some());
        assert!(args.field(2).is_none());

        let raw_wire = raw.to_wire();
        let args = raw_wire.as_struct().unwrap().field(3).unwrap().as_struct().unwrap();
        assert!(args.field(1).is_none());
        assert_eq!(args.field(2).unwrap().as_bytes().unwrap(), &[0, 1, 2]);

        assert_eq!(Action::from_wire(&json_wire).unwrap(), json);
        assert_eq!(Action::from_wire(&raw_wire).unwrap(), raw);
    }

    #[test]
    fn test_empty_arguments_rejected() {
        let empty = WireValue::Struct(WireStruct::new());
        assert!(ActionArguments::from_wire(&empty).is_err());
        assert!(Action::from_wire(&WireValue::I32(1)).is_err());
    }
}
