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

//! EOSIO account names.
//!
//! A name is a 64-bit value printed as up to 13 characters from the alphabet
//! `.12345abcdefghijklmnopqrstuvwxyz`. The first twelve characters take 5 bits
//! each starting from the most significant end; the thirteenth takes the last 4
//! bits. Trailing `.` characters are not printed.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Alphabet indexed by 5-bit symbol value
const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// Maximum printable length of a name
pub const MAX_NAME_LEN: usize = 13;

/// Errors produced when parsing a name from text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// More than thirteen characters
    #[error("name {0:?} is longer than 13 characters")]
    TooLong(String),

    /// A character outside the alphabet
    #[error("invalid character {ch:?} at position {position} in name {name:?}")]
    InvalidChar {
        /// Full input
        name: String,
        /// Offending character
        ch: char,
        /// Zero-based position of the character
        position: usize,
    },

    /// The thirteenth character only has 4 bits available
    #[error("thirteenth character of name {0:?} must be one of .12345abcdefghij")]
    ThirteenthChar(String),
}

/// Decode a 64-bit name value into its text form.
pub fn n2s(value: u64) -> String {
    let mut chars = [b'.'; MAX_NAME_LEN];
    let mut tmp = value;

    for i in 0..MAX_NAME_LEN {
        let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
        chars[MAX_NAME_LEN - 1 - i] = CHARMAP[(tmp & mask) as usize];
        tmp >>= shift;
    }

    let len = chars.iter().rposition(|&c| c != b'.').map_or(0, |pos| pos + 1);
    chars[..len].iter().map(|&c| c as char).collect()
}

/// Encode a name into its 64-bit value.
pub fn s2n(name: &str) -> Result<u64, NameError> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(NameError::TooLong(name.to_string()));
    }

    let mut value = 0u64;
    for (position, ch) in name.chars().enumerate() {
        let symbol = symbol_of(ch).ok_or_else(|| NameError::InvalidChar {
            name: name.to_string(),
            ch,
            position,
        })?;

        if position < MAX_NAME_LEN - 1 {
            value |= symbol << (64 - 5 * (position + 1));
        } else {
            if symbol > 0x0f {
                return Err(NameError::ThirteenthChar(name.to_string()));
            }
            value |= symbol;
        }
    }

    Ok(value)
}

fn symbol_of(ch: char) -> Option<u64> {
    match ch {
        '.' => Some(0),
        '1'..='5' => Some(ch as u64 - '1' as u64 + 1),
        'a'..='z' => Some(ch as u64 - 'a' as u64 + 6),
        _ => None,
    }
}

/// A 64-bit account, action or table name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(pub u64);

impl Name {
    /// Parse a name from its text form
    pub fn new(name: &str) -> Result<Self, NameError> {
        s2n(name).map(Self)
    }

    /// Raw 64-bit value
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&n2s(self.0))
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<u64> for Name {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Name> for u64 {
    fn from(name: Name) -> Self {
        name.0
    }
}
