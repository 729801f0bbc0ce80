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

//! Name command - convert between account names and 64-bit values

use chaintester::{n2s, s2n};
use eyre::{Result, WrapErr};

/// Decode a value to its name, or encode a name to its value
pub fn convert_name(value: &str, encode: bool) -> Result<()> {
    println!("{}", render(value, encode)?);
    Ok(())
}

fn render(value: &str, encode: bool) -> Result<String> {
    if encode {
        return Ok(s2n(value)?.to_string());
    }

    let raw = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    }
    .wrap_err_with(|| format!("{value:?} is not a 64-bit value"))?;
    Ok(n2s(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_decimal_and_hex() {
        assert_eq!(render("6138663577826885632", false).unwrap(), "eosio");
        assert_eq!(render("0x5530ea0000000000", false).unwrap(), "eosio");
        assert_eq!(render("0", false).unwrap(), "");
    }

    #[test]
    fn test_encode() {
        assert_eq!(render("eosio", true).unwrap(), "6138663577826885632");
        assert!(render("Eosio", true).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(render("eosio", false).is_err());
    }
}
