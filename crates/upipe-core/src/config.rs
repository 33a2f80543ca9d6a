// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Configuration parsing helpers shared by pipe control surfaces.
//!
//! Pipe-specific configuration is a `serde_json::Value` with a
//! `schemars`-described shape, the same way a node's parameters are
//! configured upstream of this crate; these helpers give every pipe the
//! same optional/required extraction idiom instead of each one hand-rolling
//! its own `match`/`as_str` chain.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::UpipeError;

/// Parse `value[key]` as `T`, defaulting to `default` when the key is
/// absent; propagates a deserialization error as `Invalid`.
pub fn parse_optional<T: DeserializeOwned>(value: &Value, key: &str, default: T) -> Result<T, UpipeError> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| UpipeError::Invalid(format!("field {key:?}: {e}"))),
    }
}

/// Parse `value[key]` as `T`, failing with `Invalid` if the key is absent.
pub fn parse_required<T: DeserializeOwned>(value: &Value, key: &str) -> Result<T, UpipeError> {
    match value.get(key) {
        None | Some(Value::Null) => Err(UpipeError::Invalid(format!("missing required field {key:?}"))),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| UpipeError::Invalid(format!("field {key:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_falls_back_to_default() {
        let v = json!({});
        let got: u32 = parse_optional(&v, "gain", 7).unwrap();
        assert_eq!(got, 7);
    }

    #[test]
    fn required_errors_when_missing() {
        let v = json!({});
        let res: Result<u32, _> = parse_required(&v, "pid");
        assert!(res.is_err());
    }
}
