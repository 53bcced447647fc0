// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Mapping from the model's named JSON arguments to a tool's declared
//! positional parameter order.
//!
//! Providers always deliver arguments as a name→value object.  Positional
//! callables declare their parameter order; mapping happens at invocation.
//! Unrecognized names are ignored, missing required names fail validation.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::tool::ParamSpec;

#[derive(Debug, Error, PartialEq)]
pub enum ArgumentError {
    #[error("invalid tool arguments: {0}")]
    InvalidJson(String),
    #[error("missing required parameter {0:?}")]
    MissingRequired(String),
}

/// Parse the raw argument string into an object.  Empty or absent arguments
/// mean "no arguments" rather than an error, since models routinely omit the
/// argument object for zero-parameter tools.
pub fn parse_arguments(raw: &str) -> Result<Value, ArgumentError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(trimmed).map_err(|e| ArgumentError::InvalidJson(e.to_string()))
}

/// Map a parsed argument object onto `params` order.
///
/// - Missing optional parameters become `null`.
/// - Missing required parameters fail with [`ArgumentError::MissingRequired`].
/// - A scalar supplied for an array parameter is wrapped in a one-element
///   array.
/// - Names not present in `params` are ignored.
/// - An argument array is passed through positionally as-is.
pub fn map_arguments(params: &[ParamSpec], args: Value) -> Result<Vec<Value>, ArgumentError> {
    let obj = match args {
        Value::Object(map) => map,
        Value::Array(values) => return Ok(values),
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(ArgumentError::InvalidJson(format!(
                "expected an argument object, got {other}"
            )))
        }
    };

    for name in obj.keys() {
        if !params.iter().any(|p| p.name == *name) {
            debug!(argument = %name, "ignoring unrecognized tool argument");
        }
    }

    let mut out = Vec::with_capacity(params.len());
    for spec in params {
        match obj.get(&spec.name) {
            Some(value) => {
                let value = value.clone();
                if spec.is_array && !value.is_array() && !value.is_null() {
                    out.push(Value::Array(vec![value]));
                } else {
                    out.push(value);
                }
            }
            None if spec.required => return Err(ArgumentError::MissingRequired(spec.name.clone())),
            None => out.push(Value::Null),
        }
    }
    Ok(out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
