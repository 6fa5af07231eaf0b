//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category. Parameters
//! are read straight from the request's JSON object.

pub mod access;
pub mod content;
pub mod payments;

use serde::Serialize;
use serde_json::Value;

use crate::rpc::RpcError;
use crate::DaemonState;

type Result<T> = std::result::Result<T, RpcError>;

fn require_i64(params: &Value, key: &str) -> Result<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

fn require_bool(params: &Value, key: &str) -> Result<bool> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

/// Enforce the membership verdict the bridge attached to a principal request.
fn require_member(state: &DaemonState, params: &Value) -> Result<()> {
    if !state.config.access.require_membership {
        return Ok(());
    }
    match params.get("member").and_then(|v| v.as_bool()) {
        Some(true) => Ok(()),
        _ => Err(RpcError::denied(ephemera_types::access::Denial::NotMember)),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&e.to_string()))
}
