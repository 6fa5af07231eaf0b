//! Content registration and delivery command handlers.

use std::sync::Arc;

use ephemera_types::access::DeliveryOutcome;
use serde_json::Value;

use super::{require_i64, require_member, require_str};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Register a payload and hand back its token.
pub async fn register_content(state: &Arc<DaemonState>, params: &Value) -> Result {
    let operator_id = require_i64(params, "operator_id")?;
    let payload_ref = require_str(params, "payload_ref")?;

    let token = state.registry.register(operator_id, payload_ref).await?;
    Ok(serde_json::json!({
        "token": token.token,
        "created_at": token.created_at,
    }))
}

/// Stop a token from resolving. Items already delivered keep their deadlines.
pub async fn revoke_content(state: &Arc<DaemonState>, params: &Value) -> Result {
    let operator_id = require_i64(params, "operator_id")?;
    let token = require_str(params, "token")?;

    state.registry.revoke(operator_id, token).await?;
    Ok(serde_json::json!({"revoked": true}))
}

/// Deliver the content behind a token, or explain why not.
pub async fn deliver_content(state: &Arc<DaemonState>, params: &Value) -> Result {
    let destination = require_i64(params, "destination")?;
    let token = require_str(params, "token")?;
    let principal_id = require_i64(params, "principal_id")?;
    require_member(state, params)?;

    let outcome = state
        .scheduler
        .deliver(destination, token, principal_id)
        .await?;

    Ok(match outcome {
        DeliveryOutcome::Delivered {
            item_id,
            expires_at,
            via,
        } => serde_json::json!({
            "status": "delivered",
            "item_id": item_id,
            "expires_at": expires_at,
            "ttl_secs": state.scheduler.ttl_secs(),
            "via": via,
        }),
        DeliveryOutcome::Denied { reason } => serde_json::json!({
            "status": "denied",
            "reason": reason.as_str(),
        }),
    })
}
