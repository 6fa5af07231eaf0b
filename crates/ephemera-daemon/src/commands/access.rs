//! Entitlement and access status command handlers.

use std::sync::Arc;

use ephemera_gate::Action;
use serde_json::Value;

use super::{require_i64, to_value};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// The principal's active subscription, or null.
pub async fn get_subscription(state: &Arc<DaemonState>, params: &Value) -> Result {
    let principal_id = require_i64(params, "principal_id")?;
    let active = state.ledger.get_active(principal_id).await?;
    to_value(&active)
}

/// Whether the principal is entitled and how many free views are used.
pub async fn get_access_status(state: &Arc<DaemonState>, params: &Value) -> Result {
    let principal_id = require_i64(params, "principal_id")?;
    let active = state.ledger.get_active(principal_id).await?;
    let used = state.gate.free_views_used(principal_id).await?;
    let limit = state.gate.free_limit();

    Ok(serde_json::json!({
        "entitled": active.is_some(),
        "expires_at": active.map(|s| s.expires_at),
        "free_views_used": used,
        "free_limit": limit,
        "free_views_remaining": limit.saturating_sub(used),
    }))
}

/// Every subscription the principal ever held, newest first. Operators only.
pub async fn get_history(state: &Arc<DaemonState>, params: &Value) -> Result {
    let operator_id = require_i64(params, "operator_id")?;
    let principal_id = require_i64(params, "principal_id")?;
    state.authorizer.authorize(operator_id, Action::ReviewPayments)?;

    let history = state.ledger.history(principal_id).await?;
    to_value(&history)
}
