//! Purchase flow command handlers.

use std::sync::Arc;

use ephemera_types::billing::PaymentStatus;
use ephemera_types::{ConflictKind, ServiceError};
use serde_json::Value;

use super::{require_bool, require_i64, require_member, require_str, to_value};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Default and maximum page size for the review queue.
const DEFAULT_QUEUE_LIMIT: u64 = 50;
const MAX_QUEUE_LIMIT: u64 = 500;

/// Principal-facing view of a rejected payment.
fn principal_error(err: ServiceError) -> RpcError {
    match err {
        ServiceError::Conflict(ConflictKind::AlreadyTerminal {
            payment_id,
            status: PaymentStatus::Rejected,
        }) => RpcError::payment_rejected(payment_id),
        other => other.into(),
    }
}

/// The configured purchase plans.
pub async fn list_tiers(state: &Arc<DaemonState>) -> Result {
    to_value(&state.payments.catalog().tiers())
}

/// Open a payment for a tier.
pub async fn initiate_payment(state: &Arc<DaemonState>, params: &Value) -> Result {
    let principal_id = require_i64(params, "principal_id")?;
    let tier = require_str(params, "tier")?;
    require_member(state, params)?;

    let payment = state.payments.initiate(principal_id, tier).await?;
    to_value(&payment)
}

/// Attach a proof to the principal's open payment.
pub async fn submit_proof(state: &Arc<DaemonState>, params: &Value) -> Result {
    let principal_id = require_i64(params, "principal_id")?;
    let proof_ref = require_str(params, "proof_ref")?;
    require_member(state, params)?;

    let payment = state
        .payments
        .submit_proof(principal_id, proof_ref)
        .await
        .map_err(principal_error)?;
    to_value(&payment)
}

/// Operator approval or rejection.
pub async fn decide_payment(state: &Arc<DaemonState>, params: &Value) -> Result {
    let payment_id = require_i64(params, "payment_id")?;
    let approve = require_bool(params, "approve")?;
    let operator_id = require_i64(params, "operator_id")?;

    let decision = state
        .payments
        .decide(payment_id, approve, operator_id)
        .await?;
    Ok(serde_json::json!({
        "payment": to_value(&decision.payment)?,
        "subscription": to_value(&decision.subscription)?,
    }))
}

/// The principal's most recent payment in any state, or null.
pub async fn get_payment(state: &Arc<DaemonState>, params: &Value) -> Result {
    let principal_id = require_i64(params, "principal_id")?;
    let payment = state.payments.latest(principal_id).await?;
    to_value(&payment)
}

/// Operator review queue: payments with a proof, oldest first.
pub async fn list_pending_payments(state: &Arc<DaemonState>, params: &Value) -> Result {
    let operator_id = require_i64(params, "operator_id")?;
    let limit = params
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_QUEUE_LIMIT)
        .clamp(1, MAX_QUEUE_LIMIT) as u32;

    let queue = state.payments.awaiting_decision(operator_id, limit).await?;
    to_value(&queue)
}
