//! Service error taxonomy.
//!
//! Only [`ServiceError::Dependency`] is ever retried. Everything else is
//! surfaced to the caller immediately and never causes a mutation.

use crate::billing::PaymentStatus;
use crate::{PaymentId, PrincipalId};

/// Why a conflicting request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The payment already reached `approved` or `rejected`.
    AlreadyTerminal {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
    /// The principal already has a non-terminal payment for another tier.
    ActivePayment { payment_id: PaymentId },
    /// A storage uniqueness or conditional-update guard tripped.
    ConcurrentModification(String),
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyTerminal { payment_id, status } => {
                write!(f, "payment {payment_id} is already {status}")
            }
            Self::ActivePayment { payment_id } => {
                write!(f, "payment {payment_id} is still open")
            }
            Self::ConcurrentModification(detail) => {
                write!(f, "concurrent modification: {detail}")
            }
        }
    }
}

/// Errors returned by every Ephemera service operation.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Bad input. Never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Unknown token, payment or subscription.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Terminal-state violation or concurrent modification.
    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    /// A storage or transport hiccup worth retrying.
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// Retries were exhausted. Carries no dependency internals.
    #[error("{operation} failed after {attempts} attempts")]
    TransientDependency { operation: String, attempts: u32 },

    /// The caller lacks the role required for the action.
    #[error("principal {principal} may not {action}")]
    Authorization {
        principal: PrincipalId,
        action: String,
    },
}

impl ServiceError {
    /// Whether the resilient call wrapper may retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Dependency(_))
    }

    /// Shorthand for [`ServiceError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`ServiceError::Validation`].
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }
}
