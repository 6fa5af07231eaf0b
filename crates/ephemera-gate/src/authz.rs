//! Role levels and the action table.
//!
//! Every privileged operation asks [`Authorizer::authorize`] before touching
//! storage. Refusals are logged on the `audit` target.

use std::collections::HashSet;
use std::fmt;

use ephemera_types::{PrincipalId, Result, ServiceError};
use serde::{Deserialize, Serialize};

/// Role levels, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Role {
    /// Any end user.
    #[default]
    Principal = 0,
    /// Reviews payment proofs and publishes content.
    Operator = 1,
    /// Everything an operator can do, plus revoking content.
    Owner = 2,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Principal => write!(f, "principal"),
            Role::Operator => write!(f, "operator"),
            Role::Owner => write!(f, "owner"),
        }
    }
}

/// Operations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReviewPayments,
    DecidePayment,
    ManageContent,
    RevokeContent,
}

impl Action {
    /// Minimum role for the action.
    pub fn required_role(&self) -> Role {
        match self {
            Action::ReviewPayments | Action::DecidePayment | Action::ManageContent => {
                Role::Operator
            }
            Action::RevokeContent => Role::Owner,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ReviewPayments => "review_payments",
            Action::DecidePayment => "decide_payment",
            Action::ManageContent => "manage_content",
            Action::RevokeContent => "revoke_content",
        }
    }
}

/// Maps principals to roles from the configured allow-lists.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    owners: HashSet<PrincipalId>,
    operators: HashSet<PrincipalId>,
}

impl Authorizer {
    pub fn new(
        owners: impl IntoIterator<Item = PrincipalId>,
        operators: impl IntoIterator<Item = PrincipalId>,
    ) -> Self {
        Self {
            owners: owners.into_iter().collect(),
            operators: operators.into_iter().collect(),
        }
    }

    /// Highest role held by `principal_id`.
    pub fn role_of(&self, principal_id: PrincipalId) -> Role {
        if self.owners.contains(&principal_id) {
            Role::Owner
        } else if self.operators.contains(&principal_id) {
            Role::Operator
        } else {
            Role::Principal
        }
    }

    pub fn is_allowed(&self, principal_id: PrincipalId, action: Action) -> bool {
        self.role_of(principal_id) >= action.required_role()
    }

    /// Check `action` for `principal_id`, returning the caller's role.
    pub fn authorize(&self, principal_id: PrincipalId, action: Action) -> Result<Role> {
        let role = self.role_of(principal_id);
        if role >= action.required_role() {
            return Ok(role);
        }
        tracing::warn!(
            target: "audit",
            principal_id,
            %role,
            action = action.as_str(),
            "authorization denied"
        );
        Err(ServiceError::Authorization {
            principal: principal_id,
            action: action.as_str().to_string(),
        })
    }

    /// Everyone who should hear about new payment proofs.
    pub fn reviewers(&self) -> Vec<PrincipalId> {
        let mut ids: Vec<_> = self.owners.union(&self.operators).copied().collect();
        ids.sort_unstable();
        ids
    }
}
