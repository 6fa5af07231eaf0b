//! Content registry.
//!
//! Maps opaque tokens to payload references. Revoking a token stops future
//! resolution; items already delivered keep their own deadlines.

use std::sync::Arc;

use ephemera_db::queries::content;
use ephemera_db::SharedConnection;
use ephemera_gate::{Action, Authorizer};
use ephemera_resilience::RetryPolicy;
use ephemera_types::clock::Clock;
use ephemera_types::content::ContentToken;
use ephemera_types::{PrincipalId, Result, ServiceError};
use tracing::info;

/// Length of a generated token in bytes before hex encoding.
pub const TOKEN_BYTES: usize = 16;

/// How much of a token may appear in logs.
const LOGGED_TOKEN_CHARS: usize = 8;

pub struct ContentRegistry {
    conn: SharedConnection,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    authorizer: Arc<Authorizer>,
}

impl ContentRegistry {
    pub fn new(
        conn: SharedConnection,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        authorizer: Arc<Authorizer>,
    ) -> Self {
        Self {
            conn,
            clock,
            retry,
            authorizer,
        }
    }

    /// Register a payload under a fresh random token.
    pub async fn register(&self, operator_id: PrincipalId, payload_ref: &str) -> Result<ContentToken> {
        self.authorizer.authorize(operator_id, Action::ManageContent)?;
        let payload_ref = payload_ref.trim();
        if payload_ref.is_empty() {
            return Err(ServiceError::validation("payload reference is empty"));
        }
        let now = self.clock.now();

        let token = ephemera_resilience::call(&self.retry, "register_content", || async {
            let token = generate_token();
            let conn = self.conn.lock().await;
            content::insert(&conn, &token, payload_ref, now)
                .map(|()| token)
                .map_err(ServiceError::from)
        })
        .await?;

        info!(operator_id, token = token_prefix(&token), "content registered");
        Ok(ContentToken {
            token,
            payload_ref: payload_ref.to_string(),
            created_at: now,
        })
    }

    /// Look up a token.
    pub async fn resolve(&self, token: &str) -> Result<ContentToken> {
        let found = ephemera_resilience::call(&self.retry, "resolve_content", || async {
            let conn = self.conn.lock().await;
            content::get(&conn, token).map_err(ServiceError::from)
        })
        .await?;
        found.ok_or_else(|| ServiceError::not_found("content", token))
    }

    /// Stop `token` from resolving.
    pub async fn revoke(&self, operator_id: PrincipalId, token: &str) -> Result<()> {
        self.authorizer.authorize(operator_id, Action::RevokeContent)?;
        let deleted = ephemera_resilience::call(&self.retry, "revoke_content", || async {
            let conn = self.conn.lock().await;
            content::delete(&conn, token).map_err(ServiceError::from)
        })
        .await?;
        if !deleted {
            return Err(ServiceError::not_found("content", token));
        }
        info!(operator_id, token = token_prefix(token), "content revoked");
        Ok(())
    }
}

/// Leading characters of a token, safe to log.
fn token_prefix(token: &str) -> &str {
    token.get(..LOGGED_TOKEN_CHARS).unwrap_or(token)
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_types::clock::ManualClock;

    const OPERATOR: PrincipalId = 900;
    const OWNER: PrincipalId = 901;

    fn registry() -> ContentRegistry {
        ContentRegistry::new(
            ephemera_db::shared(ephemera_db::open_memory().expect("db")),
            Arc::new(ManualClock::new(1_700_000_000)),
            RetryPolicy::no_retry(),
            Arc::new(Authorizer::new([OWNER], [OPERATOR])),
        )
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = registry();
        let token = registry.register(OPERATOR, "file:abc").await.expect("register");
        assert_eq!(token.token.len(), TOKEN_BYTES * 2);
        assert!(token.token.chars().all(|c| c.is_ascii_hexdigit()));

        let resolved = registry.resolve(&token.token).await.expect("resolve");
        assert_eq!(resolved, token);
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let registry = registry();
        let a = registry.register(OPERATOR, "file:a").await.expect("a");
        let b = registry.register(OPERATOR, "file:a").await.expect("b");
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let registry = registry();
        let err = registry.resolve("deadbeef").await.expect_err("missing");
        assert!(matches!(err, ServiceError::NotFound { entity: "content", .. }));
    }

    #[tokio::test]
    async fn test_register_requires_operator() {
        let registry = registry();
        let err = registry.register(7, "file:abc").await.expect_err("forbidden");
        assert!(matches!(err, ServiceError::Authorization { .. }));
        let err = registry.register(OPERATOR, " ").await.expect_err("empty");
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_revoke_is_owner_only() {
        let registry = registry();
        let token = registry.register(OPERATOR, "file:abc").await.expect("register");

        let err = registry.revoke(OPERATOR, &token.token).await.expect_err("operator");
        assert!(matches!(err, ServiceError::Authorization { .. }));

        registry.revoke(OWNER, &token.token).await.expect("revoke");
        assert!(registry.resolve(&token.token).await.is_err());
        let err = registry.revoke(OWNER, &token.token).await.expect_err("twice");
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[test]
    fn test_token_prefix_hides_the_rest() {
        let token = generate_token();
        assert_eq!(token_prefix(&token), &token[..LOGGED_TOKEN_CHARS]);
        assert_eq!(token_prefix("abc"), "abc");
    }
}
