//! Authenticated identities and the verifier seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roomcast_auth::{AuthError, Authenticator};
use roomcast_database::{User, UserSummary};
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{RealtimeError, RealtimeResult};

/// The user a connection authenticated as.
///
/// A snapshot taken at handshake time; presence fields may be stale for the
/// lifetime of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub avatar: Option<String>,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            avatar: user.avatar,
            online: user.is_online,
            last_seen: user.last_seen,
        }
    }
}

/// Resolves a presented credential to an [`Identity`].
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> RealtimeResult<Identity>;
}

#[async_trait]
impl IdentityVerifier for Authenticator {
    async fn verify(&self, token: &str) -> RealtimeResult<Identity> {
        match Authenticator::verify(self, token).await {
            Ok(user) => Ok(Identity::from(user)),
            Err(AuthError::Storage(err)) => {
                error!(error = %err, "identity lookup failed during verification");
                Err(RealtimeError::Unauthenticated)
            }
            Err(err) => {
                debug!(error = %err, "rejected credential");
                Err(RealtimeError::Unauthenticated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_config::AuthConfig;
    use roomcast_database::{CreateUserRequest, MemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn authenticator_resolves_identity() {
        let store = Arc::new(MemoryStore::new());
        let alice = store
            .create_user(&CreateUserRequest::named("alice"))
            .await
            .unwrap();
        let authenticator = Authenticator::new(store.clone(), &AuthConfig::default());
        let token = authenticator.issue_token(&alice.id).unwrap().token;

        let verifier: &dyn IdentityVerifier = &authenticator;
        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.id, alice.id);
        assert_eq!(identity.summary(), alice.summary());
    }

    #[tokio::test]
    async fn every_auth_failure_is_unauthenticated() {
        let store = Arc::new(MemoryStore::new());
        let authenticator = Authenticator::new(store.clone(), &AuthConfig::default());
        let verifier: &dyn IdentityVerifier = &authenticator;

        assert_eq!(
            verifier.verify("garbage").await,
            Err(RealtimeError::Unauthenticated)
        );

        let ghost = authenticator.issue_token("ghost").unwrap().token;
        assert_eq!(
            verifier.verify(&ghost).await,
            Err(RealtimeError::Unauthenticated)
        );

        store.set_fail_reads(true);
        assert_eq!(
            verifier.verify(&ghost).await,
            Err(RealtimeError::Unauthenticated)
        );
    }
}
