//! Credential resolution for the handshake.
//!
//! One resolution is: try the current token; on an expiry verdict refresh it
//! once and retry; if that still fails fall back to a guest session when the
//! policy allows it, otherwise report a terminal rejection. Network failures
//! are returned as-is so the connection manager can schedule a retry.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::connection::{Connector, Credential, SessionMode, TransportLink};
use crate::error::{ClientError, Result};
use crate::infrastructure::auth::{TokenInspector, TokenStatus};
use crate::metrics::ConnectionMetrics;

use super::refresh::TokenRefresher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Permit the read-only guest downgrade
    pub allow_guest_mode: bool,
}

/// Working record of one handshake resolution; dropped once it settles
#[derive(Debug, Clone)]
pub struct AuthAttempt {
    pub token: Option<String>,
    pub attempt_number: u32,
    pub last_error: Option<ClientError>,
    pub allow_guest_mode: bool,
}

impl AuthAttempt {
    fn record(&mut self, error: ClientError) {
        self.attempt_number += 1;
        self.last_error = Some(error);
    }
}

/// A settled handshake
pub struct Resolution {
    pub link: TransportLink,
    pub mode: SessionMode,
}

pub struct AuthFallbackResolver {
    policy: AuthPolicy,
    token: RwLock<Option<String>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    inspector: TokenInspector,
}

impl AuthFallbackResolver {
    pub fn new(
        policy: AuthPolicy,
        token: Option<String>,
        refresher: Option<Arc<dyn TokenRefresher>>,
    ) -> Self {
        Self {
            policy,
            token: RwLock::new(token.filter(|t| !t.is_empty())),
            refresher,
            inspector: TokenInspector::new(),
        }
    }

    pub fn policy(&self) -> AuthPolicy {
        self.policy
    }

    /// Current access token
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Replace the access token, e.g. after an interactive login
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token.filter(|t| !t.is_empty());
    }

    pub async fn resolve(&self, connector: &dyn Connector) -> Result<Resolution> {
        let mut attempt = AuthAttempt {
            token: self.token(),
            attempt_number: 0,
            last_error: None,
            allow_guest_mode: self.policy.allow_guest_mode,
        };

        let Some(token) = attempt.token.clone() else {
            tracing::debug!("No access token, trying anonymous session");
            return self.fallback(connector, attempt).await;
        };

        let verdict = if self.inspector.inspect(&token) == TokenStatus::Expired {
            tracing::debug!("Access token already expired, skipping handshake");
            ClientError::AuthExpired("token past its exp claim".to_string())
        } else {
            match connector.open(&Credential::Bearer(token.clone())).await {
                Ok(link) => return Ok(authenticated(link)),
                Err(error) if error.is_retryable() => return Err(error),
                Err(error) => error,
            }
        };

        if !matches!(verdict, ClientError::AuthExpired(_)) {
            attempt.record(verdict);
            return self.fallback(connector, attempt).await;
        }
        attempt.record(verdict);

        let refreshed = match &self.refresher {
            Some(refresher) => refresher.refresh(&token).await,
            None => Err(ClientError::Refresh("no refresh credential configured".to_string())),
        };
        let fresh = match refreshed {
            Ok(fresh) => fresh,
            Err(error) => {
                tracing::warn!(error = %error, "Silent token refresh failed");
                attempt.record(error);
                return self.fallback(connector, attempt).await;
            }
        };

        tracing::info!("Access token refreshed");
        self.set_token(Some(fresh.clone()));
        attempt.token = Some(fresh.clone());

        match connector.open(&Credential::Bearer(fresh)).await {
            Ok(link) => Ok(authenticated(link)),
            Err(error) if error.is_retryable() => Err(error),
            Err(error) => {
                attempt.record(error);
                self.fallback(connector, attempt).await
            }
        }
    }

    /// Guest session when allowed, terminal rejection otherwise
    async fn fallback(&self, connector: &dyn Connector, attempt: AuthAttempt) -> Result<Resolution> {
        let reason = attempt
            .last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no access token".to_string());

        if !attempt.allow_guest_mode {
            return Err(ClientError::AuthRejected(reason));
        }

        tracing::warn!(
            attempts = attempt.attempt_number,
            reason = %reason,
            "Authenticated handshake failed, downgrading to guest session"
        );

        match connector.open(&Credential::Guest).await {
            Ok(link) => {
                ConnectionMetrics::record_guest_downgrade();
                Ok(Resolution {
                    link,
                    mode: SessionMode::Guest,
                })
            }
            Err(error) if error.is_retryable() => Err(error),
            Err(error) => Err(ClientError::AuthRejected(format!(
                "guest session refused: {}",
                error
            ))),
        }
    }
}

fn authenticated(link: TransportLink) -> Resolution {
    Resolution {
        link,
        mode: SessionMode::Authenticated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    /// Answers per credential from a queue; empty queue means accept
    #[derive(Default)]
    struct VerdictConnector {
        verdicts: Mutex<HashMap<String, VecDeque<ClientError>>>,
        seen: Mutex<Vec<Credential>>,
    }

    impl VerdictConnector {
        fn reject(self, credential: &str, error: ClientError) -> Self {
            self.verdicts
                .lock()
                .entry(credential.to_string())
                .or_default()
                .push_back(error);
            self
        }

        fn seen(&self) -> Vec<Credential> {
            self.seen.lock().clone()
        }
    }

    fn key(credential: &Credential) -> String {
        match credential {
            Credential::Bearer(token) => token.clone(),
            Credential::Guest => "guest".to_string(),
        }
    }

    #[async_trait]
    impl Connector for VerdictConnector {
        async fn open(&self, credential: &Credential) -> Result<TransportLink> {
            self.seen.lock().push(credential.clone());
            let verdict = self
                .verdicts
                .lock()
                .get_mut(&key(credential))
                .and_then(VecDeque::pop_front);
            match verdict {
                Some(error) => Err(error),
                None => Ok(TransportLink::in_memory(1).0),
            }
        }
    }

    struct FixedRefresher(Result<String>);

    #[async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(&self, _expired: &str) -> Result<String> {
            self.0.clone()
        }
    }

    fn resolver(guest: bool, token: &str, refresher: Option<Result<String>>) -> AuthFallbackResolver {
        AuthFallbackResolver::new(
            AuthPolicy {
                allow_guest_mode: guest,
            },
            Some(token.to_string()),
            refresher.map(|r| Arc::new(FixedRefresher(r)) as Arc<dyn TokenRefresher>),
        )
    }

    fn expired() -> ClientError {
        ClientError::AuthExpired("401".to_string())
    }

    fn rejected() -> ClientError {
        ClientError::AuthRejected("403".to_string())
    }

    #[tokio::test]
    async fn test_valid_token_connects_authenticated() {
        let connector = VerdictConnector::default();
        let resolution = resolver(false, "t1", None).resolve(&connector).await.unwrap();

        assert_eq!(resolution.mode, SessionMode::Authenticated);
        assert_eq!(connector.seen(), vec![Credential::Bearer("t1".to_string())]);
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_once() {
        let connector = VerdictConnector::default().reject("t1", expired());
        let resolver = resolver(false, "t1", Some(Ok("t2".to_string())));

        let resolution = resolver.resolve(&connector).await.unwrap();
        assert_eq!(resolution.mode, SessionMode::Authenticated);
        assert_eq!(resolver.token().as_deref(), Some("t2"));
        assert_eq!(
            connector.seen(),
            vec![
                Credential::Bearer("t1".to_string()),
                Credential::Bearer("t2".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_refreshed_token_rejected_falls_back_to_guest() {
        let connector = VerdictConnector::default()
            .reject("t1", expired())
            .reject("t2", expired());
        let resolution = resolver(true, "t1", Some(Ok("t2".to_string())))
            .resolve(&connector)
            .await
            .unwrap();

        assert_eq!(resolution.mode, SessionMode::Guest);
        assert_eq!(connector.seen().last(), Some(&Credential::Guest));
    }

    #[tokio::test]
    async fn test_refresh_failure_without_guest_is_terminal() {
        let connector = VerdictConnector::default().reject("t1", expired());
        let result = resolver(false, "t1", Some(Err(ClientError::Refresh("boom".to_string()))))
            .resolve(&connector)
            .await;

        match result {
            Err(ClientError::AuthRejected(_)) => {}
            Err(other) => panic!("Expected AuthRejected, got {:?}", other),
            Ok(_) => panic!("Expected AuthRejected, got a session"),
        }
        assert_eq!(connector.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_skips_refresh() {
        let connector = VerdictConnector::default().reject("t1", rejected());
        let result = resolver(true, "t1", Some(Ok("t2".to_string())))
            .resolve(&connector)
            .await
            .unwrap();

        assert_eq!(result.mode, SessionMode::Guest);
        assert_eq!(
            connector.seen(),
            vec![Credential::Bearer("t1".to_string()), Credential::Guest]
        );
    }

    #[tokio::test]
    async fn test_transport_error_is_returned_for_retry() {
        let connector =
            VerdictConnector::default().reject("t1", ClientError::Transport("refused".to_string()));
        let result = resolver(true, "t1", None).resolve(&connector).await;

        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(connector.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_guest_refused_is_terminal() {
        let connector = VerdictConnector::default()
            .reject("t1", rejected())
            .reject("guest", rejected());
        let result = resolver(true, "t1", None).resolve(&connector).await;
        assert!(matches!(result, Err(ClientError::AuthRejected(_))));
    }

    #[tokio::test]
    async fn test_locally_expired_jwt_skips_first_handshake() {
        #[derive(serde::Serialize)]
        struct Exp {
            sub: String,
            exp: i64,
        }
        let stale = encode(
            &Header::default(),
            &Exp {
                sub: "user-1".to_string(),
                exp: chrono::Utc::now().timestamp() - 3600,
            },
            &EncodingKey::from_secret(b"server-secret"),
        )
        .unwrap();

        let connector = VerdictConnector::default();
        let resolver = resolver(false, &stale, Some(Ok("fresh".to_string())));
        resolver.resolve(&connector).await.unwrap();

        assert_eq!(connector.seen(), vec![Credential::Bearer("fresh".to_string())]);
    }

    #[tokio::test]
    async fn test_no_token_uses_guest_or_rejects() {
        let connector = VerdictConnector::default();
        let guest = AuthFallbackResolver::new(AuthPolicy { allow_guest_mode: true }, None, None);
        assert_eq!(guest.resolve(&connector).await.unwrap().mode, SessionMode::Guest);

        let strict = AuthFallbackResolver::new(AuthPolicy::default(), None, None);
        assert!(matches!(
            strict.resolve(&connector).await,
            Err(ClientError::AuthRejected(_))
        ));
    }
}
