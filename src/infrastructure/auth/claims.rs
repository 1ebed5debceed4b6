use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claims read from an access token on the client side.
///
/// Only the timing claims matter here; the server remains the authority on
/// whether a token is acceptable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiration time (Unix timestamp)
    #[serde(default)]
    pub exp: Option<i64>,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: Option<i64>,
    /// User roles
    #[serde(default)]
    pub roles: Vec<String>,
    /// Additional custom claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    pub fn user_id(&self) -> Option<&str> {
        self.sub.as_deref()
    }

    /// Expired at `now` once `leeway_secs` has also elapsed
    pub fn is_expired_at(&self, now: i64, leeway_secs: i64) -> bool {
        match self.exp {
            Some(exp) => exp + leeway_secs < now,
            None => false,
        }
    }
}
