use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use super::Claims;

/// Clock skew tolerated when judging expiry locally
const DEFAULT_LEEWAY_SECS: i64 = 5;

/// Outcome of inspecting an access token locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    /// Decodable and not yet expired (or carries no `exp`)
    Valid,
    /// Decodable and past its `exp`
    Expired,
    /// Not a JWT; sent to the server as-is
    Opaque,
}

/// Decodes access tokens without verifying signatures, so the client can
/// skip a handshake that is certain to be rejected as expired.
pub struct TokenInspector {
    validation: Validation,
    leeway_secs: i64,
}

impl TokenInspector {
    pub fn new() -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            validation,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }

    pub fn claims(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &self.validation)
            .map(|data| data.claims)
            .ok()
    }

    pub fn inspect(&self, token: &str) -> TokenStatus {
        match self.claims(token) {
            Some(claims) => {
                let now = chrono::Utc::now().timestamp();
                if claims.is_expired_at(now, self.leeway_secs) {
                    TokenStatus::Expired
                } else {
                    TokenStatus::Valid
                }
            }
            None => TokenStatus::Opaque,
        }
    }
}

impl Default for TokenInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_token(exp: i64) -> String {
        let claims = Claims {
            sub: Some("user-123".to_string()),
            exp: Some(exp),
            iat: Some(chrono::Utc::now().timestamp()),
            roles: vec!["user".to_string()],
            extra: Default::default(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"server-side-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token() {
        let inspector = TokenInspector::new();
        let token = create_test_token(chrono::Utc::now().timestamp() + 3600);

        assert_eq!(inspector.inspect(&token), TokenStatus::Valid);
        let claims = inspector.claims(&token).unwrap();
        assert_eq!(claims.user_id(), Some("user-123"));
    }

    #[test]
    fn test_expired_token() {
        let inspector = TokenInspector::new();
        let token = create_test_token(chrono::Utc::now().timestamp() - 3600);

        assert_eq!(inspector.inspect(&token), TokenStatus::Expired);
    }

    #[test]
    fn test_opaque_token() {
        let inspector = TokenInspector::new();
        assert_eq!(inspector.inspect("not-a-jwt"), TokenStatus::Opaque);
    }

    #[test]
    fn test_leeway_applies() {
        let claims = Claims {
            sub: None,
            exp: Some(100),
            iat: None,
            roles: vec![],
            extra: Default::default(),
        };
        assert!(!claims.is_expired_at(103, 5));
        assert!(claims.is_expired_at(106, 5));
    }
}
