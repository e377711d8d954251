use super::models::{Claims, Role};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
    #[error("JWT decoding error: {0}")]
    Decoding(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl JwtService {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    pub fn generate_token(&self, subject: &str, role: Role) -> Result<String, JwtError> {
        let now = Utc::now();
        let expiration = now + self.ttl;

        let claims = Claims {
            sub: subject.to_string(),
            role,
            exp: expiration.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        let header = Header::new(Algorithm::HS256);
        encode(&header, claims, &self.encoding_key).map_err(JwtError::Encoding)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, JwtError> {
        if token.is_empty() {
            return Err(JwtError::InvalidToken);
        }

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(JwtError::InvalidToken);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => {
                let now = Utc::now().timestamp() as usize;
                log::debug!(
                    "JWT token decoded successfully. Subject: {}, Role: {:?}, Exp: {}, Now: {}",
                    token_data.claims.sub,
                    token_data.claims.role,
                    token_data.claims.exp,
                    now
                );

                if token_data.claims.exp < now {
                    log::warn!(
                        "JWT token expired. Exp: {}, Now: {}",
                        token_data.claims.exp,
                        now
                    );
                    return Err(JwtError::TokenExpired);
                }
                Ok(token_data.claims)
            }
            Err(err) => {
                log::debug!("JWT token decode error: {:?}", err);
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        Err(JwtError::TokenExpired)
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidToken => Err(JwtError::InvalidToken),
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        Err(JwtError::InvalidToken)
                    }
                    _ => Err(JwtError::Decoding(err.to_string())),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_verifies_with_same_secret() {
        let service = JwtService::new(SECRET, 30);
        let token = service.generate_token("ana@example.com", Role::Admin).unwrap();

        let claims = service.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "ana@example.com");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp - claims.iat, 30 * 60);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issuer = JwtService::new("another-secret", 30);
        let token = issuer.generate_token("ana@example.com", Role::User).unwrap();

        let verifier = JwtService::new(SECRET, 30);
        assert!(matches!(verifier.verify_token(&token), Err(JwtError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = JwtService::new(SECRET, 30);
        let now = Utc::now().timestamp() as usize;
        let token = service
            .sign(&Claims {
                sub: "ana@example.com".into(),
                role: Role::User,
                exp: now - 120,
                iat: now - 1920,
            })
            .unwrap();

        assert!(matches!(service.verify_token(&token), Err(JwtError::TokenExpired)));
    }

    #[test]
    fn malformed_credentials_are_rejected() {
        let service = JwtService::new(SECRET, 30);
        assert!(matches!(service.verify_token(""), Err(JwtError::InvalidToken)));
        assert!(matches!(service.verify_token("abc.def"), Err(JwtError::InvalidToken)));
        assert!(service.verify_token("abc.def.ghi").is_err());
    }

    #[test]
    fn unknown_role_claim_falls_back_to_user() {
        let service = JwtService::new(SECRET, 30);
        let now = Utc::now().timestamp() as usize;
        let header = Header::new(Algorithm::HS256);
        let raw = serde_json::json!({
            "sub": "bob@example.com",
            "role": "superuser",
            "exp": now + 600,
            "iat": now,
        });
        let token = encode(&header, &raw, &service.encoding_key).unwrap();

        let claims = service.verify_token(&token).unwrap();
        assert_eq!(claims.role, Role::User);
    }
}
