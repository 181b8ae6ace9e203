use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::claims::{Claims, ClaimsRepr};
use crate::config::JwtConfig;
use crate::error::AuthResult;
use crate::roles::Role;

/// Signs HS256 access tokens over the shared instance secret.
pub struct JwtSigner {
    encoding_key: EncodingKey,
    access_ttl_seconds: i64,
}

pub struct IssuedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
    pub token_id: Uuid,
}

impl JwtSigner {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            access_ttl_seconds: config.access_ttl_seconds,
        }
    }

    pub fn issue_access_token(&self, user_id: Uuid, role: Role) -> AuthResult<IssuedAccessToken> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.access_ttl_seconds);
        let token_id = Uuid::new_v4();

        let repr = ClaimsRepr {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            exp: expires_at.timestamp(),
            iat: Some(now.timestamp()),
            jti: Some(token_id.to_string()),
        };

        let token = encode(&Header::new(Algorithm::HS256), &repr, &self.encoding_key)?;
        Ok(IssuedAccessToken {
            token,
            expires_at,
            expires_in: self.access_ttl_seconds,
            token_id,
        })
    }
}

/// Verifies HS256 access tokens and maps the payload into [`Claims`].
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_seconds.into();
        validation.validate_exp = true;
        Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let data = decode::<ClaimsRepr>(token, &self.decoding_key, &self.validation)?;
        Claims::try_from(data.claims)
    }
}

/// Opaque refresh token: UUID handle plus 32 bytes of CSPRNG entropy.
/// Only the SHA-256 digest is persisted server-side.
pub fn new_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let random = URL_SAFE_NO_PAD.encode(bytes);
    format!("{}.{}", Uuid::new_v4(), random)
}

pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;

    fn config() -> JwtConfig {
        JwtConfig::new("0123456789abcdef0123456789abcdef")
            .unwrap()
            .with_leeway(0)
    }

    #[test]
    fn round_trips_access_token() {
        let config = config();
        let signer = JwtSigner::new(&config);
        let verifier = JwtVerifier::new(&config);

        let user_id = Uuid::new_v4();
        let issued = signer.issue_access_token(user_id, Role::User).unwrap();
        let claims = verifier.verify(&issued.token).unwrap();

        assert_eq!(claims.subject, user_id);
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.token_id, Some(issued.token_id));
    }

    #[test]
    fn rejects_expired_token() {
        let config = config().with_access_ttl(-60);
        let signer = JwtSigner::new(&config);
        let verifier = JwtVerifier::new(&config);

        let issued = signer.issue_access_token(Uuid::new_v4(), Role::Admin).unwrap();
        assert!(matches!(verifier.verify(&issued.token), Err(AuthError::Expired)));
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let signer = JwtSigner::new(&config());
        let other =
            JwtConfig::new("ffffffffffffffffffffffffffffffff").unwrap();
        let verifier = JwtVerifier::new(&other);

        let issued = signer.issue_access_token(Uuid::new_v4(), Role::User).unwrap();
        assert!(verifier.verify(&issued.token).is_err());
    }

    #[test]
    fn refresh_tokens_are_unique_and_hash_deterministically() {
        let a = new_refresh_token();
        let b = new_refresh_token();
        assert_ne!(a, b);
        assert_eq!(hash_refresh_token(&a), hash_refresh_token(&a));
        assert_ne!(hash_refresh_token(&a), hash_refresh_token(&b));
    }
}
