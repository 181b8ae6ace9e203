use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::roles::Role;

/// Application-focused representation of verified JWT claims.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub subject: Uuid,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub token_id: Option<Uuid>,
}

impl Claims {
    pub fn has_role(&self, minimum: Role) -> bool {
        self.role.satisfies(minimum)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClaimsRepr {
    pub sub: String,
    pub role: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let subject = Uuid::parse_str(&value.sub)
            .map_err(|_| AuthError::InvalidClaim("sub", value.sub.clone()))?;
        let role = value
            .role
            .parse::<Role>()
            .map_err(|_| AuthError::InvalidClaim("role", value.role.clone()))?;

        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("exp", value.exp.to_string()))?;
        let issued_at = value.iat.and_then(|iat| Utc.timestamp_opt(iat, 0).single());
        let token_id = value.jti.as_deref().and_then(|jti| Uuid::parse_str(jti).ok());

        Ok(Self { subject, role, expires_at, issued_at, token_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_uuid_subject() {
        let repr = ClaimsRepr {
            sub: "not-a-uuid".into(),
            role: "admin".into(),
            exp: 2_000_000_000,
            iat: None,
            jti: None,
        };
        assert!(matches!(
            Claims::try_from(repr),
            Err(AuthError::InvalidClaim("sub", _))
        ));
    }

    #[test]
    fn rejects_unknown_role() {
        let repr = ClaimsRepr {
            sub: Uuid::new_v4().to_string(),
            role: "root".into(),
            exp: 2_000_000_000,
            iat: None,
            jti: None,
        };
        assert!(matches!(
            Claims::try_from(repr),
            Err(AuthError::InvalidClaim("role", _))
        ));
    }
}
