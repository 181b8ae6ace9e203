use crate::error::AuthError;
use crate::extractors::AuthContext;
use crate::roles::Role;

/// Declarative endpoint-level check: each route states its minimum role and
/// the guard evaluates the verified claims against it.
pub fn ensure_min_role(auth: &AuthContext, minimum: Role) -> Result<(), AuthError> {
    if auth.claims.role.satisfies(minimum) {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole(minimum.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Claims;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn context(role: Role) -> AuthContext {
        AuthContext {
            claims: Claims {
                subject: Uuid::new_v4(),
                role,
                expires_at: Utc::now() + Duration::hours(1),
                issued_at: Some(Utc::now()),
                token_id: Some(Uuid::new_v4()),
            },
            token: String::new(),
        }
    }

    #[test]
    fn viewer_cannot_reach_user_routes() {
        let auth = context(Role::Viewer);
        assert!(ensure_min_role(&auth, Role::Viewer).is_ok());
        assert!(matches!(
            ensure_min_role(&auth, Role::User),
            Err(AuthError::InsufficientRole("user"))
        ));
    }

    #[test]
    fn admin_satisfies_everything() {
        let auth = context(Role::Admin);
        assert!(ensure_min_role(&auth, Role::Viewer).is_ok());
        assert!(ensure_min_role(&auth, Role::User).is_ok());
        assert!(ensure_min_role(&auth, Role::Admin).is_ok());
    }
}
