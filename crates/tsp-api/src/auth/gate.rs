//! Role-based access control
//!
//! [`authorize`] checks a resolved [`Identity`] against an allow-list of
//! roles. Handlers declare their allow-list as a [`RolePolicy`] type and
//! take a `RequireRole<Policy>` extractor, so the rule sits in the handler
//! signature rather than in router wiring.

use thiserror::Error;
use tsp_core::{Identity, Role};

/// Why the gate refused a request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    /// Caller is anonymous and anonymous access is not allowed
    #[error("Authentication required")]
    Unauthenticated,

    /// Caller is authenticated but their role is not allowed
    #[error("Role '{role}' is not permitted (allowed: {})", join_roles(.allowed))]
    Forbidden { role: Role, allowed: Vec<Role> },
}

/// Admit `identity` if its effective role is in `allowed`
///
/// Returns the effective role on success. Anonymous callers that are
/// refused get `Unauthenticated`, authenticated ones get `Forbidden`.
pub fn authorize(identity: &Identity, allowed: &[Role]) -> Result<Role, AccessDenied> {
    let role = identity.role();

    if allowed.contains(&role) {
        return Ok(role);
    }

    match identity {
        Identity::Anonymous => Err(AccessDenied::Unauthenticated),
        Identity::Authenticated(_) => Err(AccessDenied::Forbidden {
            role,
            allowed: allowed.to_vec(),
        }),
    }
}

pub(crate) fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// A static allow-list of roles
pub trait RolePolicy: Send + Sync + 'static {
    const ALLOWED: &'static [Role];
}

/// Administrators only
pub struct AdminOnly;

impl RolePolicy for AdminOnly {
    const ALLOWED: &'static [Role] = &[Role::Admin];
}

/// Any signed-in account
pub struct Members;

impl RolePolicy for Members {
    const ALLOWED: &'static [Role] = &[Role::User, Role::Admin];
}

/// Everyone, including anonymous callers
pub struct Everyone;

impl RolePolicy for Everyone {
    const ALLOWED: &'static [Role] = &[Role::Anon, Role::User, Role::Admin];
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsp_core::{AuthenticatedUser, UserRole};

    fn signed_in(role: UserRole) -> Identity {
        Identity::Authenticated(AuthenticatedUser {
            id: 1,
            email: "someone@example.com".to_string(),
            role,
        })
    }

    #[test]
    fn test_admin_only() {
        assert_eq!(
            authorize(&signed_in(UserRole::Admin), AdminOnly::ALLOWED),
            Ok(Role::Admin)
        );
        assert_eq!(
            authorize(&signed_in(UserRole::User), AdminOnly::ALLOWED),
            Err(AccessDenied::Forbidden {
                role: Role::User,
                allowed: vec![Role::Admin],
            })
        );
        assert_eq!(
            authorize(&Identity::Anonymous, AdminOnly::ALLOWED),
            Err(AccessDenied::Unauthenticated)
        );
    }

    #[test]
    fn test_members() {
        assert_eq!(
            authorize(&signed_in(UserRole::User), Members::ALLOWED),
            Ok(Role::User)
        );
        assert_eq!(
            authorize(&signed_in(UserRole::Admin), Members::ALLOWED),
            Ok(Role::Admin)
        );
        assert_eq!(
            authorize(&Identity::Anonymous, Members::ALLOWED),
            Err(AccessDenied::Unauthenticated)
        );
    }

    #[test]
    fn test_anonymous_allowed() {
        assert_eq!(
            authorize(&Identity::Anonymous, Everyone::ALLOWED),
            Ok(Role::Anon)
        );
    }

    #[test]
    fn test_anon_only_rejects_signed_in_callers() {
        // Admin does not imply every other role
        assert!(matches!(
            authorize(&signed_in(UserRole::Admin), &[Role::Anon]),
            Err(AccessDenied::Forbidden { role: Role::Admin, .. })
        ));
    }

    #[test]
    fn test_empty_allow_list_denies_everyone() {
        assert_eq!(
            authorize(&Identity::Anonymous, &[]),
            Err(AccessDenied::Unauthenticated)
        );
        assert!(matches!(
            authorize(&signed_in(UserRole::Admin), &[]),
            Err(AccessDenied::Forbidden { .. })
        ));
    }

    #[test]
    fn test_forbidden_message_lists_roles() {
        let err = authorize(&signed_in(UserRole::User), &[Role::Admin, Role::Anon]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Role 'user' is not permitted (allowed: admin,anon)"
        );
    }
}
