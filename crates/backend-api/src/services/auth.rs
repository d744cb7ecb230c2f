use chat3d_auth::{AuthSession, Authenticator, NewAccount, User, UserRole};
use tracing::{info, warn};

use super::admin::load_settings;
use super::error::ServiceError;
use super::invite::{accept_invitation, usable_invitation};
use crate::routes::models::RegistrationMode;

#[derive(Debug, Clone, Copy)]
pub struct Registration<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub display_name: Option<&'a str>,
    pub invitation_code: Option<&'a str>,
}

/// Register a password account according to the current registration mode.
///
/// Bootstrap admin emails bypass the mode and receive the admin role. In
/// `open` mode an invitation code is optional but, when given, must be valid
/// and is consumed. `invite_only` requires one; `closed` rejects everyone.
pub async fn register(
    authenticator: &Authenticator,
    registration: Registration<'_>,
) -> Result<(User, AuthSession), ServiceError> {
    let email = chat3d_auth::normalize_email(registration.email)?;
    let bootstrap_admin = authenticator.config().is_bootstrap_admin(&email);
    let code = registration
        .invitation_code
        .map(str::trim)
        .filter(|code| !code.is_empty());

    let pool = authenticator.pool();
    let mut tx = pool.begin().await?;
    let settings = load_settings(&mut *tx).await?;

    let invitation = if bootstrap_admin {
        None
    } else {
        match (settings.registration_mode, code) {
            (RegistrationMode::Closed, _) => {
                return Err(ServiceError::forbidden("registration is closed"));
            }
            (RegistrationMode::InviteOnly, None) => {
                return Err(ServiceError::validation("an invitation code is required"));
            }
            (_, Some(code)) => Some(usable_invitation(&mut tx, code, &email).await?),
            (RegistrationMode::Open, None) => None,
        }
    };

    let role = if bootstrap_admin {
        UserRole::Admin
    } else {
        UserRole::User
    };

    let user = authenticator
        .register_in_transaction(
            &mut tx,
            NewAccount {
                email: &email,
                password: registration.password,
                display_name: registration.display_name,
                role,
            },
        )
        .await?;

    if let Some(invitation) = &invitation {
        accept_invitation(&mut tx, invitation, user.id).await?;
    }
    tx.commit().await?;

    let session = authenticator.issue_session(user.id).await?;
    info!(
        user = %user.public_id,
        invited = invitation.is_some(),
        bootstrap_admin,
        "account registered"
    );
    Ok((user, session))
}

/// Password login. Inactive accounts are refused and their new session revoked.
pub async fn login(
    authenticator: &Authenticator,
    email: &str,
    password: &str,
) -> Result<(User, AuthSession), ServiceError> {
    let (user, session) = authenticator.login_with_password(email, password).await?;

    if !user.is_active {
        authenticator.revoke_session(&session.token).await?;
        warn!(user = %user.public_id, "login refused for inactive account");
        return Err(ServiceError::forbidden("account is inactive"));
    }

    Ok((user, session))
}
