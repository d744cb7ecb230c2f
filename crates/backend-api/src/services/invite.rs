use chat3d_auth::User;
use chrono::{Duration, SecondsFormat, Utc};
use rand::distributions::Uniform;
use rand::Rng;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

use super::admin::load_settings;
use super::error::ServiceError;
use crate::routes::models::{Invitation, InvitationLookup, InvitationStatus};
use crate::util::timestamp;

const CODE_LENGTH: usize = 10;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const INVITATION_SELECT: &str = r#"
    SELECT i.id, i.code, i.email, i.invited_by, u.public_id AS inviter_public_id,
           i.status, i.expires_at, i.accepted_at, i.created_at
    FROM invitations i
    LEFT JOIN users u ON u.id = i.invited_by
"#;

/// Random invitation code from an unambiguous uppercase alphabet.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let range = Uniform::from(0..CODE_ALPHABET.len());
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.sample(range)] as char)
        .collect()
}

pub async fn create_invitation(
    conn: &mut SqliteConnection,
    invited_by: Option<i64>,
    email: Option<&str>,
    ttl_hours: u32,
) -> Result<Invitation, ServiceError> {
    let email = email
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(chat3d_auth::normalize_email)
        .transpose()?;

    let code = generate_code();
    let now = Utc::now();
    let created_at = now.to_rfc3339_opts(SecondsFormat::Micros, true);
    let expires_at =
        (now + Duration::hours(i64::from(ttl_hours))).to_rfc3339_opts(SecondsFormat::Micros, true);

    sqlx::query(
        r#"
        INSERT INTO invitations (code, email, invited_by, status, expires_at, created_at)
        VALUES (?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&code)
    .bind(&email)
    .bind(invited_by)
    .bind(&expires_at)
    .bind(&created_at)
    .execute(&mut *conn)
    .await?;

    info!(code = %code, invited_by, "invitation created");
    find_invitation(conn, &code).await
}

/// Create an invitation on behalf of `user`, enforcing the per-user quota of
/// pending and accepted invitations. Administrators are not limited.
pub async fn create_user_invitation(
    pool: &SqlitePool,
    user: &User,
    email: Option<&str>,
) -> Result<Invitation, ServiceError> {
    let mut tx = pool.begin().await?;
    let settings = load_settings(&mut *tx).await?;

    if !user.is_admin() {
        let used: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invitations WHERE invited_by = ? AND status IN ('pending', 'accepted')",
        )
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;

        if used >= i64::from(settings.invitation_quota) {
            return Err(ServiceError::forbidden(format!(
                "invitation quota of {} reached",
                settings.invitation_quota
            )));
        }
    }

    let invitation =
        create_invitation(&mut tx, Some(user.id), email, settings.invitation_ttl_hours).await?;
    tx.commit().await?;
    Ok(invitation)
}

/// Invitations created by `invited_by`, or every invitation when `None`.
pub async fn list_invitations(
    pool: &SqlitePool,
    invited_by: Option<i64>,
) -> Result<Vec<Invitation>, ServiceError> {
    let rows = match invited_by {
        Some(user_id) => {
            sqlx::query(&format!(
                "{INVITATION_SELECT} WHERE i.invited_by = ? ORDER BY i.created_at DESC, i.id DESC"
            ))
            .bind(user_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "{INVITATION_SELECT} ORDER BY i.created_at DESC, i.id DESC"
            ))
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(invitation_from_row).collect()
}

pub async fn find_invitation(conn: &mut SqliteConnection, code: &str) -> Result<Invitation, ServiceError> {
    let row = sqlx::query(&format!("{INVITATION_SELECT} WHERE i.code = ?"))
        .bind(code.trim())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("invitation not found"))?;

    invitation_from_row(&row)
}

/// Revoke a pending invitation. Only its creator or an administrator may.
pub async fn revoke_invitation(
    pool: &SqlitePool,
    user: &User,
    code: &str,
) -> Result<Invitation, ServiceError> {
    let mut conn = pool.acquire().await?;
    let mut invitation = find_invitation(&mut conn, code).await?;

    if invitation.invited_by_id != Some(user.id) && !user.is_admin() {
        return Err(ServiceError::not_found("invitation not found"));
    }

    let result = sqlx::query("UPDATE invitations SET status = 'revoked' WHERE id = ? AND status = 'pending'")
        .bind(invitation.row_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() != 1 {
        return Err(ServiceError::conflict("only pending invitations can be revoked"));
    }

    invitation.status = InvitationStatus::Revoked;
    info!(code = %invitation.code, by = %user.public_id, "invitation revoked");
    Ok(invitation)
}

pub async fn lookup_invitation(pool: &SqlitePool, code: &str) -> Result<InvitationLookup, ServiceError> {
    let mut conn = pool.acquire().await?;
    let invitation = find_invitation(&mut conn, code).await?;

    Ok(InvitationLookup {
        valid: is_usable(&invitation),
        code: invitation.code,
        email: invitation.email,
        expires_at: invitation.expires_at,
    })
}

/// A pending, unexpired invitation suitable for registering `email`.
pub async fn usable_invitation(
    conn: &mut SqliteConnection,
    code: &str,
    email: &str,
) -> Result<Invitation, ServiceError> {
    let invitation = match find_invitation(conn, code).await {
        Ok(invitation) => invitation,
        Err(ServiceError::NotFound(_)) => {
            return Err(ServiceError::validation("invitation code is invalid"));
        }
        Err(error) => return Err(error),
    };

    if !is_usable(&invitation) {
        return Err(ServiceError::validation("invitation code is invalid or expired"));
    }

    if let Some(target) = &invitation.email {
        if !target.eq_ignore_ascii_case(email.trim()) {
            return Err(ServiceError::forbidden("invitation was issued for a different email"));
        }
    }

    Ok(invitation)
}

/// Mark an invitation accepted. Fails with a conflict when another
/// registration consumed it first.
pub async fn accept_invitation(
    conn: &mut SqliteConnection,
    invitation: &Invitation,
    user_id: i64,
) -> Result<(), ServiceError> {
    let result = sqlx::query(
        "UPDATE invitations SET status = 'accepted', accepted_by = ?, accepted_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(user_id)
    .bind(timestamp())
    .bind(invitation.row_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(ServiceError::conflict("invitation has already been used"));
    }
    Ok(())
}

fn is_usable(invitation: &Invitation) -> bool {
    invitation.status == InvitationStatus::Pending && invitation.expires_at > timestamp()
}

fn invitation_from_row(row: &SqliteRow) -> Result<Invitation, ServiceError> {
    let status: String = row.try_get("status")?;
    Ok(Invitation {
        row_id: row.try_get("id")?,
        invited_by_id: row.try_get("invited_by")?,
        code: row.try_get("code")?,
        email: row.try_get("email")?,
        invited_by: row.try_get("inviter_public_id")?,
        status: InvitationStatus::from_db(&status),
        expires_at: row.try_get("expires_at")?,
        accepted_at: row.try_get("accepted_at")?,
        created_at: row.try_get("created_at")?,
    })
}
