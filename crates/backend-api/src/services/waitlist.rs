use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

use super::admin::load_settings;
use super::error::ServiceError;
use super::invite::create_invitation;
use crate::routes::models::{WaitlistEntry, WaitlistStatus};
use crate::util::timestamp;

const MAX_NOTE_CHARS: usize = 1000;

const ENTRY_SELECT: &str = r#"
    SELECT w.public_id, w.email, w.note, w.status, i.code AS invitation_code,
           w.created_at, w.updated_at
    FROM waitlist_entries w
    LEFT JOIN invitations i ON i.id = w.invitation_id
"#;

/// Add an email to the waitlist. Joining twice returns the existing entry.
pub async fn join(pool: &SqlitePool, email: &str, note: Option<&str>) -> Result<WaitlistEntry, ServiceError> {
    let email = chat3d_auth::normalize_email(email)?;
    let note = note.map(str::trim).filter(|note| !note.is_empty());
    if note.is_some_and(|note| note.chars().count() > MAX_NOTE_CHARS) {
        return Err(ServiceError::validation(format!(
            "note must be at most {MAX_NOTE_CHARS} characters"
        )));
    }

    let now = timestamp();
    let inserted = sqlx::query(
        r#"
        INSERT INTO waitlist_entries (public_id, email, note, status, created_at, updated_at)
        VALUES (?, ?, ?, 'pending', ?, ?)
        ON CONFLICT(email) DO NOTHING
        "#,
    )
    .bind(chat3d_auth::new_public_id())
    .bind(&email)
    .bind(note)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted == 1 {
        info!("waitlist entry created");
    }

    let mut conn = pool.acquire().await?;
    find_by_email(&mut conn, &email).await
}

pub async fn list_entries(
    pool: &SqlitePool,
    status: Option<WaitlistStatus>,
) -> Result<Vec<WaitlistEntry>, ServiceError> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "{ENTRY_SELECT} WHERE w.status = ? ORDER BY w.created_at ASC, w.id ASC"
            ))
            .bind(status.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!("{ENTRY_SELECT} ORDER BY w.created_at ASC, w.id ASC"))
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(entry_from_row).collect()
}

/// Approve a pending entry by issuing an invitation targeted at its email.
pub async fn approve(pool: &SqlitePool, admin_id: i64, entry_id: &str) -> Result<WaitlistEntry, ServiceError> {
    let mut tx = pool.begin().await?;
    let (row_id, email) = pending_entry(&mut tx, entry_id).await?;
    let settings = load_settings(&mut *tx).await?;

    let invitation =
        create_invitation(&mut tx, Some(admin_id), Some(&email), settings.invitation_ttl_hours).await?;

    sqlx::query(
        "UPDATE waitlist_entries SET status = 'approved', invitation_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(invitation.row_id)
    .bind(timestamp())
    .bind(row_id)
    .execute(&mut *tx)
    .await?;

    let entry = find_by_public_id(&mut tx, entry_id).await?;
    tx.commit().await?;

    info!(entry = %entry.id, code = %invitation.code, "waitlist entry approved");
    Ok(entry)
}

pub async fn reject(pool: &SqlitePool, entry_id: &str) -> Result<WaitlistEntry, ServiceError> {
    let mut tx = pool.begin().await?;
    let (row_id, _) = pending_entry(&mut tx, entry_id).await?;

    sqlx::query("UPDATE waitlist_entries SET status = 'rejected', updated_at = ? WHERE id = ?")
        .bind(timestamp())
        .bind(row_id)
        .execute(&mut *tx)
        .await?;

    let entry = find_by_public_id(&mut tx, entry_id).await?;
    tx.commit().await?;

    info!(entry = %entry.id, "waitlist entry rejected");
    Ok(entry)
}

async fn pending_entry(conn: &mut SqliteConnection, entry_id: &str) -> Result<(i64, String), ServiceError> {
    let row = sqlx::query("SELECT id, email, status FROM waitlist_entries WHERE public_id = ?")
        .bind(entry_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("waitlist entry not found"))?;

    let status: String = row.try_get("status")?;
    if WaitlistStatus::from_db(&status) != WaitlistStatus::Pending {
        return Err(ServiceError::conflict(format!("waitlist entry is already {status}")));
    }

    Ok((row.try_get("id")?, row.try_get("email")?))
}

async fn find_by_email(conn: &mut SqliteConnection, email: &str) -> Result<WaitlistEntry, ServiceError> {
    let row = sqlx::query(&format!("{ENTRY_SELECT} WHERE w.email = ?"))
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("waitlist entry not found"))?;
    entry_from_row(&row)
}

async fn find_by_public_id(conn: &mut SqliteConnection, entry_id: &str) -> Result<WaitlistEntry, ServiceError> {
    let row = sqlx::query(&format!("{ENTRY_SELECT} WHERE w.public_id = ?"))
        .bind(entry_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("waitlist entry not found"))?;
    entry_from_row(&row)
}

fn entry_from_row(row: &SqliteRow) -> Result<WaitlistEntry, ServiceError> {
    let status: String = row.try_get("status")?;
    Ok(WaitlistEntry {
        id: row.try_get("public_id")?,
        email: row.try_get("email")?,
        note: row.try_get("note")?,
        status: WaitlistStatus::from_db(&status),
        invitation_code: row.try_get("invitation_code")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::invite::lookup_invitation;
    use crate::services::test_utils::{create_admin, create_test_db};

    #[tokio::test]
    async fn joining_twice_returns_the_same_entry() {
        let (pool, _dir) = create_test_db().await;

        let first = join(&pool, "Carol@Example.com", Some("  robotics club ")).await.unwrap();
        let second = join(&pool, "carol@example.com", Some("changed my mind")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.email, "carol@example.com");
        assert_eq!(second.note.as_deref(), Some("robotics club"));
        assert_eq!(second.status, WaitlistStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_emails_are_rejected() {
        let (pool, _dir) = create_test_db().await;
        let error = join(&pool, "not-an-email", None).await.unwrap_err();
        assert_eq!(error.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn approval_issues_a_targeted_invitation() {
        let (pool, _dir) = create_test_db().await;
        let admin = create_admin(&pool, "root@example.com").await;
        let entry = join(&pool, "carol@example.com", None).await.unwrap();

        let approved = approve(&pool, admin.id, &entry.id).await.unwrap();
        assert_eq!(approved.status, WaitlistStatus::Approved);
        let code = approved.invitation_code.expect("approval should link an invitation");

        let lookup = lookup_invitation(&pool, &code).await.unwrap();
        assert!(lookup.valid);
        assert_eq!(lookup.email.as_deref(), Some("carol@example.com"));

        assert!(matches!(
            approve(&pool, admin.id, &entry.id).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(reject(&pool, &entry.id).await, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (pool, _dir) = create_test_db().await;
        let first = join(&pool, "a@example.com", None).await.unwrap();
        join(&pool, "b@example.com", None).await.unwrap();
        reject(&pool, &first.id).await.unwrap();

        assert_eq!(list_entries(&pool, None).await.unwrap().len(), 2);
        let pending = list_entries(&pool, Some(WaitlistStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].email, "b@example.com");
        let rejected = list_entries(&pool, Some(WaitlistStatus::Rejected)).await.unwrap();
        assert_eq!(rejected[0].id, first.id);
    }

    #[tokio::test]
    async fn unknown_entries_are_not_found() {
        let (pool, _dir) = create_test_db().await;
        assert!(matches!(reject(&pool, "missing").await, Err(ServiceError::NotFound(_))));
    }
}
