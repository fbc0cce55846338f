use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_domain::{
    entities::{Dispatch, DispatchStatus},
    repositories::DispatchRepository,
};
use dispatch_errors::DispatchResult;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

const DISPATCH_COLUMNS: &str =
    "id, request_id, provider_id, status, distance_km, expires_at, created_at, updated_at";

pub struct SqliteDispatchRepository {
    pool: SqlitePool,
}

impl SqliteDispatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_dispatch(row: &sqlx::sqlite::SqliteRow) -> DispatchResult<Dispatch> {
        Ok(Dispatch {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            provider_id: row.try_get("provider_id")?,
            status: row.try_get("status")?,
            distance_km: row.try_get("distance_km")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn status_placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }
}

#[async_trait]
impl DispatchRepository for SqliteDispatchRepository {
    #[instrument(skip(self, dispatch), fields(
        dispatch_id = %dispatch.id,
        request_id = %dispatch.request_id,
        provider_id = %dispatch.provider_id,
        status = %dispatch.status,
    ))]
    async fn create(&self, dispatch: &Dispatch) -> DispatchResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dispatches (id, request_id, provider_id, status, distance_km,
                                    expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&dispatch.id)
        .bind(&dispatch.request_id)
        .bind(&dispatch.provider_id)
        .bind(dispatch.status)
        .bind(dispatch.distance_km)
        .bind(dispatch.expires_at)
        .bind(dispatch.created_at)
        .bind(dispatch.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Created {}", dispatch.entity_description());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> DispatchResult<Option<Dispatch>> {
        let row = sqlx::query(&format!("SELECT {DISPATCH_COLUMNS} FROM dispatches WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_dispatch(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, expected), fields(dispatch_id = %id, new_status = %new_status))]
    async fn transition_status(
        &self,
        id: &str,
        expected: &[DispatchStatus],
        new_status: DispatchStatus,
        updated_at: DateTime<Utc>,
    ) -> DispatchResult<bool> {
        if expected.is_empty() {
            return Ok(false);
        }

        let sql = format!(
            "UPDATE dispatches SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            Self::status_placeholders(expected.len())
        );
        let mut query = sqlx::query(&sql).bind(new_status).bind(updated_at).bind(id);
        for status in expected {
            query = query.bind(*status);
        }

        let result = query.execute(&self.pool).await?;
        let updated = result.rows_affected() == 1;
        debug!(updated, "Dispatch status transition");
        Ok(updated)
    }

    async fn list_by_request(&self, request_id: &str) -> DispatchResult<Vec<Dispatch>> {
        let rows = sqlx::query(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM dispatches WHERE request_id = ? ORDER BY distance_km ASC, created_at ASC"
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_dispatch).collect()
    }

    async fn list_pending_by_provider(
        &self,
        provider_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<Vec<Dispatch>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DISPATCH_COLUMNS} FROM dispatches
            WHERE provider_id = ? AND status IN (?, ?) AND expires_at > ?
            ORDER BY created_at DESC
            "#
        ))
        .bind(provider_id)
        .bind(DispatchStatus::Pending)
        .bind(DispatchStatus::Sent)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_dispatch).collect()
    }

    #[instrument(skip(self))]
    async fn expire_old(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Dispatch>> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE dispatches SET status = ?, updated_at = ?
            WHERE status IN (?, ?) AND expires_at < ?
            RETURNING {DISPATCH_COLUMNS}
            "#
        ))
        .bind(DispatchStatus::Expired)
        .bind(now)
        .bind(DispatchStatus::Pending)
        .bind(DispatchStatus::Sent)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let expired: Vec<Dispatch> = rows
            .iter()
            .map(Self::row_to_dispatch)
            .collect::<DispatchResult<_>>()?;
        debug!("Expired {} dispatches", expired.len());
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use chrono::Duration;

    async fn setup() -> (SqliteDatabase, SqliteDispatchRepository) {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let repo = SqliteDispatchRepository::new(db.pool().clone());
        (db, repo)
    }

    fn offer(request_id: &str, provider_id: &str, created_at: DateTime<Utc>) -> Dispatch {
        Dispatch::new_offer(
            request_id,
            provider_id,
            2.346,
            DispatchStatus::Sent,
            created_at,
            Duration::minutes(5),
        )
    }

    #[tokio::test]
    async fn test_create_and_get_dispatch() {
        let (_db, repo) = setup().await;
        let dispatch = offer("req-1", "prov-1", Utc::now());

        repo.create(&dispatch).await.unwrap();
        let loaded = repo.get_by_id(&dispatch.id).await.unwrap().unwrap();

        assert_eq!(loaded, dispatch);
        assert_eq!(loaded.distance_km, 2.35);
        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_persistence_error() {
        let (_db, repo) = setup().await;
        let dispatch = offer("req-1", "prov-1", Utc::now());
        repo.create(&dispatch).await.unwrap();

        let err = repo.create(&dispatch).await.unwrap_err();
        assert!(matches!(err, dispatch_errors::DispatchError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_transition_status_is_conditional() {
        let (_db, repo) = setup().await;
        let dispatch = offer("req-1", "prov-1", Utc::now());
        repo.create(&dispatch).await.unwrap();

        let now = Utc::now();
        assert!(repo
            .transition_status(&dispatch.id, &DispatchStatus::OPEN, DispatchStatus::Accepted, now)
            .await
            .unwrap());
        assert!(!repo
            .transition_status(&dispatch.id, &DispatchStatus::OPEN, DispatchStatus::Rejected, now)
            .await
            .unwrap());
        assert!(!repo
            .transition_status("missing", &DispatchStatus::OPEN, DispatchStatus::Accepted, now)
            .await
            .unwrap());

        let loaded = repo.get_by_id(&dispatch.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DispatchStatus::Accepted);
    }

    #[tokio::test]
    async fn test_list_by_request_and_pending_by_provider() {
        let (_db, repo) = setup().await;
        let now = Utc::now();
        let fresh = offer("req-1", "prov-1", now);
        let other_request = offer("req-2", "prov-1", now);
        let stale = offer("req-3", "prov-1", now - Duration::minutes(10));
        let other_provider = offer("req-1", "prov-2", now);
        for d in [&fresh, &other_request, &stale, &other_provider] {
            repo.create(d).await.unwrap();
        }

        let by_request = repo.list_by_request("req-1").await.unwrap();
        assert_eq!(by_request.len(), 2);

        let pending = repo.list_pending_by_provider("prov-1", now).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(pending.len(), 2);
        assert!(ids.contains(&fresh.id.as_str()));
        assert!(ids.contains(&other_request.id.as_str()));
    }

    #[tokio::test]
    async fn test_expire_old_is_idempotent() {
        let (_db, repo) = setup().await;
        let now = Utc::now();
        let stale = offer("req-1", "prov-1", now - Duration::minutes(10));
        let fresh = offer("req-1", "prov-2", now);
        let mut accepted = offer("req-1", "prov-3", now - Duration::minutes(10));
        accepted.status = DispatchStatus::Accepted;
        for d in [&stale, &fresh, &accepted] {
            repo.create(d).await.unwrap();
        }

        let expired = repo.expire_old(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
        assert_eq!(expired[0].status, DispatchStatus::Expired);

        assert!(repo.expire_old(now).await.unwrap().is_empty());
        let loaded = repo.get_by_id(&accepted.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DispatchStatus::Accepted);
    }
}
