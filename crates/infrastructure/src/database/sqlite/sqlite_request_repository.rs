use async_trait::async_trait;
use dispatch_domain::{entities::ServiceRequest, repositories::RequestRepository};
use dispatch_errors::{DispatchError, DispatchResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteRequestRepository {
    pool: SqlitePool,
}

impl SqliteRequestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> DispatchResult<ServiceRequest> {
        Ok(ServiceRequest {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            provider_id: row.try_get("provider_id")?,
            service_id: row.try_get("service_id")?,
            category: row.try_get("category")?,
            description: row.try_get("description")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            status: row.try_get("status")?,
            accepted_at: row.try_get("accepted_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl RequestRepository for SqliteRequestRepository {
    #[instrument(
        skip(self, request),
        fields(request_id = %request.id, category = %request.category)
    )]
    async fn create(&self, request: &ServiceRequest) -> DispatchResult<()> {
        sqlx::query(
            r#"
            INSERT INTO service_requests (id, customer_id, provider_id, service_id, category,
                                          description, latitude, longitude, status, accepted_at,
                                          started_at, completed_at, cancelled_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(&request.customer_id)
        .bind(&request.provider_id)
        .bind(&request.service_id)
        .bind(&request.category)
        .bind(&request.description)
        .bind(request.latitude)
        .bind(request.longitude)
        .bind(request.status)
        .bind(request.accepted_at)
        .bind(request.started_at)
        .bind(request.completed_at)
        .bind(request.cancelled_at)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Created service request {}", request.id);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> DispatchResult<Option<ServiceRequest>> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, provider_id, service_id, category, description, latitude,
                   longitude, status, accepted_at, started_at, completed_at, cancelled_at,
                   created_at, updated_at
            FROM service_requests WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_request(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, request), fields(request_id = %request.id, status = %request.status))]
    async fn update(&self, request: &ServiceRequest) -> DispatchResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE service_requests
            SET provider_id = ?, status = ?, accepted_at = ?, started_at = ?, completed_at = ?,
                cancelled_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&request.provider_id)
        .bind(request.status)
        .bind(request.accepted_at)
        .bind(request.started_at)
        .bind(request.completed_at)
        .bind(request.cancelled_at)
        .bind(request.updated_at)
        .bind(&request.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DispatchError::request_not_found(&request.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use chrono::Utc;
    use dispatch_domain::entities::RequestStatus;

    #[tokio::test]
    async fn test_create_get_update_request() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let repo = SqliteRequestRepository::new(db.pool().clone());
        let mut request = ServiceRequest::new("cust-1", "cleaning", "two bedrooms", -23.5, -46.6);

        repo.create(&request).await.unwrap();
        assert_eq!(repo.get_by_id(&request.id).await.unwrap().unwrap(), request);

        request.accept("prov-1", Utc::now()).unwrap();
        repo.update(&request).await.unwrap();

        let loaded = repo.get_by_id(&request.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RequestStatus::Accepted);
        assert_eq!(loaded.provider_id.as_deref(), Some("prov-1"));
        assert_eq!(loaded.accepted_at, request.accepted_at);
    }

    #[tokio::test]
    async fn test_update_missing_request() {
        let db = SqliteDatabase::in_memory().await.unwrap();
        let repo = SqliteRequestRepository::new(db.pool().clone());
        let request = ServiceRequest::new("cust-1", "cleaning", "", 0.0, 0.0);

        let err = repo.update(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::RequestNotFound { .. }));
        assert!(repo.get_by_id(&request.id).await.unwrap().is_none());
    }
}
