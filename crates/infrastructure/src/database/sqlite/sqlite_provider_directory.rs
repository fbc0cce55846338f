use async_trait::async_trait;
use chrono::Utc;
use dispatch_domain::{
    entities::{MatchCriteria, ProviderCandidate},
    geo::{haversine_km, EARTH_RADIUS_KM},
    repositories::ProviderDirectory,
};
use dispatch_errors::DispatchResult;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

/// 基于 SQLite 的服务商目录
///
/// SQL 里只做类别和经纬度包围盒过滤，精确的大圆距离在内存中计算。
pub struct SqliteProviderDirectory {
    pool: SqlitePool,
}

/// 经纬度包围盒，跨越极点或日期变更线时不限制经度
#[derive(Debug, Clone, Copy, PartialEq)]
struct BoundingBox {
    min_lat: f64,
    max_lat: f64,
    lng_range: Option<(f64, f64)>,
}

impl BoundingBox {
    fn around(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        // 角半径留 1% 余量，避免边界上的点被包围盒误删
        let delta = radius_km / EARTH_RADIUS_KM * 1.01;
        let d_lat = delta.to_degrees();
        let min_lat = latitude - d_lat;
        let max_lat = latitude + d_lat;

        // 经度最大跨度取大圆切点处的 asin(sin δ / cos φ)
        let reach = delta.sin() / latitude.to_radians().cos();
        let lng_range = if min_lat <= -90.0 || max_lat >= 90.0 || reach >= 1.0 {
            None
        } else {
            let d_lng = reach.asin().to_degrees();
            let (min_lng, max_lng) = (longitude - d_lng, longitude + d_lng);
            if min_lng < -180.0 || max_lng > 180.0 {
                None
            } else {
                Some((min_lng, max_lng))
            }
        };

        Self {
            min_lat,
            max_lat,
            lng_range,
        }
    }
}

impl SqliteProviderDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 写入或更新服务商在某个类别下的位置与在线状态
    #[instrument(skip(self, candidate), fields(provider_id = %candidate.provider_id))]
    pub async fn upsert_provider(
        &self,
        candidate: &ProviderCandidate,
        service_radius_km: f64,
    ) -> DispatchResult<()> {
        let now = Utc::now();
        for category in &candidate.categories {
            sqlx::query(
                r#"
                INSERT INTO provider_details (provider_id, category, latitude, longitude,
                                              service_radius_km, is_online, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (provider_id, category) DO UPDATE SET
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    service_radius_km = excluded.service_radius_km,
                    is_online = excluded.is_online,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&candidate.provider_id)
            .bind(category)
            .bind(candidate.latitude)
            .bind(candidate.longitude)
            .bind(service_radius_km)
            .bind(candidate.is_online)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn set_online(&self, provider_id: &str, is_online: bool) -> DispatchResult<u64> {
        let result = sqlx::query(
            "UPDATE provider_details SET is_online = ?, updated_at = ? WHERE provider_id = ?",
        )
        .bind(is_online)
        .bind(Utc::now())
        .bind(provider_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    fn row_to_candidate(row: &sqlx::sqlite::SqliteRow) -> DispatchResult<ProviderCandidate> {
        Ok(ProviderCandidate {
            provider_id: row.try_get("provider_id")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            is_online: row.try_get("is_online")?,
            categories: vec![row.try_get("category")?],
        })
    }
}

#[async_trait]
impl ProviderDirectory for SqliteProviderDirectory {
    #[instrument(
        skip(self, criteria),
        fields(category = %criteria.category, radius_km = criteria.radius_km)
    )]
    async fn find_providers_in_radius(
        &self,
        criteria: &MatchCriteria,
    ) -> DispatchResult<Vec<ProviderCandidate>> {
        if criteria.radius_km.is_nan() || criteria.radius_km <= 0.0 {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::around(criteria.latitude, criteria.longitude, criteria.radius_km);
        let rows = match bbox.lng_range {
            Some((min_lng, max_lng)) => {
                sqlx::query(
                    r#"
                    SELECT provider_id, category, latitude, longitude, is_online
                    FROM provider_details
                    WHERE category = ? AND latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?
                    "#,
                )
                .bind(&criteria.category)
                .bind(bbox.min_lat)
                .bind(bbox.max_lat)
                .bind(min_lng)
                .bind(max_lng)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT provider_id, category, latitude, longitude, is_online
                    FROM provider_details
                    WHERE category = ? AND latitude BETWEEN ? AND ?
                    "#,
                )
                .bind(&criteria.category)
                .bind(bbox.min_lat)
                .bind(bbox.max_lat)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let candidate = Self::row_to_candidate(row)?;
            let distance = haversine_km(
                criteria.latitude,
                criteria.longitude,
                candidate.latitude,
                candidate.longitude,
            );
            if distance <= criteria.radius_km {
                candidates.push(candidate);
            }
        }

        debug!(
            "Provider directory returned {} of {} prefiltered candidates",
            candidates.len(),
            rows.len()
        );
        Ok(candidates)
    }
}
