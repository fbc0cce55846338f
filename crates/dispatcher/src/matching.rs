use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use dispatch_domain::entities::{
    Dispatch, DispatchStatus, MatchCriteria, ProviderCandidate, RankedCandidate, ServiceRequest,
};
use dispatch_domain::geo::haversine_km;
use dispatch_domain::repositories::ProviderDirectory;
use dispatch_errors::DispatchResult;

use crate::lifecycle::DispatchLifecycleManager;

/// 按 (在线优先, 距离升序) 排序并过滤掉半径外的候选者
///
/// 排序是稳定的：键相同的候选者保持输入顺序。半径不大于 0 时返回空列表。
pub fn rank(
    candidates: Vec<ProviderCandidate>,
    origin_lat: f64,
    origin_lng: f64,
    radius_km: f64,
) -> Vec<RankedCandidate> {
    if radius_km.is_nan() || radius_km <= 0.0 {
        return Vec::new();
    }

    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let distance_km =
                haversine_km(origin_lat, origin_lng, candidate.latitude, candidate.longitude);
            (distance_km <= radius_km).then_some(RankedCandidate {
                candidate,
                distance_km,
            })
        })
        .collect();

    ranked.sort_by(compare_ranked);
    ranked
}

/// 排序后只保留前 `limit` 个，用于自动派单
pub fn rank_top(
    candidates: Vec<ProviderCandidate>,
    origin_lat: f64,
    origin_lng: f64,
    radius_km: f64,
    limit: usize,
) -> Vec<RankedCandidate> {
    let mut ranked = rank(candidates, origin_lat, origin_lng, radius_km);
    ranked.truncate(limit);
    ranked
}

fn compare_ranked(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.candidate
        .is_online
        .cmp(&a.candidate.is_online)
        .then_with(|| a.distance_km.total_cmp(&b.distance_km))
}

/// 手动匹配入口（运营人员触发），不截断候选列表
pub struct MatchingService {
    directory: Arc<dyn ProviderDirectory>,
    lifecycle: Arc<DispatchLifecycleManager>,
}

impl MatchingService {
    pub fn new(
        directory: Arc<dyn ProviderDirectory>,
        lifecycle: Arc<DispatchLifecycleManager>,
    ) -> Self {
        Self {
            directory,
            lifecycle,
        }
    }

    /// 查询并排序候选者
    pub async fn find_candidates(
        &self,
        criteria: &MatchCriteria,
    ) -> DispatchResult<Vec<RankedCandidate>> {
        let candidates = self.directory.find_providers_in_radius(criteria).await?;
        debug!(
            "服务商目录返回 {} 个候选者 (类别: {}, 半径: {}km)",
            candidates.len(),
            criteria.category,
            criteria.radius_km
        );
        Ok(rank(
            candidates,
            criteria.latitude,
            criteria.longitude,
            criteria.radius_km,
        ))
    }

    /// 为请求的每个候选者创建 pending 状态的派单
    ///
    /// 单个候选者持久化失败只记录日志，返回成功创建的派单。
    pub async fn match_request(
        &self,
        request: &ServiceRequest,
        radius_km: f64,
    ) -> DispatchResult<Vec<Dispatch>> {
        let mut criteria = MatchCriteria::new(
            request.latitude,
            request.longitude,
            radius_km,
            request.category.clone(),
        );
        if let Some(service_id) = &request.service_id {
            criteria = criteria.with_service(service_id.clone());
        }

        let ranked = self.find_candidates(&criteria).await?;
        let mut dispatches = Vec::with_capacity(ranked.len());
        for candidate in &ranked {
            match self
                .lifecycle
                .offer(
                    &request.id,
                    candidate.provider_id(),
                    candidate.distance_km,
                    DispatchStatus::Pending,
                )
                .await
            {
                Ok(dispatch) => dispatches.push(dispatch),
                Err(e) => warn!(
                    request_id = %request.id,
                    provider_id = %candidate.provider_id(),
                    error = %e,
                    "Failed to create manual dispatch"
                ),
            }
        }

        info!(
            request_id = %request.id,
            candidates = ranked.len(),
            created = dispatches.len(),
            "Manual match completed"
        );
        Ok(dispatches)
    }
}
