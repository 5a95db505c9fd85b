//! 헬스 체크 결과 모델.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 의존성 이름: 영속 저장소
pub const PERSISTENCE_STORE: &str = "persistence-store";
/// 의존성 이름: 실시간 전송
pub const REAL_TIME_TRANSPORT: &str = "real-time-transport";
/// 의존성 이름: 업스트림 대화 에이전트
pub const UPSTREAM_AGENT: &str = "upstream-agent";

/// 한 번의 평가에서 얻은 의존성별 헬스 맵
///
/// 모든 프로브가 끝난 뒤 한 번에 만들어지며 이후 변경되지 않는다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// 의존성 이름 → 정상 여부
    pub results: BTreeMap<String, bool>,
    /// 평가 완료 시각
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// 결과 맵으로 리포트 생성
    pub fn new(results: BTreeMap<String, bool>) -> Self {
        Self {
            results,
            checked_at: Utc::now(),
        }
    }

    /// 아직 평가 전 (모든 의존성 미확인)
    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    /// 의존성 정상 여부 (등록되지 않은 의존성은 비정상)
    pub fn is_healthy(&self, name: &str) -> bool {
        self.results.get(name).copied().unwrap_or(false)
    }

    /// 모든 의존성 정상 여부
    pub fn all_healthy(&self) -> bool {
        !self.results.is_empty() && self.results.values().all(|ok| *ok)
    }

    /// 비정상 의존성 목록
    pub fn unhealthy(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl FromIterator<(String, bool)> for HealthReport {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
