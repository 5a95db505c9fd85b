//! 헬스 프로브 포트.
//!
//! 구현: `govchat-network` (전송/에이전트), `govchat-storage` (저장소),
//! `govchat-monitor::health::FnProbe` (클로저).

use async_trait::async_trait;

use crate::error::CoreError;

/// 의존성 하나의 건강 상태 확인
///
/// `Ok(false)`, `Err`, 패닉, 타임아웃은 모두 비정상으로 기록된다.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<bool, CoreError>;
}
