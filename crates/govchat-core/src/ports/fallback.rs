//! 폴백 액션 포트.
//!
//! 구현: `govchat-monitor::fallback`

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::degradation::{FallbackRequest, FallbackResponse};

/// 저하 수준에서 정상 경로 대신 실행되는 동작
#[async_trait]
pub trait FallbackAction: Send + Sync {
    /// 폴백 실행
    async fn execute(&self, request: &FallbackRequest) -> Result<FallbackResponse, CoreError>;
}
