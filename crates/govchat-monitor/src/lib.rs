//! # govchat-monitor
//!
//! 의존성 헬스 집계와 시스템 전체 서비스 수준 결정.
//!
//! - [`health`]: 등록된 프로브를 동시에 실행해 의존성별 헬스 맵으로 합친다
//! - [`degradation`]: 헬스 맵 + 에이전트 브레이커 상태 → Full / Limited / Offline
//! - [`fallback`]: 수준별 폴백 액션 (대기열 적재, 캐시 조회, 오프라인 안내)
//! - [`offline_queue`]: Limited 동안 보류된 사용자 메시지 (lock-free)

pub mod degradation;
pub mod fallback;
pub mod health;
pub mod offline_queue;
