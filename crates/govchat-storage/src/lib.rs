//! # govchat-storage
//!
//! 대화 기록 저장소 어댑터.
//! SQLite에 세션별 대화 턴을 저장하고, 저하 수준 판정용 영속 저장소 프로브를 제공한다.
//!
//! ## 모듈
//! - `sqlite`: 대화 기록 저장소 (ConversationStore 구현)
//! - `probe`: 영속 저장소 헬스 프로브
//! - `migration`: 스키마 마이그레이션

pub mod migration;
pub mod probe;
pub mod sqlite;
