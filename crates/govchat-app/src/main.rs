//! # govchat-app
//!
//! GovChat 게이트웨이 바이너리 진입점.
//! DI 와이어링, 라이프사이클 관리, 스케줄러 오케스트레이션.

mod chat_service;
mod lifecycle;
mod metrics;
mod scheduler;

use anyhow::{Context, Result};
use clap::Parser;
use govchat_core::config::AppConfig;
use govchat_core::config_manager::ConfigManager;
use govchat_core::models::degradation::FallbackResponse;
use govchat_core::models::health::{PERSISTENCE_STORE, REAL_TIME_TRANSPORT, UPSTREAM_AGENT};
use govchat_core::ports::conversation_store::ConversationStore;
use govchat_core::ports::metrics::Metrics;
use govchat_monitor::degradation::{DegradationEngine, FallbackSet};
use govchat_monitor::fallback::{CachedMessagesFallback, QueueMessageFallback, DEFAULT_CACHED_MESSAGES};
use govchat_monitor::health::HealthAggregator;
use govchat_monitor::offline_queue::OfflineQueue;
use govchat_network::circuit_breaker::BreakerRegistry;
use govchat_network::connection::ConnectionManager;
use govchat_network::probes::{AgentProbe, TransportProbe};
use govchat_network::ws_transport::WsTransport;
use govchat_storage::probe::PersistenceProbe;
use govchat_storage::sqlite::SqliteConversationStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::chat_service::{ChatOutcome, ChatService};
use crate::lifecycle::LifecycleManager;
use crate::metrics::TracingMetricsSink;
use crate::scheduler::{Scheduler, SchedulerConfig};

/// 대화 DB 파일 이름
const DB_FILE_NAME: &str = "govchat.db";

/// GovChat 게이트웨이
///
/// 상담 프런트엔드와 업스트림 대화 에이전트 사이의 연결 복원력 계층
#[derive(Parser, Debug)]
#[command(name = "govchat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리의 config.json)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 업스트림 에이전트 WebSocket URL
    #[arg(long, short = 'a')]
    agent_url: Option<String>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// JSON 로그 출력
    #[arg(long)]
    log_json: bool,

    /// 데이터 저장 경로 (기본: 플랫폼 데이터 디렉토리)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// tracing 초기화 (`RUST_LOG`가 있으면 우선)
fn init_tracing(log_level: &str, json: bool) {
    let log_filter = format!(
        "govchat={log_level},govchat_app={log_level},govchat_core={log_level},govchat_network={log_level},govchat_monitor={log_level},govchat_storage={log_level}"
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// 설정 로드 후 CLI 인자로 덮어쓴다
fn load_config(args: &Args) -> Result<AppConfig> {
    let manager = match &args.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    }
    .context("설정 로드 실패")?;
    info!("설정 파일: {}", manager.config_path().display());

    let mut config = (*manager.get()).clone();
    if let Some(url) = &args.agent_url {
        config.service.agent_url = url.clone();
    }
    config.validate().context("설정 검증 실패")?;
    Ok(config)
}

/// 데이터베이스 경로 결정 (CLI 인자 → 설정 → 플랫폼 기본 경로)
///
/// # 플랫폼별 기본 경로:
/// - macOS: `~/Library/Application Support/kr.govchat.govchat/govchat.db`
/// - Windows: `%APPDATA%\govchat\govchat\data\govchat.db`
/// - Linux: `~/.local/share/govchat/govchat.db`
fn resolve_db_path(args: &Args, config: &AppConfig) -> Result<PathBuf> {
    if let Some(dir) = &args.data_dir {
        return Ok(dir.join(DB_FILE_NAME));
    }
    if let Some(path) = &config.storage.db_path {
        return Ok(path.clone());
    }
    Ok(ConfigManager::data_dir()?.join(DB_FILE_NAME))
}

/// 세션 ID 생성
fn generate_session_id() -> String {
    format!("sess_{}", uuid::Uuid::new_v4().simple())
}

/// 표준 입력 한 줄 = 사용자 메시지 한 건.
/// `/status`, `/history`는 상태 조회 명령.
async fn console_loop(chat: Arc<ChatService>, mut shutdown: watch::Receiver<bool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("표준 입력 읽기 실패: {e}");
                break;
            }
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/status" => {
                let status = chat.connection_status();
                match serde_json::to_string_pretty(&status) {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!("상태 직렬화 실패: {e}"),
                }
                println!("서비스 수준: {}", chat.current_level());
            }
            "/history" => match chat.get_messages().await {
                Ok(FallbackResponse::Messages { messages }) => {
                    for turn in messages {
                        println!("[{}] {}", turn.role.as_str(), turn.content);
                    }
                }
                Ok(other) => print_fallback(&other),
                Err(e) => println!("기록 조회 실패: {e}"),
            },
            message => match chat.send_message(message).await {
                Ok(ChatOutcome::Reply(reply)) => println!("{}", reply.content),
                Ok(ChatOutcome::Fallback(response)) => print_fallback(&response),
                Err(e) => println!("전송 실패: {e}"),
            },
        }
    }
}

fn print_fallback(response: &FallbackResponse) {
    match response {
        FallbackResponse::Queued { position } => {
            println!("메시지가 접수되었습니다. 연결이 복구되면 전송됩니다 (대기 {position}번).")
        }
        FallbackResponse::Messages { messages } => println!("대화 기록 {}건", messages.len()),
        FallbackResponse::Offline { message } => println!("{message}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json);

    info!("GovChat 게이트웨이 시작");

    let config = load_config(&args)?;
    info!(
        service = %config.service.name,
        "업스트림 에이전트: {}",
        config.service.agent_url
    );

    // ── 어댑터 생성 (DI 와이어링) ──

    // 1. 메트릭
    let metrics = Metrics::new(Arc::new(TracingMetricsSink));

    // 2. 서킷 브레이커 (의존성당 하나)
    let breakers = Arc::new(BreakerRegistry::new());
    let agent_breaker = breakers.get_or_create(config.breaker.clone());

    // 3. 대화 저장소
    let db_path = resolve_db_path(&args, &config)?;
    let store = Arc::new(
        SqliteConversationStore::open(&db_path)
            .with_context(|| format!("대화 DB 열기 실패: {}", db_path.display()))?,
    );
    let store_port: Arc<dyn ConversationStore> = store;

    // 4. 실시간 연결
    let connection = ConnectionManager::new(
        Arc::new(WsTransport::new()),
        agent_breaker.clone(),
        &config,
        metrics.clone(),
    );

    // 5. 헬스 집계
    let mut aggregator = HealthAggregator::new(config.health.probe_timeout());
    aggregator.register_check(
        PERSISTENCE_STORE,
        Arc::new(PersistenceProbe::new(store_port.clone())),
    );
    aggregator.register_check(
        REAL_TIME_TRANSPORT,
        Arc::new(TransportProbe::new(connection.clone())),
    );
    aggregator.register_check(UPSTREAM_AGENT, Arc::new(AgentProbe::new(agent_breaker.clone())));

    // 6. 저하 엔진 + 폴백
    let queue = Arc::new(OfflineQueue::new(config.health.offline_queue_capacity));
    let queue_fallback = Arc::new(QueueMessageFallback::new(
        queue.clone(),
        config.connection.max_message_chars,
    ));
    let fallbacks = FallbackSet::new(
        queue_fallback.clone(),
        Arc::new(CachedMessagesFallback::new(
            Some(store_port.clone()),
            DEFAULT_CACHED_MESSAGES,
        )),
    );
    let engine = Arc::new(DegradationEngine::new(
        Arc::new(aggregator),
        agent_breaker,
        fallbacks,
        metrics.clone(),
    ));

    // 7. 요청 계층
    let chat = Arc::new(ChatService::new(
        connection.clone(),
        engine.clone(),
        store_port,
        queue,
        queue_fallback,
        DEFAULT_CACHED_MESSAGES,
    ));

    // ── 연결 ──
    let session_id = generate_session_id();
    if let Err(e) = connection.connect(&session_id, &config.service.name).await {
        warn!(session_id = %session_id, error = %e, "초기 연결 실패, 저하 수준으로 시작");
    }

    // ── 실행 ──
    let lifecycle = Arc::new(LifecycleManager::new());
    let signal_lifecycle = lifecycle.clone();
    tokio::spawn(async move {
        signal_lifecycle.run_until_signal().await;
    });

    tokio::spawn(console_loop(chat.clone(), lifecycle.subscribe()));

    let scheduler = Scheduler::new(
        SchedulerConfig::from_config(&config),
        engine,
        chat,
        connection,
        breakers,
        metrics,
    );
    scheduler.run(lifecycle.subscribe()).await;

    info!("GovChat 게이트웨이 종료");
    Ok(())
}
