//! USD/COP 데이터 엔진 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 2024년 3월 첫 주 5분봉을 10배속으로 리플레이 (끝나면 라이브 전환)
//! usdcop replay -f 2024-03-04 -t 2024-03-08 --speed 10
//!
//! # 병합된 시계열을 JSON으로 출력
//! usdcop series -f 2024-03-04 -t 2024-03-08
//!
//! # 데이터 품질 리포트
//! usdcop quality -f 2024-03-04 -t 2024-03-08
//!
//! # 최신 시세, API 키 사용량, 거래 세션
//! usdcop quote
//! usdcop keys
//! usdcop session --at 2024-03-09T15:00:00Z
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use usdcop_core::{init_logging, AppConfig, LogConfig};

mod commands;
mod context;

use commands::replay::{run_replay, ReplayOptions};
use context::AppContext;

#[derive(Parser)]
#[command(name = "usdcop")]
#[command(about = "USD/COP 마켓 리플레이 및 데이터 정렬 엔진", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 (없으면 기본값 + 환경 변수)
    #[arg(short, long, global = true, default_value = "config/default.toml")]
    config: String,

    /// 로그 레벨 재정의 (예: debug, usdcop_data=trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 과거 데이터를 리플레이하고 끝에 도달하면 라이브 시세로 전환
    Replay {
        /// 시작 날짜 (YYYY-MM-DD)
        #[arg(short = 'f', long)]
        from: String,

        /// 종료 날짜 (YYYY-MM-DD)
        #[arg(short, long)]
        to: String,

        /// 배속 (0.1, 0.25, 0.5, 1, 2, 5, 10, 20, 50, 100)
        #[arg(short, long, default_value = "1")]
        speed: f64,

        /// 타임프레임 (기본: 설정의 twelvedata.interval). 다르면 갭 채우기 없이 저장소 데이터만 사용
        #[arg(long)]
        timeframe: Option<String>,

        /// 라이브 모드로 전환하지 않음
        #[arg(long, default_value = "false")]
        no_live: bool,

        /// 라이브 모드 시세 폴링 주기 (초)
        #[arg(long, default_value = "5")]
        quote_poll_secs: u64,

        /// heartbeat 로그 주기 (초, 0이면 끔)
        #[arg(long, default_value = "30")]
        heartbeat_secs: u64,
    },

    /// 저장소 + 원격 API 병합 시계열 출력 (JSON)
    Series {
        /// 시작 날짜 (YYYY-MM-DD)
        #[arg(short = 'f', long)]
        from: String,

        /// 종료 날짜 (YYYY-MM-DD)
        #[arg(short, long)]
        to: String,
    },

    /// 최신 시세 조회
    Quote,

    /// API 키 사용량 조회
    Keys {
        /// JSON 형식으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 저장소 데이터 품질 리포트
    Quality {
        /// 시작 날짜 (YYYY-MM-DD)
        #[arg(short = 'f', long)]
        from: String,

        /// 종료 날짜 (YYYY-MM-DD)
        #[arg(short, long)]
        to: String,

        /// JSON 형식으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 거래 세션 여부와 다음 세션 시작 시각
    Session {
        /// 기준 시각 (RFC 3339, 기본: 현재)
        #[arg(long)]
        at: Option<String>,
    },
}

fn load_config(path: &str) -> Result<AppConfig> {
    if std::path::Path::new(path).exists() {
        AppConfig::load(path).with_context(|| format!("Failed to load config: {}", path))
    } else {
        AppConfig::load_default().context("Failed to load default config")
    }
}

fn init_tracing(config: &AppConfig, level_override: Option<String>) -> Result<()> {
    let mut log_config = LogConfig::try_from(&config.logging)?;
    if let Some(level) = level_override {
        log_config.level = level;
    }
    init_logging(log_config).context("Failed to initialize logging")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config, cli.log_level)?;

    let ctx = AppContext::build(config)?;
    let result = run(&ctx, cli.command).await;
    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }

    ctx.shutdown().await;
    result
}

async fn run(ctx: &AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Replay {
            from,
            to,
            speed,
            timeframe,
            no_live,
            quote_poll_secs,
            heartbeat_secs,
        } => {
            run_replay(
                ctx,
                ReplayOptions {
                    from,
                    to,
                    speed,
                    timeframe,
                    no_live,
                    quote_poll_secs,
                    heartbeat_secs,
                },
            )
            .await?;
        }

        Commands::Series { from, to } => {
            let count = commands::series::print_series(ctx, &from, &to).await?;
            info!("✅ {} candles", count);
        }

        Commands::Quote => {
            commands::quote::print_quote(ctx).await?;
        }

        Commands::Keys { json } => {
            commands::keys::print_keys(ctx, json)?;
        }

        Commands::Quality { from, to, json } => {
            let report = commands::quality::print_quality(ctx, &from, &to, json).await?;
            info!(
                completeness = report.completeness_pct,
                complete = report.is_complete(),
                "품질 점검 완료"
            );
        }

        Commands::Session { at } => {
            let at = match at {
                Some(s) => commands::parse_instant(&s)?,
                None => Utc::now(),
            };
            commands::session::print_session(ctx, at)?;
        }
    }

    Ok(())
}
