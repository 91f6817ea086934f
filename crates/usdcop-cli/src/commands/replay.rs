//! 리플레이 실행.
//!
//! 저장소 조회 → 갭 채우기 → 리플레이 → (끝에 도달하면) 라이브 시세 폴링.
//! 갱신마다 마지막 캔들을 JSON 한 줄로 stdout에 출력합니다.
//! 실행 중에는 주기적으로 드라이버 상태를 heartbeat 로그로 남깁니다.

use crate::context::AppContext;
use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use usdcop_core::{Candle, ScheduledTask, Series, Timeframe};
use usdcop_data::QuerySpec;
use usdcop_replay::{
    ReplayConfig, ReplayDriver, ReplayEngine, ReplayHandle, ReplayMetrics, ReplayMode,
    ReplayUpdate,
};

use super::parse_range;

/// 상태 확인 주기.
const STATUS_POLL: Duration = Duration::from_millis(250);

/// 리플레이 실행 옵션.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// 시작 날짜 (YYYY-MM-DD)
    pub from: String,
    /// 종료 날짜 (YYYY-MM-DD)
    pub to: String,
    /// 배속
    pub speed: f64,
    /// 타임프레임 재정의
    pub timeframe: Option<String>,
    /// 끝에 도달해도 라이브로 전환하지 않음
    pub no_live: bool,
    /// 라이브 모드 시세 폴링 주기 (초)
    pub quote_poll_secs: u64,
    /// heartbeat 로그 주기 (초, 0이면 끔)
    pub heartbeat_secs: u64,
}

/// stdout 한 줄 출력 형식.
#[derive(Serialize)]
struct ReplayLine<'a> {
    mode: ReplayMode,
    prefix_len: usize,
    total: usize,
    progress: f64,
    candle: &'a Candle,
}

/// 드라이버 상태를 한 번 확인해 로그로 남깁니다. 드라이버가 응답하면 `true`.
async fn heartbeat(handle: &ReplayHandle) -> bool {
    match handle.status().await {
        Ok(status) => {
            info!(
                mode = ?status.mode,
                cursor = status.cursor,
                total = status.total,
                speed = status.speed,
                "시스템 정상"
            );
            true
        }
        Err(e) => {
            warn!(error = %e, "heartbeat: 리플레이 드라이버 응답 없음");
            false
        }
    }
}

fn spawn_heartbeat(handle: ReplayHandle, period: Duration) -> ScheduledTask {
    ScheduledTask::spawn_repeating("replay-heartbeat", period, move || {
        let handle = handle.clone();
        async move {
            heartbeat(&handle).await;
        }
    })
}

pub async fn run_replay(ctx: &AppContext, opts: ReplayOptions) -> Result<()> {
    let (start, end) = parse_range(&opts.from, &opts.to)?;
    let timeframe: Timeframe = match &opts.timeframe {
        Some(tf) => tf.parse().map_err(|e: String| anyhow!(e))?,
        None => ctx.timeframe,
    };
    let spec = QuerySpec::new(&ctx.config.storage.market, timeframe, start, end);
    let series = ctx.service.get_series(&spec, Utc::now()).await;
    if series.is_empty() {
        bail!("No data available for {} ~ {} ({})", start, end, timeframe);
    }

    let settings = &ctx.config.replay;
    let mut config = ReplayConfig::from(settings);
    if opts.no_live {
        config.auto_switch_to_live = false;
    }
    let handle = ReplayDriver::spawn(
        ReplayEngine::new(config),
        Duration::from_millis(settings.frame_interval_ms),
    );
    let heartbeat_task = (opts.heartbeat_secs > 0)
        .then(|| spawn_heartbeat(handle.clone(), Duration::from_secs(opts.heartbeat_secs)));

    handle
        .subscribe(|update: &ReplayUpdate| {
            if let Some(candle) = update.points.last() {
                let line = ReplayLine {
                    mode: update.mode,
                    prefix_len: update.prefix_len,
                    total: update.total,
                    progress: update.progress,
                    candle,
                };
                println!("{}", serde_json::to_string(&line)?);
            }
            Ok(())
        })
        .await?;
    handle
        .subscribe_metrics(|m: &ReplayMetrics| {
            info!(
                processed = m.processed_points,
                total = m.total_points,
                buffer_pct = m.buffer_utilization_pct,
                health = ?m.buffer_health,
                errors = m.error_count,
                "리플레이 지표"
            );
            Ok(())
        })
        .await?;

    let speed = handle.set_speed(opts.speed).await?;
    info!(points = series.len(), speed, %start, %end, "리플레이 시작");
    handle.load(series).await?;
    handle.start().await?;

    let symbol = ctx.config.twelvedata.symbol.clone();
    let mut status_tick = tokio::time::interval(STATUS_POLL);
    let mut quote_tick = tokio::time::interval(Duration::from_secs(opts.quote_poll_secs.max(1)));
    let mut live = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("중단 요청 수신");
                break;
            }

            _ = status_tick.tick() => {
                let status = handle.status().await?;
                match status.mode {
                    ReplayMode::Stopped => {
                        info!(cursor = status.cursor, total = status.total, "리플레이 완료");
                        break;
                    }
                    ReplayMode::Live if !live => {
                        live = true;
                        quote_tick.reset();
                        info!(%symbol, poll_secs = opts.quote_poll_secs, "라이브 모드: 시세 폴링 시작");
                    }
                    _ => {}
                }
            }

            _ = quote_tick.tick(), if live => {
                match ctx.service.latest_quote(&symbol).await {
                    Ok(quote) => {
                        handle.append_live(Series::from_candles([quote])).await?;
                    }
                    Err(e) => warn!(error = %e, "라이브 시세 조회 실패"),
                }
            }
        }
    }

    if let Some(task) = heartbeat_task {
        task.shutdown().await;
    }
    handle.shutdown().await;
    Ok(())
}
