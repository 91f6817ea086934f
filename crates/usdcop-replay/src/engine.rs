//! 마켓 리플레이 엔진.
//!
//! 시간을 외부에서 받는 순수 상태 기계입니다. 타이머나 태스크를 직접 갖지 않으며,
//! 호스트(예: [`ReplayDriver`](crate::ReplayDriver))가 프레임마다 [`ReplayEngine::tick`]을 호출합니다.
//!
//! 상태 전이:
//! `Stopped → Playing ⇄ Paused → (끝) TransitioningToLive → Live`,
//! `Playing/Paused → Stopped` (명시적 stop).

use crate::error::{ReplayError, Result};
use crate::metrics::ReplayMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use usdcop_core::{Candle, ReplaySettings, Series};
use usdcop_data::merge;
use uuid::Uuid;

/// 허용되는 재생 속도 배율.
pub const SPEED_ALLOW_LIST: [f64; 10] = [0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0];

/// 리플레이 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayMode {
    Stopped,
    Playing,
    Paused,
    TransitioningToLive,
    Live,
}

impl fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplayMode::Stopped => "stopped",
            ReplayMode::Playing => "playing",
            ReplayMode::Paused => "paused",
            ReplayMode::TransitioningToLive => "transitioning-to-live",
            ReplayMode::Live => "live",
        };
        write!(f, "{}", s)
    }
}

/// 엔진 설정.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// 1배속에서 캔들 하나를 내보내는 간격
    pub base_interval: Duration,
    /// 구독자에게 보내는 최근 캔들 수
    pub display_window: usize,
    /// 지표 push 주기 (처리 캔들 수)
    pub metrics_every: usize,
    /// 끝에 도달하면 라이브로 전환
    pub auto_switch_to_live: bool,
    /// `TransitioningToLive`에서 `Live`까지의 지연
    pub live_transition_delay: Duration,
    /// 버퍼 점유율 계산 기준
    pub max_buffer_size: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self::from(&ReplaySettings::default())
    }
}

impl From<&ReplaySettings> for ReplayConfig {
    fn from(settings: &ReplaySettings) -> Self {
        Self {
            base_interval: Duration::from_millis(settings.base_interval_ms),
            display_window: settings.display_window.max(1),
            metrics_every: settings.metrics_every,
            auto_switch_to_live: settings.auto_switch_to_live,
            live_transition_delay: Duration::from_millis(settings.live_transition_delay_ms),
            max_buffer_size: settings.max_buffer_size,
        }
    }
}

/// 데이터 구독자에게 전달되는 갱신.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayUpdate {
    pub session_id: Uuid,
    /// prefix의 마지막 `display_window`개
    pub points: Vec<Candle>,
    /// 현재까지 내보낸 prefix 길이
    pub prefix_len: usize,
    pub total: usize,
    /// `prefix_len / total`
    pub progress: f64,
    pub mode: ReplayMode,
}

/// 엔진 상태 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStatus {
    pub session_id: Uuid,
    pub mode: ReplayMode,
    pub cursor: usize,
    pub total: usize,
    pub speed: f64,
    pub progress: f64,
}

/// [`ReplayEngine::tick`] 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 틱이 필요 없는 모드
    Idle,
    /// 아직 다음 방출 시각이 아님
    Waiting,
    /// 커서 전진 (새 커서 값)
    Advanced(usize),
    /// 끝에 도달해 라이브 전환 시작
    ReachedEnd,
    /// 라이브 모드 진입
    WentLive,
    /// 끝에 도달해 정지
    Finished,
}

pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;
pub type SubscriberResult = std::result::Result<(), SubscriberError>;

type UpdateCallback = Box<dyn FnMut(&ReplayUpdate) -> SubscriberResult + Send>;
type MetricsCallback = Box<dyn FnMut(&ReplayMetrics) -> SubscriberResult + Send>;

/// 구독 식별자.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber<F> {
    id: SubscriptionId,
    callback: F,
    errors: usize,
}

/// 모든 구독자에게 값을 전달합니다. 실패한 구독자가 있어도 나머지는 계속 받습니다.
fn notify<T, F>(subscribers: &mut [Subscriber<F>], value: &T, kind: &'static str) -> usize
where
    F: FnMut(&T) -> SubscriberResult,
{
    let mut failures = 0;
    for sub in subscribers.iter_mut() {
        if let Err(e) = (sub.callback)(value) {
            sub.errors += 1;
            failures += 1;
            warn!(subscriber = sub.id.0, kind, error = %e, "구독자 처리 실패");
        }
    }
    failures
}

/// 마켓 리플레이 엔진.
pub struct ReplayEngine {
    config: ReplayConfig,
    series: Option<Series>,
    /// 내보낸 캔들 수 (`current_index = cursor - 1`)
    cursor: usize,
    mode: ReplayMode,
    speed: f64,
    session_id: Uuid,
    last_emit: Option<Instant>,
    transition_started: Option<Instant>,
    processed_points: usize,
    last_metrics_push: usize,
    error_count: usize,
    next_subscription: u64,
    subscribers: Vec<Subscriber<UpdateCallback>>,
    metrics_subscribers: Vec<Subscriber<MetricsCallback>>,
}

impl fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("session_id", &self.session_id)
            .field("mode", &self.mode)
            .field("cursor", &self.cursor)
            .field("total", &self.total())
            .field("speed", &self.speed)
            .field("subscribers", &self.subscribers.len())
            .field("metrics_subscribers", &self.metrics_subscribers.len())
            .finish()
    }
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new(ReplayConfig::default())
    }
}

impl ReplayEngine {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            series: None,
            cursor: 0,
            mode: ReplayMode::Stopped,
            speed: 1.0,
            session_id: Uuid::new_v4(),
            last_emit: None,
            transition_started: None,
            processed_points: 0,
            last_metrics_push: 0,
            error_count: 0,
            next_subscription: 0,
            subscribers: Vec::new(),
            metrics_subscribers: Vec::new(),
        }
    }

    // ==================== 조회 ====================

    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 마지막으로 내보낸 캔들의 인덱스.
    pub fn current_index(&self) -> Option<usize> {
        self.cursor.checked_sub(1)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn series(&self) -> Option<&Series> {
        self.series.as_ref()
    }

    pub fn total(&self) -> usize {
        self.series.as_ref().map_or(0, Series::len)
    }

    pub fn progress(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.cursor as f64 / total as f64,
        }
    }

    /// 프레임 타이머가 필요한 모드인지 확인합니다.
    pub fn is_ticking(&self) -> bool {
        matches!(
            self.mode,
            ReplayMode::Playing | ReplayMode::TransitioningToLive
        )
    }

    /// 현재 배속에서의 방출 간격.
    pub fn emit_interval(&self) -> Duration {
        self.config.base_interval.div_f64(self.speed)
    }

    pub fn status(&self) -> ReplayStatus {
        ReplayStatus {
            session_id: self.session_id,
            mode: self.mode,
            cursor: self.cursor,
            total: self.total(),
            speed: self.speed,
            progress: self.progress(),
        }
    }

    pub fn metrics(&self) -> ReplayMetrics {
        ReplayMetrics::compute(
            self.total(),
            self.processed_points,
            self.cursor,
            self.config.max_buffer_size,
            self.error_count,
        )
    }

    // ==================== 구독 ====================

    /// 데이터 갱신 구독.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ReplayUpdate) -> SubscriberResult + Send + 'static,
    {
        let id = self.allocate_id();
        self.subscribers.push(Subscriber {
            id,
            callback: Box::new(callback),
            errors: 0,
        });
        id
    }

    /// 지표 구독.
    pub fn subscribe_metrics<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ReplayMetrics) -> SubscriberResult + Send + 'static,
    {
        let id = self.allocate_id();
        self.metrics_subscribers.push(Subscriber {
            id,
            callback: Box::new(callback),
            errors: 0,
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len() + self.metrics_subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.metrics_subscribers.retain(|s| s.id != id);
        before != self.subscribers.len() + self.metrics_subscribers.len()
    }

    /// 구독자별 오류 수.
    pub fn subscriber_errors(&self, id: SubscriptionId) -> Option<usize> {
        self.subscribers
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.errors)
            .or_else(|| {
                self.metrics_subscribers
                    .iter()
                    .find(|s| s.id == id)
                    .map(|s| s.errors)
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len() + self.metrics_subscribers.len()
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        self.next_subscription += 1;
        SubscriptionId(self.next_subscription)
    }

    // ==================== 제어 ====================

    /// 시계열을 로드합니다. 재생 중이었다면 정지합니다.
    pub fn load(&mut self, series: Series) {
        self.stop();
        info!(points = series.len(), "리플레이 시계열 로드");
        self.series = Some(series);
        self.processed_points = 0;
        self.last_metrics_push = 0;
    }

    /// 재생을 시작하고 길이 1의 prefix를 내보냅니다.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        let total = self.series.as_ref().ok_or(ReplayError::NotLoaded)?.len();
        if total == 0 {
            return Err(ReplayError::EmptySeries);
        }

        self.session_id = Uuid::new_v4();
        self.mode = ReplayMode::Playing;
        self.cursor = 1;
        self.processed_points = 1;
        self.last_metrics_push = 0;
        self.last_emit = Some(now);
        self.transition_started = None;

        info!(session_id = %self.session_id, total, speed = self.speed, "리플레이 시작");
        self.emit();
        Ok(())
    }

    /// 프레임 콜백. 방출 간격이 지났으면 커서를 하나 전진합니다.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        match self.mode {
            ReplayMode::Playing => self.tick_playing(now),
            ReplayMode::TransitioningToLive => {
                let started = *self.transition_started.get_or_insert(now);
                if now.duration_since(started) >= self.config.live_transition_delay {
                    self.mode = ReplayMode::Live;
                    self.transition_started = None;
                    info!(session_id = %self.session_id, "라이브 모드 전환");
                    TickOutcome::WentLive
                } else {
                    TickOutcome::Waiting
                }
            }
            _ => TickOutcome::Idle,
        }
    }

    fn tick_playing(&mut self, now: Instant) -> TickOutcome {
        if self.cursor >= self.total() {
            return self.reach_end(now);
        }

        let due = self
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= self.emit_interval());
        if !due {
            return TickOutcome::Waiting;
        }

        self.cursor += 1;
        self.processed_points += 1;
        self.last_emit = Some(now);
        self.emit();

        if self.config.metrics_every > 0
            && self.processed_points - self.last_metrics_push >= self.config.metrics_every
        {
            self.last_metrics_push = self.processed_points;
            self.push_metrics();
        }

        TickOutcome::Advanced(self.cursor)
    }

    fn reach_end(&mut self, now: Instant) -> TickOutcome {
        self.last_emit = None;
        if self.config.auto_switch_to_live {
            self.mode = ReplayMode::TransitioningToLive;
            self.transition_started = Some(now);
            info!(session_id = %self.session_id, "리플레이 종료, 라이브 전환 대기");
            TickOutcome::ReachedEnd
        } else {
            self.mode = ReplayMode::Stopped;
            info!(session_id = %self.session_id, "리플레이 종료");
            TickOutcome::Finished
        }
    }

    /// `Playing → Paused`. 상태가 바뀌었으면 `true`.
    pub fn pause(&mut self) -> bool {
        if self.mode != ReplayMode::Playing {
            return false;
        }
        self.mode = ReplayMode::Paused;
        debug!(cursor = self.cursor, "리플레이 일시정지");
        true
    }

    /// `Paused → Playing`. 커서는 유지되고 다음 방출은 `now`부터 한 간격 뒤입니다.
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.mode != ReplayMode::Paused {
            return false;
        }
        self.mode = ReplayMode::Playing;
        self.last_emit = Some(now);
        debug!(cursor = self.cursor, "리플레이 재개");
        true
    }

    /// `target`에 가장 가까운 캔들로 이동하고 그 캔들까지의 prefix를 내보냅니다.
    ///
    /// 거리가 같으면 앞선 인덱스를 택하며, 모드는 바꾸지 않습니다.
    pub fn seek(&mut self, target: DateTime<Utc>) -> Result<usize> {
        let series = self.series.as_ref().ok_or(ReplayError::NotLoaded)?;
        let index = series
            .nearest_index(target)
            .ok_or(ReplayError::EmptySeries)?;

        self.cursor = index + 1;
        debug!(%target, index, "리플레이 탐색");
        self.emit();
        Ok(index)
    }

    /// 배속을 설정합니다. 허용 목록 밖의 값은 1배속으로 처리됩니다.
    pub fn set_speed(&mut self, multiplier: f64) -> f64 {
        if let Err(e) = self.try_set_speed(multiplier) {
            warn!(requested = multiplier, error = %e, "허용되지 않은 배속, 1배속 적용");
            self.speed = 1.0;
        }
        self.speed
    }

    /// 허용 목록 밖의 값이면 오류를 반환하는 [`set_speed`](Self::set_speed).
    pub fn try_set_speed(&mut self, multiplier: f64) -> Result<()> {
        let allowed = SPEED_ALLOW_LIST
            .iter()
            .any(|s| (s - multiplier).abs() < f64::EPSILON);
        if !allowed {
            return Err(ReplayError::InvalidConfiguration(format!(
                "speed {} is not one of {:?}",
                multiplier, SPEED_ALLOW_LIST
            )));
        }
        self.speed = multiplier;
        Ok(())
    }

    /// 재생을 멈추고 커서를 0으로 되돌립니다. 시계열과 구독자는 유지됩니다.
    pub fn stop(&mut self) {
        let was_running = self.mode != ReplayMode::Stopped || self.cursor != 0;
        self.mode = ReplayMode::Stopped;
        self.cursor = 0;
        self.last_emit = None;
        self.transition_started = None;
        if was_running {
            info!(session_id = %self.session_id, "리플레이 정지");
        }
    }

    /// 정지 후 구독자와 시계열을 모두 해제합니다.
    pub fn dispose(&mut self) {
        self.stop();
        self.subscribers.clear();
        self.metrics_subscribers.clear();
        self.series = None;
        self.processed_points = 0;
        self.last_metrics_push = 0;
        self.error_count = 0;
    }

    /// 라이브 모드에서 실시간 캔들을 병합하고 전체를 내보냅니다.
    pub fn append_live(&mut self, incoming: &Series) -> Result<usize> {
        if self.mode != ReplayMode::Live {
            return Err(ReplayError::NotLive(self.mode.to_string()));
        }
        let base = self.series.take().unwrap_or_default();
        let merged = merge(&base, incoming);
        self.cursor = merged.len();
        self.series = Some(merged);
        self.emit();
        Ok(self.cursor)
    }

    fn emit(&mut self) {
        let Some(series) = self.series.as_ref() else {
            return;
        };
        let prefix = series.prefix(self.cursor);
        let window_start = prefix.len().saturating_sub(self.config.display_window);
        let update = ReplayUpdate {
            session_id: self.session_id,
            points: prefix[window_start..].to_vec(),
            prefix_len: prefix.len(),
            total: series.len(),
            progress: self.progress(),
            mode: self.mode,
        };
        self.error_count += notify(&mut self.subscribers, &update, "data");
    }

    fn push_metrics(&mut self) {
        let metrics = self.metrics();
        self.error_count += notify(&mut self.metrics_subscribers, &metrics, "metrics");
    }
}
