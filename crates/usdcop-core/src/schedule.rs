//! 취소 가능한 예약 작업.
//!
//! 재귀 타이머 대신 [`ScheduledTask`] 핸들로 반복/자기 재예약 작업을 표현합니다.
//! 핸들을 `cancel()`하거나 drop하면 대기 중인 콜백은 더 이상 실행되지 않습니다.
//! tokio의 가상 시간(`start_paused`)으로 테스트할 수 있습니다.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 백그라운드에서 실행 중인 예약 작업 핸들.
#[derive(Debug)]
pub struct ScheduledTask {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// `period`마다 `f`를 실행합니다. 첫 실행은 `period` 이후입니다.
    pub fn spawn_repeating<F, Fut>(name: impl Into<String>, period: Duration, mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let child = token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
            debug!(task = %task_name, "Repeating task stopped");
        });

        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    /// 자기 재예약 one-shot 작업.
    ///
    /// 매 회차마다 `next_delay()`로 대기 시간을 다시 계산한 뒤 `f`를 실행합니다.
    pub fn spawn_rescheduling<D, F, Fut>(name: impl Into<String>, mut next_delay: D, mut f: F) -> Self
    where
        D: FnMut() -> Duration + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let child = token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            loop {
                let delay = next_delay();
                debug!(task = %task_name, delay_secs = delay.as_secs(), "Task scheduled");
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(delay) => f().await,
                }
            }
            debug!(task = %task_name, "Rescheduling task stopped");
        });

        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    /// 작업 이름.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 작업을 취소합니다. 여러 번 호출해도 안전합니다.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 취소 후 작업 종료까지 기다립니다.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// `now` 이후 다음 UTC 자정.
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now + ChronoDuration::days(1))
}

/// 다음 UTC 자정까지 남은 시간.
pub fn duration_until_next_utc_midnight(now: DateTime<Utc>) -> Duration {
    (next_utc_midnight(now) - now)
        .to_std()
        .unwrap_or(Duration::from_secs(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_next_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 23, 59, 30).unwrap();
        assert_eq!(
            next_utc_midnight(now),
            Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap()
        );
        assert_eq!(duration_until_next_utc_midnight(now), Duration::from_secs(30));

        let midnight = Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap();
        assert_eq!(
            next_utc_midnight(midnight),
            Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_task_fires_and_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = ScheduledTask::spawn_repeating("counter", Duration::from_secs(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_task_recomputes_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut delays = vec![Duration::from_secs(5), Duration::from_secs(100)].into_iter();
        let task = ScheduledTask::spawn_rescheduling(
            "sweep",
            move || delays.next().unwrap_or(Duration::from_secs(1000)),
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        task.shutdown().await;
    }
}
