//! 리플레이 드라이버.
//!
//! 엔진을 소유하는 단일 tokio 태스크입니다. 모든 조작은 명령 큐를 거치므로
//! 엔진 상태는 한 곳에서만 변경됩니다. 재생 중에는 프레임 간격마다 `tick`을 호출합니다.

use crate::engine::{
    ReplayEngine, ReplayStatus, ReplayUpdate, SubscriberResult, SubscriptionId, TickOutcome,
};
use crate::error::{ReplayError, Result};
use crate::metrics::ReplayMetrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use usdcop_core::Series;

/// 명령 큐 용량.
const COMMAND_BUFFER: usize = 64;

type BoxedUpdateCallback = Box<dyn FnMut(&ReplayUpdate) -> SubscriberResult + Send>;
type BoxedMetricsCallback = Box<dyn FnMut(&ReplayMetrics) -> SubscriberResult + Send>;

enum Command {
    Load(Series, oneshot::Sender<()>),
    Start(oneshot::Sender<Result<()>>),
    Pause(oneshot::Sender<bool>),
    Resume(oneshot::Sender<bool>),
    Seek(DateTime<Utc>, oneshot::Sender<Result<usize>>),
    SetSpeed(f64, oneshot::Sender<f64>),
    TrySetSpeed(f64, oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    AppendLive(Series, oneshot::Sender<Result<usize>>),
    Subscribe(BoxedUpdateCallback, oneshot::Sender<SubscriptionId>),
    SubscribeMetrics(BoxedMetricsCallback, oneshot::Sender<SubscriptionId>),
    Unsubscribe(SubscriptionId, oneshot::Sender<bool>),
    Status(oneshot::Sender<ReplayStatus>),
    Metrics(oneshot::Sender<ReplayMetrics>),
}

/// 엔진을 구동하는 태스크.
pub struct ReplayDriver {
    engine: ReplayEngine,
    commands: mpsc::Receiver<Command>,
    frame_interval: Duration,
    shutdown: CancellationToken,
}

impl ReplayDriver {
    /// 드라이버 태스크를 시작하고 핸들을 반환합니다.
    pub fn spawn(engine: ReplayEngine, frame_interval: Duration) -> ReplayHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let shutdown = CancellationToken::new();
        let driver = Self {
            engine,
            commands: rx,
            frame_interval: frame_interval.max(Duration::from_millis(1)),
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(driver.run());

        ReplayHandle {
            commands: tx,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn run(mut self) {
        let mut frames = tokio::time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(frame_ms = self.frame_interval.as_millis() as u64, "리플레이 드라이버 시작");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },

                _ = frames.tick(), if self.engine.is_ticking() => {
                    match self.engine.tick(Instant::now()) {
                        TickOutcome::Finished | TickOutcome::WentLive => {
                            debug!(mode = %self.engine.mode(), "프레임 타이머 정지");
                        }
                        _ => {}
                    }
                }
            }
        }

        self.engine.dispose();
        info!("리플레이 드라이버 종료");
    }

    fn handle(&mut self, command: Command) {
        // 응답 채널이 닫혀 있어도 명령은 적용됨
        match command {
            Command::Load(series, reply) => {
                self.engine.load(series);
                let _ = reply.send(());
            }
            Command::Start(reply) => {
                let _ = reply.send(self.engine.start(Instant::now()));
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.engine.pause());
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.engine.resume(Instant::now()));
            }
            Command::Seek(target, reply) => {
                let _ = reply.send(self.engine.seek(target));
            }
            Command::SetSpeed(multiplier, reply) => {
                let _ = reply.send(self.engine.set_speed(multiplier));
            }
            Command::TrySetSpeed(multiplier, reply) => {
                let _ = reply.send(self.engine.try_set_speed(multiplier));
            }
            Command::Stop(reply) => {
                self.engine.stop();
                let _ = reply.send(());
            }
            Command::AppendLive(series, reply) => {
                let _ = reply.send(self.engine.append_live(&series));
            }
            Command::Subscribe(callback, reply) => {
                let _ = reply.send(self.engine.subscribe(callback));
            }
            Command::SubscribeMetrics(callback, reply) => {
                let _ = reply.send(self.engine.subscribe_metrics(callback));
            }
            Command::Unsubscribe(id, reply) => {
                let _ = reply.send(self.engine.unsubscribe(id));
            }
            Command::Status(reply) => {
                let _ = reply.send(self.engine.status());
            }
            Command::Metrics(reply) => {
                let _ = reply.send(self.engine.metrics());
            }
        }
    }
}

/// 드라이버 태스크에 명령을 보내는 핸들.
#[derive(Clone)]
pub struct ReplayHandle {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ReplayHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| ReplayError::DriverClosed)?;
        rx.await.map_err(|_| ReplayError::DriverClosed)
    }

    pub async fn load(&self, series: Series) -> Result<()> {
        self.request(|tx| Command::Load(series, tx)).await
    }

    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await?
    }

    pub async fn pause(&self) -> Result<bool> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<bool> {
        self.request(Command::Resume).await
    }

    pub async fn seek(&self, target: DateTime<Utc>) -> Result<usize> {
        self.request(|tx| Command::Seek(target, tx)).await?
    }

    pub async fn set_speed(&self, multiplier: f64) -> Result<f64> {
        self.request(|tx| Command::SetSpeed(multiplier, tx)).await
    }

    pub async fn try_set_speed(&self, multiplier: f64) -> Result<()> {
        self.request(|tx| Command::TrySetSpeed(multiplier, tx)).await?
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    pub async fn append_live(&self, series: Series) -> Result<usize> {
        self.request(|tx| Command::AppendLive(series, tx)).await?
    }

    pub async fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: FnMut(&ReplayUpdate) -> SubscriberResult + Send + 'static,
    {
        self.request(|tx| Command::Subscribe(Box::new(callback), tx))
            .await
    }

    pub async fn subscribe_metrics<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: FnMut(&ReplayMetrics) -> SubscriberResult + Send + 'static,
    {
        self.request(|tx| Command::SubscribeMetrics(Box::new(callback), tx))
            .await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        self.request(|tx| Command::Unsubscribe(id, tx)).await
    }

    pub async fn status(&self) -> Result<ReplayStatus> {
        self.request(Command::Status).await
    }

    pub async fn metrics(&self) -> Result<ReplayMetrics> {
        self.request(Command::Metrics).await
    }

    /// 드라이버를 종료하고 태스크가 끝날 때까지 기다립니다. 여러 번 호출해도 안전합니다.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
