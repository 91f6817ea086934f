//! Composition root.
//!
//! 설정 하나로 키 로테이션, 원격 게이트웨이, 과거 데이터 저장소, 정렬기를 조립합니다.
//! 모든 서비스는 여기서 한 번만 생성되어 `Arc`로 공유됩니다.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use usdcop_core::{AppConfig, ScheduledTask, SessionSpec, Timeframe};
use usdcop_data::{
    DataAligner, HistoricalStore, JsonFileKeyStore, KeyRotationService, MarketDataService,
    TwelveDataClient, UsageMonitor,
};

/// 조립된 서비스 묶음.
pub struct AppContext {
    pub config: AppConfig,
    pub session: SessionSpec,
    pub timeframe: Timeframe,
    pub keys: Arc<KeyRotationService>,
    pub monitor: Arc<UsageMonitor>,
    pub service: MarketDataService,
    reset_timer: ScheduledTask,
}

impl AppContext {
    /// tokio 런타임 안에서 호출해야 합니다 (키 리셋 타이머를 시작함).
    pub fn build(config: AppConfig) -> Result<Self> {
        let session = config
            .session
            .to_spec()
            .context("Invalid session configuration")?;
        let timeframe: Timeframe = config
            .twelvedata
            .interval
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        let persistence = Arc::new(JsonFileKeyStore::new(&config.key_rotation.state_path));
        let keys = Arc::new(KeyRotationService::from_config(
            &config.twelvedata,
            persistence,
        ));
        let reset_timer = keys.spawn_reset_timer();

        let monitor = Arc::new(UsageMonitor::new());
        let gateway = Arc::new(
            TwelveDataClient::new(&config.twelvedata, Arc::clone(&keys), monitor.clone())
                .context("Failed to create TwelveData client")?,
        );

        let store = Arc::new(
            HistoricalStore::from_config(&config.storage, session.clone())
                .context("Failed to create historical store")?,
        );
        let aligner = DataAligner::new(
            gateway.clone(),
            config.twelvedata.symbol.clone(),
            timeframe,
            &session,
        );
        let service = MarketDataService::new(store, aligner, gateway.clone(), &config.data);

        info!(
            keys = keys.key_count(),
            symbol = %config.twelvedata.symbol,
            %timeframe,
            endpoint = %config.storage.endpoint,
            "서비스 조립 완료"
        );

        Ok(Self {
            config,
            session,
            timeframe,
            keys,
            monitor,
            service,
            reset_timer,
        })
    }

    /// 백그라운드 작업을 정리합니다.
    pub async fn shutdown(self) {
        self.reset_timer.shutdown().await;
    }
}
