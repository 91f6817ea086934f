//! 원격 시세 게이트웨이.
//!
//! 정렬기와 서비스는 구체 클라이언트가 아닌 [`SeriesSource`]/[`QuoteSource`]에 의존합니다.

mod monitor;
mod twelvedata;

pub use monitor::{ApiCallRecord, ApiMonitor, KeyCallStats, UsageMonitor};
pub use twelvedata::TwelveDataClient;

use crate::error::Result;
use async_trait::async_trait;
use usdcop_core::{Candle, Series, Timeframe};

/// TwelveData `outputsize` 상한.
pub const TWELVEDATA_MAX_OUTPUTSIZE: usize = 5000;

/// 시계열 조회 소스.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    /// 최근 `count`개 캔들을 조회합니다.
    async fn fetch_series(&self, symbol: &str, timeframe: Timeframe, count: usize)
        -> Result<Series>;

    /// 요청당 최대 캔들 수.
    fn max_outputsize(&self) -> usize {
        TWELVEDATA_MAX_OUTPUTSIZE
    }
}

/// 최신 시세 조회 소스.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<Candle>;
}
