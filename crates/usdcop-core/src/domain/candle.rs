//! OHLCV 캔들 타입.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 캔들의 출처 태그.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandleSource {
    /// 과거 데이터 저장소 (오브젝트 스토어 / 조회 API)
    #[default]
    HistoricalStore,
    /// 원격 시세 API 응답
    RemoteApi,
    /// 로컬 캐시
    Cache,
    /// 실시간 병합 데이터
    RealTime,
}

impl fmt::Display for CandleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandleSource::HistoricalStore => "historical-store",
            CandleSource::RemoteApi => "remote-api",
            CandleSource::Cache => "cache",
            CandleSource::RealTime => "real-time",
        };
        f.write_str(s)
    }
}

/// OHLCV 캔들.
///
/// 생성 후에는 불변이며, 병합 시 [`Candle::with_source`]로 출처만 다시 태깅됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 시작 시각 (시계열 내 고유 키)
    pub timestamp: DateTime<Utc>,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량 (알 수 없으면 0)
    #[serde(default)]
    pub volume: Decimal,
    /// 출처
    #[serde(default)]
    pub source: CandleSource,
}

impl Candle {
    /// 가격 불변 조건을 검증하며 새 캔들을 생성합니다.
    ///
    /// - 모든 가격은 양수
    /// - `low ≤ open, close ≤ high`
    /// - 거래량은 음수가 아님
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        source: CandleSource,
    ) -> CoreResult<Self> {
        let candle = Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            source,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// OHLCV 불변 조건을 검사합니다.
    pub fn validate(&self) -> CoreResult<()> {
        if [self.open, self.high, self.low, self.close]
            .iter()
            .any(|p| *p <= Decimal::ZERO)
        {
            return Err(CoreError::InvalidCandle(format!(
                "non-positive price at {}",
                self.timestamp
            )));
        }
        if self.volume.is_sign_negative() && !self.volume.is_zero() {
            return Err(CoreError::InvalidCandle(format!(
                "negative volume at {}",
                self.timestamp
            )));
        }
        let body_high = self.open.max(self.close);
        let body_low = self.open.min(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(CoreError::InvalidCandle(format!(
                "low {} / high {} do not bracket open {} close {} at {}",
                self.low, self.high, self.open, self.close, self.timestamp
            )));
        }
        Ok(())
    }

    /// 출처만 바꾼 사본을 반환합니다.
    pub fn with_source(mut self, source: CandleSource) -> Self {
        self.source = source;
        self
    }

    /// 고가 - 저가.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    /// 몸통 크기(절대값).
    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// 양봉 여부.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_candle_valid() {
        let c = Candle::new(
            ts(),
            dec!(4000),
            dec!(4010),
            dec!(3995),
            dec!(4005),
            dec!(0),
            CandleSource::RemoteApi,
        )
        .unwrap();

        assert!(c.is_bullish());
        assert_eq!(c.range(), dec!(15));
        assert_eq!(c.body_size(), dec!(5));
    }

    #[test]
    fn test_candle_rejects_unbracketed_prices() {
        let err = Candle::new(
            ts(),
            dec!(4000),
            dec!(3999),
            dec!(3990),
            dec!(3995),
            dec!(0),
            CandleSource::RemoteApi,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCandle(_)));
    }

    #[test]
    fn test_candle_rejects_non_positive_price() {
        let result = Candle::new(
            ts(),
            dec!(0),
            dec!(1),
            dec!(0),
            dec!(1),
            dec!(0),
            CandleSource::Cache,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_source_serde() {
        assert_eq!(
            serde_json::to_string(&CandleSource::RealTime).unwrap(),
            "\"real-time\""
        );
        assert_eq!(CandleSource::HistoricalStore.to_string(), "historical-store");
    }
}
