//! 과거/실시간 데이터 병합 및 갭 채우기.
//!
//! 병합은 타임스탬프 키 맵 위에서 last-write-wins로 동작하며 충돌을 알리지 않습니다.

use crate::gateway::SeriesSource;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use usdcop_core::{Candle, CandleSource, Series, SessionSpec, Timeframe};

/// 과거 시리즈에 `incoming`을 덮어씁니다.
///
/// `incoming`의 모든 캔들은 [`CandleSource::RealTime`]으로 다시 태깅됩니다.
/// 같은 타임스탬프가 양쪽에 있으면 `incoming`이 이깁니다.
pub fn merge(historical: &Series, incoming: &Series) -> Series {
    let mut by_time: BTreeMap<DateTime<Utc>, Candle> = historical
        .iter()
        .map(|c| (c.timestamp, c.clone()))
        .collect();

    for candle in incoming.iter() {
        by_time.insert(
            candle.timestamp,
            candle.clone().with_source(CandleSource::RealTime),
        );
    }

    Series::from_candles(by_time.into_values())
}

/// 마지막 과거 캔들 이후의 공백 일수 (올림). `now ≤ last`면 0.
pub fn gap_days(last: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    if now <= last {
        return 0;
    }
    let secs = (now - last).num_seconds().max(0) as u64;
    secs.div_ceil(86_400).max(1)
}

/// 원격 소스로 과거 데이터의 끝부분을 채우는 정렬기.
pub struct DataAligner {
    source: Arc<dyn SeriesSource>,
    symbol: String,
    timeframe: Timeframe,
    bars_per_day: usize,
}

impl DataAligner {
    pub fn new(
        source: Arc<dyn SeriesSource>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        session: &SessionSpec,
    ) -> Self {
        Self {
            source,
            symbol: symbol.into(),
            timeframe,
            bars_per_day: session.bars_per_day(timeframe),
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// 공백을 덮는 데 필요한 요청 캔들 수 (API 상한 적용).
    ///
    /// 과거 데이터가 없으면 상한만큼 요청합니다.
    pub fn points_needed(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> usize {
        let cap = self.source.max_outputsize();
        match last {
            Some(last) => {
                let days = gap_days(last, now) as usize;
                days.saturating_mul(self.bars_per_day).min(cap)
            }
            None => cap,
        }
    }

    /// 마지막 과거 캔들 이후를 원격 소스로 채워 병합합니다.
    ///
    /// 원격 호출이 실패하면 로그를 남기고 `historical`을 그대로 반환합니다.
    pub async fn align_with_gap_fill(&self, historical: &Series, now: DateTime<Utc>) -> Series {
        let last = historical.last().map(|c| c.timestamp);
        let count = self.points_needed(last, now);
        if count == 0 {
            debug!(symbol = %self.symbol, "공백 없음, 갭 채우기 생략");
            return historical.clone();
        }

        let fetched = match self
            .source
            .fetch_series(&self.symbol, self.timeframe, count)
            .await
        {
            Ok(series) => series,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "갭 채우기 실패, 과거 데이터만 사용");
                return historical.clone();
            }
        };

        info!(
            symbol = %self.symbol,
            requested = count,
            received = fetched.len(),
            "갭 채우기 완료"
        );
        merge(historical, &fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DataError, Result};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    fn candle(ts: DateTime<Utc>, close: Decimal, source: CandleSource) -> Candle {
        Candle::new(ts, close, close, close, close, Decimal::ZERO, source).unwrap()
    }

    /// 요청 수를 기록하는 고정 응답 소스.
    struct FixedSource {
        response: Result<Series>,
        requested: Mutex<Vec<usize>>,
        cap: usize,
    }

    impl FixedSource {
        fn ok(series: Series) -> Self {
            Self {
                response: Ok(series),
                requested: Mutex::new(Vec::new()),
                cap: 5000,
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(DataError::Timeout("10s".into())),
                requested: Mutex::new(Vec::new()),
                cap: 5000,
            }
        }
    }

    #[async_trait]
    impl SeriesSource for FixedSource {
        async fn fetch_series(&self, _symbol: &str, _tf: Timeframe, count: usize) -> Result<Series> {
            self.requested.lock().unwrap().push(count);
            match &self.response {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(DataError::Timeout("10s".into())),
            }
        }

        fn max_outputsize(&self) -> usize {
            self.cap
        }
    }

    #[test]
    fn test_merge_overwrites_and_appends() {
        let historical = Series::from_candles(vec![
            candle(at(14, 0), dec!(4000), CandleSource::HistoricalStore),
            candle(at(14, 5), dec!(4010), CandleSource::HistoricalStore),
        ]);
        let incoming = Series::from_candles(vec![
            candle(at(14, 5), dec!(4012), CandleSource::RealTime),
            candle(at(14, 10), dec!(4015), CandleSource::RemoteApi),
        ]);

        let merged = merge(&historical, &incoming);
        let closes: Vec<Decimal> = merged.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![dec!(4000), dec!(4012), dec!(4015)]);
        assert_eq!(merged.get(0).unwrap().source, CandleSource::HistoricalStore);
        assert_eq!(merged.get(1).unwrap().source, CandleSource::RealTime);
        assert_eq!(merged.get(2).unwrap().source, CandleSource::RealTime);
    }

    #[test]
    fn test_gap_days() {
        let last = at(17, 55);
        assert_eq!(gap_days(last, last), 0);
        assert_eq!(gap_days(last, last - Duration::hours(1)), 0);
        assert_eq!(gap_days(last, last + Duration::minutes(5)), 1);
        assert_eq!(gap_days(last, last + Duration::days(1)), 1);
        assert_eq!(gap_days(last, last + Duration::days(1) + Duration::seconds(1)), 2);
    }

    #[test]
    fn test_points_needed_capped() {
        let source = Arc::new(FixedSource::ok(Series::empty()));
        let aligner = DataAligner::new(source, "USD/COP", Timeframe::M5, &SessionSpec::usdcop());
        let last = at(17, 55);

        assert_eq!(aligner.points_needed(Some(last), last), 0);
        assert_eq!(aligner.points_needed(Some(last), last + Duration::days(3)), 180);
        assert_eq!(aligner.points_needed(Some(last), last + Duration::days(365)), 5000);
        assert_eq!(aligner.points_needed(None, last), 5000);
    }

    #[tokio::test]
    async fn test_gap_fill_remote_overrides_overlap() {
        let historical = Series::from_candles(vec![
            candle(at(14, 0), dec!(4000), CandleSource::HistoricalStore),
            candle(at(14, 5), dec!(4010), CandleSource::HistoricalStore),
        ]);
        let remote = Series::from_candles(vec![
            candle(at(14, 5), dec!(4012), CandleSource::RemoteApi),
            candle(at(14, 10), dec!(4015), CandleSource::RemoteApi),
        ]);
        let source = Arc::new(FixedSource::ok(remote.clone()));
        let aligner =
            DataAligner::new(source.clone(), "USD/COP", Timeframe::M5, &SessionSpec::usdcop());

        let aligned = aligner.align_with_gap_fill(&historical, at(15, 0)).await;
        assert_eq!(aligned, merge(&historical, &remote));
        assert_eq!(aligned.len(), 3);
        let overlap = aligned.get(1).unwrap();
        assert_eq!(overlap.close, dec!(4012));
        assert_eq!(overlap.source, CandleSource::RealTime);
        assert_eq!(aligned.get(0).unwrap().source, CandleSource::HistoricalStore);
        assert_eq!(*source.requested.lock().unwrap(), vec![60]);
    }

    #[tokio::test]
    async fn test_gap_fill_failure_returns_historical() {
        let historical =
            Series::from_candles(vec![candle(at(14, 0), dec!(4000), CandleSource::HistoricalStore)]);
        let aligner = DataAligner::new(
            Arc::new(FixedSource::failing()),
            "USD/COP",
            Timeframe::M5,
            &SessionSpec::usdcop(),
        );

        let result = aligner.align_with_gap_fill(&historical, at(16, 0)).await;
        assert_eq!(result, historical);
    }

    #[tokio::test]
    async fn test_gap_fill_without_history_requests_cap() {
        let source = Arc::new(FixedSource::ok(Series::from_candles(vec![candle(
            at(14, 0),
            dec!(4000),
            CandleSource::RemoteApi,
        )])));
        let aligner =
            DataAligner::new(source.clone(), "USD/COP", Timeframe::M5, &SessionSpec::usdcop());

        let result = aligner.align_with_gap_fill(&Series::empty(), at(16, 0)).await;
        assert_eq!(result.len(), 1);
        assert_eq!(*source.requested.lock().unwrap(), vec![5000]);
    }

    fn arb_series() -> impl Strategy<Value = Series> {
        prop::collection::vec((0i64..200, 1u32..10_000), 0..60).prop_map(|points| {
            Series::from_candles(points.into_iter().map(|(minute, close)| {
                candle(
                    at(13, 0) + Duration::minutes(minute * 5),
                    Decimal::from(close),
                    CandleSource::HistoricalStore,
                )
            }))
        })
    }

    proptest! {
        #[test]
        fn prop_merge_one_candle_per_timestamp(a in arb_series(), b in arb_series()) {
            let merged = merge(&a, &b);
            let ts = merged.timestamps();
            prop_assert!(ts.windows(2).all(|w| w[0] < w[1]));

            let mut expected: Vec<DateTime<Utc>> =
                a.timestamps().into_iter().chain(b.timestamps()).collect();
            expected.sort();
            expected.dedup();
            prop_assert_eq!(ts, expected);
        }

        #[test]
        fn prop_merge_incoming_wins(a in arb_series(), b in arb_series()) {
            let merged = merge(&a, &b);
            for c in b.iter() {
                let idx = merged.nearest_index(c.timestamp).unwrap();
                let m = merged.get(idx).unwrap();
                prop_assert_eq!(m.timestamp, c.timestamp);
                prop_assert_eq!(m.close, c.close);
                prop_assert_eq!(m.source, CandleSource::RealTime);
            }
        }

        #[test]
        fn prop_merge_with_empty_is_identity(a in arb_series()) {
            prop_assert_eq!(merge(&a, &Series::empty()), a);
        }
    }
}
