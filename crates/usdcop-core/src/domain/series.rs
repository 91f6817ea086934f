//! 시간순으로 정렬된 캔들 시계열.

use super::candle::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 타임스탬프 오름차순, 중복 없는 캔들 시계열.
///
/// 생성자는 모두 정렬과 중복 제거(나중 값 우선)를 거치므로
/// `Series` 값은 항상 엄격한 오름차순을 유지합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Series(Vec<Candle>);

impl Series {
    /// 빈 시계열.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// 임의 순서의 캔들로 시계열을 생성합니다.
    ///
    /// 같은 타임스탬프가 여러 번 나오면 마지막 캔들이 남습니다.
    pub fn from_candles(candles: impl IntoIterator<Item = Candle>) -> Self {
        let mut by_time: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
        for candle in candles {
            by_time.insert(candle.timestamp, candle);
        }
        Self(by_time.into_values().collect())
    }

    /// 캔들 수.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.0.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.0.get(index)
    }

    pub fn first(&self) -> Option<&Candle> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.0.last()
    }

    pub fn into_vec(self) -> Vec<Candle> {
        self.0
    }

    /// 앞에서부터 `len`개 (길이를 넘으면 전체).
    pub fn prefix(&self, len: usize) -> &[Candle] {
        &self.0[..len.min(self.0.len())]
    }

    /// 타임스탬프 목록.
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.0.iter().map(|c| c.timestamp).collect()
    }

    /// `[start, end]` 구간의 캔들.
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[Candle] {
        let lo = self.0.partition_point(|c| c.timestamp < start);
        let hi = self.0.partition_point(|c| c.timestamp <= end);
        if lo >= hi {
            return &[];
        }
        &self.0[lo..hi]
    }

    /// `target`과 시간 차이가 가장 작은 캔들의 인덱스.
    ///
    /// 이진 탐색을 사용하며, 거리가 같으면 앞쪽 인덱스를 반환합니다.
    pub fn nearest_index(&self, target: DateTime<Utc>) -> Option<usize> {
        if self.0.is_empty() {
            return None;
        }
        let i = self.0.partition_point(|c| c.timestamp < target);
        if i == 0 {
            return Some(0);
        }
        if i == self.0.len() {
            return Some(i - 1);
        }
        let before = (target - self.0[i - 1].timestamp).abs();
        let after = (self.0[i].timestamp - target).abs();
        if before <= after {
            Some(i - 1)
        } else {
            Some(i)
        }
    }
}

/// 역직렬화는 각 캔들을 검증하고 정렬/중복 제거 불변 조건을 복원합니다.
impl<'de> Deserialize<'de> for Series {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let candles = Vec::<Candle>::deserialize(deserializer)?;
        for candle in &candles {
            candle.validate().map_err(serde::de::Error::custom)?;
        }
        Ok(Series::from_candles(candles))
    }
}

impl FromIterator<Candle> for Series {
    fn from_iter<T: IntoIterator<Item = Candle>>(iter: T) -> Self {
        Series::from_candles(iter)
    }
}

impl<'a> IntoIterator for &'a Series {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Series {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CandleSource;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn candle(minute: i64, close: i64) -> Candle {
        let base = Utc.with_ymd_and_hms(2024, 3, 5, 13, 0, 0).unwrap();
        let px = Decimal::from(close);
        Candle {
            timestamp: base + Duration::minutes(minute),
            open: px,
            high: px,
            low: px,
            close: px,
            volume: Decimal::ZERO,
            source: CandleSource::HistoricalStore,
        }
    }

    #[test]
    fn test_from_candles_sorts_and_dedups_last_wins() {
        let series = Series::from_candles(vec![candle(10, 3), candle(0, 1), candle(10, 4)]);

        assert_eq!(series.len(), 2);
        assert_eq!(series.first().unwrap().close, Decimal::from(1));
        assert_eq!(series.last().unwrap().close, Decimal::from(4));
    }

    #[test]
    fn test_nearest_index_ties_favor_earlier() {
        let series = Series::from_candles(vec![candle(0, 1), candle(10, 2), candle(20, 3)]);
        let base = series.first().unwrap().timestamp;

        assert_eq!(series.nearest_index(base + Duration::minutes(5)), Some(0));
        assert_eq!(series.nearest_index(base + Duration::minutes(6)), Some(1));
        assert_eq!(series.nearest_index(base - Duration::hours(1)), Some(0));
        assert_eq!(series.nearest_index(base + Duration::hours(1)), Some(2));
        assert_eq!(Series::empty().nearest_index(base), None);
    }

    #[test]
    fn test_between_is_inclusive() {
        let series = Series::from_candles((0..6).map(|i| candle(i * 5, i)));
        let base = series.first().unwrap().timestamp;

        let window = series.between(base + Duration::minutes(5), base + Duration::minutes(15));
        assert_eq!(window.len(), 3);
        assert!(series
            .between(base + Duration::hours(2), base + Duration::hours(3))
            .is_empty());
    }

    #[test]
    fn test_deserialize_restores_invariant() {
        let json = serde_json::to_string(&vec![candle(5, 2), candle(0, 1), candle(5, 9)]).unwrap();
        let series: Series = serde_json::from_str(&json).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.last().unwrap().close, Decimal::from(9));
    }

    #[test]
    fn test_deserialize_rejects_invalid_candle() {
        let mut broken = candle(0, 10);
        broken.low = Decimal::from(12);
        let json = serde_json::to_string(&vec![candle(5, 2), broken]).unwrap();

        let err = serde_json::from_str::<Series>(&json).unwrap_err();
        assert!(err.to_string().contains("do not bracket"));
    }

    proptest! {
        #[test]
        fn prop_series_strictly_increasing(minutes in proptest::collection::vec(0i64..500, 0..200)) {
            let series = Series::from_candles(minutes.iter().map(|m| candle(*m, 1)));
            for pair in series.as_slice().windows(2) {
                prop_assert!(pair[0].timestamp < pair[1].timestamp);
            }
        }

        #[test]
        fn prop_nearest_index_matches_linear_scan(
            minutes in proptest::collection::vec(0i64..1000, 1..100),
            target in -50i64..1100,
        ) {
            let series = Series::from_candles(minutes.iter().map(|m| candle(*m, 1)));
            let base = Utc.with_ymd_and_hms(2024, 3, 5, 13, 0, 0).unwrap();
            let t = base + Duration::minutes(target);

            let mut best = 0usize;
            let mut best_diff = (series.as_slice()[0].timestamp - t).abs();
            for (i, c) in series.iter().enumerate() {
                let diff = (c.timestamp - t).abs();
                if diff < best_diff {
                    best = i;
                    best_diff = diff;
                }
            }
            prop_assert_eq!(series.nearest_index(t), Some(best));
        }
    }
}
