//! 시장 데이터 서비스.
//!
//! 저장소 조회, 갭 채우기, 병합을 묶고 결과를 짧게 캐시합니다.
//! 호스트의 composition root에서 한 번 생성해 `Arc`로 공유합니다.

use crate::aligner::DataAligner;
use crate::error::Result;
use crate::gateway::QuoteSource;
use crate::store::{HistoricalStore, QuerySpec};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};
use usdcop_core::{Candle, CandleSource, DataServiceConfig, Series};

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    stored_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }

    fn fresh(&self, ttl: Duration) -> Option<T> {
        self.is_fresh(ttl).then(|| self.value.clone())
    }
}

/// 만료된 항목을 버린 뒤 `value`를 저장합니다.
fn store_evicting<K, T>(cache: &Mutex<HashMap<K, Cached<T>>>, key: K, value: T, ttl: Duration)
where
    K: Eq + std::hash::Hash,
    T: Clone,
{
    let mut entries = cache.lock().unwrap_or_else(PoisonError::into_inner);
    entries.retain(|_, cached| cached.is_fresh(ttl));
    entries.insert(
        key,
        Cached {
            value,
            stored_at: Instant::now(),
        },
    );
}

/// 병합된 시계열과 최신 시세를 제공하는 서비스.
pub struct MarketDataService {
    store: Arc<HistoricalStore>,
    aligner: DataAligner,
    quotes: Arc<dyn QuoteSource>,
    series_ttl: Duration,
    quote_ttl: Duration,
    series_cache: Mutex<HashMap<QuerySpec, Cached<Series>>>,
    quote_cache: Mutex<HashMap<String, Cached<Candle>>>,
}

impl MarketDataService {
    pub fn new(
        store: Arc<HistoricalStore>,
        aligner: DataAligner,
        quotes: Arc<dyn QuoteSource>,
        config: &DataServiceConfig,
    ) -> Self {
        Self {
            store,
            aligner,
            quotes,
            series_ttl: Duration::from_secs(config.series_cache_ttl_secs),
            quote_ttl: Duration::from_secs(config.quote_cache_ttl_secs),
            series_cache: Mutex::new(HashMap::new()),
            quote_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &HistoricalStore {
        &self.store
    }

    /// 저장소 조회 → 갭 채우기 → 병합.
    ///
    /// 조회 종료일이 `now`(UTC 기준 날짜)보다 이전이면 갭 채우기를 하지 않습니다.
    /// 어느 단계가 실패해도 오류 대신 가능한 만큼의 시리즈를 반환합니다.
    #[instrument(skip(self), fields(market = %spec.market, timeframe = %spec.timeframe))]
    pub async fn get_series(&self, spec: &QuerySpec, now: DateTime<Utc>) -> Series {
        if let Some(series) = self
            .series_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(spec)
            .and_then(|c| c.fresh(self.series_ttl))
        {
            debug!(points = series.len(), "시계열 캐시 적중");
            return series;
        }

        let historical = self.store.query_or_empty(spec).await;
        let series = if spec.end >= now.date_naive() && spec.timeframe == self.aligner.timeframe() {
            self.aligner.align_with_gap_fill(&historical, now).await
        } else {
            historical
        };

        store_evicting(&self.series_cache, spec.clone(), series.clone(), self.series_ttl);
        series
    }

    /// 최신 시세. 캐시에서 나온 값은 [`CandleSource::Cache`]로 태깅됩니다.
    pub async fn latest_quote(&self, symbol: &str) -> Result<Candle> {
        if let Some(candle) = self
            .quote_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .and_then(|c| c.fresh(self.quote_ttl))
        {
            return Ok(candle.with_source(CandleSource::Cache));
        }

        let candle = self.quotes.fetch_quote(symbol).await?;
        store_evicting(&self.quote_cache, symbol.to_string(), candle.clone(), self.quote_ttl);
        Ok(candle)
    }

    /// 모든 캐시를 비웁니다.
    pub fn invalidate(&self) {
        self.series_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.quote_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataError;
    use crate::gateway::SeriesSource;
    use crate::store::ObjectStore;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use usdcop_core::{SessionSpec, StorageConfig, Timeframe};

    struct DownStore;

    #[async_trait]
    impl ObjectStore for DownStore {
        async fn list(&self, _bucket: &str, _prefix: &str) -> Result<Vec<String>> {
            Err(DataError::Network("connection refused".into()))
        }

        async fn get(&self, _bucket: &str, _key: &str) -> Result<Vec<u8>> {
            Err(DataError::Network("connection refused".into()))
        }
    }

    #[derive(Default)]
    struct CountingRemote {
        series_calls: AtomicUsize,
        quote_calls: AtomicUsize,
    }

    fn quote_candle() -> Candle {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap();
        Candle::new(ts, dec!(4000), dec!(4005), dec!(3995), dec!(4001), Decimal::ZERO, CandleSource::RemoteApi)
            .unwrap()
    }

    #[async_trait]
    impl SeriesSource for CountingRemote {
        async fn fetch_series(&self, _symbol: &str, _tf: Timeframe, _count: usize) -> Result<Series> {
            self.series_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Series::from_candles(vec![quote_candle()]))
        }
    }

    #[async_trait]
    impl QuoteSource for CountingRemote {
        async fn fetch_quote(&self, _symbol: &str) -> Result<Candle> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            Ok(quote_candle())
        }
    }

    fn service(remote: Arc<CountingRemote>) -> MarketDataService {
        let session = SessionSpec::usdcop();
        let store = HistoricalStore::new(Arc::new(DownStore), None, &StorageConfig::default(), session.clone());
        let aligner = DataAligner::new(remote.clone(), "USD/COP", Timeframe::M5, &session);
        MarketDataService::new(Arc::new(store), aligner, remote, &DataServiceConfig::default())
    }

    fn today_spec() -> QuerySpec {
        let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        QuerySpec::new("usdcop", Timeframe::M5, d, d)
    }

    #[tokio::test(start_paused = true)]
    async fn test_series_store_down_fills_from_remote_and_caches() {
        let remote = Arc::new(CountingRemote::default());
        let svc = service(remote.clone());
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap();

        let first = svc.get_series(&today_spec(), now).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first.first().unwrap().source, CandleSource::RealTime);

        let second = svc.get_series(&today_spec(), now).await;
        assert_eq!(first, second);
        assert_eq!(remote.series_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        svc.get_series(&today_spec(), now).await;
        assert_eq!(remote.series_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_range_skips_gap_fill() {
        let remote = Arc::new(CountingRemote::default());
        let svc = service(remote.clone());
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 15, 0, 0).unwrap();

        assert!(svc.get_series(&today_spec(), now).await.is_empty());
        assert_eq!(remote.series_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quote_cache_tags_cached_hits() {
        let remote = Arc::new(CountingRemote::default());
        let svc = service(remote.clone());

        let fresh = svc.latest_quote("USD/COP").await.unwrap();
        assert_eq!(fresh.source, CandleSource::RemoteApi);

        let cached = svc.latest_quote("USD/COP").await.unwrap();
        assert_eq!(cached.source, CandleSource::Cache);
        assert_eq!(cached.close, fresh.close);
        assert_eq!(remote.quote_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        let refetched = svc.latest_quote("USD/COP").await.unwrap();
        assert_eq!(refetched.source, CandleSource::RemoteApi);
        assert_eq!(remote.quote_calls.load(Ordering::SeqCst), 2);

        svc.invalidate();
        svc.latest_quote("USD/COP").await.unwrap();
        assert_eq!(remote.quote_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_evicted_on_insert() {
        let remote = Arc::new(CountingRemote::default());
        let svc = service(remote);
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 15, 0, 0).unwrap();
        let march = today_spec();
        let d = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        let next_day = QuerySpec::new("usdcop", Timeframe::M5, d, d);

        svc.get_series(&march, now).await;
        svc.latest_quote("USD/COP").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        svc.get_series(&next_day, now).await;
        svc.latest_quote("USD/EUR").await.unwrap();

        let series = svc.series_cache.lock().unwrap();
        assert_eq!(series.len(), 1);
        assert!(series.contains_key(&next_day));
        let quotes = svc.quote_cache.lock().unwrap();
        assert_eq!(quotes.len(), 1);
        assert!(quotes.contains_key("USD/EUR"));
    }
}
