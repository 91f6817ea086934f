//! 과거 데이터 저장소 리더.
//!
//! 오브젝트 스토어 파티션을 먼저 읽고, 실패하면 조회 API로 전환합니다.
//! 두 경로 모두 실패하면 [`DataError::DataUnavailable`]이며, 대체 캔들은 만들지 않습니다.
//!
//! 파티션 경로:
//! `market={m}/timeframe={tf}/source={s}/date={d}/run_id={id}/*.json`

mod object_store;
mod quality;
mod query_api;

pub use object_store::{ObjectStore, S3ObjectStore};
pub use quality::{assess_quality, Gap, QualityReport};
pub use query_api::{QueryApiMeta, StoreQueryApi};

use crate::error::{DataError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use usdcop_core::{Candle, CandleSource, Layer, Series, SessionSpec, StorageConfig, Timeframe};

/// 과거 데이터 조회 조건.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySpec {
    /// 파티션 market 값 (예: `usdcop`)
    pub market: String,
    pub timeframe: Timeframe,
    /// 파티션 source 값 (`None`이면 저장소 기본값)
    pub source: Option<String>,
    /// 시작일 (포함)
    pub start: NaiveDate,
    /// 종료일 (포함)
    pub end: NaiveDate,
    pub layer: Layer,
}

impl QuerySpec {
    pub fn new(market: impl Into<String>, timeframe: Timeframe, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            market: market.into(),
            timeframe,
            source: None,
            start,
            end,
            layer: Layer::L0,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    /// 범위 내 날짜 (시작일과 종료일 포함).
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }

    /// 날짜 파티션 접두사.
    pub fn partition_prefix(&self, source: &str, date: NaiveDate) -> String {
        format!(
            "market={}/timeframe={}/source={}/date={}/",
            self.market,
            self.timeframe.partition_name(),
            source,
            date
        )
    }

    fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(DataError::InvalidConfiguration(format!(
                "start date {} is after end date {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// 저장소 캔들 레코드.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StoredCandle {
    #[serde(alias = "time", alias = "datetime")]
    timestamp: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    #[serde(default)]
    volume: Option<Decimal>,
}

/// 레코드를 캔들로 변환합니다. 불변 조건을 어기는 레코드는 건너뜁니다.
pub(crate) fn into_candles(records: Vec<StoredCandle>) -> Vec<Candle> {
    records
        .into_iter()
        .filter_map(|r| {
            Candle::new(
                r.timestamp,
                r.open,
                r.high,
                r.low,
                r.close,
                r.volume.unwrap_or(Decimal::ZERO),
                CandleSource::HistoricalStore,
            )
            .map_err(|e| warn!(timestamp = %r.timestamp, error = %e, "잘못된 저장소 레코드 건너뜀"))
            .ok()
        })
        .collect()
}

/// 과거 데이터 저장소.
pub struct HistoricalStore {
    objects: Arc<dyn ObjectStore>,
    query_api: Option<StoreQueryApi>,
    buckets: HashMap<Layer, String>,
    default_source: String,
    session: SessionSpec,
}

impl HistoricalStore {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        query_api: Option<StoreQueryApi>,
        config: &StorageConfig,
        session: SessionSpec,
    ) -> Self {
        let buckets = Layer::all()
            .into_iter()
            .map(|layer| (layer, config.bucket_for(layer)))
            .collect();
        Self {
            objects,
            query_api,
            buckets,
            default_source: config.source.clone(),
            session,
        }
    }

    /// 설정으로 S3 스토어와 조회 API를 구성합니다.
    pub fn from_config(config: &StorageConfig, session: SessionSpec) -> Result<Self> {
        let objects = Arc::new(S3ObjectStore::new(config)?);
        let query_api = config
            .query_api_url
            .as_deref()
            .map(|url| StoreQueryApi::new(url, Duration::from_secs(config.timeout_secs)))
            .transpose()?;
        Ok(Self::new(objects, query_api, config, session))
    }

    fn bucket(&self, layer: Layer) -> &str {
        self.buckets
            .get(&layer)
            .map(String::as_str)
            .unwrap_or_else(|| layer.default_bucket())
    }

    /// 범위 내 캔들을 조회합니다 (정렬 및 중복 제거).
    #[instrument(skip(self), fields(market = %spec.market, timeframe = %spec.timeframe, layer = %spec.layer))]
    pub async fn query(&self, spec: &QuerySpec) -> Result<Series> {
        let records = self.load_records(spec).await?;
        let series = Series::from_candles(records);
        info!(points = series.len(), "과거 데이터 조회 완료");
        Ok(series)
    }

    /// [`query`](Self::query)와 같지만 실패 시 로그를 남기고 빈 시리즈를 반환합니다.
    pub async fn query_or_empty(&self, spec: &QuerySpec) -> Series {
        match self.query(spec).await {
            Ok(series) => series,
            Err(e) => {
                warn!(error = %e, "과거 데이터 없음, 빈 시리즈 반환");
                Series::empty()
            }
        }
    }

    /// 데이터 품질 진단.
    #[instrument(skip(self), fields(market = %spec.market, timeframe = %spec.timeframe))]
    pub async fn validate_quality(&self, spec: &QuerySpec) -> Result<QualityReport> {
        let records = self.load_records(spec).await?;
        Ok(assess_quality(&records, spec, &self.session))
    }

    /// 중복 제거 전 레코드를 읽습니다.
    async fn load_records(&self, spec: &QuerySpec) -> Result<Vec<Candle>> {
        spec.validate()?;
        let source = spec.source.as_deref().unwrap_or(&self.default_source);

        let object_err = match self.read_partitions(spec, source).await {
            Ok(records) => return Ok(records),
            Err(e) => e,
        };

        let Some(api) = &self.query_api else {
            warn!(error = %object_err, "오브젝트 스토어 실패, 조회 API 미설정");
            return Err(DataError::DataUnavailable(object_err.to_string()));
        };

        warn!(error = %object_err, "오브젝트 스토어 실패, 조회 API로 전환");
        api.fetch(spec, source).await.map_err(|api_err| {
            DataError::DataUnavailable(format!(
                "object store: {}; query api: {}",
                object_err, api_err
            ))
        })
    }

    /// 날짜별로 최신 run_id 파티션만 읽습니다.
    async fn read_partitions(&self, spec: &QuerySpec, source: &str) -> Result<Vec<Candle>> {
        let bucket = self.bucket(spec.layer);
        let mut records = Vec::new();

        for date in spec.dates() {
            let prefix = spec.partition_prefix(source, date);
            let keys = self.objects.list(bucket, &prefix).await?;

            let Some(run_id) = latest_run_id(&keys, &prefix) else {
                debug!(%date, "파티션 없음");
                continue;
            };
            let run_prefix = format!("{}run_id={}/", prefix, run_id);

            let run_keys: Vec<&String> = keys
                .iter()
                .filter(|k| k.starts_with(&run_prefix) && k.ends_with(".json"))
                .collect();
            let bodies =
                try_join_all(run_keys.iter().map(|key| self.objects.get(bucket, key))).await?;

            for (key, body) in run_keys.into_iter().zip(bodies) {
                let stored: Vec<StoredCandle> = serde_json::from_slice(&body)
                    .map_err(|e| DataError::Parse(format!("{}: {}", key, e)))?;
                records.extend(into_candles(stored));
            }
            debug!(%date, run_id, total = records.len(), "파티션 읽기 완료");
        }

        Ok(records)
    }
}

/// 접두사 바로 아래 `run_id=` 세그먼트 중 사전순 최대값.
fn latest_run_id<'a>(keys: &'a [String], prefix: &str) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| k.strip_prefix(prefix))
        .filter_map(|rest| rest.strip_prefix("run_id="))
        .filter_map(|rest| rest.split('/').next())
        .filter(|id| !id.is_empty())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// 메모리 오브젝트 스토어.
    #[derive(Default)]
    struct MemoryStore {
        objects: HashMap<(String, String), Vec<u8>>,
        fail: bool,
        gets: Mutex<Vec<String>>,
    }

    impl MemoryStore {
        fn put(&mut self, bucket: &str, key: &str, body: &str) {
            self.objects
                .insert((bucket.to_string(), key.to_string()), body.as_bytes().to_vec());
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
            if self.fail {
                return Err(DataError::Network("connection refused".into()));
            }
            let mut keys: Vec<String> = self
                .objects
                .keys()
                .filter(|(b, k)| b == bucket && k.starts_with(prefix))
                .map(|(_, k)| k.clone())
                .collect();
            keys.sort();
            Ok(keys)
        }

        async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
            self.gets.lock().unwrap().push(key.to_string());
            self.objects
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| DataError::ObjectStore(format!("NoSuchKey {}", key)))
        }
    }

    const BUCKET: &str = "00-raw-usdcop-marketdata";
    const PREFIX: &str = "market=usdcop/timeframe=5m/source=twelvedata/date=2024-03-05/";

    fn record(ts: &str, close: &str) -> String {
        format!(
            r#"{{"timestamp":"{ts}","open":"{close}","high":"{close}","low":"{close}","close":"{close}"}}"#
        )
    }

    fn spec() -> QuerySpec {
        let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        QuerySpec::new("usdcop", Timeframe::M5, d, d)
    }

    fn store(objects: MemoryStore) -> HistoricalStore {
        HistoricalStore::new(Arc::new(objects), None, &StorageConfig::default(), SessionSpec::usdcop())
    }

    #[test]
    fn test_latest_run_id() {
        let keys = vec![
            format!("{PREFIX}run_id=20240305T120000/part-0.json"),
            format!("{PREFIX}run_id=20240305T180000/part-0.json"),
            format!("{PREFIX}_SUCCESS"),
        ];
        assert_eq!(latest_run_id(&keys, PREFIX), Some("20240305T180000"));
        assert_eq!(latest_run_id(&[], PREFIX), None);
    }

    #[test]
    fn test_dates_inclusive() {
        let spec = QuerySpec::new(
            "usdcop",
            Timeframe::M5,
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
        );
        assert_eq!(spec.dates().count(), 3);
        assert_eq!(
            spec.partition_prefix("twelvedata", spec.start),
            "market=usdcop/timeframe=5m/source=twelvedata/date=2024-03-04/"
        );
    }

    #[tokio::test]
    async fn test_query_reads_only_latest_run() {
        let mut objects = MemoryStore::default();
        objects.put(
            BUCKET,
            &format!("{PREFIX}run_id=1/part-0.json"),
            &format!("[{}]", record("2024-03-05T13:00:00Z", "3990")),
        );
        objects.put(
            BUCKET,
            &format!("{PREFIX}run_id=2/part-0.json"),
            &format!(
                "[{},{}]",
                record("2024-03-05T13:05:00Z", "4010"),
                record("2024-03-05T13:00:00Z", "4000")
            ),
        );

        let series = store(objects).query(&spec()).await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(
            series.first().unwrap().timestamp,
            Utc.with_ymd_and_hms(2024, 3, 5, 13, 0, 0).unwrap()
        );
        assert_eq!(series.first().unwrap().close.to_string(), "4000");
        assert!(series.iter().all(|c| c.source == CandleSource::HistoricalStore));
    }

    #[tokio::test]
    async fn test_invalid_records_skipped() {
        let mut objects = MemoryStore::default();
        objects.put(
            BUCKET,
            &format!("{PREFIX}run_id=1/part-0.json"),
            r#"[{"timestamp":"2024-03-05T13:00:00Z","open":"4000","high":"3900","low":"4100","close":"4000"},
                {"time":"2024-03-05T13:05:00Z","open":"4000","high":"4010","low":"3995","close":"4005","volume":"12"}]"#,
        );

        let series = store(objects).query(&spec()).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.first().unwrap().volume.to_string(), "12");
    }

    #[tokio::test]
    async fn test_connection_failure_without_fallback_is_unavailable() {
        let objects = MemoryStore {
            fail: true,
            ..MemoryStore::default()
        };
        let store = store(objects);

        let err = store.query(&spec()).await.unwrap_err();
        assert!(matches!(err, DataError::DataUnavailable(_)));
        assert!(store.query_or_empty(&spec()).await.is_empty());
    }

    #[tokio::test]
    async fn test_inverted_range_rejected() {
        let spec = QuerySpec::new(
            "usdcop",
            Timeframe::M5,
            NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        );
        let err = store(MemoryStore::default()).query(&spec).await.unwrap_err();
        assert!(matches!(err, DataError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_layer_selects_bucket() {
        let mut objects = MemoryStore::default();
        objects.put(
            "05-l5-ds-usdcop-serving",
            &format!("{PREFIX}run_id=1/part-0.json"),
            &format!("[{}]", record("2024-03-05T13:00:00Z", "4000")),
        );
        let store = store(objects);

        assert!(store.query(&spec()).await.unwrap().is_empty());
        let l5 = store.query(&spec().with_layer(Layer::L5)).await.unwrap();
        assert_eq!(l5.len(), 1);
    }
}
