//! TwelveData REST 클라이언트.
//!
//! 모든 호출은 키 로테이션 서비스에서 키를 대여하고, 응답 해석까지 끝난 최종 결과를
//! `(key_id, endpoint, success, latency)`로 모니터에 보고합니다.
//! 내부 재시도는 없습니다. 재시도 정책은 호출자의 몫입니다.

use super::monitor::{ApiCallRecord, ApiMonitor};
use super::{QuoteSource, SeriesSource, TWELVEDATA_MAX_OUTPUTSIZE};
use crate::error::{DataError, Result};
use crate::rotation::{KeyLease, KeyRotationService};
use async_trait::async_trait;
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use usdcop_core::{Candle, CandleSource, Series, Timeframe, TwelveDataConfig};

/// TwelveData 시계열 응답.
#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(default)]
    values: Vec<TdValue>,
}

/// 시계열 값 한 건. 숫자는 문자열로 전달됩니다.
#[derive(Debug, Deserialize)]
struct TdValue {
    datetime: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    #[serde(default)]
    volume: Option<Decimal>,
}

/// `/quote` 응답.
#[derive(Debug, Deserialize)]
struct TdQuote {
    datetime: String,
    #[serde(default)]
    timestamp: Option<i64>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    #[serde(default)]
    volume: Option<Decimal>,
}

/// TwelveData 에러 본문.
#[derive(Debug, Deserialize)]
struct TdError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

/// TwelveData 클라이언트.
pub struct TwelveDataClient {
    client: reqwest::Client,
    base_url: String,
    timezone: Tz,
    quote_interval: Timeframe,
    max_outputsize: usize,
    keys: Arc<KeyRotationService>,
    monitor: Arc<dyn ApiMonitor>,
}

impl TwelveDataClient {
    /// 설정으로 클라이언트를 생성합니다.
    pub fn new(
        config: &TwelveDataConfig,
        keys: Arc<KeyRotationService>,
        monitor: Arc<dyn ApiMonitor>,
    ) -> Result<Self> {
        let timezone: Tz = config.timezone.parse().map_err(|_| {
            DataError::InvalidConfiguration(format!("unknown timezone: {}", config.timezone))
        })?;
        let quote_interval: Timeframe = config
            .interval
            .parse()
            .map_err(DataError::InvalidConfiguration)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DataError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timezone,
            quote_interval,
            max_outputsize: config.max_outputsize.clamp(1, TWELVEDATA_MAX_OUTPUTSIZE),
            keys,
            monitor,
        })
    }

    /// 키를 대여해 GET 요청을 보내고, 본문을 `decode`로 해석한 최종 결과를 모니터에 보고합니다.
    ///
    /// 2xx 응답이라도 해석에 실패하면 `Upstream { status, body }`로 실패하며 실패로 기록됩니다.
    async fn call<T>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        decode: impl FnOnce(serde_json::Value) -> Result<T>,
    ) -> Result<T> {
        let lease = self.keys.next_key()?;
        let started = Instant::now();
        let result = match self.send(endpoint, params, &lease).await {
            Ok((status, body)) => decode_payload(endpoint, status, body, decode),
            Err(e) => Err(e),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = match &result {
            Ok(_) => Some(200),
            Err(DataError::Upstream { status, .. }) => Some(*status),
            Err(_) => None,
        };
        self.monitor.record(ApiCallRecord {
            key_id: lease.key_id.clone(),
            endpoint: endpoint.to_string(),
            success: result.is_ok(),
            latency_ms,
            status,
            timestamp: Utc::now(),
        });

        if matches!(status, Some(401) | Some(403)) {
            self.keys.mark_failed(&lease.key_id);
        }

        result
    }

    /// 요청을 보내고 2xx 응답의 `(status, body)`를 반환합니다.
    async fn send(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        lease: &KeyLease,
    ) -> Result<(u16, String)> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("apikey", lease.secret.expose_secret())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DataError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok((status.as_u16(), body))
    }

    /// TwelveData datetime(요청 타임존 기준)을 UTC로 변환합니다.
    fn parse_datetime(&self, s: &str) -> Result<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(|d| d.and_time(NaiveTime::MIN))
            })
            .map_err(|e| DataError::Parse(format!("invalid datetime {}: {}", s, e)))?;

        match self.timezone.from_local_datetime(&naive) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => Ok(t.with_timezone(&Utc)),
            LocalResult::None => Err(DataError::Parse(format!(
                "datetime {} does not exist in {}",
                s, self.timezone
            ))),
        }
    }

    /// 시계열 값들을 캔들로 변환합니다. 시각이나 OHLC가 잘못된 행은 경고 후 건너뜁니다.
    fn to_series(&self, values: Vec<TdValue>) -> Series {
        let candles = values.into_iter().filter_map(|v| {
            let candle = self.parse_datetime(&v.datetime).and_then(|timestamp| {
                Candle::new(
                    timestamp,
                    v.open,
                    v.high,
                    v.low,
                    v.close,
                    v.volume.unwrap_or(Decimal::ZERO),
                    CandleSource::RemoteApi,
                )
                .map_err(DataError::from)
            });
            match candle {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(datetime = %v.datetime, error = %e, "잘못된 캔들 건너뜀");
                    None
                }
            }
        });
        Series::from_candles(candles)
    }
}

/// 2xx 본문을 해석합니다. `status:"error"` 본문과 해석 실패 모두 `Upstream`입니다.
fn decode_payload<T>(
    endpoint: &str,
    status: u16,
    body: String,
    decode: impl FnOnce(serde_json::Value) -> Result<T>,
) -> Result<T> {
    let value: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(endpoint, error = %e, "JSON이 아닌 응답");
            return Err(DataError::Upstream { status, body });
        }
    };

    if value.get("status").and_then(|s| s.as_str()) == Some("error") {
        let err: TdError = serde_json::from_value(value).unwrap_or(TdError {
            code: None,
            message: None,
        });
        return Err(DataError::Upstream {
            status: err.code.unwrap_or(status),
            body: err.message.unwrap_or(body),
        });
    }

    decode(value).map_err(|e| {
        warn!(endpoint, error = %e, "응답 형식 오류");
        DataError::Upstream { status, body }
    })
}

#[async_trait]
impl SeriesSource for TwelveDataClient {
    #[instrument(skip(self), fields(endpoint = "time_series"))]
    async fn fetch_series(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Series> {
        if count == 0 {
            return Ok(Series::empty());
        }
        let outputsize = count.min(self.max_outputsize);

        let params = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.to_twelvedata_interval().to_string()),
            ("outputsize", outputsize.to_string()),
            ("timezone", self.timezone.name().to_string()),
            ("format", "JSON".to_string()),
        ];
        let series = self
            .call("time_series", &params, |value| {
                let response: TimeSeriesResponse = serde_json::from_value(value)?;
                Ok(self.to_series(response.values))
            })
            .await?;
        debug!(symbol, requested = outputsize, received = series.len(), "시계열 조회 완료");
        Ok(series)
    }

    fn max_outputsize(&self) -> usize {
        self.max_outputsize
    }
}

#[async_trait]
impl QuoteSource for TwelveDataClient {
    #[instrument(skip(self), fields(endpoint = "quote"))]
    async fn fetch_quote(&self, symbol: &str) -> Result<Candle> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", self.quote_interval.to_twelvedata_interval().to_string()),
            ("timezone", self.timezone.name().to_string()),
            ("format", "JSON".to_string()),
        ];
        self.call("quote", &params, |value| {
            let quote: TdQuote = serde_json::from_value(value)?;
            let timestamp = match quote.timestamp.and_then(|ts| DateTime::from_timestamp(ts, 0)) {
                Some(t) => t,
                None => self.parse_datetime(&quote.datetime)?,
            };
            let candle = Candle::new(
                timestamp,
                quote.open,
                quote.high,
                quote.low,
                quote.close,
                quote.volume.unwrap_or(Decimal::ZERO),
                CandleSource::RemoteApi,
            )?;
            Ok(candle)
        })
        .await
    }
}
