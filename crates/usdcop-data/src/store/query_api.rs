//! 과거 데이터 조회 API 클라이언트 (오브젝트 스토어 fallback).

use super::{QuerySpec, StoredCandle};
use crate::error::{DataError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};
use usdcop_core::Candle;

/// 조회 API 응답 메타데이터.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryApiMeta {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub historical: usize,
    #[serde(default)]
    pub realtime: usize,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

/// `{data, meta}` 또는 `{success: false}`.
#[derive(Debug, Deserialize)]
struct QueryApiResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    data: Option<Vec<StoredCandle>>,
    #[serde(default)]
    meta: Option<QueryApiMeta>,
    #[serde(default)]
    error: Option<String>,
}

/// 과거 데이터 조회 API.
#[derive(Debug, Clone)]
pub struct StoreQueryApi {
    client: reqwest::Client,
    url: String,
}

impl StoreQueryApi {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// 범위 내 캔들 레코드를 조회합니다 (중복 제거 전).
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch(&self, spec: &QuerySpec, source: &str) -> Result<Vec<Candle>> {
        let params = [
            ("market", spec.market.clone()),
            ("timeframe", spec.timeframe.partition_name().to_string()),
            ("startDate", spec.start.to_string()),
            ("endDate", spec.end.to_string()),
            ("source", source.to_string()),
            ("layer", spec.layer.to_string()),
        ];

        let response = self.client.get(&self.url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DataError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryApiResponse = serde_json::from_str(&body)?;
        if parsed.success == Some(false) {
            return Err(DataError::DataUnavailable(
                parsed
                    .error
                    .unwrap_or_else(|| "query api reported success=false".to_string()),
            ));
        }
        let data = parsed.data.ok_or_else(|| {
            DataError::Parse("query api response has no data field".to_string())
        })?;

        if let Some(meta) = &parsed.meta {
            debug!(
                total = meta.total,
                historical = meta.historical,
                realtime = meta.realtime,
                "조회 API 응답"
            );
        }

        Ok(super::into_candles(data))
    }
}
