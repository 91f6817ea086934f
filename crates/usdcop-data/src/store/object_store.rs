//! S3 호환 오브젝트 스토어 접근.
//!
//! MinIO 등 S3 호환 스토어에 path-style로 접근합니다.

use crate::error::{DataError, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    Client,
};
use std::time::Duration;
use tracing::debug;
use usdcop_core::StorageConfig;

/// 오브젝트 스토어 포트.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `prefix` 아래의 모든 오브젝트 키를 나열합니다.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// 오브젝트 본문을 읽습니다.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// `aws-sdk-s3` 기반 클라이언트 (ListObjectsV2 + GetObject).
///
/// 실패 시 폴백은 호출자가 결정하므로 SDK 재시도는 끕니다.
pub struct S3ObjectStore {
    client: Client,
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3ObjectStore {
    /// 저장소 설정으로 생성합니다.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let endpoint = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            DataError::InvalidConfiguration(format!("invalid storage endpoint: {}", e))
        })?;
        if endpoint.host_str().is_none() {
            return Err(DataError::InvalidConfiguration(format!(
                "storage endpoint has no host: {}",
                config.endpoint
            )));
        }
        let endpoint = config.endpoint.trim_end_matches('/').to_string();

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "usdcop-storage",
        );
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let s3_cfg = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .force_path_style(true)
            .endpoint_url(endpoint.clone())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_cfg),
            endpoint,
            region: config.region.clone(),
        })
    }
}

/// SDK 오류를 변환합니다. 연결 실패는 `Network`/`Timeout`, 그 외는 S3 오류 코드를 담은 `ObjectStore`.
fn sdk_error<E, R>(op: &str, target: &str, err: SdkError<E, R>) -> DataError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::DispatchFailure(_) => {
            return DataError::Network(format!("{} {}: {}", op, target, DisplayErrorContext(&err)))
        }
        SdkError::TimeoutError(_) => {
            return DataError::Timeout(format!("{} {}: {}", op, target, DisplayErrorContext(&err)))
        }
        _ => {}
    }

    let detail = match err.code() {
        Some(code) => match err.message() {
            Some(message) => format!("{}: {}", code, message),
            None => code.to_string(),
        },
        None => DisplayErrorContext(&err).to_string(),
    };
    DataError::ObjectStore(format!("{} {}: {}", op, target, detail))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(t) = token.take() {
                request = request.continuation_token(t);
            }
            let page = request
                .send()
                .await
                .map_err(|e| sdk_error("ListObjectsV2", bucket, e))?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            token = page.next_continuation_token().map(str::to_string);
            if !page.is_truncated().unwrap_or(false) || token.is_none() {
                break;
            }
        }

        debug!(bucket, prefix, count = keys.len(), "오브젝트 목록 조회");
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("GetObject", key, e))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| DataError::ObjectStore(format!("GetObject {}: {}", key, e)))?;
        Ok(body.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_endpoint() {
        assert!(S3ObjectStore::new(&StorageConfig {
            endpoint: "not a url".to_string(),
            ..StorageConfig::default()
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_debug_hides_credentials() {
        let store = S3ObjectStore::new(&StorageConfig {
            endpoint: "http://localhost:9000/".to_string(),
            secret_key: "super-secret".to_string(),
            ..StorageConfig::default()
        })
        .unwrap();
        let rendered = format!("{:?}", store);
        assert!(rendered.contains("http://localhost:9000"));
        assert!(!rendered.contains("super-secret"));
    }
}
