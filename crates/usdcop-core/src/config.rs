//! 설정 관리.
//!
//! 기본값 → TOML 파일 → 환경 변수(`USDCOP__SECTION__KEY`) 순으로 병합됩니다.

use crate::calendar::SessionSpec;
use crate::error::CoreResult;
use crate::types::Layer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// TwelveData 원격 API 설정
    pub twelvedata: TwelveDataConfig,
    /// 과거 데이터 저장소 설정
    pub storage: StorageConfig,
    /// 마켓 리플레이 설정
    pub replay: ReplaySettings,
    /// 거래 세션 설정
    pub session: SessionConfig,
    /// API 키 로테이션 설정
    pub key_rotation: KeyRotationConfig,
    /// 시장 데이터 서비스 캐시 설정
    pub data: DataServiceConfig,
    /// 로깅 설정
    pub logging: LoggingConfig,
}

/// TwelveData API 설정.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TwelveDataConfig {
    /// REST API 기본 URL
    pub base_url: String,
    /// 조회 심볼
    pub symbol: String,
    /// 기본 간격 (TwelveData 형식)
    pub interval: String,
    /// 응답 datetime 해석에 쓰이는 타임존
    pub timezone: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 키당 일일 호출 한도
    pub daily_limit: u32,
    /// 요청당 최대 캔들 수
    pub max_outputsize: usize,
    /// 기본 API 키
    pub keys: Vec<String>,
    /// 예비 API 키 (기본 키가 모두 소진되었을 때 사용)
    pub backup_keys: Vec<String>,
}

impl Default for TwelveDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twelvedata.com".to_string(),
            symbol: "USD/COP".to_string(),
            interval: "5min".to_string(),
            timezone: "America/Bogota".to_string(),
            timeout_secs: 10,
            daily_limit: 800,
            max_outputsize: 5000,
            keys: Vec::new(),
            backup_keys: Vec::new(),
        }
    }
}

impl fmt::Debug for TwelveDataConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwelveDataConfig")
            .field("base_url", &self.base_url)
            .field("symbol", &self.symbol)
            .field("interval", &self.interval)
            .field("timezone", &self.timezone)
            .field("timeout_secs", &self.timeout_secs)
            .field("daily_limit", &self.daily_limit)
            .field("max_outputsize", &self.max_outputsize)
            .field("keys", &format!("[{} redacted]", self.keys.len()))
            .field("backup_keys", &format!("[{} redacted]", self.backup_keys.len()))
            .finish()
    }
}

/// 과거 데이터 저장소 설정 (S3 호환 오브젝트 스토어 + 조회 API).
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 오브젝트 스토어 엔드포인트
    pub endpoint: String,
    /// 서명용 리전
    pub region: String,
    /// 액세스 키
    pub access_key: String,
    /// 시크릿 키
    pub secret_key: String,
    /// 오브젝트 스토어 실패 시 사용할 조회 API URL
    pub query_api_url: Option<String>,
    /// 파티션 market 값
    pub market: String,
    /// 파티션 source 값
    pub source: String,
    /// 레이어별 버킷 재정의 (예: `L0 = "my-raw-bucket"`)
    pub buckets: HashMap<String, String>,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: String::new(),
            query_api_url: None,
            market: "usdcop".to_string(),
            source: "twelvedata".to_string(),
            buckets: HashMap::new(),
            timeout_secs: 30,
        }
    }
}

impl StorageConfig {
    /// 레이어에 대응하는 버킷 이름 (재정의 우선).
    pub fn bucket_for(&self, layer: Layer) -> String {
        self.buckets
            .get(&layer.to_string())
            .cloned()
            .unwrap_or_else(|| layer.default_bucket().to_string())
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[redacted]")
            .field("query_api_url", &self.query_api_url)
            .field("market", &self.market)
            .field("source", &self.source)
            .field("buckets", &self.buckets)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// 마켓 리플레이 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// 1배속에서 캔들 하나를 내보내는 간격 (밀리초)
    pub base_interval_ms: u64,
    /// 프레임 콜백 간격 (밀리초)
    pub frame_interval_ms: u64,
    /// 구독자에게 전달하는 최대 캔들 수
    pub display_window: usize,
    /// 메트릭 푸시 주기 (처리된 캔들 수)
    pub metrics_every: usize,
    /// 끝에 도달하면 라이브 모드로 전환
    pub auto_switch_to_live: bool,
    /// 라이브 전환 대기 시간 (밀리초)
    pub live_transition_delay_ms: u64,
    /// 버퍼 사용률 계산 기준 크기
    pub max_buffer_size: usize,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            base_interval_ms: 1000,
            frame_interval_ms: 16,
            display_window: 100,
            metrics_every: 100,
            auto_switch_to_live: true,
            live_transition_delay_ms: 2000,
            max_buffer_size: 10_000,
        }
    }
}

/// 거래 세션 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// ISO 요일 (월=1 .. 일=7)
    pub weekdays: Vec<u8>,
    /// 시작 시각 (HH:MM)
    pub start: String,
    /// 종료 시각 (HH:MM)
    pub end: String,
    /// IANA 타임존
    pub timezone: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            weekdays: vec![1, 2, 3, 4, 5],
            start: "08:00".to_string(),
            end: "12:55".to_string(),
            timezone: "America/Bogota".to_string(),
        }
    }
}

impl SessionConfig {
    /// 검증된 세션 스펙으로 변환합니다.
    pub fn to_spec(&self) -> CoreResult<SessionSpec> {
        SessionSpec::parse(&self.weekdays, &self.start, &self.end, &self.timezone)
    }
}

/// API 키 로테이션 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeyRotationConfig {
    /// 사용량 스냅샷 파일 경로
    pub state_path: String,
}

impl Default for KeyRotationConfig {
    fn default() -> Self {
        Self {
            state_path: "data/api_key_state.json".to_string(),
        }
    }
}

/// 시장 데이터 서비스 캐시 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataServiceConfig {
    /// 병합된 시계열 캐시 TTL (초)
    pub series_cache_ttl_secs: u64,
    /// 최신 시세 캐시 TTL (초)
    pub quote_cache_ttl_secs: u64,
}

impl Default for DataServiceConfig {
    fn default() -> Self {
        Self {
            series_cache_ttl_secs: 60,
            quote_cache_ttl_secs: 5,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        Self::build(config::File::from(path.as_ref()))
    }

    /// 기본 경로(`config/default.toml`)에서 설정을 로드합니다. 파일이 없으면 기본값을 사용합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::build(config::File::with_name("config/default").required(false))
    }

    fn build<S>(file: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("USDCOP")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("twelvedata.keys")
                    .with_list_parse_key("twelvedata.backup_keys")
                    .with_list_parse_key("session.weekdays")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
