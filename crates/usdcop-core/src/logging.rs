//! 로깅 초기화.
//!
//! 로그는 stderr로 보냅니다. stdout은 리플레이 갱신과 JSON 출력 전용입니다.
//! `RUST_LOG`가 설정되어 있으면 설정 파일의 레벨보다 우선합니다.

use crate::config::LoggingConfig;
use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::io::IsTerminal;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 여러 줄, 사람이 읽는 형식
    #[default]
    Pretty,
    /// 한 줄 JSON (로그 수집기용)
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(CoreError::InvalidConfiguration(format!(
                "log format must be pretty, json or compact (got {other:?})"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
            Self::Compact => "compact",
        };
        f.write_str(s)
    }
}

/// 로깅 설정.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 필터 지시문 (예: `info`, `usdcop_data=debug,usdcop_replay=trace`)
    pub level: String,
    pub format: LogFormat,
    /// span 생성/종료 이벤트 기록 (게이트웨이·저장소 호출 지연 확인용)
    pub with_span_events: bool,
    /// 소스 위치 포함
    pub with_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file: false,
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// `RUST_LOG`, `LOG_FORMAT` 환경 변수로 구성합니다. 알 수 없는 형식은 pretty.
    pub fn from_env() -> Self {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let format = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        Self::new(level).with_format(format)
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = CoreError;

    fn try_from(config: &LoggingConfig) -> CoreResult<Self> {
        Ok(Self::new(config.level.clone()).with_format(config.format.parse()?))
    }
}

/// 전역 subscriber를 설치합니다. 두 번째 호출은 오류입니다.
///
/// ```no_run
/// use usdcop_core::logging::{init_logging, LogConfig, LogFormat};
///
/// init_logging(LogConfig::new("usdcop_replay=debug").with_format(LogFormat::Json))?;
/// # Ok::<(), usdcop_core::CoreError>(())
/// ```
pub fn init_logging(config: LogConfig) -> CoreResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            CoreError::InvalidConfiguration(format!("log level {:?}: {}", config.level, e))
        })?,
    };

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_span_events(span_events);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Json => base.json().with_current_span(true).boxed(),
        LogFormat::Compact => base.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| CoreError::InvalidConfiguration(format!("logging already initialized: {e}")))?;

    tracing::debug!(format = %config.format, level = %config.level, "로깅 초기화");
    Ok(())
}

/// [`LogConfig::from_env`]로 초기화합니다.
pub fn init_logging_from_env() -> CoreResult<()> {
    init_logging(LogConfig::from_env())
}
