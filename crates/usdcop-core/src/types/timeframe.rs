//! 캔들 타임프레임 정의.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 캔들 타임프레임.
///
/// 직렬화 형식은 저장소 파티션 이름(`5m`, `1h`, ...)과 동일합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1분봉
    #[serde(rename = "1m")]
    M1,
    /// 5분봉
    #[serde(rename = "5m")]
    M5,
    /// 15분봉
    #[serde(rename = "15m")]
    M15,
    /// 30분봉
    #[serde(rename = "30m")]
    M30,
    /// 1시간봉
    #[serde(rename = "1h")]
    H1,
    /// 4시간봉
    #[serde(rename = "4h")]
    H4,
    /// 일봉
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// 이 타임프레임의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    /// 초 단위 값.
    pub fn as_secs(&self) -> u64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    /// chrono Duration으로 변환합니다.
    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.as_secs() as i64)
    }

    /// 분봉/시간봉인지 확인합니다.
    pub fn is_intraday(&self) -> bool {
        !matches!(self, Timeframe::D1)
    }

    /// TwelveData `interval` 파라미터 문자열.
    pub fn to_twelvedata_interval(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1min",
            Timeframe::M5 => "5min",
            Timeframe::M15 => "15min",
            Timeframe::M30 => "30min",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1day",
        }
    }

    /// 저장소 파티션 경로에 쓰이는 이름 (`timeframe=5m`).
    pub fn partition_name(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.partition_name())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    /// 파티션 이름과 TwelveData 간격 문자열을 모두 허용합니다.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" | "1min" => Ok(Timeframe::M1),
            "5m" | "5min" => Ok(Timeframe::M5),
            "15m" | "15min" => Ok(Timeframe::M15),
            "30m" | "30min" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" | "1day" => Ok(Timeframe::D1),
            _ => Err(format!("Invalid timeframe: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_duration() {
        assert_eq!(Timeframe::M5.as_secs(), 300);
        assert_eq!(Timeframe::H1.as_secs(), 3600);
        assert_eq!(Timeframe::D1.as_chrono(), chrono::Duration::days(1));
    }

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("5min".parse::<Timeframe>(), Ok(Timeframe::M5));
        assert_eq!("5m".parse::<Timeframe>(), Ok(Timeframe::M5));
        assert_eq!(Timeframe::D1.to_twelvedata_interval(), "1day");
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_serde_matches_partition() {
        let json = serde_json::to_string(&Timeframe::M15).unwrap();
        assert_eq!(json, "\"15m\"");
    }
}
