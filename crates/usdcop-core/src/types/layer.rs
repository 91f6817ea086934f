//! 데이터 파이프라인 레이어(L0..L5)와 버킷 매핑.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 데이터 파이프라인 단계.
///
/// 각 레이어는 오브젝트 스토어의 개별 버킷에 대응합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layer {
    /// 원시 시장 데이터
    L0,
    /// 표준화
    L1,
    /// 정제
    L2,
    /// 피처
    L3,
    /// RL 학습용
    L4,
    /// 서빙
    L5,
}

impl Layer {
    /// 모든 레이어.
    pub fn all() -> [Layer; 6] {
        [Layer::L0, Layer::L1, Layer::L2, Layer::L3, Layer::L4, Layer::L5]
    }

    /// 기본 버킷 이름.
    pub fn default_bucket(&self) -> &'static str {
        match self {
            Layer::L0 => "00-raw-usdcop-marketdata",
            Layer::L1 => "01-l1-ds-usdcop-standardize",
            Layer::L2 => "02-l2-ds-usdcop-prepare",
            Layer::L3 => "03-l3-ds-usdcop-feature",
            Layer::L4 => "04-l4-ds-usdcop-rlready",
            Layer::L5 => "05-l5-ds-usdcop-serving",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "L0" => Ok(Layer::L0),
            "L1" => Ok(Layer::L1),
            "L2" => Ok(Layer::L2),
            "L3" => Ok(Layer::L3),
            "L4" => Ok(Layer::L4),
            "L5" => Ok(Layer::L5),
            _ => Err(format!("Invalid layer: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_bucket() {
        assert_eq!(Layer::L0.default_bucket(), "00-raw-usdcop-marketdata");
        assert_eq!(Layer::L5.default_bucket(), "05-l5-ds-usdcop-serving");
        assert_eq!("l3".parse::<Layer>(), Ok(Layer::L3));
        assert_eq!(Layer::L4.to_string(), "L4");
    }
}
