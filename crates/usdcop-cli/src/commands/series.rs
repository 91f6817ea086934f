//! 병합된 시계열 출력.

use crate::context::AppContext;
use anyhow::Result;
use chrono::Utc;
use usdcop_data::QuerySpec;

use super::parse_range;

/// 저장소 조회와 갭 채우기를 거친 시계열을 JSON으로 출력합니다.
pub async fn print_series(ctx: &AppContext, from: &str, to: &str) -> Result<usize> {
    let (start, end) = parse_range(from, to)?;
    let spec = QuerySpec::new(&ctx.config.storage.market, ctx.timeframe, start, end);
    let series = ctx.service.get_series(&spec, Utc::now()).await;

    println!("{}", serde_json::to_string_pretty(&series)?);
    Ok(series.len())
}
