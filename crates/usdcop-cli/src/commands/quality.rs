//! 데이터 품질 리포트.

use crate::context::AppContext;
use anyhow::{Context, Result};
use usdcop_data::{QualityReport, QuerySpec};

use super::parse_range;

pub async fn print_quality(ctx: &AppContext, from: &str, to: &str, json: bool) -> Result<QualityReport> {
    let (start, end) = parse_range(from, to)?;
    let spec = QuerySpec::new(&ctx.config.storage.market, ctx.timeframe, start, end);
    let report = ctx
        .service
        .store()
        .validate_quality(&spec)
        .await
        .context("Quality check failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report);
    }

    println!("\n📊 데이터 품질 ({} ~ {}, {})", start, end, ctx.timeframe);
    println!("완전성:   {:.2}%", report.completeness_pct);
    println!("캔들:     {} / {}", report.total_points, report.expected_points);
    println!("중복:     {}", report.duplicate_count);
    println!("이상치:   {}", report.outlier_count);
    println!("공백:     {}", report.gaps.len());
    for gap in &report.gaps {
        println!("  {} → {} ({} bars)", gap.from, gap.to, gap.missing_bars);
    }
    Ok(report)
}
