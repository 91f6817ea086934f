//! API 키 사용량 출력.

use crate::context::AppContext;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use usdcop_data::{KeyCallStats, UsageStats};

#[derive(Serialize)]
struct KeysReport {
    usage: UsageStats,
    calls: HashMap<String, KeyCallStats>,
}

pub fn print_keys(ctx: &AppContext, json: bool) -> Result<()> {
    let usage = ctx.keys.usage_stats();
    let calls = ctx.monitor.snapshot();

    if json {
        let report = KeysReport { usage, calls };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n🔑 API 키 사용량");
    println!(
        "{:<12} {:<8} {:>10} {:>8} {:>8}",
        "KEY", "POOL", "CALLS", "LIMIT", "ACTIVE"
    );
    println!("{}", "-".repeat(50));
    for key in &usage.per_key {
        println!(
            "{:<12} {:<8} {:>10} {:>8} {:>8}",
            key.key_id,
            format!("{:?}", key.pool).to_lowercase(),
            key.calls_today,
            key.daily_limit,
            if key.active { "yes" } else { "no" }
        );
    }
    println!("{}", "-".repeat(50));
    println!(
        "총 호출: {} / {} (소진 {}, 비활성 {})",
        usage.total_calls, usage.total_capacity, usage.exhausted_count, usage.inactive_count
    );
    println!("다음 리셋: {}", usage.next_reset_at);
    Ok(())
}
