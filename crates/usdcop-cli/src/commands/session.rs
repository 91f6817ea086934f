//! 거래 세션 조회.

use crate::context::AppContext;
use anyhow::Result;
use chrono::{DateTime, Utc};
use usdcop_core::{is_in_session, next_session_start, session_bars_per_day};

pub fn print_session(ctx: &AppContext, at: DateTime<Utc>) -> Result<()> {
    let spec = &ctx.session;
    let tz = spec.timezone();
    let open = is_in_session(at, spec);
    let next = next_session_start(at, spec);

    println!("기준 시각:   {} ({})", at, at.with_timezone(&tz));
    println!("세션 중:     {}", if open { "yes" } else { "no" });
    println!("다음 시작:   {} ({})", next, next.with_timezone(&tz));
    println!(
        "일일 캔들:   {} ({})",
        session_bars_per_day(spec, ctx.timeframe),
        ctx.timeframe
    );
    Ok(())
}
