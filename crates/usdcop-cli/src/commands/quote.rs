//! 최신 시세 조회.

use crate::context::AppContext;
use anyhow::{Context, Result};

pub async fn print_quote(ctx: &AppContext) -> Result<()> {
    let symbol = &ctx.config.twelvedata.symbol;
    let quote = ctx
        .service
        .latest_quote(symbol)
        .await
        .with_context(|| format!("Failed to fetch quote for {}", symbol))?;

    println!("{}", serde_json::to_string_pretty(&quote)?);
    Ok(())
}
