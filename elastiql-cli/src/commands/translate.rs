use std::path::Path;

use anyhow::{Context, Result};
use elastiql::search;
use elastiql::Config;

use super::read_json;

pub fn run_translate(config: &Config, index: &str, input: Option<&Path>, pretty: bool) -> Result<()> {
    let ctx = config.query_context(index)?;
    let body = read_json(input)?;
    let sql = search::translate(&ctx, &body, pretty)
        .with_context(|| format!("Failed to translate search request for {:?}", index))?;
    println!("{}", sql);
    Ok(())
}

pub fn run_count(config: &Config, index: &str, input: Option<&Path>, pretty: bool) -> Result<()> {
    let ctx = config.query_context(index)?;
    let body = read_json(input)?;
    let sql = search::count_sql(&ctx, &body, pretty)
        .with_context(|| format!("Failed to translate count request for {:?}", index))?;
    println!("{}", sql);
    Ok(())
}
