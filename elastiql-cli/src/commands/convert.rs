use std::path::Path;

use anyhow::{Context, Result};
use elastiql::search;
use elastiql::Config;

use super::read_json;

pub fn run_convert(config: &Config, index: &str, request: &Path, result: &Path) -> Result<()> {
    let ctx = config.query_context(index)?;
    let body = read_json(Some(request))?;
    let result = read_json(Some(result))?;

    let response = match search::convert(&ctx, &body, &result) {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, status = err.status(), "conversion failed");
            println!("{}", serde_json::to_string_pretty(&err.to_es_body())?);
            return Err(err).context("Failed to convert engine result");
        }
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
