mod check;
mod convert;
mod translate;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use elastiql::Config;
use serde_json::Value;

pub use check::run_check;
pub use convert::run_convert;
pub use translate::{run_count, run_translate};

pub fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load config {:?}", path))
}

/// JSON from a file, or from stdin when no path is given
pub fn read_json(path: Option<&Path>) -> Result<Value> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            text
        }
    };
    let source = path.map(|p| p.display().to_string()).unwrap_or_else(|| "stdin".to_string());
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", source))
}
