//! Synthetic column and sub-select names
//!
//! Generated SQL tags every artifact that must be traced back to an
//! aggregation path: `$key:<path>%<n>` for group keys, `$bucket:<path>%<n>`
//! for sub-selects and `$doc_count` for bucket counts. The decoder inverts
//! these names, so both sides go through this module.

use std::collections::BTreeMap;

use crate::error::{Result, TranslateError};

pub const TOTAL_COUNT: &str = "$total_count";
pub const HITS: &str = "$hits";
pub const KEY_PREFIX: &str = "$key";
pub const BUCKET_PREFIX: &str = "$bucket";
pub const DOC_COUNT: &str = "$doc_count";
pub const DEFAULT_SOURCE: &str = "$source";
pub const SOURCE_ALIAS_PREFIX: &str = "$source:";
pub const DUMMY_ALIAS: &str = "$dummy$";
pub const SELECTION_ALIAS: &str = "$selection";
pub const NESTED_ALIAS: &str = "$nested";
pub const ROW_NUMBER: &str = "$row_number";

/// `$key:<bucket>%<index>`
pub fn key_alias(bucket: &str, index: usize) -> String {
    format!("{}:{}%{}", KEY_PREFIX, bucket, index)
}

/// `$bucket:<bucket>%<index>`
pub fn bucket_alias(bucket: &str, index: usize) -> String {
    format!("{}:{}%{}", BUCKET_PREFIX, bucket, index)
}

/// Split `<prefix>:<name>%<index>` into name and index. The index follows
/// the last `%`, so names may contain `%` themselves.
pub fn split_with_prefix<'a>(prefix: &str, text: &'a str) -> Option<(&'a str, usize)> {
    let rest = text.strip_prefix(prefix)?.strip_prefix(':')?;
    let pos = rest.rfind('%')?;
    let index = rest[pos + 1..].parse().ok()?;
    Some((&rest[..pos], index))
}

/// Group `$key:` columns by bucket name. Each group lists its columns in
/// index order and the indexes must be contiguous from zero.
pub fn key_groups<'a, I>(columns: I) -> Result<Vec<Vec<String>>>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut groups: BTreeMap<&str, Vec<(usize, &String)>> = BTreeMap::new();
    for column in columns {
        if let Some((name, index)) = split_with_prefix(KEY_PREFIX, column) {
            groups.entry(name).or_default().push((index, column));
        }
    }

    let mut result = Vec::with_capacity(groups.len());
    for (name, mut keys) in groups {
        keys.sort();
        for (position, (index, column)) in keys.iter().enumerate() {
            if *index != position {
                return Err(TranslateError::shape(
                    name,
                    format!("invalid key-name {:?}", column),
                ));
            }
        }
        result.push(keys.into_iter().map(|(_, c)| c.clone()).collect());
    }
    Ok(result)
}

/// Bucket name of a key group, taken from its first column
pub fn key_group_name(group: &[String]) -> Option<&str> {
    group
        .first()
        .and_then(|column| split_with_prefix(KEY_PREFIX, column))
        .map(|(name, _)| name)
}
