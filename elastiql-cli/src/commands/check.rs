use std::path::Path;

use anyhow::Result;
use elastiql::Config;

pub fn run_check(config: &Config, path: &Path) -> Result<()> {
    let issues = config.lint();
    for issue in &issues {
        println!("  ! {}", issue);
    }
    if !issues.is_empty() {
        anyhow::bail!("{} problem(s) in {:?}", issues.len(), path);
    }

    println!("{:?}: {} index(es)", path, config.mapping.len());
    for (index, mapping) in &config.mapping {
        let tables: Vec<String> = mapping
            .table_sources()
            .iter()
            .map(|s| match &s.database {
                Some(db) => format!("{}.{}", db, s.table),
                None => s.table.clone(),
            })
            .collect();
        println!(
            "  {:<24} tables: {:<32} typed fields: {}",
            index,
            tables.join(", "),
            mapping.type_mapping.len()
        );
    }
    Ok(())
}
