use immunity_core::Pipeline;
use std::path::Path;

use crate::output::{print_json, print_table};

pub fn run(root: &Path, region: &str, limit: usize, json: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root)?;
    let history = pipeline.build_history(region, limit)?;
    if json {
        return print_json(&history);
    }
    if history.is_empty() {
        println!("No history for '{region}'.");
        return Ok(());
    }
    let rows = history
        .iter()
        .map(|s| {
            vec![
                s.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                format!("#{}", s.build_id),
                s.message.clone(),
                s.stderr.lines().next().unwrap_or("").to_string(),
            ]
        })
        .collect();
    print_table(&["WHEN", "BUILD", "MESSAGE", "STDERR"], rows);
    Ok(())
}
