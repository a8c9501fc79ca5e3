use clap::Subcommand;
use immunity_core::config::RegionConfig;
use immunity_core::Pipeline;
use std::path::Path;

use crate::output::{or_dash, print_json, print_table};

#[derive(Subcommand)]
pub enum RegionSubcommand {
    /// List regions in pipeline order with their current and waiting builds
    List,
    /// Add a region, or replace one with the same name
    Add {
        name: String,
        /// Application the region belongs to
        #[arg(long)]
        application: String,
        /// Position in the application's pipeline (unique per application)
        #[arg(long)]
        ordinal: u32,
        /// Hold builds in awaiting_confirmation after testing
        #[arg(long)]
        manual_approval: bool,
        /// Watch builds after testing before moving on
        #[arg(long)]
        monitoring: bool,
    },
    /// Remove a region and every build and ledger entry in it
    Remove { name: String },
}

pub fn run(root: &Path, subcmd: RegionSubcommand, json: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root)?;
    match subcmd {
        RegionSubcommand::List => list(&pipeline, json),
        RegionSubcommand::Add {
            name,
            application,
            ordinal,
            manual_approval,
            monitoring,
        } => {
            let region = pipeline.upsert_region(
                &application,
                RegionConfig {
                    name,
                    ordinal,
                    requires_manual_approval: manual_approval,
                    requires_monitoring: monitoring,
                },
            )?;
            if json {
                print_json(&region)?;
            } else {
                println!(
                    "Saved region '{}' ({} #{})",
                    region.name, region.application, region.ordinal
                );
            }
            Ok(())
        }
        RegionSubcommand::Remove { name } => {
            let removed = pipeline.remove_region(&name)?;
            if json {
                print_json(&serde_json::json!({ "region": name, "deleted_builds": removed }))?;
            } else {
                println!("Removed region '{name}' and {removed} build(s)");
            }
            Ok(())
        }
    }
}

fn list(pipeline: &Pipeline, json: bool) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    let mut entries = Vec::new();
    for region in pipeline.regions() {
        let active = pipeline.in_progress_build(&region.name)?;
        let waiting = pipeline.next_build(&region.name)?;
        rows.push(vec![
            region.application.clone(),
            region.ordinal.to_string(),
            region.name.clone(),
            flags(region.requires_manual_approval, region.requires_monitoring),
            or_dash(active.as_ref().map(|b| format!("#{} {}", b.id, b.state))),
            or_dash(waiting.as_ref().map(|b| format!("#{}", b.id))),
        ]);
        entries.push(serde_json::json!({
            "region": region,
            "in_progress_build": active,
            "next_build": waiting,
        }));
    }

    if json {
        return print_json(&entries);
    }
    if rows.is_empty() {
        println!("No regions configured.");
        return Ok(());
    }
    print_table(
        &["APPLICATION", "ORD", "REGION", "POLICY", "ACTIVE", "NEXT"],
        rows,
    );
    Ok(())
}

fn flags(approval: bool, monitoring: bool) -> String {
    match (approval, monitoring) {
        (true, true) => "approval+monitoring".to_string(),
        (true, false) => "approval".to_string(),
        (false, true) => "monitoring".to_string(),
        (false, false) => "-".to_string(),
    }
}
