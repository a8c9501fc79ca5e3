use anyhow::Context;
use clap::Subcommand;
use immunity_core::{
    Build, BuildFilter, BuildState, NewBuild, Pipeline, PipelineEvent, StatusPayload,
};
use std::path::Path;

use crate::output::{print_json, print_table};

#[derive(Subcommand)]
pub enum BuildSubcommand {
    /// List builds, newest first
    List {
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        region: Option<String>,
        /// Only builds in this state (e.g. awaiting_deploy)
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one build and its status ledger
    Show { id: u64 },
    /// Create a build and start deploying it
    Create {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        commit: String,
        /// Region to deploy to first
        #[arg(long)]
        region: String,
        /// Mark as a test build (removed by purge-tests)
        #[arg(long)]
        test: bool,
    },
    /// Apply a pipeline event to a build (e.g. deploy_succeeded)
    Fire {
        id: u64,
        event: String,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        stdout: Option<String>,
        #[arg(long)]
        stderr: Option<String>,
        /// Region recorded in the ledger entry (default: the build's region)
        #[arg(long)]
        region: Option<String>,
    },
    /// Delete a build and its ledger entries
    Delete { id: u64 },
    /// Delete every test build
    PurgeTests,
}

pub fn run(root: &Path, subcmd: BuildSubcommand, json: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(root)?;
    match subcmd {
        BuildSubcommand::List {
            repo,
            region,
            state,
            limit,
        } => {
            let filter = BuildFilter {
                repo,
                region,
                state: state.as_deref().map(str::parse::<BuildState>).transpose()?,
                limit,
            };
            list(&pipeline, &filter, json)
        }
        BuildSubcommand::Show { id } => show(&pipeline, id, json),
        BuildSubcommand::Create {
            repo,
            commit,
            region,
            test,
        } => {
            let mut new = NewBuild::new(repo, commit, region);
            new.is_test_build = test;
            let build = pipeline.create_build(new)?;
            if json {
                print_json(&build)?;
            } else {
                println!(
                    "Created build #{} in {} ({})",
                    build.id, build.current_region, build.state
                );
            }
            Ok(())
        }
        BuildSubcommand::Fire {
            id,
            event,
            message,
            stdout,
            stderr,
            region,
        } => {
            let event: PipelineEvent = event.parse()?;
            let payload = StatusPayload {
                message,
                stdout,
                stderr,
                region,
            };
            let applied = pipeline
                .apply(id, event, payload)
                .with_context(|| format!("failed to apply '{event}'"))?;
            if json {
                print_json(&applied)?;
            } else {
                println!(
                    "Build #{}: {} in {}",
                    applied.build.id, applied.build.state, applied.build.current_region
                );
            }
            Ok(())
        }
        BuildSubcommand::Delete { id } => {
            pipeline.delete_build(id)?;
            if json {
                print_json(&serde_json::json!({ "deleted": id }))?;
            } else {
                println!("Deleted build #{id}");
            }
            Ok(())
        }
        BuildSubcommand::PurgeTests => {
            let count = pipeline.delete_test_builds()?;
            if json {
                print_json(&serde_json::json!({ "deleted": count }))?;
            } else {
                println!("Deleted {count} test build(s)");
            }
            Ok(())
        }
    }
}

fn row(b: &Build) -> Vec<String> {
    vec![
        b.id.to_string(),
        b.repo.clone(),
        b.commit.chars().take(10).collect(),
        b.current_region.clone(),
        b.state.to_string(),
        if b.is_test_build { "yes" } else { "" }.to_string(),
        b.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    ]
}

fn list(pipeline: &Pipeline, filter: &BuildFilter, json: bool) -> anyhow::Result<()> {
    let builds = pipeline.list_builds(filter)?;
    if json {
        return print_json(&builds);
    }
    if builds.is_empty() {
        println!("No builds.");
        return Ok(());
    }
    print_table(
        &["ID", "REPO", "COMMIT", "REGION", "STATE", "TEST", "UPDATED"],
        builds.iter().map(row).collect(),
    );
    Ok(())
}

fn show(pipeline: &Pipeline, id: u64, json: bool) -> anyhow::Result<()> {
    let build = pipeline.get_build(id)?;
    let statuses = pipeline.statuses_for_build(id)?;
    if json {
        return print_json(&serde_json::json!({ "build": build, "statuses": statuses }));
    }

    println!("Build #{}", build.id);
    println!("  repo:    {}", build.repo);
    println!("  commit:  {}", build.commit);
    println!("  region:  {}", build.current_region);
    println!("  state:   {}", build.state);
    if build.is_test_build {
        println!("  test build");
    }
    println!();
    print_table(
        &["WHEN", "REGION", "MESSAGE"],
        statuses
            .iter()
            .map(|s| {
                vec![
                    s.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    s.region.clone(),
                    s.message.clone(),
                ]
            })
            .collect(),
    );
    Ok(())
}
