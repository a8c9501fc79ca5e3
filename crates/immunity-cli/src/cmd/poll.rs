use anyhow::bail;
use immunity_core::Pipeline;
use immunity_server::git::Git;
use immunity_server::scheduler::poll_repo;
use std::path::Path;
use std::sync::Arc;

use crate::output::print_json;

/// One synchronous poll of every tracked repository (or just `only`).
pub fn run(root: &Path, only: Option<&str>, json: bool) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::open(root)?);
    let repos: Vec<_> = pipeline
        .repos()
        .into_iter()
        .filter(|r| only.map_or(true, |name| r.name == name))
        .collect();
    if repos.is_empty() {
        match only {
            Some(name) => bail!("repository '{name}' is not tracked"),
            None => bail!("no repositories configured"),
        }
    }
    let git = Git::new(pipeline.config().scheduler.command_timeout());

    let rt = tokio::runtime::Runtime::new()?;
    let mut created = Vec::new();
    let mut failures = 0;
    for repo in &repos {
        match rt.block_on(poll_repo(&pipeline, git, repo)) {
            Ok(Some(build)) => {
                if !json {
                    println!("{}: new build #{} for {}", repo.name, build.id, build.commit);
                }
                created.push(build);
            }
            Ok(None) => {
                if !json {
                    println!("{}: up to date", repo.name);
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: {e:#}", repo.name);
            }
        }
    }

    if json {
        print_json(&created)?;
    }
    if failures > 0 {
        bail!("{failures} repository poll(s) failed");
    }
    Ok(())
}
