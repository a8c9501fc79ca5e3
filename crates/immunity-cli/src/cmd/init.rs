use anyhow::Context;
use immunity_core::config::Config;
use immunity_core::{io, paths, Pipeline};
use std::path::Path;

use crate::output::print_json;

pub fn run(root: &Path, application: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config_path = paths::config_path(root);
    let created = if config_path.exists() {
        false
    } else {
        let name = match application {
            Some(name) => name.to_string(),
            None => default_application(root),
        };
        paths::validate_name(&name)?;
        io::ensure_dir(&paths::immunity_dir(root))?;
        Config::example(&name).save(root)?;
        true
    };

    // Opening validates the config and creates the database.
    Pipeline::open(root).context("failed to open pipeline")?;

    if json {
        print_json(&serde_json::json!({
            "root": root,
            "config": config_path,
            "created": created,
        }))?;
    } else if created {
        println!("Initialized immunity in {}", root.display());
        println!("Edit {} to describe your regions and repositories.", config_path.display());
    } else {
        println!("Already initialized: {}", config_path.display());
    }
    Ok(())
}

fn default_application(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .filter(|n| paths::validate_name(n).is_ok())
        .unwrap_or_else(|| "app".to_string())
}
