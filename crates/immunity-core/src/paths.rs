use crate::error::{ImmunityError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const IMMUNITY_DIR: &str = ".immunity";
pub const CONFIG_FILE: &str = ".immunity/config.yaml";
pub const DB_FILE: &str = ".immunity/pipeline.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn immunity_dir(root: &Path) -> PathBuf {
    root.join(IMMUNITY_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

/// Resolve a configured directory: `~/` is expanded to the home directory,
/// relative paths are taken relative to `root`.
pub fn resolve_dir(root: &Path, configured: &str) -> Result<PathBuf> {
    if let Some(rest) = configured.strip_prefix("~/") {
        let home = home::home_dir().ok_or(ImmunityError::HomeNotFound)?;
        return Ok(home.join(rest));
    }
    let path = Path::new(configured);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(root.join(path))
    }
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").unwrap())
}

/// Region, application and repository names: at most 64 characters of
/// `[A-Za-z0-9_.-]`, starting with an alphanumeric.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !name_re().is_match(name) {
        return Err(ImmunityError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
