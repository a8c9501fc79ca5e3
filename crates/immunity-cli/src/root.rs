use std::path::{Path, PathBuf};

use immunity_core::paths::IMMUNITY_DIR;

/// Resolve the immunity root directory.
///
/// Priority:
/// 1. `--root` flag / `IMMUNITY_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.immunity/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd).unwrap_or(cwd)
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(IMMUNITY_DIR).is_dir())
        .map(Path::to_path_buf)
}
