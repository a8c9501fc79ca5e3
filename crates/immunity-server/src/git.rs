use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use immunity_core::error::{ImmunityError, Result};
use tokio::process::Command;

/// Run `program args` in `cwd`, returning trimmed stdout.
///
/// The child is killed if it outlives `timeout`. A non-zero exit becomes
/// `CommandFailed` carrying stderr.
pub async fn run_command(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> Result<String> {
    let command = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ImmunityError::CommandSpawn {
            command: command.clone(),
            reason: e.to_string(),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ImmunityError::CommandTimeout {
                command,
                seconds: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        return Err(ImmunityError::CommandFailed {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// The git operations the commit poller needs.
#[derive(Debug, Clone, Copy)]
pub struct Git {
    timeout: Duration,
}

impl Git {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn pull(&self, repo: &Path) -> Result<()> {
        run_command("git", &["pull"], repo, self.timeout).await?;
        Ok(())
    }

    pub async fn head_commit(&self, repo: &Path) -> Result<String> {
        let sha = run_command("git", &["rev-list", "--max-count=1", "HEAD"], repo, self.timeout).await?;
        if sha.is_empty() {
            return Err(ImmunityError::CommandFailed {
                command: "git rev-list --max-count=1 HEAD".to_string(),
                stderr: "no commits".to_string(),
            });
        }
        Ok(sha)
    }
}
