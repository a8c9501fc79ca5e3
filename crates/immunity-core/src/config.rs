use crate::error::{ImmunityError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Applications and regions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    pub ordinal: u32,
    #[serde(default)]
    pub requires_manual_approval: bool,
    #[serde(default)]
    pub requires_monitoring: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// A source repository the poller watches for new commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    /// Application whose first region new builds start in.
    pub application: String,
    /// Local mirror. Defaults to `<scheduler.repos_dir>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Companion repositories (under `repos_dir`) pulled before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_also: Vec<String>,
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_repos_dir")]
    pub repos_dir: String,
}

fn default_poll_interval() -> u64 {
    3
}

fn default_command_timeout() -> u64 {
    120
}

fn default_repos_dir() -> String {
    "~/immunity_repos".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            command_timeout_secs: default_command_timeout(),
            repos_dir: default_repos_dir(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig / ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Start the next stage without waiting for an external trigger when a
    /// region finishes (chained `begin_deploy`, waiting-build promotion).
    #[serde(default = "default_auto_advance")]
    pub auto_advance: bool,
}

fn default_auto_advance() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_advance: default_auto_advance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3103
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            applications: Vec::new(),
            repos: Vec::new(),
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Starter configuration written by `immunity init`.
    pub fn example(application: &str) -> Self {
        let region = |name: &str, ordinal, approval, monitoring| RegionConfig {
            name: name.to_string(),
            ordinal,
            requires_manual_approval: approval,
            requires_monitoring: monitoring,
        };
        Self {
            applications: vec![ApplicationConfig {
                name: application.to_string(),
                regions: vec![
                    region("sandbox1", 0, false, false),
                    region("prod1", 1, false, true),
                    region("prod2", 2, true, false),
                ],
            }],
            repos: vec![RepoConfig {
                name: application.to_string(),
                application: application.to_string(),
                path: None,
                sync_also: Vec::new(),
            }],
            ..Self::default()
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ImmunityError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|a| a.name == name)
    }

    pub fn repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Local mirror directory for `repo`.
    pub fn repo_dir(&self, root: &Path, repo: &RepoConfig) -> Result<PathBuf> {
        match &repo.path {
            Some(path) => paths::resolve_dir(root, path),
            None => Ok(paths::resolve_dir(root, &self.scheduler.repos_dir)?.join(&repo.name)),
        }
    }

    /// Directories of the companion repositories pulled alongside `repo`.
    pub fn companion_dirs(&self, root: &Path, repo: &RepoConfig) -> Result<Vec<PathBuf>> {
        let base = paths::resolve_dir(root, &self.scheduler.repos_dir)?;
        Ok(repo.sync_also.iter().map(|name| base.join(name)).collect())
    }

    /// Insert or replace a region, creating the application if needed.
    pub fn upsert_region(&mut self, application: &str, region: RegionConfig) {
        let idx = match self.applications.iter().position(|a| a.name == application) {
            Some(idx) => idx,
            None => {
                self.applications.push(ApplicationConfig {
                    name: application.to_string(),
                    regions: Vec::new(),
                });
                self.applications.len() - 1
            }
        };
        // A region name is unique across applications; moving it is a replace.
        for app in &mut self.applications {
            app.regions.retain(|r| r.name != region.name);
        }
        self.applications[idx].regions.push(region);
    }

    /// Remove a region by name. Returns false if no application had it.
    pub fn remove_region(&mut self, name: &str) -> bool {
        let mut removed = false;
        for app in &mut self.applications {
            let before = app.regions.len();
            app.regions.retain(|r| r.name != name);
            removed |= app.regions.len() != before;
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for app in &self.applications {
            if app.regions.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("application '{}' has no regions", app.name),
                });
            }
        }

        let mut seen = HashSet::new();
        for repo in &self.repos {
            if !seen.insert(repo.name.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("repo '{}' is listed more than once", repo.name),
                });
            }
            if self.application(&repo.application).is_none() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "repo '{}' references unknown application '{}'",
                        repo.name, repo.application
                    ),
                });
            }
        }

        if self.scheduler.poll_interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "scheduler.poll_interval_secs is 0; using 1 second".to_string(),
            });
        }

        if let Err(e) = crate::region::RegionRegistry::from_config(self) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: e.to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
