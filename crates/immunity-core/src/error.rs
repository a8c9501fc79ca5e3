use thiserror::Error;

use crate::types::{BuildState, PipelineEvent};

#[derive(Debug, Error)]
pub enum ImmunityError {
    #[error("not initialized: run 'immunity init'")]
    NotInitialized,

    #[error("no build exists with ID {0}")]
    BuildNotFound(u64),

    #[error("region not found: {0}")]
    RegionNotFound(String),

    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    #[error("no status for build {build_id} in region '{region}'")]
    StatusNotFound { build_id: u64, region: String },

    #[error("invalid name '{0}': must be alphanumeric with '-', '_' or '.'")]
    InvalidName(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("unknown build state: {0}")]
    UnknownState(String),

    #[error("cannot apply '{event}' to build {build_id}: build is '{state}'")]
    InvalidTransition {
        build_id: u64,
        event: PipelineEvent,
        state: BuildState,
    },

    #[error("region '{region}' already has build {active} in progress")]
    RegionBusy { region: String, active: u64 },

    #[error("invalid region configuration: {0}")]
    InvalidRegionConfig(String),

    #[error("command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("command `{command}` timed out after {seconds}s")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("failed to spawn `{command}`: {reason}")]
    CommandSpawn { command: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ImmunityError>;
