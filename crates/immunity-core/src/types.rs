use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// BuildState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    AwaitingDeploy,
    Deploying,
    DeployFailed,
    Testing,
    TestingFailed,
    AwaitingConfirmation,
    Monitoring,
    MonitoringFailed,
    Deployed,
}

impl BuildState {
    pub fn all() -> &'static [BuildState] {
        &[
            BuildState::AwaitingDeploy,
            BuildState::Deploying,
            BuildState::DeployFailed,
            BuildState::Testing,
            BuildState::TestingFailed,
            BuildState::AwaitingConfirmation,
            BuildState::Monitoring,
            BuildState::MonitoringFailed,
            BuildState::Deployed,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildState::AwaitingDeploy => "awaiting_deploy",
            BuildState::Deploying => "deploying",
            BuildState::DeployFailed => "deploy_failed",
            BuildState::Testing => "testing",
            BuildState::TestingFailed => "testing_failed",
            BuildState::AwaitingConfirmation => "awaiting_confirmation",
            BuildState::Monitoring => "monitoring",
            BuildState::MonitoringFailed => "monitoring_failed",
            BuildState::Deployed => "deployed",
        }
    }

    /// Occupies its region: at most one build per region may be in one of these.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            BuildState::Deploying
                | BuildState::Testing
                | BuildState::Monitoring
                | BuildState::AwaitingConfirmation
        )
    }

    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            BuildState::DeployFailed | BuildState::TestingFailed | BuildState::MonitoringFailed
        )
    }

    /// No further events are accepted.
    pub fn is_terminal(self) -> bool {
        self == BuildState::Deployed || self.is_terminal_failure()
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildState {
    type Err = crate::error::ImmunityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildState::all()
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| crate::error::ImmunityError::UnknownState(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEvent {
    BeginDeploy,
    DeploySucceeded,
    DeployFailed,
    BeginTesting,
    TestingSucceeded,
    TestingFailed,
    BeginMonitoring,
    MonitoringSucceeded,
    MonitoringFailed,
    ManualDeployConfirmed,
}

impl PipelineEvent {
    pub fn all() -> &'static [PipelineEvent] {
        &[
            PipelineEvent::BeginDeploy,
            PipelineEvent::DeploySucceeded,
            PipelineEvent::DeployFailed,
            PipelineEvent::BeginTesting,
            PipelineEvent::TestingSucceeded,
            PipelineEvent::TestingFailed,
            PipelineEvent::BeginMonitoring,
            PipelineEvent::MonitoringSucceeded,
            PipelineEvent::MonitoringFailed,
            PipelineEvent::ManualDeployConfirmed,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineEvent::BeginDeploy => "begin_deploy",
            PipelineEvent::DeploySucceeded => "deploy_succeeded",
            PipelineEvent::DeployFailed => "deploy_failed",
            PipelineEvent::BeginTesting => "begin_testing",
            PipelineEvent::TestingSucceeded => "testing_succeeded",
            PipelineEvent::TestingFailed => "testing_failed",
            PipelineEvent::BeginMonitoring => "begin_monitoring",
            PipelineEvent::MonitoringSucceeded => "monitoring_succeeded",
            PipelineEvent::MonitoringFailed => "monitoring_failed",
            PipelineEvent::ManualDeployConfirmed => "manual_deploy_confirmed",
        }
    }

    /// Ledger message used when the caller does not supply one.
    pub fn default_message(self) -> &'static str {
        match self {
            PipelineEvent::BeginDeploy => "Deploy started",
            PipelineEvent::DeploySucceeded => "Deploy succeeded",
            PipelineEvent::DeployFailed => "Deploy failed.",
            PipelineEvent::BeginTesting => "Testing started",
            PipelineEvent::TestingSucceeded => "Testing succeeded",
            PipelineEvent::TestingFailed => "Testing failed.",
            PipelineEvent::BeginMonitoring => "Monitoring started",
            PipelineEvent::MonitoringSucceeded => "Monitoring succeeded",
            PipelineEvent::MonitoringFailed => "Monitoring failed.",
            PipelineEvent::ManualDeployConfirmed => "Manual deploy confirmed",
        }
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineEvent {
    type Err = crate::error::ImmunityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineEvent::all()
            .iter()
            .copied()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| crate::error::ImmunityError::UnknownEvent(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
