use crate::types::BuildState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// One attempt to move a commit of a repository through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: u64,
    pub repo: String,
    pub commit: String,
    pub current_region: String,
    pub state: BuildState,
    #[serde(default)]
    pub is_test_build: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the caller; storage assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBuild {
    pub repo: String,
    pub commit: String,
    pub current_region: String,
    #[serde(default)]
    pub is_test_build: bool,
}

impl NewBuild {
    pub fn new(repo: impl Into<String>, commit: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            commit: commit.into(),
            current_region: region.into(),
            is_test_build: false,
        }
    }

    pub fn test_build(mut self) -> Self {
        self.is_test_build = true;
        self
    }

    pub(crate) fn into_build(self, id: u64, now: DateTime<Utc>) -> Build {
        Build {
            id,
            repo: self.repo,
            commit: self.commit,
            current_region: self.current_region,
            state: BuildState::AwaitingDeploy,
            is_test_build: self.is_test_build,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// BuildFilter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildFilter {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub state: Option<BuildState>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl BuildFilter {
    pub fn matches(&self, build: &Build) -> bool {
        self.repo.as_deref().map_or(true, |r| r == build.repo)
            && self.region.as_deref().map_or(true, |r| r == build.current_region)
            && self.state.map_or(true, |s| s == build.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Build {
        NewBuild::new("html5player", "abc123", "sandbox1").into_build(7, Utc::now())
    }

    #[test]
    fn new_build_starts_awaiting_deploy() {
        let build = sample();
        assert_eq!(build.id, 7);
        assert_eq!(build.state, BuildState::AwaitingDeploy);
        assert!(!build.is_test_build);
        assert_eq!(build.created_at, build.updated_at);
    }

    #[test]
    fn json_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        for key in [
            "id",
            "repo",
            "commit",
            "current_region",
            "state",
            "is_test_build",
            "created_at",
            "updated_at",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["state"], "awaiting_deploy");
    }

    #[test]
    fn filter_matches_all_given_fields() {
        let build = sample();
        assert!(BuildFilter::default().matches(&build));
        let filter = BuildFilter {
            repo: Some("html5player".into()),
            region: Some("sandbox1".into()),
            state: Some(BuildState::AwaitingDeploy),
            limit: None,
        };
        assert!(filter.matches(&build));
        let other_region = BuildFilter {
            region: Some("prod1".into()),
            ..BuildFilter::default()
        };
        assert!(!other_region.matches(&build));
    }
}
