//! The pipeline service: configuration, region registry, storage and the
//! dispatcher behind one handle shared by the HTTP server, the scheduler and
//! the CLI.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, info, warn};

use crate::build::{Build, BuildFilter, NewBuild};
use crate::config::{Config, RegionConfig, RepoConfig};
use crate::dispatcher::{Applied, Chain, Dispatcher};
use crate::error::{ImmunityError, Result};
use crate::ledger::{BuildStatus, StatusPayload};
use crate::locks::BuildLocks;
use crate::paths;
use crate::region::{Region, RegionRegistry};
use crate::store::PipelineDb;
use crate::types::{BuildState, PipelineEvent};

struct Layout {
    config: Config,
    registry: RegionRegistry,
}

pub struct Pipeline {
    root: PathBuf,
    db: PipelineDb,
    layout: RwLock<Layout>,
    locks: BuildLocks,
    // Serialises the check-then-create in `register_commit`.
    commits: Mutex<()>,
}

impl Pipeline {
    /// Load `.immunity/config.yaml` under `root` and open the database.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        Self::new(root, config)
    }

    pub fn new(root: &Path, config: Config) -> Result<Self> {
        let registry = RegionRegistry::from_config(&config)?;
        let db = PipelineDb::open(&paths::db_path(root))?;
        Ok(Self {
            root: root.to_path_buf(),
            db,
            layout: RwLock::new(Layout { config, registry }),
            locks: BuildLocks::new(),
            commits: Mutex::new(()),
        })
    }

    fn layout(&self) -> RwLockReadGuard<'_, Layout> {
        self.layout.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> Config {
        self.layout().config.clone()
    }

    pub fn auto_advance(&self) -> bool {
        self.layout().config.pipeline.auto_advance
    }

    pub fn repos(&self) -> Vec<RepoConfig> {
        self.layout().config.repos.clone()
    }

    pub fn probe(&self) -> Result<()> {
        self.db.probe()
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn apply(&self, build_id: u64, event: PipelineEvent, payload: StatusPayload) -> Result<Applied> {
        let layout = self.layout();
        Dispatcher::new(&self.db, &layout.registry, &self.locks).apply(build_id, event, payload)
    }

    pub fn apply_then(
        &self,
        build_id: u64,
        event: PipelineEvent,
        payload: StatusPayload,
        then: Option<PipelineEvent>,
    ) -> Result<Chain> {
        let layout = self.layout();
        Dispatcher::new(&self.db, &layout.registry, &self.locks)
            .apply_then(build_id, event, payload, then)
    }

    /// `begin_deploy` when auto-advance is on, otherwise nothing.
    pub fn auto_deploy(&self) -> Option<PipelineEvent> {
        self.auto_advance().then_some(PipelineEvent::BeginDeploy)
    }

    // -----------------------------------------------------------------------
    // Builds
    // -----------------------------------------------------------------------

    /// Insert a build and start deploying it.
    ///
    /// If the region is busy the build stays in `awaiting_deploy` and is
    /// picked up later by [`Pipeline::promote_waiting`].
    pub fn create_build(&self, new: NewBuild) -> Result<Build> {
        if new.repo.trim().is_empty() || new.commit.trim().is_empty() {
            return Err(ImmunityError::InvalidRequest(
                "repo and commit must not be empty".to_string(),
            ));
        }
        if self.layout().registry.get(&new.current_region).is_none() {
            return Err(ImmunityError::InvalidRequest(format!(
                "unknown region '{}'",
                new.current_region
            )));
        }
        let build = self.db.insert_build(new)?;
        info!(build_id = build.id, repo = %build.repo, commit = %build.commit, region = %build.current_region, "build created");
        match self.apply(build.id, PipelineEvent::BeginDeploy, StatusPayload::default()) {
            Ok(applied) => Ok(applied.build),
            Err(ImmunityError::RegionBusy { region, active }) => {
                info!(build_id = build.id, %region, active, "region busy; build waits");
                Ok(build)
            }
            Err(e) => Err(e),
        }
    }

    /// Create a build for `commit` unless one already exists for the repo.
    pub fn register_commit(&self, repo: &str, commit: &str) -> Result<Option<Build>> {
        let _serial = self.commits.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.db.find_by_commit(repo, commit)? {
            debug!(repo, commit, build_id = existing.id, "commit already has a build");
            return Ok(None);
        }
        let start = {
            let layout = self.layout();
            let tracked = layout.config.repo(repo).ok_or_else(|| {
                ImmunityError::InvalidRequest(format!("repository '{repo}' is not tracked"))
            })?;
            let first = layout
                .registry
                .first_region(&tracked.application)
                .ok_or_else(|| ImmunityError::ApplicationNotFound(tracked.application.clone()))?;
            first.name.clone()
        };
        self.create_build(NewBuild::new(repo, commit, start)).map(Some)
    }

    pub fn get_build(&self, id: u64) -> Result<Build> {
        self.db.get_build(id)
    }

    pub fn list_builds(&self, filter: &BuildFilter) -> Result<Vec<Build>> {
        self.db.list_builds(filter)
    }

    pub fn delete_build(&self, id: u64) -> Result<()> {
        self.locks.with(id, || self.db.delete_build(id))?;
        info!(build_id = id, "build deleted");
        Ok(())
    }

    pub fn delete_test_builds(&self) -> Result<usize> {
        let count = self.db.delete_test_builds()?;
        info!(count, "test builds deleted");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Ledger
    // -----------------------------------------------------------------------

    pub fn statuses_for_build(&self, id: u64) -> Result<Vec<BuildStatus>> {
        self.db.get_build(id)?;
        self.db.statuses_for_build(id)
    }

    pub fn latest_status(&self, build_id: u64, region: &str) -> Result<BuildStatus> {
        self.db
            .latest(build_id, region)?
            .ok_or_else(|| ImmunityError::StatusNotFound {
                build_id,
                region: region.to_string(),
            })
    }

    pub fn build_history(&self, region: &str, limit: usize) -> Result<Vec<BuildStatus>> {
        self.require_region(region)?;
        self.db.history(region, limit)
    }

    // -----------------------------------------------------------------------
    // Regions
    // -----------------------------------------------------------------------

    fn require_region(&self, name: &str) -> Result<Region> {
        self.layout().registry.require(name).cloned()
    }

    pub fn regions(&self) -> Vec<Region> {
        self.layout().registry.all().to_vec()
    }

    pub fn regions_for(&self, application: &str) -> Result<Vec<Region>> {
        let layout = self.layout();
        if layout.config.application(application).is_none() {
            return Err(ImmunityError::ApplicationNotFound(application.to_string()));
        }
        Ok(layout
            .registry
            .regions_for(application)
            .into_iter()
            .cloned()
            .collect())
    }

    /// The build occupying `region`.
    pub fn in_progress_build(&self, region: &str) -> Result<Option<Build>> {
        self.require_region(region)?;
        self.db.in_progress_in(region)
    }

    /// The newest build waiting to deploy to `region`.
    pub fn next_build(&self, region: &str) -> Result<Option<Build>> {
        self.require_region(region)?;
        let filter = BuildFilter {
            region: Some(region.to_string()),
            state: Some(BuildState::AwaitingDeploy),
            limit: Some(1),
            ..BuildFilter::default()
        };
        Ok(self.db.list_builds(&filter)?.into_iter().next())
    }

    /// Add or replace a region and persist the configuration.
    pub fn upsert_region(&self, application: &str, region: RegionConfig) -> Result<Region> {
        paths::validate_name(application)?;
        paths::validate_name(&region.name)?;
        let name = region.name.clone();
        let mut layout = self.layout.write().unwrap_or_else(PoisonError::into_inner);
        let mut config = layout.config.clone();
        config.upsert_region(application, region);
        let registry = RegionRegistry::from_config(&config)?;
        config.save(&self.root)?;
        let saved = registry.require(&name)?.clone();
        *layout = Layout { config, registry };
        info!(region = %name, application, "region saved");
        Ok(saved)
    }

    /// Remove a region together with its builds and ledger entries.
    pub fn remove_region(&self, name: &str) -> Result<usize> {
        let mut layout = self.layout.write().unwrap_or_else(PoisonError::into_inner);
        let mut config = layout.config.clone();
        if !config.remove_region(name) {
            return Err(ImmunityError::RegionNotFound(name.to_string()));
        }
        let registry = RegionRegistry::from_config(&config)?;
        let removed = self.db.delete_region(name)?;
        config.save(&self.root)?;
        *layout = Layout { config, registry };
        info!(region = name, builds = removed, "region removed");
        Ok(removed)
    }

    /// Start the newest waiting build in every idle region.
    pub fn promote_waiting(&self) -> Result<Vec<Applied>> {
        let mut started = Vec::new();
        for region in self.regions() {
            if self.db.in_progress_in(&region.name)?.is_some() {
                continue;
            }
            let Some(waiting) = self.next_build(&region.name)? else {
                continue;
            };
            match self.apply(waiting.id, PipelineEvent::BeginDeploy, StatusPayload::default()) {
                Ok(applied) => started.push(applied),
                Err(
                    e @ (ImmunityError::RegionBusy { .. }
                    | ImmunityError::InvalidTransition { .. }
                    | ImmunityError::BuildNotFound(_)),
                ) => warn!(build_id = waiting.id, region = %region.name, "promotion skipped: {e}"),
                Err(e) => return Err(e),
            }
        }
        Ok(started)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Pipeline) {
        let dir = TempDir::new().unwrap();
        let config = Config::example("player");
        config.save(dir.path()).unwrap();
        let pipeline = Pipeline::open(dir.path()).unwrap();
        (dir, pipeline)
    }

    fn region(name: &str, ordinal: u32) -> RegionConfig {
        RegionConfig {
            name: name.to_string(),
            ordinal,
            requires_manual_approval: false,
            requires_monitoring: false,
        }
    }

    #[test]
    fn create_build_starts_deploying() {
        let (_dir, p) = setup();
        let build = p
            .create_build(NewBuild::new("player", "abc", "sandbox1"))
            .unwrap();
        assert_eq!(build.state, BuildState::Deploying);
        let statuses = p.statuses_for_build(build.id).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].message, "Deploy started");
    }

    #[test]
    fn create_build_in_unknown_region_is_invalid() {
        let (_dir, p) = setup();
        let err = p
            .create_build(NewBuild::new("player", "abc", "mars"))
            .unwrap_err();
        assert!(matches!(err, ImmunityError::InvalidRequest(_)));
        assert!(p.list_builds(&BuildFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn create_build_in_busy_region_waits() {
        let (_dir, p) = setup();
        let first = p.create_build(NewBuild::new("player", "a", "sandbox1")).unwrap();
        let second = p.create_build(NewBuild::new("player", "b", "sandbox1")).unwrap();
        assert_eq!(second.state, BuildState::AwaitingDeploy);
        assert_eq!(p.in_progress_build("sandbox1").unwrap().unwrap().id, first.id);
        assert_eq!(p.next_build("sandbox1").unwrap().unwrap().id, second.id);
    }

    #[test]
    fn register_commit_twice_creates_one_build() {
        let (_dir, p) = setup();
        let created = p.register_commit("player", "deadbeef").unwrap().unwrap();
        assert_eq!(created.current_region, "sandbox1");
        assert!(p.register_commit("player", "deadbeef").unwrap().is_none());
        assert_eq!(p.list_builds(&BuildFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn register_commit_for_untracked_repo_fails() {
        let (_dir, p) = setup();
        assert!(p.register_commit("ghost", "abc").is_err());
    }

    #[test]
    fn promote_waiting_starts_build_once_region_frees() {
        let (_dir, p) = setup();
        let first = p.create_build(NewBuild::new("player", "a", "sandbox1")).unwrap();
        let second = p.create_build(NewBuild::new("player", "b", "sandbox1")).unwrap();
        assert!(p.promote_waiting().unwrap().is_empty());

        p.apply(first.id, PipelineEvent::DeployFailed, StatusPayload::default())
            .unwrap();
        let started = p.promote_waiting().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].build.id, second.id);
        assert_eq!(started[0].build.state, BuildState::Deploying);
    }

    #[test]
    fn manual_approval_gate() {
        let (_dir, p) = setup();
        let id = p
            .create_build(NewBuild::new("player", "abc", "prod2"))
            .unwrap()
            .id;
        p.apply(id, PipelineEvent::DeploySucceeded, StatusPayload::default())
            .unwrap();
        let gated = p
            .apply(id, PipelineEvent::TestingSucceeded, StatusPayload::default())
            .unwrap();
        assert_eq!(gated.build.state, BuildState::AwaitingConfirmation);
        assert!(p
            .apply(id, PipelineEvent::BeginDeploy, StatusPayload::default())
            .is_err());
        let done = p
            .apply(id, PipelineEvent::ManualDeployConfirmed, StatusPayload::default())
            .unwrap();
        assert_eq!(done.build.state, BuildState::Deployed);
    }

    #[test]
    fn delete_test_builds_leaves_real_builds() {
        let (_dir, p) = setup();
        let real = p.create_build(NewBuild::new("player", "a", "sandbox1")).unwrap();
        let test = p
            .create_build(NewBuild::new("player", "b", "prod1").test_build())
            .unwrap();
        assert_eq!(p.delete_test_builds().unwrap(), 1);
        assert!(matches!(
            p.get_build(test.id),
            Err(ImmunityError::BuildNotFound(_))
        ));
        assert_eq!(p.statuses_for_build(real.id).unwrap().len(), 1);
    }

    #[test]
    fn upsert_region_persists_and_rejects_ordinal_clash() {
        let (dir, p) = setup();
        p.upsert_region("player", region("prod9", 9)).unwrap();
        let names: Vec<_> = p
            .regions_for("player")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["sandbox1", "prod1", "prod2", "prod9"]);

        let reloaded = Config::load(dir.path()).unwrap();
        assert!(reloaded
            .application("player")
            .unwrap()
            .regions
            .iter()
            .any(|r| r.name == "prod9"));

        let err = p.upsert_region("player", region("clash", 9)).unwrap_err();
        assert!(matches!(err, ImmunityError::InvalidRegionConfig(_)));
        assert!(p.regions().iter().all(|r| r.name != "clash"));
    }

    #[test]
    fn remove_region_cascades_builds() {
        let (dir, p) = setup();
        let build = p.create_build(NewBuild::new("player", "a", "prod1")).unwrap();
        assert_eq!(p.remove_region("prod1").unwrap(), 1);
        assert!(p.get_build(build.id).is_err());
        assert!(p.regions().iter().all(|r| r.name != "prod1"));
        assert!(matches!(
            p.remove_region("prod1"),
            Err(ImmunityError::RegionNotFound(_))
        ));
        let reloaded = Config::load(dir.path()).unwrap();
        assert_eq!(reloaded.application("player").unwrap().regions.len(), 2);
    }

    #[test]
    fn regions_for_unknown_application() {
        let (_dir, p) = setup();
        assert_eq!(p.regions_for("player").unwrap().len(), 3);
        assert!(matches!(
            p.regions_for("nope"),
            Err(ImmunityError::ApplicationNotFound(_))
        ));
    }

    #[test]
    fn history_of_unknown_region_is_not_found() {
        let (_dir, p) = setup();
        assert!(matches!(
            p.build_history("mars", 10),
            Err(ImmunityError::RegionNotFound(_))
        ));
    }
}
