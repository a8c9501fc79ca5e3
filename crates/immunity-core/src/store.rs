//! Persistent storage for builds and the status ledger using redb.
//!
//! # Table design
//!
//! ```text
//! builds    u64 id -> JSON Build
//! statuses  u64 id -> JSON BuildStatus
//! meta      &str   -> u64 sequence counters
//! ```
//!
//! Ids come from the `meta` counters and only ever grow, so key order is
//! creation order and a reversed scan yields newest first.

use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableTable, Table, TableDefinition};
use serde::de::DeserializeOwned;

use crate::build::{Build, BuildFilter, NewBuild};
use crate::error::{ImmunityError, Result};
use crate::ledger::{BuildStatus, NewStatus};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const BUILDS: TableDefinition<u64, &[u8]> = TableDefinition::new("builds");
const STATUSES: TableDefinition<u64, &[u8]> = TableDefinition::new("statuses");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const BUILD_SEQ: &str = "build_seq";
const STATUS_SEQ: &str = "status_seq";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn db_err(e: impl std::fmt::Display) -> ImmunityError {
    ImmunityError::Storage(e.to_string())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(db_err)
}

fn next_seq(meta: &mut Table<&'static str, u64>, key: &'static str) -> Result<u64> {
    let current = meta.get(key).map_err(db_err)?.map(|g| g.value()).unwrap_or(0);
    let next = current + 1;
    meta.insert(key, next).map_err(db_err)?;
    Ok(next)
}

/// Decode every row of a JSON-valued table in key order.
fn scan<T: DeserializeOwned>(table: &impl ReadableTable<u64, &'static [u8]>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for entry in table.iter().map_err(db_err)? {
        let (_, v) = entry.map_err(db_err)?;
        out.push(decode(v.value())?);
    }
    Ok(out)
}

/// Like [`scan`] but newest first, stopping after `limit` matches.
fn scan_rev<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    limit: Option<usize>,
    keep: impl Fn(&T) -> bool,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for entry in table.iter().map_err(db_err)?.rev() {
        if limit.is_some_and(|n| out.len() >= n) {
            break;
        }
        let (_, v) = entry.map_err(db_err)?;
        let item: T = decode(v.value())?;
        if keep(&item) {
            out.push(item);
        }
    }
    Ok(out)
}

/// Remove every ledger entry matching `doomed`. Returns how many were removed.
fn purge_statuses(
    table: &mut Table<u64, &'static [u8]>,
    doomed: impl Fn(&BuildStatus) -> bool,
) -> Result<usize> {
    let statuses: Vec<BuildStatus> = scan(&*table)?;
    let ids: Vec<u64> = statuses.iter().filter(|s| doomed(s)).map(|s| s.id).collect();
    for id in &ids {
        table.remove(*id).map_err(db_err)?;
    }
    Ok(ids.len())
}

// ---------------------------------------------------------------------------
// PipelineDb
// ---------------------------------------------------------------------------

/// Persistent store for [`Build`] records and their [`BuildStatus`] ledger.
pub struct PipelineDb {
    db: Database,
}

impl PipelineDb {
    /// Open or create the database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(BUILDS).map_err(db_err)?;
        wt.open_table(STATUSES).map_err(db_err)?;
        wt.open_table(META).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Cheap read transaction used as a liveness check.
    pub fn probe(&self) -> Result<()> {
        let rt = self.db.begin_read().map_err(db_err)?;
        rt.open_table(META).map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Builds
    // -----------------------------------------------------------------------

    /// Insert a new build in `awaiting_deploy`, assigning the next id.
    pub fn insert_build(&self, new: NewBuild) -> Result<Build> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let build = {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            let id = next_seq(&mut meta, BUILD_SEQ)?;
            let build = new.into_build(id, Utc::now());
            let value = serde_json::to_vec(&build).map_err(db_err)?;
            let mut table = wt.open_table(BUILDS).map_err(db_err)?;
            table.insert(id, value.as_slice()).map_err(db_err)?;
            build
        };
        wt.commit().map_err(db_err)?;
        Ok(build)
    }

    pub fn find_build(&self, id: u64) -> Result<Option<Build>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(BUILDS).map_err(db_err)?;
        let found = table.get(id).map_err(db_err)?;
        found.map(|g| decode(g.value())).transpose()
    }

    pub fn get_build(&self, id: u64) -> Result<Build> {
        self.find_build(id)?.ok_or(ImmunityError::BuildNotFound(id))
    }

    /// Builds matching `filter`, newest first.
    pub fn list_builds(&self, filter: &BuildFilter) -> Result<Vec<Build>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(BUILDS).map_err(db_err)?;
        scan_rev(&table, filter.limit, |b: &Build| filter.matches(b))
    }

    pub fn find_by_commit(&self, repo: &str, commit: &str) -> Result<Option<Build>> {
        let filter = BuildFilter {
            repo: Some(repo.to_string()),
            limit: None,
            ..BuildFilter::default()
        };
        Ok(self
            .list_builds(&filter)?
            .into_iter()
            .find(|b| b.commit == commit))
    }

    /// The build currently occupying `region`, if any.
    pub fn in_progress_in(&self, region: &str) -> Result<Option<Build>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(BUILDS).map_err(db_err)?;
        let builds: Vec<Build> = scan(&table)?;
        Ok(builds
            .into_iter()
            .find(|b| b.current_region == region && b.state.is_in_progress()))
    }

    /// Delete a build and its ledger entries.
    pub fn delete_build(&self, id: u64) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut builds = wt.open_table(BUILDS).map_err(db_err)?;
            let removed = builds.remove(id).map_err(db_err)?.is_some();
            if !removed {
                return Err(ImmunityError::BuildNotFound(id));
            }
            let mut statuses = wt.open_table(STATUSES).map_err(db_err)?;
            purge_statuses(&mut statuses, |s| s.build_id == id)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Delete every build matching `doomed` together with its ledger, plus any
    /// other ledger entry matching `stray`, in one write transaction.
    /// Returns the number of builds removed.
    fn delete_builds_where(
        &self,
        doomed: impl Fn(&Build) -> bool,
        stray: impl Fn(&BuildStatus) -> bool,
    ) -> Result<usize> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let count = {
            let mut builds = wt.open_table(BUILDS).map_err(db_err)?;
            let all: Vec<Build> = scan(&builds)?;
            let ids: Vec<u64> = all.iter().filter(|b| doomed(b)).map(|b| b.id).collect();
            for id in &ids {
                builds.remove(*id).map_err(db_err)?;
            }
            let mut statuses = wt.open_table(STATUSES).map_err(db_err)?;
            purge_statuses(&mut statuses, |s| ids.contains(&s.build_id) || stray(s))?;
            ids.len()
        };
        wt.commit().map_err(db_err)?;
        Ok(count)
    }

    pub fn delete_test_builds(&self) -> Result<usize> {
        self.delete_builds_where(|b| b.is_test_build, |_| false)
    }

    /// Delete builds targeting `region`, their ledgers, and any other ledger
    /// entries recorded against the region.
    pub fn delete_region(&self, region: &str) -> Result<usize> {
        self.delete_builds_where(|b| b.current_region == region, |s| s.region == region)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Persist `build` and append its ledger entry in one write transaction.
    ///
    /// With `guard_region` set, the transaction fails with `RegionBusy` when
    /// another build already occupies that region. Nothing is written on error.
    pub fn commit_transition(
        &self,
        build: &Build,
        status: NewStatus,
        guard_region: Option<&str>,
    ) -> Result<BuildStatus> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let entry = {
            let mut builds = wt.open_table(BUILDS).map_err(db_err)?;
            if builds.get(build.id).map_err(db_err)?.is_none() {
                return Err(ImmunityError::BuildNotFound(build.id));
            }
            if let Some(region) = guard_region {
                let all: Vec<Build> = scan(&builds)?;
                if let Some(active) = all.iter().find(|b| {
                    b.id != build.id && b.current_region == region && b.state.is_in_progress()
                }) {
                    return Err(ImmunityError::RegionBusy {
                        region: region.to_string(),
                        active: active.id,
                    });
                }
            }
            let value = serde_json::to_vec(build).map_err(db_err)?;
            builds.insert(build.id, value.as_slice()).map_err(db_err)?;

            let mut meta = wt.open_table(META).map_err(db_err)?;
            let mut statuses = wt.open_table(STATUSES).map_err(db_err)?;
            Self::insert_status(&mut meta, &mut statuses, build.id, status)?
        };
        wt.commit().map_err(db_err)?;
        Ok(entry)
    }

    fn insert_status(
        meta: &mut Table<&'static str, u64>,
        statuses: &mut Table<u64, &'static [u8]>,
        build_id: u64,
        status: NewStatus,
    ) -> Result<BuildStatus> {
        let id = next_seq(meta, STATUS_SEQ)?;
        let entry = BuildStatus {
            id,
            build_id,
            region: status.region,
            message: status.message,
            stdout: status.stdout,
            stderr: status.stderr,
            created_at: Utc::now(),
        };
        let value = serde_json::to_vec(&entry).map_err(db_err)?;
        statuses.insert(id, value.as_slice()).map_err(db_err)?;
        Ok(entry)
    }

    // -----------------------------------------------------------------------
    // Ledger
    // -----------------------------------------------------------------------

    /// Append a ledger entry without touching the build.
    pub fn append_status(&self, build_id: u64, status: NewStatus) -> Result<BuildStatus> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let entry = {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            let mut statuses = wt.open_table(STATUSES).map_err(db_err)?;
            Self::insert_status(&mut meta, &mut statuses, build_id, status)?
        };
        wt.commit().map_err(db_err)?;
        Ok(entry)
    }

    /// Ledger entries recorded in `region`, newest first.
    pub fn history(&self, region: &str, limit: usize) -> Result<Vec<BuildStatus>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(STATUSES).map_err(db_err)?;
        scan_rev(&table, Some(limit), |s: &BuildStatus| s.region == region)
    }

    pub fn latest(&self, build_id: u64, region: &str) -> Result<Option<BuildStatus>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(STATUSES).map_err(db_err)?;
        let found = scan_rev(&table, Some(1), |s: &BuildStatus| {
            s.build_id == build_id && s.region == region
        })?;
        Ok(found.into_iter().next())
    }

    /// Every ledger entry for one build, newest first.
    pub fn statuses_for_build(&self, build_id: u64) -> Result<Vec<BuildStatus>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(STATUSES).map_err(db_err)?;
        scan_rev(&table, None, |s: &BuildStatus| s.build_id == build_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildState;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, PipelineDb) {
        let dir = TempDir::new().unwrap();
        let db = PipelineDb::open(&dir.path().join("pipeline.db")).unwrap();
        (dir, db)
    }

    fn status(region: &str, message: &str) -> NewStatus {
        NewStatus {
            region: region.to_string(),
            message: message.to_string(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let (_dir, db) = open_tmp();
        let a = db.insert_build(NewBuild::new("app", "c1", "sandbox1")).unwrap();
        let b = db.insert_build(NewBuild::new("app", "c2", "sandbox1")).unwrap();
        assert!(b.id > a.id);
        db.delete_build(b.id).unwrap();
        let c = db.insert_build(NewBuild::new("app", "c3", "sandbox1")).unwrap();
        assert!(c.id > b.id, "ids are never reused");
    }

    #[test]
    fn list_builds_newest_first_with_limit() {
        let (_dir, db) = open_tmp();
        for commit in ["c1", "c2", "c3"] {
            db.insert_build(NewBuild::new("app", commit, "sandbox1")).unwrap();
        }
        let filter = BuildFilter {
            limit: Some(2),
            ..BuildFilter::default()
        };
        let commits: Vec<_> = db
            .list_builds(&filter)
            .unwrap()
            .into_iter()
            .map(|b| b.commit)
            .collect();
        assert_eq!(commits, ["c3", "c2"]);
    }

    #[test]
    fn get_missing_build_is_not_found() {
        let (_dir, db) = open_tmp();
        assert!(matches!(db.get_build(42), Err(ImmunityError::BuildNotFound(42))));
        assert!(matches!(db.delete_build(42), Err(ImmunityError::BuildNotFound(42))));
    }

    #[test]
    fn find_by_commit_is_scoped_to_repo() {
        let (_dir, db) = open_tmp();
        db.insert_build(NewBuild::new("app", "abc", "sandbox1")).unwrap();
        assert!(db.find_by_commit("app", "abc").unwrap().is_some());
        assert!(db.find_by_commit("other", "abc").unwrap().is_none());
    }

    #[test]
    fn commit_transition_updates_build_and_appends_entry() {
        let (_dir, db) = open_tmp();
        let mut build = db.insert_build(NewBuild::new("app", "c1", "sandbox1")).unwrap();
        build.state = BuildState::Deploying;
        let entry = db
            .commit_transition(&build, status("sandbox1", "Deploy started"), Some("sandbox1"))
            .unwrap();
        assert_eq!(entry.build_id, build.id);
        assert_eq!(db.get_build(build.id).unwrap().state, BuildState::Deploying);
        assert_eq!(db.statuses_for_build(build.id).unwrap().len(), 1);
    }

    #[test]
    fn region_guard_rejects_second_build_and_writes_nothing() {
        let (_dir, db) = open_tmp();
        let mut first = db.insert_build(NewBuild::new("app", "c1", "sandbox1")).unwrap();
        first.state = BuildState::Deploying;
        db.commit_transition(&first, status("sandbox1", "Deploy started"), Some("sandbox1"))
            .unwrap();

        let mut second = db.insert_build(NewBuild::new("app", "c2", "sandbox1")).unwrap();
        second.state = BuildState::Deploying;
        let err = db
            .commit_transition(&second, status("sandbox1", "Deploy started"), Some("sandbox1"))
            .unwrap_err();
        match err {
            ImmunityError::RegionBusy { region, active } => {
                assert_eq!(region, "sandbox1");
                assert_eq!(active, first.id);
            }
            other => panic!("expected RegionBusy, got {other:?}"),
        }
        assert_eq!(
            db.get_build(second.id).unwrap().state,
            BuildState::AwaitingDeploy
        );
        assert!(db.statuses_for_build(second.id).unwrap().is_empty());
    }

    #[test]
    fn commit_transition_on_deleted_build_fails() {
        let (_dir, db) = open_tmp();
        let build = db.insert_build(NewBuild::new("app", "c1", "sandbox1")).unwrap();
        db.delete_build(build.id).unwrap();
        assert!(matches!(
            db.commit_transition(&build, status("sandbox1", "x"), None),
            Err(ImmunityError::BuildNotFound(_))
        ));
        assert!(db.find_build(build.id).unwrap().is_none());
    }

    #[test]
    fn history_and_latest() {
        let (_dir, db) = open_tmp();
        db.append_status(1, status("sandbox1", "one")).unwrap();
        db.append_status(1, status("prod1", "two")).unwrap();
        db.append_status(2, status("sandbox1", "three")).unwrap();
        db.append_status(1, status("sandbox1", "four")).unwrap();

        let messages: Vec<_> = db
            .history("sandbox1", 10)
            .unwrap()
            .into_iter()
            .map(|s| s.message)
            .collect();
        assert_eq!(messages, ["four", "three", "one"]);
        assert_eq!(db.history("sandbox1", 1).unwrap().len(), 1);
        assert_eq!(db.latest(1, "sandbox1").unwrap().unwrap().message, "four");
        assert!(db.latest(2, "prod1").unwrap().is_none());
    }

    #[test]
    fn delete_test_builds_cascades_only_test_builds() {
        let (_dir, db) = open_tmp();
        let real = db.insert_build(NewBuild::new("app", "c1", "sandbox1")).unwrap();
        let test = db
            .insert_build(NewBuild::new("app", "c2", "sandbox1").test_build())
            .unwrap();
        db.append_status(real.id, status("sandbox1", "real")).unwrap();
        db.append_status(test.id, status("sandbox1", "test")).unwrap();

        assert_eq!(db.delete_test_builds().unwrap(), 1);
        assert!(db.find_build(test.id).unwrap().is_none());
        assert!(db.statuses_for_build(test.id).unwrap().is_empty());
        assert!(db.find_build(real.id).unwrap().is_some());
        assert_eq!(db.statuses_for_build(real.id).unwrap().len(), 1);
    }

    #[test]
    fn delete_region_cascades() {
        let (_dir, db) = open_tmp();
        let here = db.insert_build(NewBuild::new("app", "c1", "prod1")).unwrap();
        let elsewhere = db.insert_build(NewBuild::new("app", "c2", "sandbox1")).unwrap();
        db.append_status(here.id, status("prod1", "here")).unwrap();
        db.append_status(elsewhere.id, status("prod1", "passed through")).unwrap();
        db.append_status(elsewhere.id, status("sandbox1", "kept")).unwrap();

        assert_eq!(db.delete_region("prod1").unwrap(), 1);
        assert!(db.find_build(here.id).unwrap().is_none());
        assert!(db.history("prod1", 10).unwrap().is_empty());
        assert_eq!(db.statuses_for_build(elsewhere.id).unwrap().len(), 1);
    }

    #[test]
    fn delete_region_with_only_passing_builds() {
        let (_dir, db) = open_tmp();
        let moved_on = db.insert_build(NewBuild::new("app", "c1", "prod2")).unwrap();
        db.append_status(moved_on.id, status("prod1", "deployed")).unwrap();
        db.append_status(moved_on.id, status("prod2", "deploying")).unwrap();

        assert_eq!(db.delete_region("prod1").unwrap(), 0);
        assert!(db.history("prod1", 10).unwrap().is_empty());
        assert_eq!(db.history("prod2", 10).unwrap().len(), 1);
        assert!(db.find_build(moved_on.id).unwrap().is_some());
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.db");
        let id = {
            let db = PipelineDb::open(&path).unwrap();
            db.insert_build(NewBuild::new("app", "c1", "sandbox1")).unwrap().id
        };
        let db = PipelineDb::open(&path).unwrap();
        assert_eq!(db.get_build(id).unwrap().commit, "c1");
        db.probe().unwrap();
    }
}
