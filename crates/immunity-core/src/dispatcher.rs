//! Applies events to builds.
//!
//! Each application runs inside the build's critical section: load, evaluate
//! the engine against the current region's policy, then persist the new build
//! and exactly one ledger entry in a single storage transaction. A rejected
//! event writes nothing.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::build::Build;
use crate::engine::{self, Step};
use crate::error::{ImmunityError, Result};
use crate::ledger::{BuildStatus, StatusPayload};
use crate::locks::BuildLocks;
use crate::region::RegionRegistry;
use crate::store::PipelineDb;
use crate::types::{BuildState, PipelineEvent};

/// A transition that was persisted, with the ledger entry it wrote.
#[derive(Debug, Clone, Serialize)]
pub struct Applied {
    pub build: Build,
    pub status: BuildStatus,
}

/// Result of [`Dispatcher::apply_then`].
#[derive(Debug, Clone, Serialize)]
pub struct Chain {
    pub applied: Applied,
    /// `None` when the continuation was not legal and was skipped.
    pub continued: Option<Applied>,
}

impl Chain {
    /// The build as left by the last applied event.
    pub fn build(&self) -> &Build {
        self.continued
            .as_ref()
            .map_or(&self.applied.build, |c| &c.build)
    }
}

pub struct Dispatcher<'a> {
    db: &'a PipelineDb,
    registry: &'a RegionRegistry,
    locks: &'a BuildLocks,
}

impl<'a> Dispatcher<'a> {
    pub fn new(db: &'a PipelineDb, registry: &'a RegionRegistry, locks: &'a BuildLocks) -> Self {
        Self {
            db,
            registry,
            locks,
        }
    }

    pub fn apply(
        &self,
        build_id: u64,
        event: PipelineEvent,
        payload: StatusPayload,
    ) -> Result<Applied> {
        self.locks.with(build_id, || {
            let build = self.db.get_build(build_id)?;
            self.transition(build, event, payload)
        })
    }

    /// Apply `event`, then `then` if the build accepts it afterwards.
    ///
    /// Both run in the same critical section. A continuation that the engine
    /// rejects, or that would start work in a busy region, is skipped.
    pub fn apply_then(
        &self,
        build_id: u64,
        event: PipelineEvent,
        payload: StatusPayload,
        then: Option<PipelineEvent>,
    ) -> Result<Chain> {
        self.locks.with(build_id, || {
            let build = self.db.get_build(build_id)?;
            let applied = self.transition(build, event, payload)?;
            let continued = match then {
                Some(next) => self.continue_with(&applied.build, next)?,
                None => None,
            };
            Ok(Chain { applied, continued })
        })
    }

    fn continue_with(&self, build: &Build, event: PipelineEvent) -> Result<Option<Applied>> {
        let policy = self.registry.policy(&build.current_region)?;
        if engine::evaluate(build.state, event, policy).is_none() {
            debug!(build_id = build.id, %event, state = %build.state, "continuation skipped");
            return Ok(None);
        }
        match self.transition(build.clone(), event, StatusPayload::default()) {
            Ok(applied) => Ok(Some(applied)),
            Err(ImmunityError::RegionBusy { region, active }) => {
                debug!(build_id = build.id, %event, %region, active, "continuation skipped: region busy");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Caller must hold the build's critical section.
    fn transition(
        &self,
        build: Build,
        event: PipelineEvent,
        payload: StatusPayload,
    ) -> Result<Applied> {
        let policy = self.registry.policy(&build.current_region)?;
        let step = engine::evaluate(build.state, event, policy).ok_or(
            ImmunityError::InvalidTransition {
                build_id: build.id,
                event,
                state: build.state,
            },
        )?;

        let mut next = build.clone();
        match step {
            Step::Enter(state) => next.state = state,
            Step::Advance => match self.registry.next_region(&build.current_region)? {
                Some(region) => {
                    next.current_region = region.name.clone();
                    next.state = BuildState::AwaitingDeploy;
                }
                None => next.state = BuildState::Deployed,
            },
        }
        next.updated_at = Utc::now();

        let entry = payload.into_entry(event, &build.current_region);
        let guard = (!build.state.is_in_progress() && next.state.is_in_progress())
            .then_some(next.current_region.as_str());
        let status = self.db.commit_transition(&next, entry, guard)?;

        info!(
            build_id = next.id,
            %event,
            from = %build.state,
            to = %next.state,
            region = %next.current_region,
            "transition applied"
        );
        Ok(Applied {
            build: next,
            status,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
