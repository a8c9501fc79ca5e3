//! Commit poller.
//!
//! A tick task enqueues one `Poll` job per tracked repository (plus a
//! `Promote` job when auto-advance is on) every `scheduler.poll_interval_secs`.
//! A single worker drains the queue. Enqueuing a job that is already waiting
//! replaces it, so a slow repository never piles up duplicate polls.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Context;
use immunity_core::config::RepoConfig;
use immunity_core::{Build, Pipeline};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::git::Git;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Sync the mirror of this repository and register its latest commit.
    Poll(String),
    /// Start waiting builds in idle regions.
    Promote,
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

/// FIFO of pending jobs holding at most one entry per job.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: Mutex<VecDeque<Job>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job`, discarding an identical job that has not started yet.
    pub async fn push(&self, job: Job) {
        {
            let mut pending = self.pending.lock().await;
            pending.retain(|queued| *queued != job);
            pending.push_back(job);
        }
        self.notify.notify_one();
    }

    /// Wait for the next job.
    pub async fn next(&self) -> Job {
        loop {
            if let Some(job) = self.pending.lock().await.pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Pull `repo` (and its companions), read the head commit and register it.
///
/// Returns the build created, or `None` if the commit already had one.
pub async fn poll_repo(
    pipeline: &Arc<Pipeline>,
    git: Git,
    repo: &RepoConfig,
) -> anyhow::Result<Option<Build>> {
    let config = pipeline.config();
    for dir in config.companion_dirs(pipeline.root(), repo)? {
        git.pull(&dir)
            .await
            .with_context(|| format!("syncing {} for {}", dir.display(), repo.name))?;
    }
    let dir = config.repo_dir(pipeline.root(), repo)?;
    git.pull(&dir)
        .await
        .with_context(|| format!("syncing {}", repo.name))?;
    let commit = git.head_commit(&dir).await?;
    debug!(repo = %repo.name, %commit, "head commit");

    let p = Arc::clone(pipeline);
    let name = repo.name.clone();
    let created = tokio::task::spawn_blocking(move || p.register_commit(&name, &commit))
        .await
        .context("task join error")??;
    if let Some(build) = &created {
        info!(
            build_id = build.id,
            repo = %build.repo,
            commit = %build.commit,
            "new commit registered"
        );
    }
    Ok(created)
}

pub async fn run_job(pipeline: &Arc<Pipeline>, git: Git, job: &Job) -> anyhow::Result<()> {
    match job {
        Job::Poll(name) => {
            let Some(repo) = pipeline.repos().into_iter().find(|r| &r.name == name) else {
                warn!(repo = %name, "repository no longer tracked");
                return Ok(());
            };
            poll_repo(pipeline, git, &repo).await?;
        }
        Job::Promote => {
            let p = Arc::clone(pipeline);
            let started = tokio::task::spawn_blocking(move || p.promote_waiting())
                .await
                .context("task join error")??;
            for applied in started {
                info!(
                    build_id = applied.build.id,
                    region = %applied.build.current_region,
                    "waiting build promoted"
                );
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

pub struct SchedulerHandle {
    pub ticker: JoinHandle<()>,
    pub worker: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn abort(&self) {
        self.ticker.abort();
        self.worker.abort();
    }
}

/// Spawn the tick and worker tasks on the current runtime.
pub fn spawn(pipeline: Arc<Pipeline>) -> SchedulerHandle {
    let config = pipeline.config();
    let period = config.scheduler.poll_interval();
    let git = Git::new(config.scheduler.command_timeout());
    let queue = Arc::new(JobQueue::new());

    if which::which("git").is_err() {
        warn!("git not found on PATH; repository polls will fail");
    }
    info!(
        repos = config.repos.len(),
        interval_secs = period.as_secs(),
        "commit poller started"
    );

    let ticker = {
        let pipeline = Arc::clone(&pipeline);
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                for repo in pipeline.repos() {
                    queue.push(Job::Poll(repo.name)).await;
                }
                if pipeline.auto_advance() {
                    queue.push(Job::Promote).await;
                }
            }
        })
    };

    let worker = tokio::spawn(async move {
        loop {
            let job = queue.next().await;
            if let Err(e) = run_job(&pipeline, git, &job).await {
                error!(?job, "job failed: {e:#}");
            }
            let p = Arc::clone(&pipeline);
            let _ = tokio::task::spawn_blocking(move || p.probe()).await;
        }
    });

    SchedulerHandle { ticker, worker }
}

#[cfg(test)]
mod tests {
    use super::*;
    use immunity_core::config::Config;
    use immunity_core::{BuildState, NewBuild, PipelineEvent, StatusPayload};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn push_replaces_queued_duplicate() {
        let queue = JobQueue::new();
        queue.push(Job::Poll("a".into())).await;
        queue.push(Job::Poll("b".into())).await;
        queue.push(Job::Poll("a".into())).await;
        queue.push(Job::Promote).await;
        queue.push(Job::Promote).await;
        assert_eq!(queue.len().await, 3);
        assert_eq!(queue.next().await, Job::Poll("b".into()));
        assert_eq!(queue.next().await, Job::Poll("a".into()));
        assert_eq!(queue.next().await, Job::Promote);
    }

    #[tokio::test]
    async fn next_waits_for_push() {
        let queue = Arc::new(JobQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(Job::Promote).await;
        let job = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job, Job::Promote);
    }

    #[tokio::test]
    async fn promote_job_starts_waiting_build() {
        let dir = TempDir::new().unwrap();
        let pipeline = Arc::new(Pipeline::new(dir.path(), Config::example("player")).unwrap());
        let first = pipeline
            .create_build(NewBuild::new("player", "a", "sandbox1"))
            .unwrap();
        let second = pipeline
            .create_build(NewBuild::new("player", "b", "sandbox1"))
            .unwrap();
        pipeline
            .apply(first.id, PipelineEvent::DeployFailed, StatusPayload::default())
            .unwrap();

        run_job(&pipeline, Git::new(Duration::from_secs(5)), &Job::Promote)
            .await
            .unwrap();
        assert_eq!(
            pipeline.get_build(second.id).unwrap().state,
            BuildState::Deploying
        );
    }

    #[tokio::test]
    async fn poll_of_untracked_repo_is_ignored() {
        let dir = TempDir::new().unwrap();
        let pipeline = Arc::new(Pipeline::new(dir.path(), Config::example("player")).unwrap());
        run_job(&pipeline, Git::new(Duration::from_secs(5)), &Job::Poll("ghost".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn poll_with_missing_mirror_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::example("player");
        config.scheduler.repos_dir = dir.path().join("nowhere").display().to_string();
        let pipeline = Arc::new(Pipeline::new(dir.path(), config).unwrap());
        let result = run_job(
            &pipeline,
            Git::new(Duration::from_secs(5)),
            &Job::Poll("player".into()),
        )
        .await;
        assert!(result.is_err());
        assert!(pipeline.list_builds(&Default::default()).unwrap().is_empty());
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=immunity", "-c", "user.email=immunity@localhost"])
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?}");
    }

    #[tokio::test]
    async fn poll_registers_head_commit_once() {
        if which::which("git").is_err() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let origin = dir.path().join("origin");
        let mirrors = dir.path().join("mirrors");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::create_dir_all(&mirrors).unwrap();
        git(&origin, &["init", "-q"]);
        git(&origin, &["commit", "-q", "--allow-empty", "-m", "initial"]);
        git(&mirrors, &["clone", "-q", origin.to_str().unwrap(), "player"]);

        let mut config = Config::example("player");
        config.scheduler.repos_dir = mirrors.display().to_string();
        let pipeline = Arc::new(Pipeline::new(&dir.path().join("root"), config).unwrap());
        let repo = pipeline.repos().remove(0);
        let git = Git::new(Duration::from_secs(30));

        let created = poll_repo(&pipeline, git, &repo).await.unwrap().unwrap();
        assert_eq!(created.current_region, "sandbox1");
        assert_eq!(created.state, BuildState::Deploying);
        assert_eq!(created.commit.len(), 40);

        assert!(poll_repo(&pipeline, git, &repo).await.unwrap().is_none());
        assert_eq!(pipeline.list_builds(&Default::default()).unwrap().len(), 1);
    }

    async fn wait_for_builds(pipeline: &Pipeline, repo: &str, count: usize) -> Vec<Build> {
        let filter = immunity_core::BuildFilter {
            repo: Some(repo.to_string()),
            ..Default::default()
        };
        for _ in 0..100 {
            let builds = pipeline.list_builds(&filter).unwrap();
            if builds.len() >= count {
                return builds;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("no {count} build(s) for {repo} within 10s");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_repo_does_not_stop_the_scheduler() {
        if which::which("git").is_err() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let origin = dir.path().join("origin");
        let mirrors = dir.path().join("mirrors");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::create_dir_all(&mirrors).unwrap();
        git(&origin, &["init", "-q"]);
        git(&origin, &["commit", "-q", "--allow-empty", "-m", "initial"]);
        git(&mirrors, &["clone", "-q", origin.to_str().unwrap(), "player"]);

        let mut config = Config::example("player");
        config.scheduler.repos_dir = mirrors.display().to_string();
        config.scheduler.poll_interval_secs = 1;
        // Listed first so every tick hits the failure before the good repo.
        config.repos.insert(
            0,
            RepoConfig {
                name: "broken".into(),
                application: "player".into(),
                path: None,
                sync_also: Vec::new(),
            },
        );
        let pipeline = Arc::new(Pipeline::new(&dir.path().join("root"), config).unwrap());
        let handle = spawn(Arc::clone(&pipeline));

        let first = wait_for_builds(&pipeline, "player", 1).await;
        assert_eq!(first.len(), 1);

        git(&origin, &["commit", "-q", "--allow-empty", "-m", "second"]);
        let builds = wait_for_builds(&pipeline, "player", 2).await;
        assert_ne!(builds[0].commit, builds[1].commit);

        assert!(!handle.ticker.is_finished());
        assert!(!handle.worker.is_finished());
        let broken = immunity_core::BuildFilter {
            repo: Some("broken".into()),
            ..Default::default()
        };
        assert!(pipeline.list_builds(&broken).unwrap().is_empty());
        handle.abort();
    }
}
