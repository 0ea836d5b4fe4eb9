//! Indexing coordinator / 索引协调器
//!
//! Owns the running slot and is the only place jobs are scheduled. Every
//! entry point returns at once with a [`JobHandle`]; the job body runs on the
//! tokio runtime captured at build time.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::{IndexMode, JobEvent, JobHandle, JobOutcome, JobReport};
use super::policy::{FailurePolicy, StopOnFirstError};
use super::runner::{IndexJobRunner, Targets};
use super::state::{IndexProgress, IndexState};
use super::{IndexerError, IndexerSettings};
use crate::search::SearchBackend;
use crate::source::DatasetSource;

#[derive(Clone)]
pub struct IndexingCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    runner: IndexJobRunner,
    settings: IndexerSettings,
    runtime: Handle,
    shutdown: CancellationToken,
}

#[derive(Default)]
pub struct IndexingCoordinatorBuilder {
    source: Option<Arc<dyn DatasetSource>>,
    backend: Option<Arc<dyn SearchBackend>>,
    policy: Option<Arc<dyn FailurePolicy>>,
    settings: IndexerSettings,
    runtime: Option<Handle>,
}

impl IndexingCoordinatorBuilder {
    pub fn source(mut self, source: Arc<dyn DatasetSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn policy(mut self, policy: impl Into<Box<dyn FailurePolicy>>) -> Self {
        self.policy = Some(Arc::from(policy.into()));
        self
    }

    pub fn settings(mut self, settings: IndexerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runtime jobs are spawned on; defaults to the current one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<IndexingCoordinator, IndexerError> {
        let source = self.source.ok_or(IndexerError::MissingSource)?;
        let backend = self.backend.ok_or(IndexerError::MissingBackend)?;
        self.settings.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| IndexerError::NoRuntime)?,
        };
        let policy = self.policy.unwrap_or_else(|| Arc::new(StopOnFirstError));
        let (events, _) = broadcast::channel(self.settings.event_capacity);

        Ok(IndexingCoordinator {
            inner: Arc::new(Inner {
                runner: IndexJobRunner {
                    source,
                    backend,
                    policy,
                    state: Arc::new(IndexState::new()),
                    events,
                },
                settings: self.settings,
                runtime,
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

impl IndexingCoordinator {
    pub fn builder() -> IndexingCoordinatorBuilder {
        IndexingCoordinatorBuilder::default()
    }

    /// Re-index every dataset / 全量索引
    pub fn index_all(&self) -> JobHandle {
        self.inner.spawn_job(IndexMode::Full, Targets::All)
    }

    /// Index datasets whose collection does not exist yet / 增量索引
    pub fn index_new(&self) -> JobHandle {
        let job_id = Uuid::new_v4();
        let inner = Arc::clone(&self.inner);
        let _ = inner.runner.events.send(JobEvent::Queued {
            job_id,
            mode: IndexMode::NewOnly,
        });
        let handle = self
            .inner
            .runtime
            .spawn(async move { inner.select_and_index_new(job_id).await });
        JobHandle::new(job_id, IndexMode::NewOnly, handle)
    }

    /// Index the datasets with the given ids / 按ID索引
    pub fn index_by_ids(&self, ids: BTreeSet<i64>) -> JobHandle {
        self.inner.spawn_job(IndexMode::ByIds(ids.clone()), Targets::Ids(ids))
    }

    /// Non-blocking check of the running slot / 是否正在索引
    pub fn is_indexing_running(&self) -> bool {
        self.inner.runner.state.is_running()
    }

    pub fn running_count(&self) -> usize {
        self.inner.runner.state.running_count()
    }

    pub fn status(&self) -> IndexProgress {
        self.inner.runner.state.get_progress()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.runner.events.subscribe()
    }

    /// Cancel waiting jobs and stop running ones before their next dataset
    pub fn shutdown(&self) {
        tracing::info!("Index coordinator shutting down");
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolve once no job holds the slot / 等待空闲
    pub async fn wait_idle(&self) {
        self.inner
            .runner
            .state
            .wait_idle(self.inner.settings.poll_interval)
            .await
    }
}

impl Inner {
    fn spawn_job(self: &Arc<Self>, mode: IndexMode, targets: Targets) -> JobHandle {
        let job_id = Uuid::new_v4();
        let _ = self.runner.events.send(JobEvent::Queued {
            job_id,
            mode: mode.clone(),
        });
        tracing::debug!("Index job {} queued ({})", job_id, mode);

        let inner = Arc::clone(self);
        let job_mode = mode.clone();
        let handle = self
            .runtime
            .spawn(async move { inner.execute(job_id, job_mode, targets).await });
        JobHandle::new(job_id, mode, handle)
    }

    async fn execute(&self, job_id: Uuid, mode: IndexMode, targets: Targets) -> JobReport {
        let started_at = Utc::now();

        let slot = match self
            .runner
            .state
            .acquire(self.settings.poll_interval, &self.shutdown)
            .await
        {
            Some(slot) => slot,
            None => {
                tracing::info!("Index job {} ({}) cancelled while waiting for the slot", job_id, mode);
                return self.finish(job_id, mode, JobOutcome::Cancelled { indexed: 0 }, started_at);
            }
        };

        let _ = self.runner.events.send(JobEvent::Started {
            job_id,
            mode: mode.clone(),
        });
        tracing::info!("Index job {} ({}) started", job_id, mode);

        let outcome = self.runner.run(job_id, targets, &slot, &self.shutdown).await;
        let report = self.finish(job_id, mode, outcome, started_at);
        // Released only after the session is closed and the report is out
        drop(slot);
        report
    }

    /// Collect datasets lacking a collection, then index them as a ByIds job
    async fn select_and_index_new(self: Arc<Self>, job_id: Uuid) -> JobReport {
        let started_at = Utc::now();

        let ids = match self.select_new().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Index job {} failed to select new datasets: {:#}", job_id, e);
                let outcome = JobOutcome::Failed {
                    indexed: 0,
                    error: format!("{:#}", e),
                };
                return self.finish(job_id, IndexMode::NewOnly, outcome, started_at);
            }
        };

        if ids.is_empty() {
            tracing::info!("Index job {}: every dataset already has a collection", job_id);
            return self.finish(job_id, IndexMode::NewOnly, JobOutcome::NothingToIndex, started_at);
        }

        tracing::info!("Index job {}: {} new datasets to index", job_id, ids.len());
        let delegated = self.spawn_job(IndexMode::ByIds(ids.clone()), Targets::Ids(ids));
        let report = delegated.wait().await;
        self.finish(job_id, IndexMode::NewOnly, report.outcome, started_at)
    }

    async fn select_new(&self) -> anyhow::Result<BTreeSet<i64>> {
        let mut session = self.runner.source.open().await?;
        let datasets = session.enumerate_all().await;
        session.close().await;

        let mut ids = BTreeSet::new();
        for dataset in datasets? {
            match self.runner.backend.collection_exists(&dataset.identifier).await {
                Ok(true) => {}
                Ok(false) => {
                    ids.insert(dataset.id);
                }
                Err(e) => {
                    tracing::error!(
                        "collection_exists failed for dataset [{}], keeping {} ids gathered so far: {}",
                        dataset.identifier,
                        ids.len(),
                        e
                    );
                    break;
                }
            }
        }
        Ok(ids)
    }

    fn finish(
        &self,
        job_id: Uuid,
        mode: IndexMode,
        outcome: JobOutcome,
        started_at: chrono::DateTime<Utc>,
    ) -> JobReport {
        tracing::info!(
            "Index job {} ({}) finished: {} datasets indexed",
            job_id,
            mode,
            outcome.indexed()
        );
        let report = JobReport {
            job_id,
            mode,
            outcome,
            started_at,
            finished_at: Utc::now(),
        };
        let _ = self.runner.events.send(JobEvent::Finished {
            report: report.clone(),
        });
        report
    }
}
