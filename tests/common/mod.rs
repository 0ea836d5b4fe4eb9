//! In-process fakes for coordinator tests / 测试用的来源和后端
#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use dataset_indexer::indexer::{IndexingCoordinator, IndexingCoordinatorBuilder, IndexerSettings};
use dataset_indexer::models::Dataset;
use dataset_indexer::search::{IndexingError, SearchBackend};
use dataset_indexer::source::{DatasetSession, DatasetSource};
use dataset_indexer::table::{Column, TableView};

pub fn dataset(id: i64, identifier: &str) -> Dataset {
    Dataset {
        id,
        identifier: identifier.to_string(),
        name: format!("{} name", identifier),
        description: None,
        protocol_id: 1,
    }
}

/// Datasets `DS-1 ..= DS-n`
pub fn datasets(n: i64) -> Vec<Dataset> {
    (1..=n).map(|id| dataset(id, &format!("DS-{}", id))).collect()
}

#[derive(Default)]
struct SessionCounters {
    open: AtomicUsize,
    max_open: AtomicUsize,
    opened: AtomicUsize,
}

/// Dataset source that tracks how many sessions are open at once
pub struct FakeSource {
    datasets: Vec<Dataset>,
    delay: Duration,
    counters: Arc<SessionCounters>,
}

impl FakeSource {
    pub fn new(datasets: Vec<Dataset>) -> Self {
        Self {
            datasets,
            delay: Duration::ZERO,
            counters: Arc::new(SessionCounters::default()),
        }
    }

    /// Sleep this long while building each dataset table
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn open_sessions(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    pub fn max_open_sessions(&self) -> usize {
        self.counters.max_open.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetSource for FakeSource {
    async fn open(&self) -> anyhow::Result<Box<dyn DatasetSession>> {
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_open.fetch_max(open, Ordering::SeqCst);
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            datasets: self.datasets.clone(),
            delay: self.delay,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeSession {
    datasets: Vec<Dataset>,
    delay: Duration,
    counters: Arc<SessionCounters>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatasetSession for FakeSession {
    async fn enumerate_all(&mut self) -> anyhow::Result<Vec<Dataset>> {
        Ok(self.datasets.clone())
    }

    async fn find_by_ids(&mut self, ids: &BTreeSet<i64>) -> anyhow::Result<Vec<Dataset>> {
        Ok(self
            .datasets
            .iter()
            .filter(|d| ids.contains(&d.id))
            .cloned()
            .collect())
    }

    async fn dataset_table(&mut self, dataset: &Dataset) -> anyhow::Result<TableView> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut table = TableView::new(vec![Column::new("name", "string")]);
        table.push_row(vec![Some(dataset.name.clone())])?;
        Ok(table)
    }

    async fn protocol_table(&mut self, dataset: &Dataset) -> anyhow::Result<TableView> {
        let mut table = TableView::new(vec![Column::new("path", "string")]);
        table.push_row(vec![Some(format!("/{}", dataset.protocol_id))])?;
        Ok(table)
    }

    async fn close(self: Box<Self>) {}
}

/// Search backend that records every `index_table` attempt
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<String>>,
    existing: Mutex<HashSet<String>>,
    fail_on: Mutex<HashSet<String>>,
    exists_error_on: Mutex<HashSet<String>>,
    panic_on: Mutex<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `index_table` call consumes one permit of `gate`
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn with_existing(self, collections: &[&str]) -> Self {
        self.existing
            .lock()
            .extend(collections.iter().map(|c| c.to_string()));
        self
    }

    pub fn failing_on(self, collection: &str) -> Self {
        self.fail_on.lock().insert(collection.to_string());
        self
    }

    pub fn exists_failing_on(self, identifier: &str) -> Self {
        self.exists_error_on.lock().insert(identifier.to_string());
        self
    }

    /// `index_table` panics for `collection`
    pub fn panicking_on(self, collection: &str) -> Self {
        self.panic_on.lock().insert(collection.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SearchBackend for RecordingBackend {
    async fn index_table(&self, collection: &str, _table: &TableView) -> Result<(), IndexingError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.calls.lock().push(collection.to_string());
        let panics = self.panic_on.lock().contains(collection);
        if panics {
            panic!("backend blew up on {}", collection);
        }
        if self.fail_on.lock().contains(collection) {
            return Err(IndexingError::Rejected {
                collection: collection.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.existing.lock().insert(collection.to_string());
        Ok(())
    }

    async fn collection_exists(&self, identifier: &str) -> Result<bool, IndexingError> {
        if self.exists_error_on.lock().contains(identifier) {
            return Err(IndexingError::Rejected {
                collection: identifier.to_string(),
                reason: "injected lookup failure".into(),
            });
        }
        Ok(self.existing.lock().contains(identifier))
    }
}

pub fn fast_settings() -> IndexerSettings {
    IndexerSettings {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

pub fn builder(source: Arc<FakeSource>, backend: Arc<RecordingBackend>) -> IndexingCoordinatorBuilder {
    IndexingCoordinator::builder()
        .source(source)
        .backend(backend)
        .settings(fast_settings())
}

/// Poll `condition` every few milliseconds for up to five seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
