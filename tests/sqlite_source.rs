//! End to end over the SQLite dataset store and the SQLite search backend

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tempfile::TempDir;

use dataset_indexer::db::run_migrations;
use dataset_indexer::indexer::{IndexerSettings, IndexingCoordinator, JobOutcome};
use dataset_indexer::search::{SearchBackend, SqliteSearchBackend};
use dataset_indexer::source::{DatasetSource, SqliteDatasetSource};

async fn seeded_source(dir: &TempDir) -> SqliteDatasetSource {
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("datasets.db").display());
    let source = SqliteDatasetSource::connect(&url).await.unwrap();
    run_migrations(source.pool()).await.unwrap();
    seed(source.pool()).await;
    source
}

/// Two protocols (1 -> 2), three features, two datasets.
/// Dataset 2 references an unknown characteristic.
async fn seed(pool: &SqlitePool) {
    let statements = [
        "INSERT INTO protocols (id, identifier, name, description) VALUES (1, 'survey', 'Survey', 'field survey')",
        "INSERT INTO protocols (id, identifier, name, description) VALUES (2, 'soil', 'Soil sample', NULL)",
        "INSERT INTO protocol_subprotocols (protocol_id, subprotocol_id, sort_order) VALUES (1, 2, 0)",
        "INSERT INTO observable_features (id, identifier, name, data_type) VALUES (1, 'site', 'Site', 'string')",
        "INSERT INTO observable_features (id, identifier, name, data_type) VALUES (2, 'depth', 'Depth', 'int')",
        "INSERT INTO observable_features (id, identifier, name, data_type) VALUES (3, 'colour', 'Colour', 'xref')",
        "INSERT INTO protocol_features (protocol_id, feature_id, sort_order) VALUES (1, 1, 0)",
        "INSERT INTO protocol_features (protocol_id, feature_id, sort_order) VALUES (2, 2, 0)",
        "INSERT INTO protocol_features (protocol_id, feature_id, sort_order) VALUES (2, 3, 1)",
        "INSERT INTO characteristics (id, identifier, name) VALUES (1, 'red', 'Brick red')",
        "INSERT INTO datasets (id, identifier, name, protocol_id) VALUES (1, 'SOIL-2020', 'Soil 2020', 1)",
        "INSERT INTO datasets (id, identifier, name, protocol_id) VALUES (2, 'SOIL-2021', 'Soil 2021', 1)",
        "INSERT INTO observation_sets (id, dataset_id, identifier) VALUES (1, 1, 'obs-1')",
        "INSERT INTO observation_sets (id, dataset_id, identifier) VALUES (2, 1, 'obs-2')",
        "INSERT INTO observation_sets (id, dataset_id, identifier) VALUES (3, 2, 'obs-3')",
        "INSERT INTO observed_values (observation_set_id, feature_id, value) VALUES (1, 1, 'North field')",
        "INSERT INTO observed_values (observation_set_id, feature_id, value) VALUES (1, 2, ' 30 ')",
        "INSERT INTO observed_values (observation_set_id, feature_id, value) VALUES (1, 3, 'red')",
        "INSERT INTO observed_values (observation_set_id, feature_id, value) VALUES (2, 1, 'South field')",
        "INSERT INTO observed_values (observation_set_id, feature_id, value) VALUES (3, 3, 'violet')",
    ];
    for statement in statements {
        sqlx::query(statement).execute(pool).await.unwrap();
    }
}

#[tokio::test]
async fn session_enumerates_and_filters_datasets() {
    let dir = TempDir::new().unwrap();
    let source = seeded_source(&dir).await;
    let mut session = source.open().await.unwrap();

    let all = session.enumerate_all().await.unwrap();
    let identifiers: Vec<_> = all.iter().map(|d| d.identifier.as_str()).collect();
    assert_eq!(identifiers, vec!["SOIL-2020", "SOIL-2021"]);

    let ids: BTreeSet<i64> = [2, 99].into_iter().collect();
    let found = session.find_by_ids(&ids).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].identifier, "SOIL-2021");

    assert!(session.find_by_ids(&BTreeSet::new()).await.unwrap().is_empty());
    session.close().await;
}

#[tokio::test]
async fn dataset_table_converts_cells_and_resolves_xrefs() {
    let dir = TempDir::new().unwrap();
    let source = seeded_source(&dir).await;
    let mut session = source.open().await.unwrap();
    let dataset = session.enumerate_all().await.unwrap().remove(0);

    let table = session.dataset_table(&dataset).await.unwrap();
    let columns: Vec<_> = table.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["Site", "Depth", "Colour"]);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.cell(0, "Depth"), Some("30"));
    assert_eq!(table.cell(0, "Colour"), Some("Brick red"));
    assert_eq!(table.cell(1, "Site"), Some("South field"));
    assert_eq!(table.cell(1, "Colour"), None);

    let tree = session.protocol_table(&dataset).await.unwrap();
    assert_eq!(tree.row_count(), 5);
    assert_eq!(tree.cell(2, "identifier"), Some("soil"));
    assert_eq!(tree.cell(2, "path"), Some("/1/2"));
    session.close().await;
}

#[tokio::test]
async fn unknown_characteristic_fails_the_dataset() {
    let dir = TempDir::new().unwrap();
    let source = seeded_source(&dir).await;
    let mut session = source.open().await.unwrap();
    let dataset = session.enumerate_all().await.unwrap().remove(1);

    let err = session.dataset_table(&dataset).await.unwrap_err();
    let message = format!("{:#}", err);
    assert!(
        message.contains("unknown characteristic identifier [violet]"),
        "unexpected error: {}",
        message
    );
    session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn index_new_populates_the_search_database() {
    let dir = TempDir::new().unwrap();
    let source = seeded_source(&dir).await;
    let backend = Arc::new(SqliteSearchBackend::open(&dir.path().join("search/search.db")).await.unwrap());

    let coordinator = IndexingCoordinator::builder()
        .source(Arc::new(source))
        .backend(backend.clone())
        .settings(IndexerSettings {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        })
        .build()
        .unwrap();

    // SOIL-2021 fails on its unknown xref and stops the job
    let report = coordinator.index_new().wait().await;
    match &report.outcome {
        JobOutcome::Failed { indexed, error } => {
            assert_eq!(*indexed, 1);
            assert!(error.contains("SOIL-2021"), "unexpected error: {}", error);
        }
        other => panic!("expected a failed job, got {:?}", other),
    }

    assert!(backend.collection_exists("SOIL-2020").await.unwrap());
    assert!(backend.collection_exists("protocolTree-1").await.unwrap());
    assert!(!backend.collection_exists("SOIL-2021").await.unwrap());

    let hits = backend.search("brick red", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].collection, "SOIL-2020");
    assert_eq!(hits[0].score, 100.0);

    // Nothing new is indexable until SOIL-2021 is fixed, and SOIL-2020 is not redone
    let again = coordinator.index_new().wait().await;
    assert_eq!(again.outcome.indexed(), 0);
    assert_eq!(backend.stats().await.unwrap().collection_count, 2);
}
