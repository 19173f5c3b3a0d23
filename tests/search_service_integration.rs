/// Similarity service integration tests: load, insert, search, enrich
mod common;

use chrono::{TimeZone, Utc};
use common::{query_for, service, service_with_counter, test_config, unit, DIM};
use newsvec::search::{
    ArticleRecord, EmbeddingJob, InMemoryNewsRepository, PriceChanges, SearchError,
    SimilarityService,
};
use newsvec::store::{read_metadata, write_metadata, ArticleMetadata, VectorStore};
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_empty_index_skips_embedding() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let (service, calls) = service_with_counter(&config);

    let results = service
        .search_similar("삼성전자 실적 발표", None, 5, 0.0)
        .await;

    assert!(results.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!service.embedder().is_loaded());
    assert!(service.is_loaded());
}

#[tokio::test]
async fn test_missing_files_give_usable_empty_index() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let service = service(&config);

    service.ensure_loaded().await.unwrap();
    assert_eq!(service.vector_count().await.unwrap(), 0);
    assert!(service.indexed_ids().await.is_empty());

    let added = service
        .add_embeddings(vec![1], vec![unit([1.0, 0.0, 0.0, 0.0])], vec!["A".into()], vec![None])
        .await;
    assert_eq!(added, 1);
}

#[tokio::test]
async fn test_add_then_self_search_flat() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let service = service(&config);

    let v = unit([0.2, 0.4, 0.1, 0.9]);
    let added = service
        .add_embeddings(
            vec![101, 102],
            vec![v.clone(), unit([1.0, 0.0, 0.0, 0.0])],
            vec!["005930".into(), "000660".into()],
            vec![Some(1_700_000_000), None],
        )
        .await;
    assert_eq!(added, 2);

    let results = service.search_similar(&query_for(&v), None, 1, 0.0).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].news_id, 101);
    assert_eq!(results[0].stock_key, "005930");
    assert_eq!(results[0].published_at, Some(1_700_000_000));
    assert!((results[0].similarity - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn test_mismatched_lengths_rejected() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let service = service(&config);

    service
        .add_embeddings(vec![1], vec![unit([1.0, 0.0, 0.0, 0.0])], vec!["A".into()], vec![None])
        .await;

    let added = service
        .add_embeddings(
            vec![2, 3],
            vec![unit([0.0, 1.0, 0.0, 0.0])],
            vec!["A".into(), "B".into()],
            vec![None, None],
        )
        .await;
    assert_eq!(added, 0);
    assert_eq!(service.vector_count().await.unwrap(), 1);

    let result = service
        .try_add_embeddings(vec![2], vec![], vec![], vec![])
        .await;
    assert!(matches!(result, Err(SearchError::LengthMismatch { .. })));
    assert_eq!(service.indexed_ids().await.len(), 1);
}

#[tokio::test]
async fn test_threshold_filters_weak_matches() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let service = service(&config);

    // Unit vectors at squared distance 1.0, so the flat similarity is 0.5
    let stored = vec![0.5, 0.75f32.sqrt(), 0.0, 0.0];
    service
        .add_embeddings(vec![1], vec![stored], vec!["A".into()], vec![None])
        .await;

    let query = query_for(&[1.0, 0.0, 0.0, 0.0]);
    assert!(service.search_similar(&query, None, 5, 0.99).await.is_empty());

    let loose = service.search_similar(&query, None, 5, 0.4).await;
    assert_eq!(loose.len(), 1);
    assert!((loose[0].similarity - 0.5).abs() < 1e-4);
}

#[tokio::test]
async fn test_key_filter_returns_only_matching_stock() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let service = service(&config);

    service
        .add_embeddings(
            vec![1, 2],
            vec![unit([1.0, 0.0, 0.0, 0.0]), unit([0.99, 0.1, 0.0, 0.0])],
            vec!["B".into(), "A".into()],
            vec![None, None],
        )
        .await;

    let query = query_for(&[1.0, 0.0, 0.0, 0.0]);
    let results = service.search_similar(&query, Some("A"), 1, 0.5).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].news_id, 2);

    // An empty filter means no filter
    let unfiltered = service.search_similar(&query, Some(""), 1, 0.5).await;
    assert_eq!(unfiltered[0].news_id, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_lose_nothing() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let service = Arc::new(service(&config));

    let mut handles = Vec::new();
    for task in 0..8i64 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let ids: Vec<i64> = (0..5).map(|i| task * 100 + i).collect();
            let vectors = ids
                .iter()
                .map(|&id| unit([1.0, id as f32, (id % 7) as f32, 0.5]))
                .collect();
            let keys = ids.iter().map(|_| format!("S{}", task)).collect();
            let timestamps = ids.iter().map(|&id| Some(id)).collect();
            service.add_embeddings(ids, vectors, keys, timestamps).await
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 40);

    let expected: BTreeSet<i64> = (0..8i64)
        .flat_map(|task| (0..5).map(move |i| task * 100 + i))
        .collect();
    let indexed: BTreeSet<i64> = service.indexed_ids().await.into_iter().collect();
    assert_eq!(indexed, expected);

    let on_disk = VectorStore::load(
        &config.index_path(),
        &config.metadata_path(),
        DIM,
        config.index.nprobe,
    );
    assert_eq!(on_disk.len(), 40);
    assert_eq!(on_disk.metadata().len(), 40);
}

#[tokio::test]
async fn test_write_through_visible_to_new_service() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());

    let first = service(&config);
    first
        .add_embeddings(
            vec![7, 8],
            vec![unit([0.0, 0.0, 1.0, 0.0]), unit([0.0, 1.0, 0.0, 0.0])],
            vec!["A".into(), "".into()],
            vec![Some(10), None],
        )
        .await;
    assert!(config.index_path().exists());
    assert!(config.metadata_path().exists());

    let second = service(&config);
    let ids = second.indexed_ids().await;
    assert!(ids.contains(&7) && ids.contains(&8));

    let results = second
        .search_similar(&query_for(&[0.0, 1.0, 0.0, 0.0]), None, 1, 0.9)
        .await;
    assert_eq!(results[0].news_id, 8);
    assert_eq!(results[0].stock_key, "");
}

#[tokio::test]
async fn test_corrupt_files_fail_open() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    std::fs::create_dir_all(config.index_path().parent().unwrap()).unwrap();
    std::fs::write(config.index_path(), b"garbage").unwrap();
    std::fs::write(config.metadata_path(), b"[]").unwrap();

    let service = service(&config);
    assert!(service
        .search_similar("any text", None, 5, 0.0)
        .await
        .is_empty());
    assert!(service.indexed_ids().await.is_empty());

    let added = service
        .add_embeddings(vec![1], vec![unit([1.0, 1.0, 0.0, 0.0])], vec!["A".into()], vec![None])
        .await;
    assert_eq!(added, 1);

    // The unreadable index was moved aside, not overwritten
    let vectors_dir = config.index_path().parent().unwrap().to_path_buf();
    let kept: Vec<_> = std::fs::read_dir(&vectors_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().contains("news.index.corrupt-"))
        .collect();
    assert_eq!(kept.len(), 1);
    assert_eq!(std::fs::read(&kept[0]).unwrap(), b"garbage");
}

/// Persist `n` flat vectors with ids 0..n directly through the store
fn seed_store(config: &newsvec::config::Config, n: usize) {
    let vectors: Vec<Vec<f32>> = (0..n)
        .map(|i| unit([1.0, i as f32, (i % 5) as f32, 0.25]))
        .collect();
    let metadata = (0..n as i64)
        .map(|id| ArticleMetadata::new(id, "005930", Some(1_700_000_000 + id)))
        .collect();
    let mut store = VectorStore::create_empty(DIM);
    assert_eq!(store.add(&vectors, metadata), n);
    store
        .persist(&config.index_path(), &config.metadata_path())
        .unwrap();
}

#[tokio::test]
async fn test_metadata_behind_index_keeps_existing_articles() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    seed_store(&config, 50);

    // Index written but the crash hit before the metadata caught up
    let mut entries = read_metadata(&config.metadata_path()).unwrap();
    entries.truncate(49);
    write_metadata(&config.metadata_path(), &entries).unwrap();

    let service = service(&config);
    assert_eq!(service.vector_count().await.unwrap(), 49);

    let added = service
        .add_embeddings(
            vec![999],
            vec![unit([0.0, 0.0, 0.0, 1.0])],
            vec!["000660".into()],
            vec![None],
        )
        .await;
    assert_eq!(added, 1);

    let on_disk = VectorStore::load(
        &config.index_path(),
        &config.metadata_path(),
        DIM,
        config.index.nprobe,
    );
    assert_eq!(on_disk.len(), 50);
    assert_eq!(on_disk.metadata().len(), 50);

    let ids: BTreeSet<i64> = on_disk.indexed_ids().into_iter().collect();
    let expected: BTreeSet<i64> = (0..49).chain([999]).collect();
    assert_eq!(ids, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_calls_load_once() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    seed_store(&config, 200);
    let service = Arc::new(service(&config));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.ensure_loaded().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(service.load_count(), 1);
    assert_eq!(service.vector_count().await.unwrap(), 200);
    assert_eq!(service.load_count(), 1);
}

#[tokio::test]
async fn test_embedding_failure_degrades_to_empty() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let service = service(&config);
    service
        .add_embeddings(vec![1], vec![unit([1.0, 0.0, 0.0, 0.0])], vec!["A".into()], vec![None])
        .await;

    assert!(service.search_similar("boom", None, 5, 0.0).await.is_empty());
    assert!(matches!(
        service.try_search_similar("boom", None, 5, 0.0).await,
        Err(SearchError::Embedding(_))
    ));
}

fn article(id: i64, title: &str, stock: &str) -> ArticleRecord {
    ArticleRecord {
        id,
        title: title.to_string(),
        content: format!("{} 본문", title),
        stock_key: Some(stock.to_string()),
        published_at: Some(Utc.with_ymd_and_hms(2024, 5, 1 + id as u32, 9, 0, 0).unwrap()),
    }
}

#[tokio::test]
async fn test_with_context_drops_unresolved_ids() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let service = service(&config);

    service
        .add_embeddings(
            vec![1, 2, 3],
            vec![
                unit([1.0, 0.0, 0.0, 0.0]),
                unit([0.95, 0.05, 0.0, 0.0]),
                unit([0.9, 0.1, 0.0, 0.0]),
            ],
            vec!["A".into(), "A".into(), "A".into()],
            vec![None, None, None],
        )
        .await;

    let repository = InMemoryNewsRepository::new();
    repository.insert_article(article(1, "반도체 수출 호조", "A"));
    repository.insert_article(article(3, "메모리 가격 반등", "A"));
    repository.insert_price_changes(
        1,
        PriceChanges {
            d1: Some(2.5),
            d5: Some(-1.0),
            ..Default::default()
        },
    );

    let query = query_for(&[1.0, 0.0, 0.0, 0.0]);
    let enriched = service
        .with_context(&query, Some("A"), &repository, 5, 0.0)
        .await;

    let ids: Vec<i64> = enriched.iter().map(|e| e.news_id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(enriched[0].title, "반도체 수출 호조");
    assert_eq!(enriched[0].price_changes.d1, Some(2.5));
    assert_eq!(enriched[1].price_changes, PriceChanges::default());
}

#[tokio::test]
async fn test_embedding_job_counts_failures() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let service = Arc::new(service(&config));

    let repository = InMemoryNewsRepository::new();
    repository.insert_article(article(1, "금리 동결", "A"));
    repository.insert_article(article(2, "boom 실패 기사", "B"));
    repository.insert_article(ArticleRecord {
        stock_key: None,
        published_at: None,
        ..article(3, "환율 급등", "")
    });

    let job = EmbeddingJob::new(service.clone());
    let report = job.run(&repository, 10).await.unwrap();
    assert_eq!(report.saved, 2);
    assert_eq!(report.failed, 1);

    let ids = service.indexed_ids().await;
    assert!(ids.contains(&1) && ids.contains(&3) && !ids.contains(&2));

    // Already indexed articles are not picked up again
    let again = job.run(&repository, 10).await.unwrap();
    assert_eq!(again.saved, 0);
    assert_eq!(again.failed, 1);

    let results = service
        .search_similar(&article(1, "금리 동결", "A").embedding_text(), None, 1, 0.99)
        .await;
    assert_eq!(results[0].news_id, 1);
    assert_eq!(results[0].stock_key, "A");
}

#[tokio::test]
async fn test_shared_instance_first_caller_wins() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());

    let first = SimilarityService::shared(|| service(&config));
    let second = SimilarityService::shared(|| panic!("second initializer must not run"));
    assert!(Arc::ptr_eq(&first, &second));
}
