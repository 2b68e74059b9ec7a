use lifeos_server::models::{EMAIL_CONTENT_TYPE, EmbeddingMetadata, NewMessage};
use lifeos_server::search::{EmbeddingIndex, IndexError, PgVectorIndex};
use lifeos_server::store::{MessageStore, PgMessageStore};
use lifeos_server::test_support::{TestDatabase, test_index_config};

fn message(id: &str) -> NewMessage {
    NewMessage {
        provider_message_id: id.to_string(),
        subject: format!("subject {id}"),
        from: "sender@example.com".to_string(),
        body: Some(format!("body of {id}")),
        label_ids: vec!["INBOX".to_string(), "IMPORTANT".to_string()],
        ..Default::default()
    }
}

fn metadata(subject: &str) -> EmbeddingMetadata {
    EmbeddingMetadata {
        subject: subject.to_string(),
        content_type: EMAIL_CONTENT_TYPE.to_string(),
        ..Default::default()
    }
}

fn unit(dimension: usize, hot: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    vector[hot] = 1.0;
    vector
}

async fn database(test: &str) -> Option<TestDatabase> {
    match TestDatabase::new().await {
        Ok(db) => Some(db),
        Err(err) => {
            eprintln!("skipping {test}: {err}");
            None
        }
    }
}

#[tokio::test]
async fn message_store_is_idempotent_and_ordered() {
    let Some(test_db) = database("message store test").await else {
        return;
    };
    let store = PgMessageStore::new(test_db.pool_clone());

    let first = store
        .upsert_messages("alice", &[message("m1"), message("m2")])
        .await
        .expect("first upsert");
    assert_eq!(first.inserted_count, 2);

    let second = store
        .upsert_messages("alice", &[message("m2"), message("m3")])
        .await
        .expect("second upsert");
    assert_eq!(second.inserted_count, 1);
    assert_eq!(second.skipped_duplicate_count, 1);

    let known = store
        .known_ids("alice", &["m1".to_string(), "m9".to_string()])
        .await
        .expect("known ids");
    assert!(known.contains("m1") && !known.contains("m9"));

    let pending = store.list_unprocessed("alice", 2).await.expect("pending");
    let ids: Vec<_> = pending.iter().map(|m| m.provider_message_id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2"]);
    assert_eq!(pending[0].label_ids, ["INBOX", "IMPORTANT"]);

    store.mark_processed("alice", "m1").await.expect("mark");
    store.mark_processed("alice", "m1").await.expect("mark again");
    let stats = store.compute_stats("alice").await.expect("stats");
    assert_eq!(stats.total_emails_count, 3);
    assert_eq!(stats.processed_emails_count, 1);
    assert_eq!(stats.unprocessed_emails_count, 2);
    assert!(stats.last_sync_date.is_some());

    assert_eq!(store.reset_processed("alice").await.expect("reset"), 1);
    assert_eq!(store.clear_all("alice").await.expect("clear"), 3);
    assert_eq!(
        store.compute_stats("alice").await.expect("stats").total_emails_count,
        0
    );

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn vector_index_overwrites_ranks_and_clears() {
    let Some(test_db) = database("vector index test").await else {
        return;
    };
    let config = test_index_config();
    let dimension = config.dimension;
    let index = PgVectorIndex::new(test_db.pool_clone(), config);

    index
        .upsert_vector("alice", "m1", &unit(dimension, 0), &metadata("first"))
        .await
        .expect("upsert m1");
    index
        .upsert_vector("alice", "m2", &unit(dimension, 1), &metadata("second"))
        .await
        .expect("upsert m2");
    index
        .upsert_vector("alice", "m1", &unit(dimension, 2), &metadata("first again"))
        .await
        .expect("overwrite m1");
    index
        .upsert_vector("bob", "m1", &unit(dimension, 1), &metadata("bob"))
        .await
        .expect("upsert bob");

    let err = index
        .upsert_vector("alice", "bad", &[1.0, 0.0], &metadata("bad"))
        .await
        .expect_err("dimension mismatch");
    assert!(matches!(err, IndexError::DimensionMismatch { .. }));

    assert_eq!(index.stats("alice").await.expect("stats").total_vectors, 2);

    let matches = index
        .query("alice", &unit(dimension, 2), 10, None)
        .await
        .expect("query");
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].provider_message_id, "m1");
    assert_eq!(matches[0].metadata.subject, "first again");
    assert!((matches[0].similarity_score - 1.0).abs() < 1e-5);

    let filtered = index
        .query("alice", &unit(dimension, 2), 10, Some("note"))
        .await
        .expect("filtered query");
    assert!(filtered.is_empty());

    assert_eq!(index.delete_namespace("alice").await.expect("delete"), 2);
    assert!(
        index
            .query("alice", &unit(dimension, 1), 10, None)
            .await
            .expect("query after delete")
            .is_empty()
    );
    assert_eq!(index.stats("bob").await.expect("bob stats").total_vectors, 1);

    test_db.close().await.expect("failed to drop test database");
}
