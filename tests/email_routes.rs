use lifeos_server::models::NewMessage;
use lifeos_server::request_logger::{SCHEMA_HEADER, SCHEMA_VERSION};
use lifeos_server::routes::emails::{
    CancelSyncResponse, ClearEmbeddingsResponse, ClearStoreResponse, EmbeddingStatsResponse,
    PurgeResponse, SearchResponse, SyncEmailsResponse, SyncStatsResponse,
};
use lifeos_server::search::EmbeddingIndex;
use lifeos_server::store::MessageStore;
use lifeos_server::test_support::{TestRocketBuilder, TestServices};
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::Client;
use rocket::serde::json::json;

fn bearer() -> Header<'static> {
    Header::new("Authorization", "Bearer test-mailbox-token")
}

fn mailbox_messages() -> Vec<NewMessage> {
    [
        ("m1", "Flight booking", "Your flight to Lisbon departs at nine"),
        ("m2", "Dentist appointment", "Reminder about the dentist on Tuesday"),
        ("m3", "Quarterly invoice", "Invoice for hosting services attached"),
    ]
    .into_iter()
    .map(|(id, subject, body)| NewMessage {
        provider_message_id: id.to_string(),
        subject: subject.to_string(),
        from: "sender@example.com".to_string(),
        to: "alice@example.com".to_string(),
        date: "Mon, 2 Jun 2025 09:00:00 +0000".to_string(),
        snippet: format!("{subject} snippet"),
        body: Some(body.to_string()),
        ..Default::default()
    })
    .collect()
}

async fn client_with(services: &TestServices) -> Client {
    TestRocketBuilder::new()
        .with_services(services)
        .async_client()
        .await
}

async fn synced_client(services: &TestServices) -> Client {
    services.mailbox.set_messages(mailbox_messages());
    let client = client_with(services).await;
    {
        let response = client
            .post("/api/emails/sync")
            .header(ContentType::JSON)
            .header(bearer())
            .body(json!({"user_id": "alice", "max_emails": 10, "batch_size": 5}).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }
    client
}

#[rocket::async_test]
async fn sync_reports_canonical_counts() {
    let services = TestServices::new();
    services.mailbox.set_messages(mailbox_messages());
    let client = client_with(&services).await;

    let response = client
        .post("/api/emails/sync")
        .header(ContentType::JSON)
        .header(bearer())
        .body(
            json!({
                "user_id": "alice",
                "max_emails": 10,
                "batch_size": 2,
                "start_date": "2025/06/01",
                "end_date": "2025/06/30"
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.headers().get_one(SCHEMA_HEADER), Some(SCHEMA_VERSION));

    let body: SyncEmailsResponse = response.into_json().await.expect("sync payload");
    assert!(body.success);
    assert_eq!(body.report.new_emails_count, 3);
    assert_eq!(body.report.total_emails_count, 3);
    assert_eq!(body.report.indexed_emails_count, 3);
    assert_eq!(body.report.unprocessed_emails_count, 0);
    assert!(body.report.completed);
}

#[rocket::async_test]
async fn sync_payload_is_flat() {
    let services = TestServices::new();
    services.mailbox.set_messages(mailbox_messages());
    let client = client_with(&services).await;

    let response = client
        .post("/api/emails/sync")
        .header(ContentType::JSON)
        .header(bearer())
        .body(json!({"user_id": "alice"}).to_string())
        .dispatch()
        .await;

    let body: serde_json::Value = response.into_json().await.expect("json");
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["new_emails_count"], json!(3));
    assert_eq!(body["stored_emails_count"], json!(3));
    assert!(body.get("error").is_none());
}

#[rocket::async_test]
async fn sync_requires_bearer_token() {
    let services = TestServices::new();
    let client = client_with(&services).await;

    let response = client
        .post("/api/emails/sync")
        .header(ContentType::JSON)
        .body(json!({"user_id": "alice"}).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Unauthorized);
    let body: serde_json::Value = response.into_json().await.expect("json error body");
    assert_eq!(body["error"], json!("Unauthorized"));
    assert_eq!(services.mailbox.pages_served(), 0);
}

#[rocket::async_test]
async fn sync_rejects_unknown_fields_and_bad_sizes() {
    let services = TestServices::new();
    let client = client_with(&services).await;

    let unknown = client
        .post("/api/emails/sync")
        .header(ContentType::JSON)
        .header(bearer())
        .body(json!({"user_id": "alice", "maxEmails": 5}).to_string())
        .dispatch()
        .await;
    assert!(unknown.status().class().is_client_error());

    let zero_batch = client
        .post("/api/emails/sync")
        .header(ContentType::JSON)
        .header(bearer())
        .body(json!({"user_id": "alice", "batch_size": 0}).to_string())
        .dispatch()
        .await;
    assert_eq!(zero_batch.status(), Status::BadRequest);

    let inverted = client
        .post("/api/emails/sync")
        .header(ContentType::JSON)
        .header(bearer())
        .body(
            json!({"user_id": "alice", "start_date": "2025/07/01", "end_date": "2025/06/01"})
                .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(inverted.status(), Status::BadRequest);

    let blank_user = client
        .post("/api/emails/sync")
        .header(ContentType::JSON)
        .header(bearer())
        .body(json!({"user_id": "  "}).to_string())
        .dispatch()
        .await;
    assert_eq!(blank_user.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn aborted_sync_still_returns_counts() {
    let services = TestServices::new();
    services.mailbox.set_messages(mailbox_messages());
    services.mailbox.fail_pages_from(1);
    let client = client_with(&services).await;

    let response = client
        .post("/api/emails/sync")
        .header(ContentType::JSON)
        .header(bearer())
        .body(json!({"user_id": "alice", "batch_size": 2}).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let body: SyncEmailsResponse = response.into_json().await.expect("sync payload");
    assert!(!body.success);
    assert!(body.report.error.is_some());
    assert_eq!(body.report.new_emails_count, 2);
}

#[rocket::async_test]
async fn sync_stats_reflect_store() {
    let services = TestServices::new();
    let client = synced_client(&services).await;

    let response = client
        .get("/api/emails/sync/stats?user_id=alice")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body: SyncStatsResponse = response.into_json().await.expect("stats payload");
    assert!(body.success);
    assert_eq!(body.user_id, "alice");
    assert_eq!(body.total_emails_count, 3);
    assert_eq!(body.processed_emails_count, 3);
    assert_eq!(body.unprocessed_emails_count, 0);
    assert!(body.last_sync_date.is_some());
}

#[rocket::async_test]
async fn stats_require_user_id() {
    let services = TestServices::new();
    let client = client_with(&services).await;

    let missing = client.get("/api/emails/sync/stats").dispatch().await;
    assert!(missing.status().class().is_client_error());

    let blank = client
        .get("/api/emails/embeddings/stats?user_id=%20")
        .dispatch()
        .await;
    assert_eq!(blank.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn store_outage_maps_to_service_unavailable() {
    let services = TestServices::new();
    services.store.set_unavailable(true);
    let client = client_with(&services).await;

    let response = client
        .get("/api/emails/sync/stats?user_id=alice")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::ServiceUnavailable);
    let body: serde_json::Value = response.into_json().await.expect("json error body");
    assert_eq!(body["error"], json!("StorageError"));
}

#[rocket::async_test]
async fn embedding_stats_name_the_namespace() {
    let services = TestServices::new();
    let client = synced_client(&services).await;

    let response = client
        .get("/api/emails/embeddings/stats?user_id=alice")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body: EmbeddingStatsResponse = response.into_json().await.expect("stats payload");
    assert!(body.success);
    assert_eq!(body.total_emails, 3);
    assert_eq!(body.index_name, "lifeos-test");
    assert_eq!(body.namespace, "lifeos-test:alice");
    assert_eq!(body.dimension, lifeos_server::test_support::TEST_DIMENSION);
}

#[rocket::async_test]
async fn search_ranks_best_match_first() {
    let services = TestServices::new();
    let client = synced_client(&services).await;

    let response = client
        .get("/api/emails/embeddings/search?query=flight%20Lisbon&user_id=alice&top_k=2")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body: SearchResponse = response.into_json().await.expect("search payload");
    assert!(body.success);
    assert_eq!(body.results.len(), 2);
    assert_eq!(body.results[0].email_id, "m1");
    assert_eq!(body.results[0].subject, "Flight booking");
    assert!(body.results[0].similarity_score >= body.results[1].similarity_score);
}

#[rocket::async_test]
async fn search_is_scoped_to_the_user() {
    let services = TestServices::new();
    let client = synced_client(&services).await;

    let response = client
        .get("/api/emails/embeddings/search?query=flight&user_id=bob")
        .dispatch()
        .await;

    let body: SearchResponse = response.into_json().await.expect("search payload");
    assert!(body.success);
    assert!(body.results.is_empty());
}

#[rocket::async_test]
async fn search_reports_embedding_failure_in_body() {
    let services = TestServices::new();
    services.embedder.fail_texts_containing("flight");
    let client = client_with(&services).await;

    let response = client
        .get("/api/emails/embeddings/search?query=flight&user_id=alice")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let body: SearchResponse = response.into_json().await.expect("search payload");
    assert!(!body.success);
    assert!(body.error.is_some());
}

#[rocket::async_test]
async fn clear_embeddings_requeues_messages() {
    let services = TestServices::new();
    let client = synced_client(&services).await;

    let response = client
        .post("/api/emails/clear-embeddings")
        .header(ContentType::JSON)
        .body(json!({"user_id": "alice"}).to_string())
        .dispatch()
        .await;

    let body: ClearEmbeddingsResponse = response.into_json().await.expect("clear payload");
    assert!(body.success);
    assert_eq!(body.deleted_vectors, 3);
    assert_eq!(body.requeued_emails, 3);
    assert_eq!(services.index.stats("alice").await.unwrap().total_vectors, 0);
    assert_eq!(
        services.store.compute_stats("alice").await.unwrap().total_emails_count,
        3,
        "stored messages survive an index clear"
    );
}

#[rocket::async_test]
async fn clear_without_user_reports_failure() {
    let services = TestServices::new();
    let client = client_with(&services).await;

    let response = client
        .post("/api/emails/clear-supabase")
        .header(ContentType::JSON)
        .body("{}")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let body: ClearStoreResponse = response.into_json().await.expect("clear payload");
    assert!(!body.success);
    assert_eq!(body.error.as_deref(), Some("user_id is required"));
}

#[rocket::async_test]
async fn clear_store_keeps_vectors() {
    let services = TestServices::new();
    let client = synced_client(&services).await;

    let response = client
        .post("/api/emails/clear-supabase")
        .header(ContentType::JSON)
        .body(json!({"user_id": "alice"}).to_string())
        .dispatch()
        .await;

    let body: ClearStoreResponse = response.into_json().await.expect("clear payload");
    assert!(body.success);
    assert_eq!(body.deleted_emails, 3);
    assert_eq!(
        services.store.compute_stats("alice").await.unwrap().total_emails_count,
        0
    );
    assert_eq!(services.index.stats("alice").await.unwrap().total_vectors, 3);
}

#[rocket::async_test]
async fn purge_clears_both_stores() {
    let services = TestServices::new();
    let client = synced_client(&services).await;

    let response = client
        .post("/api/emails/purge")
        .header(ContentType::JSON)
        .body(json!({"user_id": "alice"}).to_string())
        .dispatch()
        .await;

    let body: PurgeResponse = response.into_json().await.expect("purge payload");
    assert!(body.success);
    assert_eq!(body.deleted_emails, 3);
    assert_eq!(body.deleted_vectors, 3);
    assert!(
        services
            .index
            .query("alice", &services.embedder.vector_for("flight"), 5, None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[rocket::async_test]
async fn cancel_without_running_sync_is_a_no_op() {
    let services = TestServices::new();
    let client = client_with(&services).await;

    let response = client
        .post("/api/emails/sync/cancel")
        .header(ContentType::JSON)
        .body(json!({"user_id": "alice"}).to_string())
        .dispatch()
        .await;

    let body: CancelSyncResponse = response.into_json().await.expect("cancel payload");
    assert!(body.success);
    assert_eq!(body.cancelled, 0);
}

#[rocket::async_test]
async fn openapi_document_lists_email_routes() {
    let services = TestServices::new();
    let client = client_with(&services).await;

    let response = client.get("/api/openapi.json").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let document: serde_json::Value = response.into_json().await.expect("openapi json");
    for path in [
        "/emails/sync",
        "/emails/sync/stats",
        "/emails/embeddings/search",
        "/chat/ask",
    ] {
        assert!(
            document["paths"].get(path).is_some(),
            "missing {path} in OpenAPI document"
        );
    }
}
