#[macro_use]
extern crate rocket;

pub mod chat;
pub(crate) mod config;
pub mod db;
pub mod error;
pub mod mail;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod search;
pub mod state;
pub mod store;
pub mod sync;

use crate::chat::{GenerationConfig, OpenAiGenerator};
use crate::db::LifeosDb;
use crate::mail::GmailClient;
use crate::request_logger::{RequestLogger, SchemaVersion};
use crate::search::{EmbeddingClient, EmbeddingConfig, PgVectorIndex};
use crate::state::{AppConfig, AppState, Backends};
use crate::store::PgMessageStore;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Build the production services on top of the shared pool.
pub async fn build_backends(
    pool: rocket_db_pools::sqlx::PgPool,
    config: &AppConfig,
) -> Result<Backends, String> {
    let embedding_config = EmbeddingConfig::from_env();
    if embedding_config.dimension != config.index.dimension {
        return Err(format!(
            "embedding dimension {} does not match index dimension {}",
            embedding_config.dimension, config.index.dimension
        ));
    }

    let embedder = EmbeddingClient::new(embedding_config)
        .map_err(|e| format!("failed to initialize embedding client: {e}"))?;
    if let Err(err) = embedder.healthcheck().await {
        log::warn!(
            "embedding service health check failed: {}. Continuing; sync and chat will report failures per request.",
            err
        );
    }

    let mailbox = GmailClient::new(&config.mailbox)
        .map_err(|e| format!("failed to initialize mailbox client: {e}"))?;
    let generator = OpenAiGenerator::new(GenerationConfig::from_env())
        .map_err(|e| format!("failed to initialize generation client: {e}"))?;

    Ok(Backends {
        mailbox: Arc::new(mailbox),
        store: Arc::new(PgMessageStore::new(pool.clone())),
        index: Arc::new(PgVectorIndex::new(pool, config.index.clone())),
        embedder: Arc::new(embedder),
        generator: Arc::new(generator),
    })
}

/// Mount the OpenAPI routes, docs UIs, catchers and response fairings.
pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .attach(SchemaVersion)
        .register("/", error::catchers())
        .mount("/api", routes::api_routes())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("LifeOS API", "../../openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    let rocket = rocket::build()
        .attach(RequestLogger)
        .attach(LifeosDb::init())
        .attach(cors)
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match LifeosDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    match db::run_migrations(&pool).await {
                        Ok(()) => Ok(rocket),
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite("Initialize Services", |rocket| async move {
            let Some(db) = LifeosDb::fetch(&rocket) else {
                log::error!("database pool not available for services");
                return Err(rocket);
            };
            let pool = (**db).clone();
            let config = AppConfig::from_env();

            match build_backends(pool, &config).await {
                Ok(backends) => {
                    log::info!(
                        "services ready (index={}, dimension={})",
                        config.index.index_name,
                        config.index.dimension
                    );
                    Ok(rocket.manage(AppState::new(backends, config)))
                }
                Err(e) => {
                    log::error!("{}", e);
                    Err(rocket)
                }
            }
        }));

    mount_api(rocket)
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::chat::ChatConfig;
    use crate::mail::MailboxConfig;
    use crate::search::{IndexConfig, MemoryVectorIndex};
    use crate::state::{AppConfig, AppState, Backends};
    use crate::store::MemoryMessageStore;
    use crate::sync::SyncConfig;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket};
    use std::sync::Arc;
    use std::time::Duration;

    pub use database::{TestDatabase, TestDatabaseError};
    pub use fakes::{FakeEmbedder, FakeGenerator, FakeMailbox};

    /// Small vectors keep fixtures readable.
    pub const TEST_DIMENSION: usize = 16;

    pub fn test_index_config() -> IndexConfig {
        IndexConfig {
            index_name: "lifeos-test".to_string(),
            dimension: TEST_DIMENSION,
            max_top_k: 50,
            default_top_k: 5,
        }
    }

    /// Deterministic configuration that ignores the process environment.
    pub fn test_app_config() -> AppConfig {
        AppConfig {
            index: test_index_config(),
            mailbox: MailboxConfig {
                api_url: "http://mailbox.invalid".to_string(),
                base_query: "category:primary".to_string(),
                request_timeout: Duration::from_secs(5),
                fetch_concurrency: 2,
            },
            sync: SyncConfig {
                default_max_emails: 50,
                max_emails_limit: 500,
                default_batch_size: 10,
                max_batch_size: 100,
                embed_concurrency: 2,
                max_embed_iterations: 50,
            },
            chat: ChatConfig {
                default_max_context_items: 25,
                default_max_tokens_per_item: 200,
            },
        }
    }

    /// In-memory store and index with fake external services.
    pub struct TestServices {
        pub mailbox: Arc<FakeMailbox>,
        pub store: Arc<MemoryMessageStore>,
        pub index: Arc<MemoryVectorIndex>,
        pub embedder: Arc<FakeEmbedder>,
        pub generator: Arc<FakeGenerator>,
    }

    impl TestServices {
        pub fn new() -> Self {
            Self {
                mailbox: Arc::new(FakeMailbox::new()),
                store: Arc::new(MemoryMessageStore::new()),
                index: Arc::new(MemoryVectorIndex::new(test_index_config())),
                embedder: Arc::new(FakeEmbedder::new(TEST_DIMENSION)),
                generator: Arc::new(FakeGenerator::answering("fake answer")),
            }
        }

        pub fn backends(&self) -> Backends {
            Backends {
                mailbox: self.mailbox.clone(),
                store: self.store.clone(),
                index: self.index.clone(),
                embedder: self.embedder.clone(),
                generator: self.generator.clone(),
            }
        }

        pub fn app_state(&self) -> AppState {
            AppState::new(self.backends(), test_app_config())
        }
    }

    impl Default for TestServices {
        fn default() -> Self {
            Self::new()
        }
    }

    pub mod fakes {
        use crate::chat::{ChatMessage, GenerationError, Generator};
        use crate::mail::{MailboxClient, MailboxCredentials, MessagePage, TransportError};
        use crate::models::NewMessage;
        use crate::search::{Embedder, EmbeddingError};
        use parking_lot::Mutex;
        use reqwest::StatusCode;
        use std::collections::HashSet;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio_util::sync::CancellationToken;

        #[derive(Default)]
        struct MailboxState {
            messages: Vec<NewMessage>,
            failing_ids: HashSet<String>,
            unauthorized_ids: HashSet<String>,
            fail_pages_from: Option<usize>,
            cancel_on_fetch: Option<(String, CancellationToken)>,
            queries: Vec<String>,
            fetched: Vec<String>,
        }

        /// Mailbox serving a fixed list of messages, newest first, with the
        /// page token being the offset of the next page.
        #[derive(Default)]
        pub struct FakeMailbox {
            state: Mutex<MailboxState>,
            pages_served: AtomicUsize,
        }

        impl FakeMailbox {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn with_messages(messages: Vec<NewMessage>) -> Self {
                let mailbox = Self::new();
                mailbox.set_messages(messages);
                mailbox
            }

            pub fn set_messages(&self, messages: Vec<NewMessage>) {
                self.state.lock().messages = messages;
            }

            /// `get_message` fails with a provider error for this id.
            pub fn fail_message(&self, id: &str) {
                self.state.lock().failing_ids.insert(id.to_string());
            }

            /// `get_message` reports a rejected token for this id.
            pub fn reject_token_for(&self, id: &str) {
                self.state.lock().unauthorized_ids.insert(id.to_string());
            }

            /// Listing fails from the given zero-based page onwards.
            pub fn fail_pages_from(&self, page: usize) {
                self.state.lock().fail_pages_from = Some(page);
            }

            /// Cancel `token` once `get_message` has served this id.
            pub fn cancel_on_fetch(&self, id: &str, token: CancellationToken) {
                self.state.lock().cancel_on_fetch = Some((id.to_string(), token));
            }

            pub fn queries(&self) -> Vec<String> {
                self.state.lock().queries.clone()
            }

            /// Ids passed to `get_message`, in call order.
            pub fn fetched_ids(&self) -> Vec<String> {
                self.state.lock().fetched.clone()
            }

            pub fn pages_served(&self) -> usize {
                self.pages_served.load(Ordering::SeqCst)
            }
        }

        #[rocket::async_trait]
        impl MailboxClient for FakeMailbox {
            async fn list_messages(
                &self,
                _credentials: &MailboxCredentials,
                query: &str,
                max_results: usize,
                page_token: Option<&str>,
            ) -> Result<MessagePage, TransportError> {
                let page = self.pages_served.fetch_add(1, Ordering::SeqCst);
                let mut state = self.state.lock();
                state.queries.push(query.to_string());

                if state.fail_pages_from.is_some_and(|from| page >= from) {
                    return Err(TransportError::Status {
                        status: StatusCode::BAD_GATEWAY,
                        body: "listing unavailable".to_string(),
                    });
                }

                let offset = match page_token {
                    Some(token) => token
                        .parse::<usize>()
                        .map_err(|e| TransportError::Decode(e.to_string()))?,
                    None => 0,
                };
                let end = (offset + max_results).min(state.messages.len());
                let ids = state.messages[offset.min(end)..end]
                    .iter()
                    .map(|message| message.provider_message_id.clone())
                    .collect();

                Ok(MessagePage {
                    ids,
                    next_page_token: (end < state.messages.len()).then(|| end.to_string()),
                })
            }

            async fn get_message(
                &self,
                _credentials: &MailboxCredentials,
                id: &str,
            ) -> Result<NewMessage, TransportError> {
                let mut state = self.state.lock();
                state.fetched.push(id.to_string());

                if state.unauthorized_ids.contains(id) {
                    return Err(TransportError::Unauthorized);
                }
                if state.failing_ids.contains(id) {
                    return Err(TransportError::Status {
                        status: StatusCode::INTERNAL_SERVER_ERROR,
                        body: format!("cannot load {id}"),
                    });
                }

                let found = state
                    .messages
                    .iter()
                    .find(|message| message.provider_message_id == id)
                    .cloned()
                    .ok_or_else(|| TransportError::Status {
                        status: StatusCode::NOT_FOUND,
                        body: format!("unknown message {id}"),
                    });

                if let Some((cancel_id, token)) = &state.cancel_on_fetch {
                    if cancel_id == id {
                        token.cancel();
                    }
                }
                found
            }
        }

        /// Bag-of-words embedder: each lowercase word bumps one of `dimension`
        /// buckets, so texts sharing words have positive cosine similarity.
        pub struct FakeEmbedder {
            dimension: usize,
            failing_markers: Mutex<HashSet<String>>,
            short_markers: Mutex<HashSet<String>>,
            cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
            calls: AtomicUsize,
        }

        impl FakeEmbedder {
            pub fn new(dimension: usize) -> Self {
                Self {
                    dimension,
                    failing_markers: Mutex::new(HashSet::new()),
                    short_markers: Mutex::new(HashSet::new()),
                    cancel_on_call: Mutex::new(None),
                    calls: AtomicUsize::new(0),
                }
            }

            /// Any text containing `marker` fails to embed.
            pub fn fail_texts_containing(&self, marker: &str) {
                self.failing_markers.lock().insert(marker.to_string());
            }

            /// Texts containing `marker` get a vector one component short.
            pub fn short_vectors_for(&self, marker: &str) {
                self.short_markers.lock().insert(marker.to_string());
            }

            /// Cancel `token` during the given one-based `embed_documents` call.
            /// That call still returns its vectors.
            pub fn cancel_on_call(&self, call: usize, token: CancellationToken) {
                *self.cancel_on_call.lock() = Some((call, token));
            }

            pub fn clear_failures(&self) {
                self.failing_markers.lock().clear();
            }

            /// Number of `embed_documents` calls so far.
            pub fn calls(&self) -> usize {
                self.calls.load(Ordering::SeqCst)
            }

            pub fn vector_for(&self, text: &str) -> Vec<f32> {
                let mut vector = vec![0.0; self.dimension];
                for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                    let bucket = word
                        .to_lowercase()
                        .bytes()
                        .fold(2166136261u32, |hash, byte| (hash ^ byte as u32).wrapping_mul(16777619));
                    vector[bucket as usize % self.dimension] += 1.0;
                }
                if vector.iter().all(|value| *value == 0.0) {
                    vector[0] = 1.0;
                }
                vector
            }
        }

        #[rocket::async_trait]
        impl Embedder for FakeEmbedder {
            fn dimension(&self) -> usize {
                self.dimension
            }

            async fn embed_documents(
                &self,
                documents: &[String],
            ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some((at, token)) = &*self.cancel_on_call.lock() {
                    if *at == call {
                        token.cancel();
                    }
                }

                let markers = self.failing_markers.lock().clone();
                if let Some(marker) = markers
                    .iter()
                    .find(|marker| documents.iter().any(|doc| doc.contains(marker.as_str())))
                {
                    return Err(EmbeddingError::Rejected(format!("refusing text with {marker}")));
                }

                let short = self.short_markers.lock().clone();
                Ok(documents
                    .iter()
                    .map(|doc| {
                        let mut vector = self.vector_for(doc);
                        if short.iter().any(|marker| doc.contains(marker.as_str())) {
                            vector.pop();
                        }
                        vector
                    })
                    .collect())
            }
        }

        /// Generator returning a canned answer, or failing when configured so.
        pub struct FakeGenerator {
            answer: Option<String>,
            prompts: Mutex<Vec<Vec<ChatMessage>>>,
        }

        impl FakeGenerator {
            pub fn answering(answer: &str) -> Self {
                Self {
                    answer: Some(answer.to_string()),
                    prompts: Mutex::new(Vec::new()),
                }
            }

            pub fn failing() -> Self {
                Self {
                    answer: None,
                    prompts: Mutex::new(Vec::new()),
                }
            }

            /// Every message list passed to `generate`.
            pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
                self.prompts.lock().clone()
            }
        }

        #[rocket::async_trait]
        impl Generator for FakeGenerator {
            async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
                self.prompts.lock().push(messages.to_vec());
                self.answer.clone().ok_or(GenerationError::Api {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    message: "model overloaded".to_string(),
                })
            }
        }
    }

    pub mod database {
        use crate::db::run_migrations;
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use uuid::Uuid;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Migrated database inside a disposable Postgres container.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine").with_wait_for(
                    WaitFor::message_on_stderr("database system is ready to accept connections"),
                );

                let container = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres")
                    .start()
                    .await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let base_options: PgConnectOptions = url.parse()?;
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(base_options.clone().log_statements(LevelFilter::Off))
                    .await?;

                let database_name = format!("lifeos_{}", Uuid::new_v4().simple());
                sqlx::query(&format!("CREATE DATABASE \"{}\" TEMPLATE template0", database_name))
                    .execute(&admin_pool)
                    .await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(
                        base_options
                            .database(&database_name)
                            .log_statements(LevelFilter::Off),
                    )
                    .await?;

                run_migrations(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    container: Some(container),
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close the pool and stop the container.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }
                if let Some(container) = self.container.take() {
                    drop(container);
                }
                Ok(())
            }
        }
    }

    /// Builder for Rocket instances backed by in-memory services.
    pub struct TestRocketBuilder {
        figment: Figment,
        state: Option<AppState>,
    }

    impl TestRocketBuilder {
        /// Random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                state: None,
            }
        }

        /// Serve the API from the given services instead of fresh defaults.
        pub fn with_services(mut self, services: &TestServices) -> Self {
            self.state = Some(services.app_state());
            self
        }

        pub fn with_state(mut self, state: AppState) -> Self {
            self.state = Some(state);
            self
        }

        pub fn build(self) -> Rocket<Build> {
            let state = self
                .state
                .unwrap_or_else(|| TestServices::new().app_state());
            crate::mount_api(rocket::custom(self.figment).manage(state))
        }

        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }
}
