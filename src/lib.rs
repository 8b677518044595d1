#[macro_use]
extern crate rocket;

pub mod backend;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod routes;
pub mod scheduler;
pub mod store;

use crate::backend::{Backend, BackendClient};
use crate::config::ServiceConfig;
use crate::db::ReportsDb;
use crate::dispatch::Dispatcher;
use crate::extract::EmailExtractor;
use crate::ingest::{DropDirectory, ImapMailbox, Ingestor, MessageSource};
use crate::scheduler::{ReportService, Scheduler, SchedulerHandle};
use crate::store::{PgReportStore, ReportStore};
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Running scheduler, stopped by the shutdown fairing.
#[derive(Default)]
pub struct SchedulerSlot(Mutex<Option<SchedulerHandle>>);

/// Wire the drop directory, the optional mailbox, the extractor and the
/// dispatcher into one service.
pub fn build_service(
    config: &ServiceConfig,
    store: Arc<dyn ReportStore>,
    backend: Arc<dyn Backend>,
) -> ReportService {
    let mut sources: Vec<Box<dyn MessageSource>> =
        vec![Box::new(DropDirectory::new(config.mail_dir.clone()))];
    if let Some(imap) = config.imap.clone() {
        sources.push(Box::new(ImapMailbox::new(imap)));
    }

    let ingestor = Ingestor::new(
        sources,
        EmailExtractor::new(config.default_deadline),
        store.clone(),
    );
    let dispatcher = Dispatcher::new(store, backend, config.dispatch.clone());

    ReportService::new(ingestor, dispatcher)
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    rocket::build()
        .attach(ReportsDb::init())
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match ReportsDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        match store::run_migrations(&pool).await {
                            Ok(_) => {
                                log::info!("database migrations successful");
                                Ok(rocket)
                            }
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
            },
        ))
        .attach(AdHoc::try_on_ignite(
            "Report Service",
            |rocket| async move {
                let config = match ServiceConfig::from_env() {
                    Ok(config) => config,
                    Err(e) => {
                        log::error!("invalid configuration: {}", e);
                        return Err(rocket);
                    }
                };

                let Some(db) = ReportsDb::fetch(&rocket) else {
                    log::error!("database pool not available for report store");
                    return Err(rocket);
                };
                let store: Arc<dyn ReportStore> = Arc::new(PgReportStore::new((**db).clone()));

                let backend = match BackendClient::new(&config.backend) {
                    Ok(client) => client,
                    Err(e) => {
                        log::error!("failed to initialize backend client: {}", e);
                        return Err(rocket);
                    }
                };
                log::info!("using backend at {}", backend.base_url());

                if let Err(e) = std::fs::create_dir_all(&config.mail_dir) {
                    log::warn!(
                        "failed to create mail directory {}: {}",
                        config.mail_dir.display(),
                        e
                    );
                }

                let service = Arc::new(build_service(&config, store.clone(), Arc::new(backend)));

                Ok(rocket
                    .manage(config)
                    .manage(store)
                    .manage(service)
                    .manage(CancellationToken::new())
                    .manage(SchedulerSlot::default()))
            },
        ))
        .attach(AdHoc::on_liftoff("Spawn Report Scheduler", |rocket| {
            Box::pin(async move {
                let (Some(service), Some(config), Some(cancel), Some(slot)) = (
                    rocket.state::<Arc<ReportService>>(),
                    rocket.state::<ServiceConfig>(),
                    rocket.state::<CancellationToken>(),
                    rocket.state::<SchedulerSlot>(),
                ) else {
                    log::error!("failed to spawn report scheduler: service state not found");
                    return;
                };

                let handle = Scheduler::new(service.clone(), config.check_every, cancel.clone())
                    .spawn();
                *slot.0.lock().await = Some(handle);
            })
        }))
        .attach(AdHoc::on_shutdown("Stop Report Scheduler", |rocket| {
            Box::pin(async move {
                if let Some(slot) = rocket.state::<SchedulerSlot>() {
                    if let Some(handle) = slot.0.lock().await.take() {
                        handle.shutdown().await;
                    }
                }
            })
        }))
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health routes
                routes::health::health_check,
                // Report routes
                routes::reports::list_reports,
                routes::reports::get_report,
                routes::reports::delete_report,
                routes::reports::trigger_ingest,
                routes::reports::trigger_dispatch,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new(
                        "KernelCI Reports API",
                        "../../v1/openapi.json",
                    )],
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

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::backend::{
        Backend, BackendError, BackendJobResult, BackendResponse, CountEntry, CountResult,
        JobQuery, JobQueryResult, JobStatus, SendRequest,
    };
    use crate::models::{NewReportRequest, ReportRequest};
    use crate::scheduler::ReportService;
    use crate::store::{ReportStore, StoreError};
    use chrono::{DateTime, Duration, Utc};
    use reqwest::StatusCode;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Announcement-shaped request for `4.4.30` with patch counts 70/71.
    pub fn new_report_request(message_id: &str, created_on: DateTime<Utc>) -> NewReportRequest {
        NewReportRequest {
            tree: "stable-queue".to_string(),
            version: "4.4.30".to_string(),
            branch: None,
            patches: vec!["70".to_string(), "71".to_string()],
            subject: "[PATCH 4.4 000/70] 4.4.31-stable review".to_string(),
            message_id: message_id.to_string(),
            to_addrs: vec!["linux-kernel@vger.kernel.org".to_string()],
            cc_addrs: vec!["stable@vger.kernel.org".to_string()],
            from_name: Some("Greg KH".to_string()),
            from_address: "gregkh@example.org".to_string(),
            created_on,
            deadline: created_on + Duration::days(2),
        }
    }

    /// Backend job result with the given status and describe string.
    pub fn job_result(status: JobStatus, describe: &str) -> BackendJobResult {
        BackendJobResult {
            job: "stable-queue".to_string(),
            kernel: describe.to_string(),
            git_branch: None,
            status,
            git_describe: Some(describe.to_string()),
            git_describe_v: None,
            boot_count: None,
        }
    }

    pub fn jobs(results: Vec<BackendJobResult>) -> BackendResponse<JobQueryResult> {
        BackendResponse::ok(JobQueryResult {
            count: results.len() as u64,
            result: results,
        })
    }

    pub fn boots(count: u64) -> BackendResponse<CountResult> {
        BackendResponse::ok(CountResult {
            result: vec![CountEntry { count }],
        })
    }

    /// A genuine transport error, produced by building a request for an
    /// unparsable URL.
    pub fn transport_error() -> BackendError {
        match reqwest::Client::new().get("not a url").build() {
            Err(err) => BackendError::Transport(err),
            Ok(_) => panic!("request with an invalid URL should not build"),
        }
    }

    /// In-memory [`ReportStore`] with the same uniqueness and ordering rules
    /// as the Postgres store.
    #[derive(Default)]
    pub struct MemoryReportStore {
        state: Mutex<MemoryState>,
    }

    #[derive(Default)]
    struct MemoryState {
        next_id: i64,
        requests: Vec<ReportRequest>,
    }

    impl MemoryReportStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Insert a request directly, bypassing duplicate detection.
        pub fn seed(&self, request: NewReportRequest, retries: i32) -> i64 {
            let mut state = self.state.lock().expect("store lock");
            state.next_id += 1;
            let mut stored = ReportRequest::from_new(state.next_id, request);
            stored.retries = retries;
            state.requests.push(stored);
            state.next_id
        }

        pub fn snapshot(&self) -> Vec<ReportRequest> {
            self.state.lock().expect("store lock").requests.clone()
        }
    }

    #[rocket::async_trait]
    impl ReportStore for MemoryReportStore {
        async fn insert_if_absent(
            &self,
            request: &NewReportRequest,
        ) -> Result<Option<i64>, StoreError> {
            let mut state = self.state.lock().expect("store lock");
            let duplicate = state.requests.iter().any(|existing| {
                existing.message_id == request.message_id && existing.subject == request.subject
            });
            if duplicate {
                log::warn!("duplicate report request for message {}", request.message_id);
                return Ok(None);
            }

            state.next_id += 1;
            let id = state.next_id;
            state
                .requests
                .push(ReportRequest::from_new(id, request.clone()));
            Ok(Some(id))
        }

        async fn list_pending(&self) -> Result<Vec<ReportRequest>, StoreError> {
            let mut requests = self.snapshot();
            requests.sort_by(|a, b| a.created_on.cmp(&b.created_on).then(a.id.cmp(&b.id)));
            Ok(requests)
        }

        async fn get(&self, id: i64) -> Result<Option<ReportRequest>, StoreError> {
            Ok(self.snapshot().into_iter().find(|request| request.id == id))
        }

        async fn increment_retries(&self, id: i64) -> Result<(), StoreError> {
            let mut state = self.state.lock().expect("store lock");
            if let Some(request) = state.requests.iter_mut().find(|request| request.id == id) {
                request.retries += 1;
            }
            Ok(())
        }

        async fn delete(&self, id: i64) -> Result<bool, StoreError> {
            let mut state = self.state.lock().expect("store lock");
            let before = state.requests.len();
            state.requests.retain(|request| request.id != id);
            Ok(state.requests.len() != before)
        }
    }

    enum Scripted<T> {
        Reply(T),
        Unreachable,
    }

    /// [`Backend`] replaying queued responses.
    ///
    /// Once a queue is empty the defaults are: no job results, zero boots,
    /// delivery accepted with `200`.
    #[derive(Default)]
    pub struct ScriptedBackend {
        jobs: Mutex<VecDeque<Scripted<BackendResponse<JobQueryResult>>>>,
        counts: Mutex<VecDeque<Scripted<BackendResponse<CountResult>>>>,
        sends: Mutex<VecDeque<Scripted<StatusCode>>>,
        queries: Mutex<Vec<JobQuery>>,
        sent: Mutex<Vec<SendRequest>>,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_jobs(&self, response: BackendResponse<JobQueryResult>) -> &Self {
            self.jobs.lock().expect("script lock").push_back(Scripted::Reply(response));
            self
        }

        pub fn push_jobs_unreachable(&self) -> &Self {
            self.jobs.lock().expect("script lock").push_back(Scripted::Unreachable);
            self
        }

        pub fn push_count(&self, response: BackendResponse<CountResult>) -> &Self {
            self.counts.lock().expect("script lock").push_back(Scripted::Reply(response));
            self
        }

        pub fn push_send(&self, status: StatusCode) -> &Self {
            self.sends.lock().expect("script lock").push_back(Scripted::Reply(status));
            self
        }

        pub fn queries(&self) -> Vec<JobQuery> {
            self.queries.lock().expect("script lock").clone()
        }

        pub fn sent(&self) -> Vec<SendRequest> {
            self.sent.lock().expect("script lock").clone()
        }
    }

    #[rocket::async_trait]
    impl Backend for ScriptedBackend {
        async fn query_jobs(
            &self,
            query: &JobQuery,
        ) -> Result<BackendResponse<JobQueryResult>, BackendError> {
            self.queries.lock().expect("script lock").push(query.clone());
            match self.jobs.lock().expect("script lock").pop_front() {
                Some(Scripted::Reply(response)) => Ok(response),
                Some(Scripted::Unreachable) => Err(transport_error()),
                None => Ok(jobs(Vec::new())),
            }
        }

        async fn count_boots(
            &self,
            _job: &str,
            _kernel: &str,
        ) -> Result<BackendResponse<CountResult>, BackendError> {
            match self.counts.lock().expect("script lock").pop_front() {
                Some(Scripted::Reply(response)) => Ok(response),
                Some(Scripted::Unreachable) => Err(transport_error()),
                None => Ok(boots(0)),
            }
        }

        async fn send_report(&self, request: &SendRequest) -> Result<StatusCode, BackendError> {
            self.sent.lock().expect("script lock").push(request.clone());
            match self.sends.lock().expect("script lock").pop_front() {
                Some(Scripted::Reply(status)) => Ok(status),
                Some(Scripted::Unreachable) => Err(transport_error()),
                None => Ok(StatusCode::OK),
            }
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Freshly migrated database, unique per test.
        ///
        /// Call [`TestDatabase::close`] to drop it; a test that panics leaves
        /// the database behind until its container goes away.
        pub struct TestDatabase {
            pool: PgPool,
            admin_options: PgConnectOptions,
            database_name: String,
            _container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Use the server named by `TEST_DATABASE_URL`, or start a
            /// disposable Postgres container when unset.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) => Self::provision(&url, None).await,
                    Err(_) => Self::new().await,
                }
            }

            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = GenericImage::new("postgres", "16-alpine")
                    .with_wait_for(WaitFor::message_on_stderr(
                        "database system is ready to accept connections",
                    ))
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres")
                    .start()
                    .await?;

                let host = container.get_host().await?;
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                Self::provision(&admin_url, Some(container)).await
            }

            async fn provision(
                admin_url: &str,
                container: Option<ContainerAsync<GenericImage>>,
            ) -> Result<Self, TestDatabaseError> {
                let options: PgConnectOptions = admin_url.parse()?;
                let admin_options = options.log_statements(LevelFilter::Off).database("postgres");
                let database_name = format!("reports_test_{}", Uuid::new_v4().simple());

                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;
                sqlx::query(&format!("CREATE DATABASE \"{}\"", database_name))
                    .execute(&admin_pool)
                    .await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(admin_options.clone().database(&database_name))
                    .await?;
                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool,
                    admin_options,
                    database_name,
                    _container: container,
                })
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool.clone()
            }

            /// Close the pool and drop the database.
            pub async fn close(self) -> Result<(), TestDatabaseError> {
                self.pool.close().await;

                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(self.admin_options)
                    .await?;
                sqlx::query(&format!("DROP DATABASE \"{}\" WITH (FORCE)", self.database_name))
                    .execute(&admin_pool)
                    .await?;
                admin_pool.close().await;
                Ok(())
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        store: Option<Arc<dyn ReportStore>>,
        service: Option<Arc<ReportService>>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                ..Default::default()
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        pub fn manage_store(mut self, store: Arc<dyn ReportStore>) -> Self {
            self.store = Some(store);
            self
        }

        pub fn manage_service(mut self, service: Arc<ReportService>) -> Self {
            self.service = Some(service);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment).manage(CancellationToken::new());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(store) = self.store {
                rocket = rocket.manage(store);
            }
            if let Some(service) = self.service {
                rocket = rocket.manage(service);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Asynchronous local client, for tests that keep requests in flight.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
