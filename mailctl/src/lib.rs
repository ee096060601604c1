//! # mailctl: control layer for an email validation service
//!
//! `mailctl` sits in front of a pool of validation servers and sells access to them in credits.
//! Users register, receive API keys, buy plans or credit packages, and submit addresses for
//! validation either one at a time or as bulk uploads processed in the background. Every check
//! costs credits, and the ledger guarantees a user is never charged for work that did not happen.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); everything lives under `/api/v1`
//! and is documented at `/docs`. State is held in process memory behind the repository handlers
//! in [`db`], so a single instance owns its data.
//!
//! ### Credit flow
//!
//! A validation request first places a hold on the user's credits through the [`ledger`]. The
//! hold is converted into consumption one address at a time as results come back, and whatever
//! was not consumed is released when the job reaches a terminal state. Cancellation, failure and
//! the stuck-job watchdog all go through the same settlement path, so a job's
//! `credits_consumed + credits_refunded` always equals what it reserved.
//!
//! ### Core components
//!
//! - [`ledger`]: per-user balances, holds, purchases, plan changes and admin overrides
//! - [`coupons`]: pure coupon evaluation, redemption lives in [`db::handlers::Coupons`]
//! - [`jobs`]: job records, the state machine, the validation daemon and the watchdog
//! - [`checker`]: the email checker collaborator (HTTP against the server pool, or local)
//! - [`billing`]: checkout and exactly-once payment verification
//! - [`admin`]: user management, credit overrides, bulk operations and the activity log
//!
//! **Background services** run alongside the HTTP server: the validation daemon, the job
//! watchdog, the plan renewer, the server health prober and the webhook sender. They share one
//! cancellation token and stop together on shutdown.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use mailctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = mailctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     mailctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod admin;
pub mod api;
pub mod auth;
pub mod billing;
pub mod checker;
pub mod config;
mod crypto;
pub mod coupons;
pub mod db;
pub mod errors;
pub mod jobs;
pub mod ledger;
pub mod limits;
mod openapi;
pub mod payment_providers;
pub mod servers;
pub mod telemetry;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, patch, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    admin::{NewUser, UserAdmin},
    api::handlers,
    billing::BillingService,
    checker::EmailChecker,
    config::CorsOrigin,
    crypto::{hash_api_key, key_preview},
    db::{
        Database,
        errors::DbError,
        handlers::{ApiKeys, Plans, Repository, Servers, Users},
        models::{api_keys::ApiKeyCreateDBRequest, plans::PlanCreateDBRequest, servers::ServerCreateDBRequest},
    },
    jobs::{JobManager, JobStore, ValidationDaemon},
    ledger::Ledger,
    limits::Limiters,
    openapi::ApiDoc,
    payment_providers::dummy::DummyProvider,
    servers::ServerPool,
    types::{Role, abbrev_uuid},
    webhooks::WebhookSender,
};

pub use config::Config;
pub use types::{ApiKeyId, JobId, UserId};

/// Application state shared across all request handlers.
///
/// Every field is a cheap handle onto shared state, so cloning the struct per request is fine.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(db)
///     .config(config)
///     .ledger(ledger)
///     // ...
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub ledger: Ledger,
    pub jobs: JobManager,
    pub checker: Arc<dyn EmailChecker>,
    pub billing: BillingService,
    pub servers: ServerPool,
    pub users: UserAdmin,
    pub limiters: Limiters,
}

/// Create the configured default plan if no plan with that name exists yet.
#[instrument(skip_all)]
fn seed_default_plan(config: &Config, db: &Database) -> anyhow::Result<()> {
    let Some(seed) = &config.credits.default_plan else {
        return Ok(());
    };
    let plans = Plans::new(db);
    if plans.get_by_name(&seed.name)?.is_some() {
        debug!(plan = %seed.name, "Default plan already exists");
        return Ok(());
    }
    plans.create(&PlanCreateDBRequest {
        name: seed.name.clone(),
        description: None,
        price: seed.price,
        credits_limit: seed.credits_limit,
        billing_period_days: seed.billing_period_days,
        is_active: true,
    })?;
    info!(plan = %seed.name, "Created default plan");
    Ok(())
}

/// Register the configured validation servers. URLs that are already known are left alone.
#[instrument(skip_all)]
fn seed_servers(config: &Config, db: &Database) -> anyhow::Result<()> {
    let servers = Servers::new(db);
    for seed in &config.servers.pool {
        match servers.create(&ServerCreateDBRequest {
            name: seed.name.clone(),
            url: seed.url.to_string(),
            weight: seed.weight,
        }) {
            Ok(server) => info!(server_id = %abbrev_uuid(&server.id), url = %server.url, "Registered validation server"),
            Err(DbError::UniqueViolation { value, .. }) => debug!(url = %value, "Validation server already registered"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Make sure the configured admin exists and holds the bootstrap key, if one is configured.
///
/// When no key is configured, the admin's first generated key is logged once at creation.
#[instrument(skip_all, fields(email = %config.admin_email))]
pub fn create_initial_admin_user(config: &Config, db: &Database, users: &UserAdmin) -> anyhow::Result<UserId> {
    let admin = match Users::new(db).get_by_email(&config.admin_email)? {
        Some(existing) => {
            debug!("Admin user already exists");
            existing.id
        }
        None => {
            let provisioned = users.provision(NewUser {
                email: config.admin_email.clone(),
                name: "Administrator".to_string(),
                role: Role::Admin,
                password: config.admin_password.clone(),
            })?;
            if config.admin_api_key.is_none() {
                info!(api_key = %provisioned.secret, "Generated admin API key, it will not be shown again");
            }
            provisioned.user.id
        }
    };

    if let Some(raw) = &config.admin_api_key {
        let keys = ApiKeys::new(db);
        let key_hash = hash_api_key(raw);
        if keys.get_by_hash(&key_hash)?.is_none() {
            keys.create(&ApiKeyCreateDBRequest {
                user_id: admin,
                name: "bootstrap".to_string(),
                key_hash,
                preview: key_preview(raw),
                rate_limit_per_minute: users.default_rate_limit(),
            })?;
            info!("Registered configured admin API key");
        }
    }
    Ok(admin)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.security.cors;
    let wildcard = cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard));
    let allow_origin = if wildcard {
        if cors_config.allow_credentials {
            anyhow::bail!("security.cors.allow_credentials cannot be combined with a '*' origin");
        }
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(cors_config.allow_credentials)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .expose_headers(vec![http::header::LOCATION, http::header::CONTENT_DISPOSITION]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: the `/api/v1` surface, `/healthz`, the API reference at
/// `/docs`, CORS, request tracing and, when enabled, Prometheus metrics at `/internal/metrics`.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let auth_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/me", get(handlers::auth::me));

    let validation_routes = Router::new()
        .route("/validate/single", post(handlers::validation::validate_one))
        .route(
            "/validate/bulk",
            post(handlers::validation::submit_bulk).layer(DefaultBodyLimit::max(state.config.limits.files.max_file_size_bytes)),
        )
        .route("/validate/jobs", get(handlers::validation::list_jobs))
        .route(
            "/validate/jobs/{id}",
            get(handlers::validation::get_job).delete(handlers::validation::cancel_job),
        )
        .route("/validate/jobs/{id}/results", get(handlers::validation::job_results));

    let account_routes = Router::new()
        .route("/keys", get(handlers::api_keys::list_keys).post(handlers::api_keys::create_key))
        .route(
            "/keys/{id}",
            get(handlers::api_keys::get_key)
                .put(handlers::api_keys::update_key)
                .delete(handlers::api_keys::revoke_key),
        )
        .route("/credits", get(handlers::credits::get_balance))
        .route("/billing/plans", get(handlers::billing::list_plans))
        .route("/billing/packages", get(handlers::billing::list_packages))
        .route("/billing/checkout", post(handlers::billing::checkout_plan))
        .route("/billing/credits", post(handlers::billing::checkout_credits))
        .route("/billing/verify", post(handlers::billing::verify_payment))
        .route("/billing/coupons/validate", post(handlers::billing::validate_coupon))
        .route("/billing/transactions", get(handlers::billing::list_transactions));

    let admin_routes = Router::new()
        // Users
        .route(
            "/admin/users",
            get(handlers::admin_users::list_users).post(handlers::admin_users::create_user),
        )
        .route("/admin/users/bulk", post(handlers::admin_users::bulk_action))
        .route(
            "/admin/users/{id}",
            get(handlers::admin_users::get_user)
                .put(handlers::admin_users::update_user)
                .delete(handlers::admin_users::delete_user),
        )
        .route(
            "/admin/users/{id}/credits",
            patch(handlers::admin_users::adjust_credits).put(handlers::admin_users::set_credits),
        )
        .route("/admin/users/{id}/role", axum::routing::put(handlers::admin_users::set_role))
        .route("/admin/users/{id}/activate", post(handlers::admin_users::activate_user))
        .route("/admin/users/{id}/deactivate", post(handlers::admin_users::deactivate_user))
        .route("/admin/users/{id}/reset-password", post(handlers::admin_users::reset_password))
        .route("/admin/users/{id}/plan", axum::routing::put(handlers::admin_users::set_plan))
        // Jobs, transactions, keys, activity
        .route("/admin/jobs", get(handlers::admin::list_jobs))
        .route("/admin/jobs/{id}", axum::routing::delete(handlers::admin::cancel_job))
        .route("/admin/transactions", get(handlers::admin::list_transactions))
        .route("/admin/api-keys", get(handlers::admin::list_api_keys))
        .route("/admin/api-keys/{id}", axum::routing::delete(handlers::admin::delete_api_key))
        .route("/admin/api-keys/{id}/revoke", post(handlers::admin::revoke_api_key))
        .route("/admin/activity", get(handlers::admin::list_activity))
        // Pricing
        .route(
            "/admin/pricing/plans",
            get(handlers::pricing::list_plans).post(handlers::pricing::create_plan),
        )
        .route(
            "/admin/pricing/plans/{id}",
            axum::routing::put(handlers::pricing::update_plan).delete(handlers::pricing::delete_plan),
        )
        .route(
            "/admin/pricing/coupons",
            get(handlers::pricing::list_coupons).post(handlers::pricing::create_coupon),
        )
        .route(
            "/admin/pricing/coupons/{id}",
            get(handlers::pricing::get_coupon)
                .put(handlers::pricing::update_coupon)
                .delete(handlers::pricing::delete_coupon),
        )
        // Validation servers
        .route(
            "/admin/servers",
            get(handlers::servers::list_servers).post(handlers::servers::create_server),
        )
        .route("/admin/servers/test", post(handlers::servers::test_url))
        .route(
            "/admin/servers/{id}",
            get(handlers::servers::get_server)
                .put(handlers::servers::update_server)
                .delete(handlers::servers::delete_server),
        )
        .route("/admin/servers/{id}/test", post(handlers::servers::test_server));

    let api_routes = Router::new()
        .merge(auth_routes)
        .merge(validation_routes)
        .merge(account_routes)
        .merge(admin_routes)
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server.
///
/// All tasks watch the same shutdown token. [`shutdown`](BackgroundServices::shutdown) cancels it
/// and waits for every task; dropping the struct cancels it through `drop_guard`.
pub struct BackgroundServices {
    background_tasks: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Wire the shared services together and start the background tasks.
fn setup_services(
    config: &Config,
    db: Database,
    checker: Option<Arc<dyn EmailChecker>>,
    shutdown_token: CancellationToken,
) -> anyhow::Result<(AppState, BackgroundServices)> {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let ledger = Ledger::new(db.clone());
    let (webhooks, handle) = WebhookSender::spawn(&config.webhooks, shutdown_token.clone())?;
    background_tasks.push(handle);

    let jobs = JobManager::new(JobStore::new(), ledger.clone(), Some(webhooks), config.credits.unit_cost);
    let servers = ServerPool::new(db.clone(), config.servers.probe_timeout)?;
    let checker = match checker {
        Some(checker) => checker,
        None => checker::build_checker(&config.validation, servers.clone())?,
    };
    let users = UserAdmin::new(
        db.clone(),
        ledger.clone(),
        jobs.clone(),
        config.credits.default_plan.as_ref().map(|plan| plan.name.clone()),
        config.limits.default_rate_limit_per_minute,
    );
    let billing = BillingService::new(db.clone(), ledger.clone(), Arc::new(DummyProvider::new()), config.billing.clone());

    if config.daemon.enabled {
        let daemon = Arc::new(ValidationDaemon::new(
            jobs.clone(),
            checker.clone(),
            config.daemon.clone(),
            config.validation.check_timeout,
        ));
        background_tasks.push(tokio::spawn(daemon.run(shutdown_token.clone())));
    } else {
        info!("Validation daemon disabled by configuration");
    }

    if config.watchdog.interval.is_zero() {
        warn!("Job watchdog disabled: watchdog.interval is zero");
    } else {
        background_tasks.push(tokio::spawn(jobs::watchdog::run_watchdog(
            jobs.clone(),
            config.watchdog.interval,
            config.watchdog.max_job_duration,
            shutdown_token.clone(),
        )));
    }

    if config.credits.renewal_check_interval.is_zero() {
        warn!("Plan renewer disabled: credits.renewal_check_interval is zero");
    } else {
        background_tasks.push(tokio::spawn(ledger::renewal::run_plan_renewer(
            ledger.clone(),
            config.credits.renewal_check_interval,
            shutdown_token.clone(),
        )));
    }

    if config.servers.health_check_interval.is_zero() {
        debug!("Server health prober disabled");
    } else {
        background_tasks.push(tokio::spawn(servers::run_health_prober(
            servers.clone(),
            config.servers.health_check_interval,
            shutdown_token.clone(),
        )));
    }

    let state = AppState::builder()
        .db(db)
        .config(config.clone())
        .ledger(ledger)
        .jobs(jobs)
        .checker(checker)
        .billing(billing)
        .servers(servers)
        .users(users)
        .limiters(Limiters::new(&config.limits))
        .build();

    Ok((
        state,
        BackgroundServices {
            background_tasks,
            shutdown_token,
            drop_guard: Some(drop_guard),
        },
    ))
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] seeds the store, starts background services and builds
///    the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
/// 3. **Shutdown**: when the shutdown future resolves, stops the background services and flushes
///    telemetry
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with the checker selected by configuration
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::build(config, None).await
    }

    /// Create a new application instance that validates through `checker`
    pub async fn new_with_checker(config: Config, checker: Arc<dyn EmailChecker>) -> anyhow::Result<Self> {
        Self::build(config, Some(checker)).await
    }

    async fn build(config: Config, checker: Option<Arc<dyn EmailChecker>>) -> anyhow::Result<Self> {
        debug!("Starting mailctl with configuration: {:#?}", config);

        let db = Database::new();
        seed_default_plan(&config, &db)?;
        seed_servers(&config, &db)?;

        let shutdown_token = CancellationToken::new();
        let (app_state, bg_services) = setup_services(&config, db.clone(), checker, shutdown_token)?;
        create_initial_admin_user(&config, &db, &app_state.users)?;

        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            config,
            bg_services,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, AppState, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.app_state, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "mailctl listening on http://{}, API reference at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Stopping background services...");
        self.bg_services.shutdown().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Verdict;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use serde_json::Value;

    #[test_log::test(tokio::test)]
    async fn test_healthz_and_docs() {
        let app = create_test_app().await;
        let response = app.server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");

        app.server.get("/docs").await.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_seeding_is_idempotent() {
        let mut config = create_test_config();
        config.servers.pool = vec![config::ServerSeed {
            name: "primary".to_string(),
            url: "http://checker-1:8080".parse().unwrap(),
            weight: 2,
        }];
        config.credits.default_plan = config::CreditsConfig::default().default_plan;

        let db = Database::new();
        seed_default_plan(&config, &db).unwrap();
        seed_default_plan(&config, &db).unwrap();
        seed_servers(&config, &db).unwrap();
        seed_servers(&config, &db).unwrap();

        assert!(Plans::new(&db).get_by_name("Free").unwrap().is_some());
        let servers = Servers::new(&db).list(&Default::default()).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].weight, 2);

        let token = CancellationToken::new();
        let (state, bg) = setup_services(&config, db.clone(), None, token).unwrap();
        let first = create_initial_admin_user(&config, &db, &state.users).unwrap();
        let second = create_initial_admin_user(&config, &db, &state.users).unwrap();
        assert_eq!(first, second);

        // The admin opens on the default plan and the configured key authenticates
        assert_eq!(state.ledger.balance(first).unwrap().plan_credits, 100);
        let raw = config.admin_api_key.clone().unwrap();
        let key = ApiKeys::new(&db).get_by_hash(&hash_api_key(&raw)).unwrap().unwrap();
        assert_eq!(key.user_id, first);
        bg.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_admin_key_reaches_admin_routes() {
        let app = create_test_app().await;
        let (name, value) = auth_header(&app.admin_key);
        app.server
            .get("/api/v1/admin/users")
            .add_header(name, value)
            .await
            .assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_bulk_job_through_injected_checker() {
        let checker = MockEmailChecker::new().with("bad@example.io", MockBehavior::Verdict(Verdict::Invalid));
        let app = create_test_app_with_checker(Arc::new(checker)).await;
        let (user, key) = create_test_user(&app.state, 5);
        let (name, value) = auth_header(&key);

        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(b"ok@example.io\nbad@example.io\n".to_vec()).file_name("list.txt"),
        );
        let response = app
            .server
            .post("/api/v1/validate/bulk")
            .add_header(name.clone(), value.clone())
            .multipart(form)
            .await;
        response.assert_status(StatusCode::CREATED);
        let job_id = response.json::<Value>()["job_id"].as_str().unwrap().to_string();

        let mut job = Value::Null;
        for _ in 0..200 {
            job = app
                .server
                .get(&format!("/api/v1/validate/jobs/{job_id}"))
                .add_header(name.clone(), value.clone())
                .await
                .json();
            if job["status"] == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(job["status"], "completed");
        assert_eq!(job["valid_count"], 1);
        assert_eq!(job["invalid_count"], 1);
        assert_eq!(app.state.ledger.balance(user.id).unwrap().balance, 3);
    }

    #[test]
    fn test_cors_rejects_credentials_with_wildcard() {
        let mut config = create_test_config();
        assert!(create_cors_layer(&config).is_ok());
        config.security.cors.allow_credentials = true;
        assert!(create_cors_layer(&config).is_err());

        config.security.cors.allowed_origins = vec![CorsOrigin::Url("https://app.example.com".parse().unwrap())];
        assert!(create_cors_layer(&config).is_ok());
    }
}
