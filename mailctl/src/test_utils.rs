//! Test utilities: an in-process application behind an `axum-test` server, account helpers and a
//! scriptable email checker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, header};
use axum_test::TestServer;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    AppState, Application, BackgroundServices,
    admin::NewUser,
    checker::{CheckError, CheckOptions, CheckOutcome, Checks, EmailChecker},
    config::{CheckerMode, Config, CreditsConfig, DaemonConfig, ServersConfig, ValidationConfig},
    crypto::generate_api_key,
    db::models::users::UserDBResponse,
    jobs::Verdict,
    types::{Credits, Role},
};

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    /// Raw key of the seeded admin
    pub admin_key: String,
    pub bg: BackgroundServices,
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        admin_email: "admin@test.com".to_string(),
        admin_password: None,
        admin_api_key: Some(generate_api_key()),
        credits: CreditsConfig {
            // Accounts open empty so tests control balances exactly
            default_plan: None,
            ..Default::default()
        },
        validation: ValidationConfig {
            checker: CheckerMode::Local,
            check_timeout: Duration::from_secs(2),
            ..Default::default()
        },
        daemon: DaemonConfig {
            enabled: true,
            claim_interval: Duration::from_millis(10),
            ..Default::default()
        },
        servers: ServersConfig {
            health_check_interval: Duration::ZERO,
            probe_timeout: Duration::from_secs(2),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn into_test_app(app: Application, admin_key: String) -> TestApp {
    let (server, state, bg) = app.into_test_server();
    TestApp {
        server,
        state,
        admin_key,
        bg,
    }
}

pub async fn create_test_app() -> TestApp {
    let config = create_test_config();
    let admin_key = config.admin_api_key.clone().expect("test config sets an admin key");
    let app = Application::new(config).await.expect("Failed to create application");
    into_test_app(app, admin_key)
}

pub async fn create_test_app_with_checker(checker: Arc<dyn EmailChecker>) -> TestApp {
    let config = create_test_config();
    let admin_key = config.admin_api_key.clone().expect("test config sets an admin key");
    let app = Application::new_with_checker(config, checker)
        .await
        .expect("Failed to create application");
    into_test_app(app, admin_key)
}

fn provision(state: &AppState, role: Role) -> (UserDBResponse, String) {
    let email = format!("{}-{}@example.com", role, Uuid::new_v4().simple());
    let provisioned = state
        .users
        .provision(NewUser {
            email,
            name: "Test User".to_string(),
            role,
            password: None,
        })
        .expect("Failed to provision test user");
    (provisioned.user, provisioned.secret)
}

/// A regular user with one API key. `credits > 0` are added as a single credit package purchase.
pub fn create_test_user(state: &AppState, credits: Credits) -> (UserDBResponse, String) {
    let (user, key) = provision(state, Role::User);
    if credits > 0 {
        state
            .ledger
            .credit_purchase(user.id, credits, Decimal::ZERO, "Test credits".to_string(), None)
            .expect("Failed to fund test user");
    }
    (user, key)
}

pub fn create_test_admin(state: &AppState) -> (UserDBResponse, String) {
    provision(state, Role::Admin)
}

pub fn auth_header(key: &str) -> (HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {key}")).expect("API keys are valid header values"),
    )
}

/// Scripted response of [`MockEmailChecker`] for one address.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Verdict(Verdict),
    Transient,
    Fatal,
    /// Never answers, so the caller's timeout fires
    Hang,
}

/// Email checker answering from a script. Unscripted addresses are valid.
#[derive(Debug, Clone, Default)]
pub struct MockEmailChecker {
    behaviors: HashMap<String, MockBehavior>,
    delay: Option<Duration>,
}

impl MockEmailChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, email: &str, behavior: MockBehavior) -> Self {
        self.behaviors.insert(email.to_lowercase(), behavior);
        self
    }

    /// Sleep this long before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl EmailChecker for MockEmailChecker {
    async fn check(&self, email: &str, _options: &CheckOptions) -> Result<CheckOutcome, CheckError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.behaviors.get(&email.to_lowercase()).cloned() {
            None => Ok(outcome(Verdict::Valid)),
            Some(MockBehavior::Verdict(verdict)) => Ok(outcome(verdict)),
            Some(MockBehavior::Transient) => Err(CheckError::Transient("mock checker unavailable".to_string())),
            Some(MockBehavior::Fatal) => Err(CheckError::Fatal("mock checker refused the request".to_string())),
            Some(MockBehavior::Hang) => std::future::pending().await,
        }
    }
}

fn outcome(verdict: Verdict) -> CheckOutcome {
    CheckOutcome {
        verdict,
        score: if verdict == Verdict::Valid { 95 } else { 20 },
        checks: Checks {
            syntax: verdict != Verdict::Invalid,
            mx_found: Some(verdict != Verdict::Invalid),
            disposable: verdict == Verdict::Disposable,
            role_based: verdict == Verdict::RoleBased,
            catch_all: Some(verdict == Verdict::CatchAll),
            ..Default::default()
        },
    }
}
