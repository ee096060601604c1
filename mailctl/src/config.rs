//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `MAILCTL_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `MAILCTL_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `MAILCTL_DAEMON__MAX_CONCURRENT_JOBS=8` sets the `daemon.max_concurrent_jobs` field.
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`
//! - **Admin User**: `admin_email`, `admin_password`, `admin_api_key` - seeded on startup
//! - **Security**: `security.cors`
//! - **Credits**: `credits.unit_cost`, `credits.default_plan` - ledger configuration
//! - **Validation**: `validation.checker`, `validation.check_timeout` - checker collaborator
//! - **Daemon / Watchdog**: job processing and stuck-job recovery
//! - **Webhooks**: delivery timeouts and the optional signing secret
//! - **Billing**: currency and purchasable credit packages
//! - **Limits**: upload concurrency and default API key rate limits
//! - **Servers**: validation-server pool seed and health checking
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! MAILCTL_PORT=8080
//! MAILCTL_ADMIN_API_KEY=sk-bootstrap
//! MAILCTL_VALIDATION__CHECKER=local
//! MAILCTL_ENABLE_METRICS=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;
use crate::types::Credits;
use crate::webhooks::signing;

/// Command line for the mailctl server: where to find the YAML config, and whether to only check it.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Email validation control layer: credit ledger, validation jobs and billing",
    long_about = None
)]
pub struct Args {
    /// YAML configuration file; MAILCTL_ environment variables override it
    #[arg(short = 'f', long, env = "MAILCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Load and validate the configuration, print a summary and exit.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementation, so an empty file is a valid
/// development configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Email address for the initial admin user (created on startup)
    pub admin_email: String,
    /// Password for the initial admin user
    pub admin_password: Option<String>,
    /// Fixed API key for the initial admin user. When unset a key is generated and logged once.
    #[serde(skip_serializing)]
    pub admin_api_key: Option<String>,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    pub security: SecurityConfig,
    pub credits: CreditsConfig,
    pub validation: ValidationConfig,
    pub daemon: DaemonConfig,
    pub watchdog: WatchdogConfig,
    pub webhooks: WebhookConfig,
    pub billing: BillingConfig,
    pub limits: LimitsConfig,
    pub servers: ServersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            admin_email: "admin@example.org".to_string(),
            admin_password: None,
            admin_api_key: None,
            enable_metrics: false,
            enable_otel_export: false,
            security: SecurityConfig::default(),
            credits: CreditsConfig::default(),
            validation: ValidationConfig::default(),
            daemon: DaemonConfig::default(),
            watchdog: WatchdogConfig::default(),
            webhooks: WebhookConfig::default(),
            billing: BillingConfig::default(),
            limits: LimitsConfig::default(),
            servers: ServersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    pub cors: CorsConfig,
}

/// CORS settings for browser clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<CorsOrigin>,
    pub allow_credentials: bool,
    /// Preflight cache duration in seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600),
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Credit ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreditsConfig {
    /// Credits charged per checked address
    pub unit_cost: Credits,
    /// Plan assigned to newly registered users. `None` opens accounts with no plan and no credits.
    pub default_plan: Option<PlanSeed>,
    /// How often the plan renewer looks for accounts whose renewal date has passed
    #[serde(with = "humantime_serde")]
    pub renewal_check_interval: Duration,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            unit_cost: 1,
            default_plan: Some(PlanSeed {
                name: "Free".to_string(),
                price: Decimal::ZERO,
                credits_limit: 100,
                billing_period_days: 30,
            }),
            renewal_check_interval: Duration::from_secs(3600),
        }
    }
}

/// A plan created at startup if no plan with the same name exists.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PlanSeed {
    pub name: String,
    pub price: Decimal,
    pub credits_limit: Credits,
    pub billing_period_days: i64,
}

/// Which email checker collaborator to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckerMode {
    /// Dispatch checks over HTTP to the validation-server pool
    Http,
    /// Classify addresses in-process without network probing (development)
    Local,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    pub checker: CheckerMode,
    /// Per-address ceiling on the checker call. Timed out addresses are recorded as unknown.
    #[serde(with = "humantime_serde")]
    pub check_timeout: Duration,
    /// Maximum number of addresses accepted in one bulk upload
    pub max_bulk_emails: usize,
    /// Used to compute `estimated_time_seconds` for bulk submissions
    pub estimated_ms_per_email: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            checker: CheckerMode::Http,
            check_timeout: Duration::from_secs(10),
            max_bulk_emails: 100_000,
            estimated_ms_per_email: 200,
        }
    }
}

/// Validation daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub enabled: bool,
    /// How long to sleep between claim attempts when the queue is empty
    #[serde(with = "humantime_serde")]
    pub claim_interval: Duration,
    /// Maximum number of jobs processed concurrently by this instance
    pub max_concurrent_jobs: usize,
    /// Maximum number of in-flight checker calls within a single job
    pub per_job_concurrency: usize,
    /// A processing job whose worker has not recorded progress for this long is reclaimed
    #[serde(with = "humantime_serde")]
    pub lease_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            claim_interval: Duration::from_millis(500),
            max_concurrent_jobs: 4,
            per_job_concurrency: 8,
            lease_timeout: Duration::from_secs(120),
        }
    }
}

/// Stuck-job watchdog configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Jobs running longer than this are force-failed and refunded
    #[serde(with = "humantime_serde")]
    pub max_job_duration: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_job_duration: Duration::from_secs(6 * 3600),
        }
    }
}

/// Job completion webhook delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    pub timeout_secs: u64,
    pub max_concurrent_sends: usize,
    pub channel_capacity: usize,
    /// `whsec_` prefixed secret. When set, deliveries carry Standard Webhooks signature headers.
    #[serde(skip_serializing)]
    pub signing_secret: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_concurrent_sends: 20,
            channel_capacity: 1000,
            signing_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BillingConfig {
    pub currency: String,
    pub credit_packages: Vec<CreditPackage>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            credit_packages: vec![
                CreditPackage {
                    id: "credits-1k".to_string(),
                    name: "1,000 credits".to_string(),
                    credits: 1_000,
                    price: Decimal::new(1000, 2),
                },
                CreditPackage {
                    id: "credits-10k".to_string(),
                    name: "10,000 credits".to_string(),
                    credits: 10_000,
                    price: Decimal::new(7500, 2),
                },
            ],
        }
    }
}

/// A purchasable block of add-on credits.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreditPackage {
    pub id: String,
    pub name: String,
    pub credits: Credits,
    pub price: Decimal,
}

/// Resource limits for protecting system capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub files: FileLimitsConfig,
    /// Rate limit applied to new API keys when none is requested
    pub default_rate_limit_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            files: FileLimitsConfig::default(),
            default_rate_limit_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileLimitsConfig {
    /// Maximum concurrent bulk uploads. 0 means unlimited.
    pub max_concurrent_uploads: usize,
    /// Maximum uploads waiting for a slot. 0 means unlimited.
    pub max_waiting_uploads: usize,
    pub max_upload_wait_secs: u64,
    pub max_file_size_bytes: usize,
}

impl Default for FileLimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 10,
            max_waiting_uploads: 20,
            max_upload_wait_secs: 30,
            max_file_size_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Validation-server pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServersConfig {
    /// Servers registered at startup if their URL is not already known
    pub pool: Vec<ServerSeed>,
    /// Interval for the background health prober. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            pool: Vec::new(),
            health_check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSeed {
    pub name: String,
    pub url: Url,
    #[serde(default = "ServerSeed::default_weight")]
    pub weight: u32,
}

impl ServerSeed {
    fn default_weight() -> u32 {
        1
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.credits.unit_cost <= 0 {
            return Err(Error::Internal {
                operation: format!("Config validation: credits.unit_cost must be positive, got {}", self.credits.unit_cost),
            });
        }

        if let Some(plan) = &self.credits.default_plan
            && (plan.credits_limit < 0 || plan.billing_period_days <= 0)
        {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: default plan '{}' needs a non-negative credits_limit and a positive billing_period_days",
                    plan.name
                ),
            });
        }

        if self.daemon.max_concurrent_jobs == 0 || self.daemon.per_job_concurrency == 0 {
            return Err(Error::Internal {
                operation: "Config validation: daemon.max_concurrent_jobs and daemon.per_job_concurrency must be at least 1".to_string(),
            });
        }

        if self.validation.max_bulk_emails == 0 {
            return Err(Error::Internal {
                operation: "Config validation: validation.max_bulk_emails must be at least 1".to_string(),
            });
        }

        if self.watchdog.max_job_duration <= self.validation.check_timeout {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: watchdog.max_job_duration ({:?}) must exceed validation.check_timeout ({:?})",
                    self.watchdog.max_job_duration, self.validation.check_timeout
                ),
            });
        }

        // The lease heartbeat only moves when a result is recorded, so a lease must outlive one
        // check with room to record it, or another worker reclaims a live job.
        if self.daemon.lease_timeout < self.validation.check_timeout.saturating_mul(2) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: daemon.lease_timeout ({:?}) must be at least twice validation.check_timeout ({:?})",
                    self.daemon.lease_timeout, self.validation.check_timeout
                ),
            });
        }

        if let Some(secret) = &self.webhooks.signing_secret
            && signing::decode_secret(secret).is_none()
        {
            return Err(Error::Internal {
                operation: "Config validation: webhooks.signing_secret must be a whsec_ prefixed base64 secret".to_string(),
            });
        }

        let mut package_ids = std::collections::HashSet::new();
        for package in &self.billing.credit_packages {
            if package.credits <= 0 || package.price < Decimal::ZERO {
                return Err(Error::Internal {
                    operation: format!("Config validation: credit package '{}' has invalid credits or price", package.id),
                });
            }
            if !package_ids.insert(package.id.as_str()) {
                return Err(Error::Internal {
                    operation: format!("Config validation: duplicate credit package id '{}'", package.id),
                });
            }
        }

        if self.servers.pool.iter().any(|s| s.weight == 0) {
            return Err(Error::Internal {
                operation: "Config validation: server weights must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("MAILCTL_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn credit_package(&self, id: &str) -> Option<&CreditPackage> {
        self.billing.credit_packages.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args() -> Args {
        Args {
            config: "test.yaml".to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_from_empty_file() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "")?;

            let config = Config::load(&args())?;
            assert_eq!(config.port, 3001);
            assert_eq!(config.credits.unit_cost, 1);
            assert_eq!(config.validation.checker, CheckerMode::Http);
            assert_eq!(config.daemon.lease_timeout, Duration::from_secs(120));
            assert_eq!(config.billing.credit_packages.len(), 2);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_values_and_durations() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
admin_email: ops@example.com
validation:
  checker: local
  check_timeout: 3s
daemon:
  claim_interval: 250ms
  per_job_concurrency: 2
servers:
  pool:
    - name: primary
      url: http://checker-1:8080
      weight: 3
    - name: secondary
      url: http://checker-2:8080
billing:
  credit_packages:
    - id: starter
      name: Starter
      credits: 500
      price: "4.99"
"#,
            )?;

            let config = Config::load(&args())?;
            assert_eq!(config.admin_email, "ops@example.com");
            assert_eq!(config.validation.checker, CheckerMode::Local);
            assert_eq!(config.validation.check_timeout, Duration::from_secs(3));
            assert_eq!(config.daemon.claim_interval, Duration::from_millis(250));
            assert_eq!(config.daemon.per_job_concurrency, 2);
            assert_eq!(config.servers.pool.len(), 2);
            assert_eq!(config.servers.pool[0].weight, 3);
            assert_eq!(config.servers.pool[1].weight, 1);
            let starter = config.credit_package("starter").unwrap();
            assert_eq!(starter.price, Decimal::new(499, 2));
            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 4000\n")?;
            jail.set_env("MAILCTL_PORT", "8080");
            jail.set_env("MAILCTL_DAEMON__MAX_CONCURRENT_JOBS", "9");
            jail.set_env("MAILCTL_ADMIN_API_KEY", "sk-bootstrap");

            let config = Config::load(&args())?;
            assert_eq!(config.port, 8080);
            assert_eq!(config.daemon.max_concurrent_jobs, 9);
            assert_eq!(config.admin_api_key.as_deref(), Some("sk-bootstrap"));
            Ok(())
        });
    }

    #[test]
    fn test_rejects_unknown_fields() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "not_a_field: true\n")?;
            assert!(Config::load(&args()).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_cli_flags() {
        let args = Args::try_parse_from(["mailctl", "-f", "prod.yaml", "--validate"]).unwrap();
        assert_eq!(args.config, "prod.yaml");
        assert!(args.validate);

        let args = Args::try_parse_from(["mailctl"]).unwrap();
        assert!(!args.validate);
        assert!(Args::try_parse_from(["mailctl", "--serve"]).is_err());
    }

    #[test]
    fn test_rejects_lease_shorter_than_checks() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
validation:
  check_timeout: 30s
daemon:
  lease_timeout: 45s
"#,
            )?;
            let err = Config::load(&args()).unwrap_err();
            assert!(err.to_string().contains("lease_timeout"));

            jail.set_env("MAILCTL_DAEMON__LEASE_TIMEOUT", "60s");
            let config = Config::load(&args())?;
            assert_eq!(config.daemon.lease_timeout, Duration::from_secs(60));
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.credits.unit_cost = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.daemon.per_job_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.webhooks.signing_secret = Some("not-a-secret".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.billing.credit_packages.push(config.billing.credit_packages[0].clone());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.webhooks.signing_secret = Some(signing::generate_secret());
        assert!(config.validate().is_ok());
    }
}
