//! Service configuration.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file
//! named by `TEXTVAL_CONFIG`, then environment variables (a `.env` file in
//! the working directory is honored). Secrets normally come only from the
//! environment.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8000"
//!
//! [store]
//! backend = "memory"
//!
//! [llm]
//! timeout_secs = 30
//! validator_model = "models/gemini-flash-lite-latest"
//!
//! [rate_limit]
//! workflow_per_minute = 5
//! status_per_minute = 50
//!
//! [plans.free]
//! shared_daily_limit = 10
//! # ... one table per tier plus admin
//! ```
//!
//! | variable | field |
//! |---|---|
//! | `GOOGLE_API_KEY` | `llm.api_key` |
//! | `CLERK_JWKS_URL` | `auth.jwks_url` |
//! | `CLERK_WEBHOOK_SECRET` | `auth.webhook_secret` |
//! | `SUPABASE_URL` | `store.url` |
//! | `SUPABASE_SERVICE_KEY` | `store.service_key` |
//! | `PORT` | port of `server.bind` |

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};

use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    auth::{DEFAULT_CACHE_TTL, webhook::WebhookVerifier},
    catalog::TemplateCatalog,
    error::{GateError, Result},
    llm::{DEFAULT_BASE_URL, DEFAULT_MODEL, VALIDATOR_MODEL},
    plan::{PlanRegistry, Workflow},
    reliability::RetryPolicy,
    security::RateLimitConfig,
};

/// Environment variable naming the optional TOML file.
pub const CONFIG_PATH_ENV: &str = "TEXTVAL_CONFIG";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Listener settings.
    pub server: ServerConfig,
    /// Token and webhook verification.
    pub auth: AuthConfig,
    /// Persistence backend.
    pub store: StoreConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Entitlement lookup polling.
    pub resolver: ResolverConfig,
    /// Per-client request rates.
    pub rate_limit: RateLimitSettings,
    /// Replaces the built-in plans when present.
    pub plans: Option<PlanRegistry>,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8000)) }
    }
}

/// Token and webhook verification settings.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// JWKS endpoint of the identity provider.
    pub jwks_url: Option<String>,
    /// How long fetched keys are trusted, in seconds.
    pub jwks_cache_ttl_secs: u64,
    /// `whsec_...` secret for provisioning webhooks.
    pub webhook_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwks_url: None, jwks_cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(), webhook_secret: None }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwks_url", &self.jwks_url)
            .field("jwks_cache_ttl_secs", &self.jwks_cache_ttl_secs)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Which store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Supabase PostgREST tables.
    #[default]
    Supabase,
    /// Process memory; state is lost on restart.
    Memory,
}

/// Persistence settings.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Backend selection.
    pub backend: StoreBackend,
    /// Supabase project URL.
    pub url: Option<String>,
    /// Supabase service-role key.
    pub service_key: Option<String>,
    /// Timeout of each store request, in seconds.
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: StoreBackend::default(), url: None, service_key: None, timeout_secs: 10 }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("service_key", &self.service_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Language model settings.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Provider API key.
    pub api_key: Option<String>,
    /// Provider base URL.
    pub base_url: String,
    /// Timeout of each model call, in seconds.
    pub timeout_secs: u64,
    /// Model for the validator workflow.
    pub validator_model: String,
    /// Model for the interpreter workflow.
    pub interpreter_model: String,
    /// Model for the compliance workflow.
    pub compliance_model: String,
    /// Model for the strategist workflow.
    pub strategist_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout_secs: 30,
            validator_model: VALIDATOR_MODEL.to_owned(),
            interpreter_model: DEFAULT_MODEL.to_owned(),
            compliance_model: DEFAULT_MODEL.to_owned(),
            strategist_model: DEFAULT_MODEL.to_owned(),
        }
    }
}

impl LlmConfig {
    /// Model name for a workflow.
    #[must_use]
    pub fn model_for(&self, workflow: Workflow) -> &str {
        match workflow {
            Workflow::Validator => &self.validator_model,
            Workflow::Interpreter => &self.interpreter_model,
            Workflow::Compliance => &self.compliance_model,
            Workflow::Strategist => &self.strategist_model,
        }
    }

    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("validator_model", &self.validator_model)
            .field("interpreter_model", &self.interpreter_model)
            .field("compliance_model", &self.compliance_model)
            .field("strategist_model", &self.strategist_model)
            .finish()
    }
}

/// Entitlement lookup polling.
///
/// New accounts are provisioned asynchronously, so their first request may
/// arrive before the record exists.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Lookups before giving up.
    pub attempts: u32,
    /// Pause between lookups, in milliseconds.
    pub delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { attempts: 3, delay_ms: 500 }
    }
}

impl ResolverConfig {
    /// Polling policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.attempts, Duration::from_millis(self.delay_ms))
    }
}

/// Per-client request budgets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Workflow calls per minute per client address.
    pub workflow_per_minute: u32,
    /// Status and profile management calls per minute per client address.
    pub status_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { workflow_per_minute: 5, status_per_minute: 50 }
    }
}

impl RateLimitSettings {
    /// Bucket settings for workflow endpoints.
    #[must_use]
    pub fn workflow(&self) -> RateLimitConfig {
        RateLimitConfig::per_minute(self.workflow_per_minute)
    }

    /// Bucket settings for status endpoints.
    #[must_use]
    pub fn status(&self) -> RateLimitConfig {
        RateLimitConfig::per_minute(self.status_per_minute)
    }
}

impl ServiceConfig {
    /// Loads `.env`, the optional TOML file and the environment.
    ///
    /// Does not validate; call [`ServiceConfig::validate`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the file cannot be read or parsed or
    /// an environment value is malformed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }

        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("cannot read {}: {e}", path.display())))?;
        info!(path = %path.display(), "loading configuration file");
        Self::from_toml(&text)
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] on malformed TOML or unknown keys.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GateError::Config(format!("invalid configuration: {e}")))
    }

    /// Overlays environment values; `lookup` returns a variable's value.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if `PORT` is not a port number.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let set = |target: &mut Option<String>, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = Some(value);
            }
        };
        set(&mut self.llm.api_key, "GOOGLE_API_KEY");
        set(&mut self.auth.jwks_url, "CLERK_JWKS_URL");
        set(&mut self.auth.webhook_secret, "CLERK_WEBHOOK_SECRET");
        set(&mut self.store.url, "SUPABASE_URL");
        set(&mut self.store.service_key, "SUPABASE_SERVICE_KEY");

        if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| GateError::Config(format!("PORT must be a port number, got '{port}'")))?;
            self.server.bind.set_port(port);
        }
        Ok(())
    }

    /// Effective plan registry.
    #[must_use]
    pub fn plan_registry(&self) -> PlanRegistry {
        self.plans.clone().unwrap_or_default()
    }

    /// Fails fast on missing secrets or inconsistent plans.
    ///
    /// # Errors
    ///
    /// - [`GateError::Config`] for missing or invalid settings
    /// - [`GateError::UnknownProfileTemplate`] when a plan allow-lists a
    ///   profile the catalog does not have
    pub fn validate(&self, catalog: &TemplateCatalog) -> Result<()> {
        require(self.llm.api_key.as_deref(), "GOOGLE_API_KEY")?;
        require(self.auth.jwks_url.as_deref(), "CLERK_JWKS_URL")?;
        WebhookVerifier::new(require(self.auth.webhook_secret.as_deref(), "CLERK_WEBHOOK_SECRET")?)?;

        if self.store.backend == StoreBackend::Supabase {
            require(self.store.url.as_deref(), "SUPABASE_URL")?;
            require(self.store.service_key.as_deref(), "SUPABASE_SERVICE_KEY")?;
        }

        for (name, value) in [
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("store.timeout_secs", self.store.timeout_secs),
            ("rate_limit.workflow_per_minute", u64::from(self.rate_limit.workflow_per_minute)),
            ("rate_limit.status_per_minute", u64::from(self.rate_limit.status_per_minute)),
        ] {
            if value == 0 {
                return Err(GateError::Config(format!("{name} must be greater than zero")));
            }
        }

        let registry = self.plan_registry();
        registry.validate()?;
        if let Some((plan, workflow, profile)) = catalog.validate_against(&registry).into_iter().next() {
            tracing::error!(plan, %workflow, %profile, "plan allow-lists a profile without template");
            return Err(GateError::UnknownProfileTemplate { workflow, profile });
        }
        Ok(())
    }
}

fn require<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| GateError::Config(format!("{name} is not set")))
}
