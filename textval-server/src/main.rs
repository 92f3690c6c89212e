//! textval-server binary.
//!
//! Configuration comes from `TEXTVAL_CONFIG` (optional TOML file) and the
//! environment; see `textval_gate::config`.

use std::{process::ExitCode, sync::Arc, time::Duration};

use textval_gate::{
    GateError, WorkflowService,
    auth::{JwksAuthenticator, webhook::WebhookVerifier},
    catalog::TemplateCatalog,
    config::{ServiceConfig, StoreBackend},
    entitlement::EntitlementStore,
    ledger::SystemClock,
    llm::GeminiClient,
    provisioning::Provisioner,
    store::{InMemoryStore, SupabaseStore},
    voice::{CustomVoices, VoiceProfileStore},
};
use textval_server::{
    AppState,
    observability::{HealthCheck, LogFormat, init_observability},
    serve,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

const JWKS_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    init_observability(LogFormat::from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), GateError> {
    let config = ServiceConfig::load()?;
    let catalog = TemplateCatalog::embedded()?;
    config.validate(&catalog)?;
    let registry = config.plan_registry();

    let mut checks = vec![
        HealthCheck::pass_with_message("plan_registry", format!("{} plans", registry.iter().count())),
        HealthCheck::pass_with_message("template_catalog", "every allow-listed profile has a template"),
        HealthCheck::pass_with_message("llm", format!("validator model {}", config.llm.validator_model)),
    ];

    let entitlements: Arc<dyn EntitlementStore>;
    let voices: Arc<dyn VoiceProfileStore>;
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("in-memory store selected, state is lost on restart");
            checks.push(HealthCheck::warn("store", "in-memory backend, state is not persisted"));
            let store = Arc::new(InMemoryStore::new());
            entitlements = store.clone();
            voices = store;
        }
        StoreBackend::Supabase => {
            let store = Arc::new(SupabaseStore::new(
                config.store.url.as_deref().unwrap_or_default(),
                config.store.service_key.clone().unwrap_or_default(),
                Duration::from_secs(config.store.timeout_secs),
            )?);
            checks.push(HealthCheck::pass_with_message("store", "supabase"));
            entitlements = store.clone();
            voices = store;
        }
    }

    let llm = Arc::new(GeminiClient::with_base_url(
        &config.llm.base_url,
        config.llm.api_key.clone().unwrap_or_default(),
        config.llm.timeout(),
    )?);

    let authenticator = Arc::new(
        JwksAuthenticator::new(config.auth.jwks_url.as_deref().unwrap_or_default(), JWKS_TIMEOUT)?
            .with_cache_ttl(Duration::from_secs(config.auth.jwks_cache_ttl_secs)),
    );
    let webhook = WebhookVerifier::new(config.auth.webhook_secret.as_deref().unwrap_or_default())?;

    let service = WorkflowService::new(
        entitlements.clone(),
        voices.clone(),
        Arc::new(registry),
        Arc::new(catalog),
        llm,
        Arc::new(SystemClock),
    )
    .with_models(config.llm.clone())
    .with_resolver_policy(config.resolver.policy());
    let provisioner = Provisioner::new(entitlements, CustomVoices::new(voices));

    let state = AppState::new(service, authenticator, provisioner, webhook, &config.rate_limit)
        .with_health_checks(checks);

    let listener = TcpListener::bind(config.server.bind)
        .await
        .map_err(|e| GateError::Config(format!("cannot bind {}: {e}", config.server.bind)))?;
    serve(listener, state, shutdown_signal())
        .await
        .map_err(|e| GateError::Config(format!("server error: {e}")))?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
