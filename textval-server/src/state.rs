//! Shared handler state.

use std::{sync::Arc, time::Instant};

use textval_gate::{
    WorkflowService,
    auth::{Authenticator, webhook::WebhookVerifier},
    config::RateLimitSettings,
    provisioning::Provisioner,
    security::KeyedRateLimiter,
};

use crate::observability::{HealthCheck, HealthReport};

/// Everything a handler needs, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub(crate) service: Arc<WorkflowService>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) provisioner: Arc<Provisioner>,
    pub(crate) webhook: Arc<WebhookVerifier>,
    pub(crate) workflow_limiter: Arc<KeyedRateLimiter>,
    pub(crate) status_limiter: Arc<KeyedRateLimiter>,
    started: Instant,
    checks: Arc<Vec<HealthCheck>>,
}

impl AppState {
    /// Assembles the state with per-address limiters built from `limits`.
    #[must_use]
    pub fn new(
        service: WorkflowService,
        authenticator: Arc<dyn Authenticator>,
        provisioner: Provisioner,
        webhook: WebhookVerifier,
        limits: &RateLimitSettings,
    ) -> Self {
        Self {
            service: Arc::new(service),
            authenticator,
            provisioner: Arc::new(provisioner),
            webhook: Arc::new(webhook),
            workflow_limiter: Arc::new(KeyedRateLimiter::new(limits.workflow())),
            status_limiter: Arc::new(KeyedRateLimiter::new(limits.status())),
            started: Instant::now(),
            checks: Arc::new(Vec::new()),
        }
    }

    /// Startup checks reported by `/health`.
    #[must_use]
    pub fn with_health_checks(mut self, checks: Vec<HealthCheck>) -> Self {
        self.checks = Arc::new(checks);
        self
    }

    /// Current health report.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport::new(self.started.elapsed().as_secs(), self.checks.as_ref().clone())
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("service", &self.service)
            .field("provisioner", &self.provisioner)
            .field("checks", &self.checks.len())
            .finish_non_exhaustive()
    }
}
