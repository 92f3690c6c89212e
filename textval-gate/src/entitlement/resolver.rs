//! Loads a user's record and pairs it with the applicable plan.

use std::{sync::Arc, time::Duration};

use tracing::{error, instrument};

use super::{EntitlementStore, UserEntitlementState, UserId};
use crate::{
    error::{GateError, Result},
    plan::{PlanRegistry, ResolvedPlan},
    reliability::{RetryPolicy, is_retryable, retry_if},
};

/// A user's record together with the plan that governs it.
#[derive(Debug, Clone)]
pub struct ResolvedEntitlement {
    /// Persisted state as loaded.
    pub state: UserEntitlementState,
    /// Applicable plan and how it was chosen.
    pub plan: ResolvedPlan,
}

/// Resolves authenticated identities to entitlements.
///
/// A missing record is polled for a bounded number of times with a fixed
/// delay, since provisioning happens asynchronously after sign-up.
#[derive(Clone)]
pub struct EntitlementResolver {
    store: Arc<dyn EntitlementStore>,
    registry: Arc<PlanRegistry>,
    policy: RetryPolicy,
}

impl EntitlementResolver {
    /// Default polling: 3 attempts, 500ms apart.
    #[must_use]
    pub fn new(store: Arc<dyn EntitlementStore>, registry: Arc<PlanRegistry>) -> Self {
        Self { store, registry, policy: RetryPolicy::fixed(3, Duration::from_millis(500)) }
    }

    /// Overrides the polling policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Plan registry in use.
    #[must_use]
    pub fn registry(&self) -> &PlanRegistry {
        &self.registry
    }

    /// Loads the user's state and resolves their plan.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::ProfileNotFound`] if no record appears within
    /// the polling budget, or a store error that is not worth retrying.
    #[instrument(skip(self, user_id), fields(user_id = %user_id), level = "debug")]
    pub async fn resolve(&self, user_id: &UserId) -> Result<ResolvedEntitlement> {
        let store = &self.store;
        let state = retry_if(
            &self.policy,
            || async move {
                store
                    .fetch(user_id)
                    .await?
                    .ok_or_else(|| GateError::ProfileNotFound(user_id.clone()))
            },
            is_retryable,
        )
        .await
        .inspect_err(|e| {
            if matches!(e, GateError::ProfileNotFound(_)) {
                error!(user_id = %user_id, "entitlement record missing after polling");
            }
        })?;

        let plan = self.registry.resolve(state.role, state.subscription_tier.as_deref());
        tracing::debug!(tier = plan.tier_label(), source = ?plan.source, "plan resolved");

        Ok(ResolvedEntitlement { state, plan })
    }
}

impl std::fmt::Debug for EntitlementResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementResolver").field("policy", &self.policy).finish_non_exhaustive()
    }
}
