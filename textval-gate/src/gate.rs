//! Per-request authorization for workflow calls.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. the workflow is enabled on the plan, and so are custom voices when
//!    the request names one
//! 2. the profile is in the plan's allow-list (or the list is "all")
//! 3. the input is no longer than the plan's maximum
//! 4. the quota ledger has budget left
//!
//! Steps 1 to 3 are pure and available on their own as [`precheck`].

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    decision::{Decision, Denial, GatedResource},
    entitlement::UserEntitlementState,
    error::Result,
    ledger::QuotaLedger,
    plan::{Plan, Workflow},
    voice::VoiceProfileId,
};

/// A workflow call awaiting authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRequest {
    /// Requested workflow.
    pub workflow: Workflow,
    /// Catalog profile name, matched case-sensitively.
    pub profile_name: String,
    /// Raw user text.
    pub input_text: String,
    /// Custom voice to apply instead of the catalog template.
    #[serde(default)]
    pub custom_voice_id: Option<VoiceProfileId>,
}

impl FeatureRequest {
    /// Builds a request without a custom voice.
    pub fn new(workflow: Workflow, profile_name: impl Into<String>, input_text: impl Into<String>) -> Self {
        Self {
            workflow,
            profile_name: profile_name.into(),
            input_text: input_text.into(),
            custom_voice_id: None,
        }
    }

    /// Input length in characters.
    #[must_use]
    pub fn input_length(&self) -> usize {
        self.input_text.chars().count()
    }
}

/// Runs the synchronous checks (enablement, allow-list, input size).
pub fn precheck(request: &FeatureRequest, plan: &Plan) -> Decision {
    let workflow = request.workflow;

    if !plan.is_enabled(workflow) {
        return Decision::Deny(Denial::FeatureDisabled { resource: GatedResource::Workflow(workflow) });
    }

    if request.custom_voice_id.is_some() && !plan.custom_voice.enabled {
        return Decision::Deny(Denial::FeatureDisabled { resource: GatedResource::CustomVoice });
    }

    if !plan.rules(workflow).allowed_profiles.permits(&request.profile_name) {
        return Decision::Deny(Denial::ProfileNotAllowed {
            workflow,
            profile: request.profile_name.clone(),
        });
    }

    if let Some(max) = plan.max_input_length {
        let actual = request.input_length();
        if actual > max {
            return Decision::Deny(Denial::InputTooLarge { max, actual });
        }
    }

    Decision::Allow
}

/// Full gate: [`precheck`] followed by the quota ledger.
#[derive(Debug, Clone)]
pub struct FeatureGate {
    ledger: QuotaLedger,
}

impl FeatureGate {
    /// Creates a gate over a ledger.
    #[must_use]
    pub fn new(ledger: QuotaLedger) -> Self {
        Self { ledger }
    }

    /// The underlying ledger, for committing after success.
    #[must_use]
    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Authorizes a request for a resolved user.
    ///
    /// The quota step may persist a daily reset and updates `state`
    /// accordingly; it runs only when the synchronous checks pass.
    ///
    /// # Errors
    ///
    /// Propagates store failures from the quota step.
    #[instrument(
        skip_all,
        fields(user_id = %state.user_id, workflow = %request.workflow, profile = %request.profile_name),
        level = "debug"
    )]
    pub async fn authorize(
        &self,
        request: &FeatureRequest,
        state: &mut UserEntitlementState,
        plan: &Plan,
    ) -> Result<Decision> {
        match precheck(request, plan) {
            Decision::Allow => self.ledger.check_and_reserve(state, plan).await,
            deny @ Decision::Deny(_) => Ok(deny),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::{
        entitlement::{EntitlementStore, UserId},
        ledger::FixedClock,
        plan::{PlanRegistry, Tier},
        store::InMemoryStore,
    };

    fn registry() -> PlanRegistry {
        PlanRegistry::builtin()
    }

    #[test]
    fn test_disabled_workflow() {
        let registry = registry();
        let request = FeatureRequest::new(Workflow::Compliance, "Analizzatore GDPR Marketing", "x".repeat(20));
        assert_eq!(
            precheck(&request, registry.get(Tier::Free)),
            Decision::Deny(Denial::FeatureDisabled {
                resource: GatedResource::Workflow(Workflow::Compliance)
            })
        );
    }

    #[test]
    fn test_custom_voice_needs_enabled_plan() {
        let registry = registry();
        let mut request = FeatureRequest::new(Workflow::Validator, "Generico", "x".repeat(20));
        request.custom_voice_id = Some(VoiceProfileId::new_v4());

        assert_eq!(
            precheck(&request, registry.get(Tier::Free)),
            Decision::Deny(Denial::FeatureDisabled { resource: GatedResource::CustomVoice })
        );
        assert_eq!(precheck(&request, registry.get(Tier::Starter)), Decision::Allow);
        assert_eq!(precheck(&request, registry.admin()), Decision::Allow);

        request.custom_voice_id = None;
        assert_eq!(precheck(&request, registry.get(Tier::Free)), Decision::Allow);
    }

    #[tokio::test]
    async fn test_disabled_custom_voice_skips_quota() {
        let store = Arc::new(InMemoryStore::new());
        let today = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let mut state = UserEntitlementState::provisioned(UserId::new("u1"), None);
        state.usage_count = 3;
        state.last_used_date = Some(today);
        store.provision(state.clone()).await.unwrap();

        let gate = FeatureGate::new(QuotaLedger::new(store.clone(), Arc::new(FixedClock::new(today))));
        let registry = registry();

        let mut request = FeatureRequest::new(Workflow::Validator, "Generico", "hello world");
        request.custom_voice_id = Some(VoiceProfileId::new_v4());
        let decision = gate.authorize(&request, &mut state, registry.get(Tier::Free)).await.unwrap();

        assert_eq!(decision, Decision::Deny(Denial::FeatureDisabled { resource: GatedResource::CustomVoice }));
        assert_eq!(store.fetch(&state.user_id).await.unwrap().unwrap().usage_count, 3);
    }

    #[test]
    fn test_profile_not_allowed() {
        let registry = registry();
        let request = FeatureRequest::new(Workflow::Validator, "Copywriter Persuasivo", "hello world");
        assert_eq!(
            precheck(&request, registry.get(Tier::Free)),
            Decision::Deny(Denial::ProfileNotAllowed {
                workflow: Workflow::Validator,
                profile: "Copywriter Persuasivo".into()
            })
        );
        assert_eq!(precheck(&request, registry.get(Tier::Pro)), Decision::Allow);
    }

    #[test]
    fn test_input_boundary() {
        let registry = registry();
        let free = registry.get(Tier::Free);

        let at_max = FeatureRequest::new(Workflow::Validator, "Generico", "a".repeat(2_000));
        assert_eq!(precheck(&at_max, free), Decision::Allow);

        let over = FeatureRequest::new(Workflow::Validator, "Generico", "a".repeat(2_001));
        assert_eq!(
            precheck(&over, free),
            Decision::Deny(Denial::InputTooLarge { max: 2_000, actual: 2_001 })
        );
    }

    #[test]
    fn test_input_length_counts_characters() {
        let request = FeatureRequest::new(Workflow::Validator, "Generico", "è".repeat(2_000));
        assert_eq!(request.input_length(), 2_000);
        assert_eq!(precheck(&request, registry().get(Tier::Free)), Decision::Allow);
    }

    #[test]
    fn test_admin_plan_has_no_input_cap() {
        let request = FeatureRequest::new(Workflow::Strategist, "anything", "a".repeat(1_000_000));
        assert_eq!(precheck(&request, registry().admin()), Decision::Allow);
    }

    #[test]
    fn test_profile_check_precedes_size_check() {
        let request = FeatureRequest::new(Workflow::Validator, "Nope", "a".repeat(10_000));
        assert!(matches!(
            precheck(&request, registry().get(Tier::Free)),
            Decision::Deny(Denial::ProfileNotAllowed { .. })
        ));
    }

    #[tokio::test]
    async fn test_precheck_denial_skips_quota_and_reset() {
        let store = Arc::new(InMemoryStore::new());
        let stale = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mut state = UserEntitlementState::provisioned(UserId::new("u1"), None);
        state.usage_count = 10;
        state.last_used_date = Some(stale);
        store.provision(state.clone()).await.unwrap();

        let clock = Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap()));
        let gate = FeatureGate::new(QuotaLedger::new(store.clone(), clock));
        let registry = registry();

        let request = FeatureRequest::new(Workflow::Validator, "Nope", "hello world");
        let decision = gate.authorize(&request, &mut state, registry.get(Tier::Free)).await.unwrap();

        assert!(matches!(decision, Decision::Deny(Denial::ProfileNotAllowed { .. })));
        let stored = store.fetch(&state.user_id).await.unwrap().unwrap();
        assert_eq!(stored.last_used_date, Some(stale));
    }

    #[tokio::test]
    async fn test_quota_is_last() {
        let store = Arc::new(InMemoryStore::new());
        let today = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let mut state = UserEntitlementState::provisioned(UserId::new("u1"), None);
        state.usage_count = 10;
        state.last_used_date = Some(today);
        store.provision(state.clone()).await.unwrap();

        let gate = FeatureGate::new(QuotaLedger::new(store, Arc::new(FixedClock::new(today))));
        let registry = registry();

        let request = FeatureRequest::new(Workflow::Validator, "Generico", "hello world");
        let decision = gate.authorize(&request, &mut state, registry.get(Tier::Free)).await.unwrap();
        assert_eq!(decision, Decision::Deny(Denial::QuotaExceeded { limit: 10 }));
    }
}
