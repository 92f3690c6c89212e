//! Workflow orchestration.
//!
//! [`WorkflowService`] runs one flow for all four workflows:
//! resolve the caller's entitlement, gate the request, invoke the language
//! model (plus the quality check where the plan asks for it), and count the
//! call against the quota only after everything succeeded.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::Identity,
    catalog::TemplateCatalog,
    config::LlmConfig,
    decision::{Decision, Denial},
    entitlement::{EntitlementResolver, EntitlementStore, Role},
    error::{GateError, Result},
    gate::{FeatureGate, FeatureRequest},
    ledger::{Clock, QuotaLedger, UsageSnapshot},
    llm::{LanguageModel, LlmError, QualityReport, parse_structured_response},
    plan::{Limit, Plan, PlanRegistry, ProfileAllowList, Workflow},
    reliability::RetryPolicy,
    security::audit::{AuditEvent, AuditEventType},
    voice::{CustomVoiceProfile, CustomVoices, VoiceProfileDraft, VoiceProfileId, VoiceProfileStore},
};

/// Minimum input length accepted by every workflow, in characters.
pub const MIN_INPUT_LENGTH: usize = 10;

/// Profile used by the validator when the caller names none.
pub const DEFAULT_VALIDATOR_PROFILE: &str = "Generico";

/// Model output of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WorkflowOutput {
    /// Rewritten or interpreted text.
    Text(String),
    /// Structured report produced by compliance and strategist.
    Report(Value),
}

/// Result of a successful workflow call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowOutcome {
    /// Workflow that ran.
    pub workflow: Workflow,
    /// Model output.
    pub output: WorkflowOutput,
    /// Present when the plan runs the quality check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_report: Option<QualityReport>,
    /// Usage after this call was counted.
    pub usage: UsageSnapshot,
}

/// Availability of a workflow on the caller's plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureStatus {
    /// Whether the workflow can be called.
    pub enabled: bool,
    /// Whether the quality check runs.
    pub quality_check: bool,
    /// Allowed profile names; `None` means every profile.
    pub allowed_profiles: Option<Vec<String>>,
}

/// What `/user-status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageStatus {
    /// Effective tier name.
    pub tier: &'static str,
    /// Stored role.
    pub role: Role,
    /// Calls counted today.
    pub count: u32,
    /// Daily limit; `-1` when unlimited.
    pub limit: Limit,
    /// Maximum input length; `None` is unbounded.
    pub max_input_length: Option<usize>,
    /// Per-workflow availability, keyed by workflow name.
    pub features: BTreeMap<&'static str, FeatureStatus>,
    /// Whether custom voices are available.
    pub custom_voice_enabled: bool,
    /// Maximum number of custom voices; `-1` when unlimited.
    pub custom_voice_max_profiles: Limit,
}

/// Entry point for every gated operation.
#[derive(Clone)]
pub struct WorkflowService {
    resolver: EntitlementResolver,
    gate: FeatureGate,
    catalog: Arc<TemplateCatalog>,
    llm: Arc<dyn LanguageModel>,
    models: LlmConfig,
    voices: CustomVoices,
}

impl WorkflowService {
    /// Wires the service from its collaborators, with default model names
    /// and resolver polling.
    #[must_use]
    pub fn new(
        entitlements: Arc<dyn EntitlementStore>,
        voices: Arc<dyn VoiceProfileStore>,
        registry: Arc<PlanRegistry>,
        catalog: Arc<TemplateCatalog>,
        llm: Arc<dyn LanguageModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver: EntitlementResolver::new(Arc::clone(&entitlements), registry),
            gate: FeatureGate::new(QuotaLedger::new(entitlements, clock)),
            catalog,
            llm,
            models: LlmConfig::default(),
            voices: CustomVoices::new(voices),
        }
    }

    /// Uses the model names of `config`.
    #[must_use]
    pub fn with_models(mut self, config: LlmConfig) -> Self {
        self.models = config;
        self
    }

    /// Overrides how long the resolver polls for a missing record.
    #[must_use]
    pub fn with_resolver_policy(mut self, policy: RetryPolicy) -> Self {
        self.resolver = self.resolver.with_policy(policy);
        self
    }

    /// Custom voice operations without plan checks, for provisioning.
    #[must_use]
    pub fn voices(&self) -> &CustomVoices {
        &self.voices
    }

    /// Runs a workflow for an authenticated caller.
    ///
    /// The quota is counted only when the model call and, where enabled,
    /// the quality check both succeed.
    ///
    /// # Errors
    ///
    /// - [`GateError::InvalidInput`] for a too-short text or a custom voice on
    ///   a workflow other than validator
    /// - [`GateError::ProfileNotFound`] when the caller has no entitlement record
    /// - [`GateError::Denied`] when the gate refuses the request
    /// - [`GateError::NotFoundOrForbidden`] for a custom voice the caller does not own
    /// - [`GateError::UnknownProfileTemplate`] when the catalog lacks the profile
    /// - [`GateError::Llm`] when the model call or its parsing fails
    #[instrument(
        skip(self, identity, request),
        fields(user_id = %identity.user_id, workflow = %request.workflow),
        level = "debug"
    )]
    pub async fn run(&self, identity: &Identity, request: FeatureRequest) -> Result<WorkflowOutcome> {
        validate_request(&request)?;

        let request_id = Uuid::new_v4();
        let user_id = &identity.user_id;
        let resolved = self.resolver.resolve(user_id).await?;
        let mut state = resolved.state;
        let tier = resolved.plan.tier_label();
        let plan = resolved.plan.plan;

        if let Decision::Deny(denial) = self.gate.authorize(&request, &mut state, &plan).await? {
            audit_denied(user_id.as_str(), request_id, &request, tier, &denial);
            return Err(denial.into());
        }

        AuditEvent::new(AuditEventType::AccessGranted, user_id.as_str(), request_id)
            .with_feature(request.workflow.as_str())
            .with_profile(&request.profile_name)
            .with_tier(tier)
            .emit();

        let started = Instant::now();
        let (output, quality_report) = match self.invoke(identity, &request, &plan).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "workflow failed, quota not consumed");
                AuditEvent::new(AuditEventType::WorkflowFailed, user_id.as_str(), request_id)
                    .with_feature(request.workflow.as_str())
                    .with_profile(&request.profile_name)
                    .with_error(e.to_string())
                    .with_duration(started.elapsed())
                    .emit();
                return Err(e);
            }
        };

        let usage = self.gate.ledger().commit(&mut state, &plan).await?;
        info!(
            workflow = %request.workflow,
            count = usage.count,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "workflow completed"
        );

        Ok(WorkflowOutcome { workflow: request.workflow, output, quality_report, usage })
    }

    async fn invoke(
        &self,
        identity: &Identity,
        request: &FeatureRequest,
        plan: &Plan,
    ) -> Result<(WorkflowOutput, Option<QualityReport>)> {
        let workflow = request.workflow;
        let prompt = match request.custom_voice_id {
            Some(id) => {
                let voice = self.voices.get(&identity.user_id, id).await?;
                self.catalog.render_custom_voice(&voice, &request.input_text)
            }
            None => self.catalog.render_primary(workflow, &request.profile_name, &request.input_text)?,
        };
        let model = self.models.model_for(workflow);

        let raw = self.llm.generate(model, &prompt).await?;
        let output = match workflow {
            Workflow::Validator | Workflow::Interpreter => WorkflowOutput::Text(raw.trim().to_owned()),
            Workflow::Compliance | Workflow::Strategist => {
                WorkflowOutput::Report(parse_structured_response(&raw).map_err(LlmError::from)?)
            }
        };

        if !plan.runs_quality_check(workflow) {
            return Ok((output, None));
        }
        let WorkflowOutput::Text(text) = &output else {
            return Ok((output, None));
        };

        let qc_prompt = self.catalog.render_quality_check(
            workflow,
            &request.profile_name,
            &request.input_text,
            text,
        )?;
        let qc_raw = self.llm.generate(model, &qc_prompt).await?;
        let report: QualityReport = parse_structured_response(&qc_raw).map_err(LlmError::from)?;
        Ok((output, Some(report)))
    }

    /// Reports the caller's plan and today's usage.
    ///
    /// A stored date other than today reads as zero usage; nothing is
    /// persisted.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::ProfileNotFound`] when the caller has no record.
    #[instrument(skip_all, fields(user_id = %identity.user_id), level = "debug")]
    pub async fn usage_status(&self, identity: &Identity) -> Result<UsageStatus> {
        let resolved = self.resolver.resolve(&identity.user_id).await?;
        let plan = &resolved.plan.plan;
        let usage = self.gate.ledger().snapshot(&resolved.state, plan);

        let features = Workflow::ALL
            .into_iter()
            .map(|workflow| {
                let rules = plan.rules(workflow);
                let status = FeatureStatus {
                    enabled: plan.is_enabled(workflow),
                    quality_check: plan.runs_quality_check(workflow),
                    allowed_profiles: match &rules.allowed_profiles {
                        ProfileAllowList::All => None,
                        ProfileAllowList::Only(names) => Some(names.iter().cloned().collect()),
                    },
                };
                (workflow.as_str(), status)
            })
            .collect();

        Ok(UsageStatus {
            tier: resolved.plan.tier_label(),
            role: resolved.state.role,
            count: usage.count,
            limit: usage.limit,
            max_input_length: plan.max_input_length,
            features,
            custom_voice_enabled: plan.custom_voice.enabled,
            custom_voice_max_profiles: plan.custom_voice.max_profiles,
        })
    }

    /// Creates a custom voice within the caller's plan cap.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Denied`] when the plan disables custom voices or
    /// the cap is reached, [`GateError::InvalidInput`] for an invalid draft.
    pub async fn create_voice(&self, identity: &Identity, draft: VoiceProfileDraft) -> Result<CustomVoiceProfile> {
        let resolved = self.resolver.resolve(&identity.user_id).await?;
        self.voices.create(&identity.user_id, &resolved.plan.plan, draft).await
    }

    /// Lists the caller's custom voices.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_voices(&self, identity: &Identity) -> Result<Vec<CustomVoiceProfile>> {
        self.voices.list(&identity.user_id).await
    }

    /// Loads one of the caller's custom voices.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotFoundOrForbidden`] for a missing or foreign profile.
    pub async fn get_voice(&self, identity: &Identity, id: VoiceProfileId) -> Result<CustomVoiceProfile> {
        self.voices.get(&identity.user_id, id).await
    }

    /// Replaces one of the caller's custom voices.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotFoundOrForbidden`] for a missing or foreign
    /// profile, [`GateError::InvalidInput`] for an invalid draft.
    pub async fn update_voice(
        &self,
        identity: &Identity,
        id: VoiceProfileId,
        draft: VoiceProfileDraft,
    ) -> Result<CustomVoiceProfile> {
        self.voices.update(&identity.user_id, id, draft).await
    }

    /// Deletes one of the caller's custom voices.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotFoundOrForbidden`] for a missing or foreign profile.
    pub async fn delete_voice(&self, identity: &Identity, id: VoiceProfileId) -> Result<()> {
        self.voices.delete(&identity.user_id, id).await
    }
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService")
            .field("resolver", &self.resolver)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

fn validate_request(request: &FeatureRequest) -> Result<()> {
    if request.input_length() < MIN_INPUT_LENGTH {
        return Err(GateError::InvalidInput(format!(
            "text must be at least {MIN_INPUT_LENGTH} characters"
        )));
    }
    if request.profile_name.trim().is_empty() {
        return Err(GateError::InvalidInput("profile_name is required".into()));
    }
    if request.custom_voice_id.is_some() && request.workflow != Workflow::Validator {
        return Err(GateError::InvalidInput(format!(
            "custom voices are not supported by {}",
            request.workflow
        )));
    }
    Ok(())
}

fn audit_denied(user_id: &str, request_id: Uuid, request: &FeatureRequest, tier: &str, denial: &Denial) {
    info!(reason = denial.code(), "request denied");
    AuditEvent::new(AuditEventType::AccessDenied, user_id, request_id)
        .with_feature(request.workflow.as_str())
        .with_profile(&request.profile_name)
        .with_tier(tier)
        .with_reason(denial.code())
        .emit();
}
