//! Subscription plans and their entitlements.
//!
//! A [`Plan`] is an immutable value describing what a subscription tier may
//! do: the shared daily call budget, the maximum input size, and per-feature
//! access rules. Plans are looked up through the [`PlanRegistry`].
//!
//! Plans deserialize from TOML:
//!
//! ```toml
//! shared_daily_limit = 10      # -1 means unlimited
//! max_input_length = 2000      # omit for unbounded
//!
//! [validator]
//! allowed_profiles = ["Generico"]
//! quality_check = false
//!
//! [compliance]
//! enabled = false
//!
//! [custom_voice]
//! enabled = true
//! max_profiles = 5
//! ```

mod registry;

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

pub use registry::{PlanRegistry, PlanSource, ResolvedPlan, Tier};

/// The four text workflows a user can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    /// Clean up and rewrite text according to a profile.
    Validator,
    /// Extract, summarize or explain text according to a profile.
    Interpreter,
    /// Analyze text for regulatory risk.
    Compliance,
    /// Produce a business strategy from notes.
    Strategist,
}

impl Workflow {
    /// All workflows, in a stable order.
    pub const ALL: [Self; 4] = [Self::Validator, Self::Interpreter, Self::Compliance, Self::Strategist];

    /// Lowercase name used in configuration and URLs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validator => "validator",
            Self::Interpreter => "interpreter",
            Self::Compliance => "compliance",
            Self::Strategist => "strategist",
        }
    }

    /// Whether the workflow supports the quality-check sub-step.
    #[must_use]
    pub fn supports_quality_check(self) -> bool {
        matches!(self, Self::Validator | Self::Interpreter)
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A count limit where `-1` in configuration means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Limit {
    /// No cap.
    Unlimited,
    /// At most this many.
    Capped(u32),
}

impl Limit {
    /// Returns `true` when `used` has reached the cap.
    #[must_use]
    pub fn is_reached(self, used: u32) -> bool {
        match self {
            Self::Unlimited => false,
            Self::Capped(max) => used >= max,
        }
    }

    /// Cap value, or `None` for unlimited.
    #[must_use]
    pub fn cap(self) -> Option<u32> {
        match self {
            Self::Unlimited => None,
            Self::Capped(max) => Some(max),
        }
    }
}

impl TryFrom<i64> for Limit {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Unlimited),
            v => u32::try_from(v)
                .map(Self::Capped)
                .map_err(|_| format!("limit must be -1 or between 0 and {}, got {v}", u32::MAX)),
        }
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Unlimited => -1,
            Limit::Capped(max) => i64::from(max),
        }
    }
}

/// Profiles a plan may use within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AllowListRepr", into = "AllowListRepr")]
pub enum ProfileAllowList {
    /// Every profile in the catalog.
    All,
    /// Only the listed profile names, matched case-sensitively.
    Only(BTreeSet<String>),
}

impl ProfileAllowList {
    /// Builds an explicit allow-list.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }

    /// Exact, case-sensitive membership test.
    #[must_use]
    pub fn permits(&self, profile: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(profile),
        }
    }

    /// Explicitly listed names; empty for [`ProfileAllowList::All`].
    pub fn listed(&self) -> impl Iterator<Item = &str> {
        let names = match self {
            Self::All => None,
            Self::Only(names) => Some(names.iter().map(String::as_str)),
        };
        names.into_iter().flatten()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AllowListRepr {
    Keyword(String),
    Names(Vec<String>),
}

impl TryFrom<AllowListRepr> for ProfileAllowList {
    type Error = String;

    fn try_from(repr: AllowListRepr) -> Result<Self, Self::Error> {
        match repr {
            AllowListRepr::Keyword(k) if k == "all" => Ok(Self::All),
            AllowListRepr::Keyword(k) => {
                Err(format!("allowed_profiles must be \"all\" or a list of names, got \"{k}\""))
            }
            AllowListRepr::Names(names) => Ok(Self::only(names)),
        }
    }
}

impl From<ProfileAllowList> for AllowListRepr {
    fn from(list: ProfileAllowList) -> Self {
        match list {
            ProfileAllowList::All => Self::Keyword("all".to_owned()),
            ProfileAllowList::Only(names) => Self::Names(names.into_iter().collect()),
        }
    }
}

/// Access rules for one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRules {
    /// Whether the workflow is available at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Profiles that may be requested.
    #[serde(default = "ProfileAllowList::none")]
    pub allowed_profiles: ProfileAllowList,
    /// Run the quality-check step after the main call.
    ///
    /// Only meaningful for validator and interpreter.
    #[serde(default)]
    pub quality_check: bool,
}

impl ProfileAllowList {
    fn none() -> Self {
        Self::Only(BTreeSet::new())
    }
}

const fn default_enabled() -> bool {
    true
}

impl WorkflowRules {
    /// Rules for a workflow that is switched off.
    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false, allowed_profiles: ProfileAllowList::none(), quality_check: false }
    }

    /// Rules for an enabled workflow.
    #[must_use]
    pub fn enabled(allowed_profiles: ProfileAllowList, quality_check: bool) -> Self {
        Self { enabled: true, allowed_profiles, quality_check }
    }
}

impl Default for WorkflowRules {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Rules for user-defined tone-of-voice profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomVoiceRules {
    /// Whether custom voices are available.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum number of profiles a user may own.
    #[serde(default = "zero_limit")]
    pub max_profiles: Limit,
}

const fn zero_limit() -> Limit {
    Limit::Capped(0)
}

impl Default for CustomVoiceRules {
    fn default() -> Self {
        Self { enabled: false, max_profiles: zero_limit() }
    }
}

/// Entitlements of a subscription tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    /// Calls per calendar day shared across all workflows.
    pub shared_daily_limit: Limit,
    /// Maximum input length in characters; `None` is unbounded.
    #[serde(default)]
    pub max_input_length: Option<usize>,
    /// Validator rules.
    #[serde(default)]
    pub validator: WorkflowRules,
    /// Interpreter rules.
    #[serde(default)]
    pub interpreter: WorkflowRules,
    /// Compliance rules.
    #[serde(default)]
    pub compliance: WorkflowRules,
    /// Strategist rules.
    #[serde(default)]
    pub strategist: WorkflowRules,
    /// Custom voice rules.
    #[serde(default)]
    pub custom_voice: CustomVoiceRules,
}

impl Plan {
    /// Rules for a workflow.
    #[must_use]
    pub fn rules(&self, workflow: Workflow) -> &WorkflowRules {
        match workflow {
            Workflow::Validator => &self.validator,
            Workflow::Interpreter => &self.interpreter,
            Workflow::Compliance => &self.compliance,
            Workflow::Strategist => &self.strategist,
        }
    }

    /// Whether a workflow is usable on this plan.
    ///
    /// Validator and interpreter are always available once a plan exists.
    #[must_use]
    pub fn is_enabled(&self, workflow: Workflow) -> bool {
        match workflow {
            Workflow::Validator | Workflow::Interpreter => true,
            Workflow::Compliance | Workflow::Strategist => self.rules(workflow).enabled,
        }
    }

    /// Whether the quality-check step runs for a workflow.
    #[must_use]
    pub fn runs_quality_check(&self, workflow: Workflow) -> bool {
        workflow.supports_quality_check() && self.rules(workflow).quality_check
    }

    /// Whether the daily quota is unlimited.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.shared_daily_limit == Limit::Unlimited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_conversion() {
        assert_eq!(Limit::try_from(-1), Ok(Limit::Unlimited));
        assert_eq!(Limit::try_from(10), Ok(Limit::Capped(10)));
        assert!(Limit::try_from(-2).is_err());
        assert_eq!(i64::from(Limit::Unlimited), -1);
    }

    #[test]
    fn test_limit_is_reached() {
        assert!(!Limit::Unlimited.is_reached(u32::MAX));
        assert!(!Limit::Capped(10).is_reached(9));
        assert!(Limit::Capped(10).is_reached(10));
        assert!(Limit::Capped(0).is_reached(0));
    }

    #[test]
    fn test_allow_list_is_case_sensitive() {
        let list = ProfileAllowList::only(["Generico"]);
        assert!(list.permits("Generico"));
        assert!(!list.permits("generico"));
        assert!(ProfileAllowList::All.permits("anything"));
    }

    #[test]
    fn test_plan_from_toml() {
        let plan: Plan = toml::from_str(
            r#"
            shared_daily_limit = 10
            max_input_length = 2000

            [validator]
            allowed_profiles = ["Generico"]

            [interpreter]
            allowed_profiles = "all"
            quality_check = true

            [compliance]
            enabled = false

            [custom_voice]
            enabled = true
            max_profiles = -1
            "#,
        )
        .unwrap();

        assert_eq!(plan.shared_daily_limit, Limit::Capped(10));
        assert_eq!(plan.max_input_length, Some(2000));
        assert!(plan.validator.enabled);
        assert!(!plan.runs_quality_check(Workflow::Validator));
        assert!(plan.runs_quality_check(Workflow::Interpreter));
        assert_eq!(plan.interpreter.allowed_profiles, ProfileAllowList::All);
        assert!(!plan.is_enabled(Workflow::Compliance));
        assert!(!plan.is_enabled(Workflow::Strategist));
        assert_eq!(plan.custom_voice.max_profiles, Limit::Unlimited);
    }

    #[test]
    fn test_plan_rejects_bad_allow_list_keyword() {
        let result: Result<Plan, _> = toml::from_str(
            r#"
            shared_daily_limit = 1
            [validator]
            allowed_profiles = "everything"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_quality_check_ignored_for_compliance() {
        let mut plan: Plan = toml::from_str("shared_daily_limit = -1").unwrap();
        plan.compliance = WorkflowRules::enabled(ProfileAllowList::All, true);
        assert!(!plan.runs_quality_check(Workflow::Compliance));
        assert!(plan.is_unlimited());
    }
}
