//! Tier name to plan lookup.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{CustomVoiceRules, Limit, Plan, ProfileAllowList, Workflow, WorkflowRules};
use crate::{
    entitlement::Role,
    error::{GateError, Result},
};

/// Subscription tiers a user record may carry.
///
/// `admin` is intentionally absent: the admin plan is reachable only
/// through [`Role::Admin`], never through a tier string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Default tier.
    Free,
    /// Entry paid tier.
    Starter,
    /// Professional tier.
    Pro,
    /// Business tier.
    Business,
}

impl Tier {
    /// Tier name as stored on user records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Business => "business",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "business" => Ok(Self::Business),
            _ => Err(()),
        }
    }
}

/// How a plan was selected for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    /// The user's role is admin; the stored tier was not consulted.
    RoleOverride,
    /// The stored tier matched a registry entry.
    Found(Tier),
    /// The stored tier was unset or unrecognized; the free plan was used.
    FellBack {
        /// Stored tier value, if any.
        requested: Option<String>,
    },
}

/// A plan together with the reason it was chosen.
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    /// Selected plan.
    pub plan: Arc<Plan>,
    /// Why it was selected.
    pub source: PlanSource,
}

impl ResolvedPlan {
    /// Name of the effective tier: `admin`, the matched tier, or `free`.
    #[must_use]
    pub fn tier_label(&self) -> &'static str {
        match &self.source {
            PlanSource::RoleOverride => "admin",
            PlanSource::Found(tier) => tier.as_str(),
            PlanSource::FellBack { .. } => Tier::Free.as_str(),
        }
    }
}

/// Immutable mapping from tier to [`Plan`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanRegistry {
    free: Arc<Plan>,
    starter: Arc<Plan>,
    pro: Arc<Plan>,
    business: Arc<Plan>,
    admin: Arc<Plan>,
}

impl PlanRegistry {
    /// Parses a registry from TOML with one table per tier plus `admin`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] when the document does not parse or
    /// fails [`PlanRegistry::validate`].
    pub fn from_toml(source: &str) -> Result<Self> {
        let registry: Self = toml::from_str(source)
            .map_err(|e| GateError::Config(format!("invalid plan registry: {e}")))?;
        registry.validate()?;
        Ok(registry)
    }

    /// Checks structural consistency of every plan.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if validator or interpreter is disabled
    /// on any plan, or the admin plan has a capped quota.
    pub fn validate(&self) -> Result<()> {
        for (name, plan) in self.iter() {
            for workflow in [Workflow::Validator, Workflow::Interpreter] {
                if !plan.rules(workflow).enabled {
                    return Err(GateError::Config(format!(
                        "plan '{name}': {workflow} cannot be disabled"
                    )));
                }
            }
        }
        if !self.admin.is_unlimited() {
            return Err(GateError::Config("plan 'admin' must have an unlimited quota".into()));
        }
        Ok(())
    }

    /// Direct tier lookup.
    #[must_use]
    pub fn get(&self, tier: Tier) -> &Arc<Plan> {
        match tier {
            Tier::Free => &self.free,
            Tier::Starter => &self.starter,
            Tier::Pro => &self.pro,
            Tier::Business => &self.business,
        }
    }

    /// The plan granted by the admin role.
    #[must_use]
    pub fn admin(&self) -> &Arc<Plan> {
        &self.admin
    }

    /// Resolves the plan for a user.
    ///
    /// The admin role always wins over the stored tier. Otherwise an unset
    /// or unknown tier falls back to `free`; the fallback is reported in
    /// [`ResolvedPlan::source`].
    #[must_use]
    pub fn resolve(&self, role: Role, stored_tier: Option<&str>) -> ResolvedPlan {
        if role == Role::Admin {
            return ResolvedPlan { plan: Arc::clone(&self.admin), source: PlanSource::RoleOverride };
        }

        match stored_tier.map(str::parse::<Tier>) {
            Some(Ok(tier)) => {
                ResolvedPlan { plan: Arc::clone(self.get(tier)), source: PlanSource::Found(tier) }
            }
            Some(Err(())) => {
                warn!(tier = ?stored_tier, "unrecognized subscription tier, using free plan");
                ResolvedPlan {
                    plan: Arc::clone(&self.free),
                    source: PlanSource::FellBack { requested: stored_tier.map(str::to_owned) },
                }
            }
            None => ResolvedPlan {
                plan: Arc::clone(&self.free),
                source: PlanSource::FellBack { requested: None },
            },
        }
    }

    /// All plans with their names, admin last.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Plan)> {
        [
            ("free", &*self.free),
            ("starter", &*self.starter),
            ("pro", &*self.pro),
            ("business", &*self.business),
            ("admin", &*self.admin),
        ]
        .into_iter()
    }

    /// The plans shipped with the service.
    #[must_use]
    pub fn builtin() -> Self {
        let free = Plan {
            shared_daily_limit: Limit::Capped(10),
            max_input_length: Some(2_000),
            validator: WorkflowRules::enabled(
                ProfileAllowList::only(["Generico", "L'Umanizzatore"]),
                false,
            ),
            interpreter: WorkflowRules::enabled(
                ProfileAllowList::only(["Spiega in Parole Semplici"]),
                false,
            ),
            compliance: WorkflowRules::disabled(),
            strategist: WorkflowRules::disabled(),
            custom_voice: CustomVoiceRules::default(),
        };

        let starter = Plan {
            shared_daily_limit: Limit::Capped(50),
            max_input_length: Some(5_000),
            validator: WorkflowRules::enabled(
                ProfileAllowList::only([
                    "Generico",
                    "L'Umanizzatore",
                    "Copywriter Persuasivo",
                    "Scrittore di Newsletter",
                    "Ottimizzatore Email di Vendita",
                    "Social Media Manager B2B",
                ]),
                true,
            ),
            interpreter: WorkflowRules::enabled(
                ProfileAllowList::only([
                    "Spiega in Parole Semplici",
                    "Sintetizzatore di Meeting e Trascrizioni",
                    "Sintesi Legale Breve",
                    "Verificatore Fatture/Bollette",
                ]),
                true,
            ),
            compliance: WorkflowRules::enabled(
                ProfileAllowList::only([
                    "Analizzatore GDPR Marketing",
                    "Validatore Claim Pubblicitari",
                ]),
                false,
            ),
            strategist: WorkflowRules::disabled(),
            custom_voice: CustomVoiceRules { enabled: true, max_profiles: Limit::Capped(1) },
        };

        let pro = Plan {
            shared_daily_limit: Limit::Capped(200),
            max_input_length: Some(15_000),
            validator: WorkflowRules::enabled(ProfileAllowList::All, true),
            interpreter: WorkflowRules::enabled(ProfileAllowList::All, true),
            compliance: WorkflowRules::enabled(ProfileAllowList::All, false),
            strategist: WorkflowRules::disabled(),
            custom_voice: CustomVoiceRules { enabled: true, max_profiles: Limit::Capped(5) },
        };

        let business = Plan {
            shared_daily_limit: Limit::Capped(1_000),
            max_input_length: Some(50_000),
            strategist: WorkflowRules::enabled(ProfileAllowList::All, false),
            custom_voice: CustomVoiceRules { enabled: true, max_profiles: Limit::Unlimited },
            ..pro.clone()
        };

        let admin = Plan {
            shared_daily_limit: Limit::Unlimited,
            max_input_length: None,
            ..business.clone()
        };

        Self {
            free: Arc::new(free),
            starter: Arc::new(starter),
            pro: Arc::new(pro),
            business: Arc::new(business),
            admin: Arc::new(admin),
        }
    }
}

impl Default for PlanRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
