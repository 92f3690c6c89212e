//! Allow/deny outcomes produced by the gates.
//!
//! Every gate in this crate answers with a [`Decision`]. A denial carries a
//! typed [`Denial`] reason with a stable machine-readable [`Denial::code`]
//! and a human-readable message (its [`Display`](std::fmt::Display) impl).
//! Denials are never aggregated: the first failing check wins.

use serde::Serialize;
use thiserror::Error;

use crate::plan::Workflow;

/// Outcome of a gate check.
#[must_use = "a gate decision must be inspected before proceeding"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allow,
    /// The request is refused for the given reason.
    Deny(Denial),
}

impl Decision {
    /// Returns `true` for [`Decision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Returns the denial reason, if any.
    #[must_use]
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Allow => None,
            Self::Deny(reason) => Some(reason),
        }
    }

    /// Converts the decision into a `Result`, turning a denial into
    /// [`GateError::Denied`](crate::GateError::Denied).
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Denied`](crate::GateError::Denied) for [`Decision::Deny`].
    pub fn into_result(self) -> crate::Result<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(crate::GateError::Denied(reason)),
        }
    }
}

/// Resource that can be switched off per plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatedResource {
    /// One of the text workflows.
    Workflow(Workflow),
    /// User-defined tone-of-voice profiles.
    CustomVoice,
}

impl std::fmt::Display for GatedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workflow(workflow) => write!(f, "{workflow}"),
            Self::CustomVoice => f.write_str("custom_voice"),
        }
    }
}

/// Why a request was refused.
///
/// The variants map onto client errors: `FeatureDisabled`,
/// `ProfileNotAllowed` and `ResourceLimitExceeded` are forbidden,
/// `InputTooLarge` is a payload-size error and `QuotaExceeded` is a
/// too-many-requests error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    /// The plan does not include the requested feature.
    #[error("{resource} is not included in your plan")]
    FeatureDisabled {
        /// Feature that was requested.
        resource: GatedResource,
    },

    /// The profile is outside the plan's allow-list for the workflow.
    #[error("profile '{profile}' is not available for {workflow} on your plan")]
    ProfileNotAllowed {
        /// Workflow that was requested.
        workflow: Workflow,
        /// Profile name as sent by the caller.
        profile: String,
    },

    /// Input text exceeds the plan's maximum length.
    #[error("input is {actual} characters long, your plan allows at most {max}")]
    InputTooLarge {
        /// Plan maximum, in characters.
        max: usize,
        /// Length of the submitted input, in characters.
        actual: usize,
    },

    /// The shared daily quota is used up.
    #[error("daily limit of {limit} requests reached, try again tomorrow")]
    QuotaExceeded {
        /// Daily limit of the plan.
        limit: u32,
    },

    /// The plan's resource count cap has been reached.
    #[error("your plan allows at most {max} custom voice profiles")]
    ResourceLimitExceeded {
        /// Maximum number of resources of the plan.
        max: u32,
    },
}

impl Denial {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::FeatureDisabled { .. } => "feature_disabled",
            Self::ProfileNotAllowed { .. } => "profile_not_allowed",
            Self::InputTooLarge { .. } => "input_too_large",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::ResourceLimitExceeded { .. } => "resource_limit_exceeded",
        }
    }
}
