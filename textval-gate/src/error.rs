//! Error types for the gating core.
//!
//! All fallible operations in this crate return [`Result`], whose error type
//! is [`GateError`]. Gate refusals travel as [`GateError::Denied`] carrying a
//! typed [`Denial`]; everything else is either a client fault
//! (authentication, validation, ownership) or a server-side fault
//! (missing entitlement record, catalog drift, collaborator failure).
//!
//! # Error Categories
//!
//! - **Client errors**: [`GateError::AuthenticationFailed`],
//!   [`GateError::WebhookRejected`], [`GateError::Denied`],
//!   [`GateError::NotFoundOrForbidden`], [`GateError::InvalidInput`],
//!   [`GateError::RateLimited`]
//! - **Integrity faults**: [`GateError::ProfileNotFound`],
//!   [`GateError::UnknownProfileTemplate`]
//! - **Collaborator failures**: [`GateError::Llm`], [`GateError::AuthUnavailable`],
//!   [`GateError::Store`], [`GateError::HttpError`]
//! - **Startup**: [`GateError::Config`]
//!
//! # Examples
//!
//! ```
//! use textval_gate::error::{GateError, Result};
//!
//! fn require_text(text: &str) -> Result<&str> {
//!     if text.chars().count() < 10 {
//!         return Err(GateError::InvalidInput("text must be at least 10 characters".into()));
//!     }
//!     Ok(text)
//! }
//! ```

use thiserror::Error;

pub use crate::decision::Denial;
use crate::{entitlement::UserId, llm::LlmError, plan::Workflow};

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors that can occur while authorizing and serving a request.
///
/// # Error Recovery
///
/// - **Denials** ([`Denied`](Self::Denied)): not retried, the message is shown to the user
/// - **Integrity faults** ([`ProfileNotFound`](Self::ProfileNotFound),
///   [`UnknownProfileTemplate`](Self::UnknownProfileTemplate)): operator action needed
/// - **Collaborator failures** ([`Llm`](Self::Llm), [`Store`](Self::Store)): the caller may
///   retry later, no quota was consumed
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum GateError {
    /// Bearer token missing, malformed, expired or signed by an unknown key.
    ///
    /// # Recovery
    ///
    /// The client must sign in again and resend a fresh token.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The key set used to verify tokens could not be fetched.
    ///
    /// # Recovery
    ///
    /// Transient; retry after the identity provider recovers.
    #[error("authentication service unavailable: {0}")]
    AuthUnavailable(String),

    /// Provisioning webhook failed signature or timestamp verification.
    #[error("webhook rejected: {0}")]
    WebhookRejected(String),

    /// No entitlement record exists for an authenticated user.
    ///
    /// Raised after the resolver's bounded polling gives up. It means
    /// asynchronous provisioning has not completed or has failed.
    ///
    /// # Recovery
    ///
    /// Check the provisioning webhook deliveries for this user.
    #[error("no entitlement record for user {0}")]
    ProfileNotFound(UserId),

    /// The gate refused the request.
    #[error(transparent)]
    Denied(#[from] Denial),

    /// Resource does not exist or belongs to another user.
    ///
    /// The two cases are deliberately indistinguishable.
    #[error("resource not found")]
    NotFoundOrForbidden,

    /// An allow-listed profile has no template in the catalog.
    ///
    /// # Recovery
    ///
    /// Plan allow-lists and the template catalog have drifted apart. Add the
    /// template or remove the profile from the plan.
    #[error("no template for profile '{profile}' in {workflow}")]
    UnknownProfileTemplate {
        /// Workflow of the lookup.
        workflow: Workflow,
        /// Profile that has no template.
        profile: String,
    },

    /// Request payload failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Too many requests from the same client address.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The language model call failed or its output was unusable.
    ///
    /// # Recovery
    ///
    /// Retry later. Quota is only consumed on success, so nothing needs
    /// to be refunded.
    #[error("language model failure: {0}")]
    Llm(#[from] LlmError),

    /// The entitlement or profile store rejected an operation.
    #[error("store error: {0}")]
    Store(String),

    /// HTTP communication with a backend failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Configuration is missing or inconsistent.
    ///
    /// # Recovery
    ///
    /// Fix the configuration file or environment and restart.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GateError {
    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::AuthUnavailable(_) => "authentication_unavailable",
            Self::WebhookRejected(_) => "webhook_rejected",
            Self::ProfileNotFound(_) => "profile_not_found",
            Self::Denied(denial) => denial.code(),
            Self::NotFoundOrForbidden => "not_found",
            Self::UnknownProfileTemplate { .. } => "unknown_profile_template",
            Self::InvalidInput(_) => "invalid_input",
            Self::RateLimited => "rate_limited",
            Self::Llm(LlmError::Timeout(_)) => "llm_timeout",
            Self::Llm(_) => "llm_failure",
            Self::Store(_) | Self::HttpError(_) => "store_error",
            Self::Config(_) => "config_error",
        }
    }
}
