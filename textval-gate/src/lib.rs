//! textval-gate: entitlement and plan gating for a text validation service
//!
//! The service exposes four LLM-backed workflows (validator, interpreter,
//! compliance, strategist), each parameterized by named prompt profiles.
//! This crate decides, per request, whether a caller may run a workflow
//! with a given profile and input, counts successful calls against a shared
//! daily quota, and caps how many custom voice profiles a user may own.
//!
//! # Architecture
//!
//! ```text
//! bearer token ──► auth ──► Identity
//!                              │
//!                   ┌──────────▼──────────┐
//!                   │ EntitlementResolver │  record + plan (role overrides tier)
//!                   └──────────┬──────────┘
//!                   ┌──────────▼──────────┐
//!                   │     FeatureGate     │  enabled → allow-list → size → quota
//!                   └──────────┬──────────┘
//!                   ┌──────────▼──────────┐
//!                   │    LanguageModel    │  primary call (+ quality check)
//!                   └──────────┬──────────┘
//!                   ┌──────────▼──────────┐
//!                   │     QuotaLedger     │  commit only after success
//!                   └─────────────────────┘
//! ```
//!
//! [`service::WorkflowService`] ties these together for every workflow.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::NaiveDate;
//! use textval_gate::{
//!     Decision,
//!     entitlement::{UserEntitlementState, UserId},
//!     gate::{FeatureGate, FeatureRequest},
//!     ledger::{FixedClock, QuotaLedger},
//!     plan::{PlanRegistry, Tier, Workflow},
//!     store::InMemoryStore,
//! };
//!
//! # async fn example() -> textval_gate::Result<()> {
//! let mut state = UserEntitlementState::provisioned(UserId::new("user_1"), None);
//! let store = Arc::new(InMemoryStore::with_users([state.clone()]));
//! let clock = Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()));
//! let gate = FeatureGate::new(QuotaLedger::new(store, clock));
//!
//! let registry = PlanRegistry::builtin();
//! let request = FeatureRequest::new(Workflow::Validator, "Generico", "Un testo da rivedere.");
//!
//! let decision = gate.authorize(&request, &mut state, registry.get(Tier::Free)).await?;
//! assert_eq!(decision, Decision::Allow);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`plan`]: tiers, plans and the plan registry
//! - [`entitlement`]: persisted user state and the resolver
//! - [`ledger`]: daily quota with reserve-after-success commits
//! - [`gate`]: the ordered per-request checks
//! - [`voice`]: custom voice profiles and their count cap
//! - [`catalog`]: prompt templates and rendering
//! - [`llm`]: the language model seam and structured output parsing
//! - [`auth`]: bearer JWT verification and provisioning webhooks
//! - [`provisioning`]: applying lifecycle events to the stores
//! - [`store`]: in-memory and Supabase persistence
//! - [`service`]: workflow orchestration
//! - [`config`]: TOML and environment configuration
//! - [`reliability`]: bounded retry
//! - [`security`]: rate limiting and the audit trail
//! - [`error`]: error types with recovery guidance
//!
//! # Error Handling
//!
//! All operations return [`Result<T, GateError>`](error::Result). Gate
//! refusals arrive as [`GateError::Denied`] with a typed [`Denial`]:
//!
//! ```rust
//! use textval_gate::{Denial, GateError};
//!
//! fn status_for(err: &GateError) -> u16 {
//!     match err {
//!         GateError::Denied(Denial::QuotaExceeded { .. }) => 429,
//!         GateError::Denied(Denial::InputTooLarge { .. }) => 413,
//!         GateError::Denied(_) => 403,
//!         GateError::NotFoundOrForbidden => 404,
//!         _ => 500,
//!     }
//! }
//!
//! assert_eq!(status_for(&GateError::Denied(Denial::QuotaExceeded { limit: 10 })), 429);
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and jsonwebtoken"
)]

pub mod auth;
pub mod catalog;
pub mod config;
pub mod decision;
pub mod entitlement;
pub mod error;
pub mod gate;
pub mod http;
pub mod ledger;
pub mod llm;
pub mod plan;
pub mod provisioning;
pub mod reliability;
pub mod security;
pub mod service;
pub mod store;
pub mod voice;

pub use decision::{Decision, Denial};
pub use error::{GateError, Result};
pub use service::WorkflowService;
