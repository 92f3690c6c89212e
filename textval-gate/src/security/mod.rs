//! Abuse protection and audit logging.
//!
//! # Rate Limiting
//!
//! Per-client token buckets bound how fast a single address can call the
//! workflow endpoints, independently of the per-user daily quota:
//!
//! ```rust
//! use textval_gate::security::{KeyedRateLimiter, RateLimitConfig};
//!
//! # async fn example() -> textval_gate::Result<()> {
//! let limiter = KeyedRateLimiter::new(RateLimitConfig::per_minute(5));
//! limiter.acquire("198.51.100.23").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Audit Logging
//!
//! Gate decisions and lifecycle changes are emitted on the `audit` target:
//!
//! ```rust
//! use textval_gate::security::audit::{AuditEvent, AuditEventType};
//! use uuid::Uuid;
//!
//! AuditEvent::new(AuditEventType::UsageCommitted, "user_2abc9876", Uuid::new_v4())
//!     .with_feature("validator")
//!     .with_usage_count(4)
//!     .emit();
//! ```

pub mod audit;
mod rate_limit;

pub use rate_limit::{KeyedRateLimiter, RateLimitConfig, RateLimiter};
