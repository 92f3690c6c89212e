//! Reliability patterns for collaborator calls.
//!
//! Provides bounded retry for operations that are expected to become
//! consistent shortly, such as entitlement lookups racing provisioning.

mod retry;

pub use retry::{RetryPolicy, is_retryable, retry_if};
