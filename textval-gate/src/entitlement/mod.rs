//! Per-user entitlement state and the store it lives in.
//!
//! The [`EntitlementStore`] trait is the only seam to persistence for user
//! records. Implementations live in [`crate::store`].

mod resolver;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use resolver::{EntitlementResolver, ResolvedEntitlement};
use crate::error::Result;

/// Stable identity issued by the authentication provider (the token `sub`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a raw identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account role. Only `Admin` grants the admin plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular customer.
    #[default]
    User,
    /// Operator with unlimited access.
    Admin,
}

impl Role {
    /// Parses a stored role. Anything other than `"admin"` is a regular user.
    #[must_use]
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some("admin") => Self::Admin,
            _ => Self::User,
        }
    }

    /// Role name as stored.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

/// Persisted entitlement record of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntitlementState {
    /// Owner identity.
    pub user_id: UserId,
    /// Primary email, as reported at provisioning time.
    #[serde(default)]
    pub email: Option<String>,
    /// Account role.
    #[serde(default)]
    pub role: Role,
    /// Stored tier name; resolved through the plan registry.
    #[serde(default)]
    pub subscription_tier: Option<String>,
    /// Calls counted on `last_used_date`.
    #[serde(default)]
    pub usage_count: u32,
    /// Day the counter belongs to.
    #[serde(default)]
    pub last_used_date: Option<NaiveDate>,
}

impl UserEntitlementState {
    /// Record for a freshly provisioned user: regular role, no tier, no usage.
    #[must_use]
    pub fn provisioned(user_id: UserId, email: Option<String>) -> Self {
        Self {
            user_id,
            email,
            role: Role::User,
            subscription_tier: None,
            usage_count: 0,
            last_used_date: None,
        }
    }

    /// Usage count as it applies on `today`: zero when the stored day is
    /// different or unset.
    #[must_use]
    pub fn effective_usage(&self, today: NaiveDate) -> u32 {
        if self.last_used_date == Some(today) { self.usage_count } else { 0 }
    }
}

/// Persistence for [`UserEntitlementState`] records.
///
/// Every mutation targets exactly one user's record.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Loads a user's record, or `None` if it has not been provisioned.
    async fn fetch(&self, user_id: &UserId) -> Result<Option<UserEntitlementState>>;

    /// Sets `usage_count = 0` and `last_used_date = today`.
    async fn reset_usage(&self, user_id: &UserId, today: NaiveDate) -> Result<()>;

    /// Records one completed unit of work on `today` and returns the new count.
    ///
    /// `observed` is the count the caller checked against the quota.
    /// Implementations may write `observed + 1` or increment atomically.
    async fn record_usage(&self, user_id: &UserId, observed: u32, today: NaiveDate) -> Result<u32>;

    /// Inserts a new record. Returns `false` if one already exists, leaving
    /// it untouched.
    async fn provision(&self, state: UserEntitlementState) -> Result<bool>;

    /// Deletes a record. Returns `false` if there was none.
    async fn remove(&self, user_id: &UserId) -> Result<bool>;
}
