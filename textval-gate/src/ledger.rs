//! Daily usage accounting.
//!
//! The ledger answers two questions for a resolved user: may another call
//! start now ([`QuotaLedger::check_and_reserve`]), and record that one
//! finished successfully ([`QuotaLedger::commit`]). Counting happens only
//! after success, so a failed model call never consumes quota and there is
//! nothing to refund.
//!
//! Days are server-local calendar dates supplied by a [`Clock`].

use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    decision::{Decision, Denial},
    entitlement::{EntitlementStore, UserEntitlementState},
    error::Result,
    plan::{Limit, Plan},
    security::audit::{AuditEvent, AuditEventType},
};

/// Source of the current calendar day.
pub trait Clock: Send + Sync {
    /// Today's date.
    fn today(&self) -> NaiveDate;
}

/// Server-local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<NaiveDate>);

impl FixedClock {
    /// Starts at `date`.
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self(Mutex::new(date))
    }

    /// Moves to `date`.
    pub fn set(&self, date: NaiveDate) {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = date;
    }

    /// Moves forward by one day.
    pub fn advance_day(&self) {
        let mut date = self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *date = date.succ_opt().unwrap_or(*date);
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Usage figures reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    /// Calls counted today.
    pub count: u32,
    /// Daily limit; `-1` when unlimited.
    pub limit: Limit,
}

/// Per-user daily quota on top of an [`EntitlementStore`].
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    /// Creates a ledger.
    #[must_use]
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current day according to the ledger's clock.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Decides whether one more call fits in today's budget.
    ///
    /// Unlimited plans are always allowed and never touch the record. For
    /// capped plans a record last used on another day (or never) is reset
    /// to zero and the reset is persisted immediately, before the balance
    /// check, whatever the outcome of the rest of the request. `state` is
    /// updated to match.
    ///
    /// # Errors
    ///
    /// Propagates store failures while persisting a reset.
    #[instrument(skip_all, fields(user_id = %state.user_id), level = "debug")]
    pub async fn check_and_reserve(
        &self,
        state: &mut UserEntitlementState,
        plan: &Plan,
    ) -> Result<Decision> {
        let Limit::Capped(limit) = plan.shared_daily_limit else {
            return Ok(Decision::Allow);
        };

        let today = self.clock.today();
        if state.last_used_date != Some(today) {
            self.store.reset_usage(&state.user_id, today).await?;
            debug!(previous = ?state.last_used_date, %today, "daily usage reset");
            AuditEvent::new(AuditEventType::QuotaReset, state.user_id.as_str(), Uuid::new_v4())
                .with_usage_count(0)
                .emit();
            state.usage_count = 0;
            state.last_used_date = Some(today);
        }

        if state.usage_count >= limit {
            return Ok(Decision::Deny(Denial::QuotaExceeded { limit }));
        }
        Ok(Decision::Allow)
    }

    /// Counts one successful call.
    ///
    /// Must only be called after the gated work completed. Unlimited plans
    /// are not counted. `state` is updated with the stored result.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    #[instrument(skip_all, fields(user_id = %state.user_id), level = "debug")]
    pub async fn commit(
        &self,
        state: &mut UserEntitlementState,
        plan: &Plan,
    ) -> Result<UsageSnapshot> {
        if plan.is_unlimited() {
            return Ok(UsageSnapshot { count: state.usage_count, limit: Limit::Unlimited });
        }

        let today = self.clock.today();
        let count = self.store.record_usage(&state.user_id, state.usage_count, today).await?;
        state.usage_count = count;
        state.last_used_date = Some(today);

        AuditEvent::new(AuditEventType::UsageCommitted, state.user_id.as_str(), Uuid::new_v4())
            .with_usage_count(count)
            .emit();
        Ok(UsageSnapshot { count, limit: plan.shared_daily_limit })
    }

    /// Usage as it applies today, without persisting a reset.
    #[must_use]
    pub fn snapshot(&self, state: &UserEntitlementState, plan: &Plan) -> UsageSnapshot {
        UsageSnapshot {
            count: state.effective_usage(self.clock.today()),
            limit: plan.shared_daily_limit,
        }
    }
}

impl std::fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLedger").field("today", &self.clock.today()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entitlement::UserId,
        plan::{PlanRegistry, Tier},
        store::InMemoryStore,
    };

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, d).unwrap()
    }

    async fn setup(
        usage_count: u32,
        last_used_date: Option<NaiveDate>,
    ) -> (QuotaLedger, Arc<InMemoryStore>, Arc<FixedClock>, UserEntitlementState) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(day(10)));
        let mut state = UserEntitlementState::provisioned(UserId::new("user_1"), None);
        state.usage_count = usage_count;
        state.last_used_date = last_used_date;
        store.provision(state.clone()).await.unwrap();

        let ledger = QuotaLedger::new(store.clone(), clock.clone());
        (ledger, store, clock, state)
    }

    fn free() -> Arc<Plan> {
        Arc::clone(PlanRegistry::builtin().get(Tier::Free))
    }

    #[tokio::test]
    async fn test_allows_below_limit() {
        let (ledger, _, _, mut state) = setup(9, Some(day(10))).await;
        assert_eq!(ledger.check_and_reserve(&mut state, &free()).await.unwrap(), Decision::Allow);
        assert_eq!(state.usage_count, 9);
    }

    #[tokio::test]
    async fn test_denies_at_limit() {
        let (ledger, _, _, mut state) = setup(10, Some(day(10))).await;
        assert_eq!(
            ledger.check_and_reserve(&mut state, &free()).await.unwrap(),
            Decision::Deny(Denial::QuotaExceeded { limit: 10 })
        );
    }

    #[tokio::test]
    async fn test_reset_on_new_day_is_persisted_even_when_denied_later() {
        let (ledger, store, _, mut state) = setup(10, Some(day(9))).await;

        assert_eq!(ledger.check_and_reserve(&mut state, &free()).await.unwrap(), Decision::Allow);
        assert_eq!(state.usage_count, 0);
        assert_eq!(state.last_used_date, Some(day(10)));

        let stored = store.fetch(&state.user_id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 0);
        assert_eq!(stored.last_used_date, Some(day(10)));
    }

    #[tokio::test]
    async fn test_reset_when_never_used() {
        let (ledger, store, _, mut state) = setup(4, None).await;
        ledger.check_and_reserve(&mut state, &free()).await.unwrap();
        assert_eq!(store.fetch(&state.user_id).await.unwrap().unwrap().usage_count, 0);
    }

    #[tokio::test]
    async fn test_same_day_checks_never_reset() {
        let (ledger, _, _, mut state) = setup(3, Some(day(10))).await;
        ledger.check_and_reserve(&mut state, &free()).await.unwrap();
        ledger.check_and_reserve(&mut state, &free()).await.unwrap();
        assert_eq!(state.usage_count, 3);
    }

    #[tokio::test]
    async fn test_commit_counts_after_success() {
        let (ledger, store, _, mut state) = setup(0, Some(day(10))).await;
        let plan = free();
        for expected in 1..=3 {
            ledger.check_and_reserve(&mut state, &plan).await.unwrap();
            let usage = ledger.commit(&mut state, &plan).await.unwrap();
            assert_eq!(usage, UsageSnapshot { count: expected, limit: Limit::Capped(10) });
        }
        assert_eq!(store.fetch(&state.user_id).await.unwrap().unwrap().usage_count, 3);
    }

    #[tokio::test]
    async fn test_unlimited_plan_is_never_mutated() {
        let (ledger, store, _, mut state) = setup(5, Some(day(1))).await;
        let admin = Arc::clone(PlanRegistry::builtin().admin());

        assert_eq!(ledger.check_and_reserve(&mut state, &admin).await.unwrap(), Decision::Allow);
        let usage = ledger.commit(&mut state, &admin).await.unwrap();

        assert_eq!(usage.limit, Limit::Unlimited);
        let stored = store.fetch(&state.user_id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 5);
        assert_eq!(stored.last_used_date, Some(day(1)));
    }

    #[tokio::test]
    async fn test_snapshot_does_not_persist() {
        let (ledger, store, clock, state) = setup(7, Some(day(10))).await;
        assert_eq!(ledger.snapshot(&state, &free()).count, 7);

        clock.advance_day();
        assert_eq!(ledger.snapshot(&state, &free()).count, 0);
        assert_eq!(store.fetch(&state.user_id).await.unwrap().unwrap().usage_count, 7);
    }

    #[test]
    fn test_snapshot_serializes_unlimited_as_minus_one() {
        let json =
            serde_json::to_value(UsageSnapshot { count: 2, limit: Limit::Unlimited }).unwrap();
        assert_eq!(json, serde_json::json!({ "count": 2, "limit": -1 }));
    }
}
