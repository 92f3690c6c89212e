//! In-process store for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::{
    entitlement::{EntitlementStore, UserEntitlementState, UserId},
    error::{GateError, Result},
    voice::{CustomVoiceProfile, VoiceProfileId, VoiceProfileStore},
};

/// Entitlement and voice profile store held in memory.
///
/// Usage increments happen under the write lock, so concurrent commits for
/// the same user are never lost.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<UserId, UserEntitlementState>>,
    voices: RwLock<Vec<CustomVoiceProfile>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with user records.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = UserEntitlementState>) -> Self {
        let users = users.into_iter().map(|u| (u.user_id.clone(), u)).collect();
        Self { users: RwLock::new(users), voices: RwLock::default() }
    }

    /// Overwrites a user's record.
    pub async fn put_user(&self, state: UserEntitlementState) {
        self.users.write().await.insert(state.user_id.clone(), state);
    }
}

fn missing(user_id: &UserId) -> GateError {
    GateError::Store(format!("no entitlement record for {user_id}"))
}

#[async_trait]
impl EntitlementStore for InMemoryStore {
    async fn fetch(&self, user_id: &UserId) -> Result<Option<UserEntitlementState>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn reset_usage(&self, user_id: &UserId, today: NaiveDate) -> Result<()> {
        let mut users = self.users.write().await;
        let state = users.get_mut(user_id).ok_or_else(|| missing(user_id))?;
        state.usage_count = 0;
        state.last_used_date = Some(today);
        Ok(())
    }

    async fn record_usage(&self, user_id: &UserId, _observed: u32, today: NaiveDate) -> Result<u32> {
        let mut users = self.users.write().await;
        let state = users.get_mut(user_id).ok_or_else(|| missing(user_id))?;
        if state.last_used_date != Some(today) {
            state.usage_count = 0;
        }
        state.usage_count = state.usage_count.saturating_add(1);
        state.last_used_date = Some(today);
        Ok(state.usage_count)
    }

    async fn provision(&self, state: UserEntitlementState) -> Result<bool> {
        let mut users = self.users.write().await;
        if users.contains_key(&state.user_id) {
            return Ok(false);
        }
        users.insert(state.user_id.clone(), state);
        Ok(true)
    }

    async fn remove(&self, user_id: &UserId) -> Result<bool> {
        Ok(self.users.write().await.remove(user_id).is_some())
    }
}

#[async_trait]
impl VoiceProfileStore for InMemoryStore {
    async fn count_owned(&self, owner: &UserId) -> Result<u32> {
        let count = self.voices.read().await.iter().filter(|p| p.user_id == *owner).count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_owned(&self, owner: &UserId) -> Result<Vec<CustomVoiceProfile>> {
        Ok(self.voices.read().await.iter().filter(|p| p.user_id == *owner).cloned().collect())
    }

    async fn get(&self, id: VoiceProfileId) -> Result<Option<CustomVoiceProfile>> {
        Ok(self.voices.read().await.iter().find(|p| p.id == id).cloned())
    }

    async fn insert(&self, profile: CustomVoiceProfile) -> Result<()> {
        let mut voices = self.voices.write().await;
        if voices.iter().any(|p| p.id == profile.id) {
            return Err(GateError::Store(format!("duplicate voice profile id {}", profile.id)));
        }
        voices.push(profile);
        Ok(())
    }

    async fn update(&self, profile: CustomVoiceProfile) -> Result<bool> {
        let mut voices = self.voices.write().await;
        match voices.iter_mut().find(|p| p.id == profile.id) {
            Some(slot) => {
                *slot = profile;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: VoiceProfileId) -> Result<bool> {
        let mut voices = self.voices.write().await;
        let before = voices.len();
        voices.retain(|p| p.id != id);
        Ok(voices.len() != before)
    }

    async fn delete_all_owned(&self, owner: &UserId) -> Result<u32> {
        let mut voices = self.voices.write().await;
        let before = voices.len();
        voices.retain(|p| p.user_id != *owner);
        Ok(u32::try_from(before - voices.len()).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 2).unwrap()
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let store = InMemoryStore::new();
        let mut state = UserEntitlementState::provisioned(UserId::new("u1"), None);
        assert!(store.provision(state.clone()).await.unwrap());

        state.subscription_tier = Some("pro".into());
        assert!(!store.provision(state).await.unwrap());

        let stored = store.fetch(&UserId::new("u1")).await.unwrap().unwrap();
        assert_eq!(stored.subscription_tier, None);
    }

    #[tokio::test]
    async fn test_record_usage_is_atomic_under_concurrency() {
        let store = Arc::new(InMemoryStore::new());
        let user = UserId::new("u1");
        store.provision(UserEntitlementState::provisioned(user.clone(), None)).await.unwrap();
        store.reset_usage(&user, today()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            let user = user.clone();
            // Every task observed the same stale count.
            handles.push(tokio::spawn(async move { store.record_usage(&user, 0, today()).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = store.fetch(&user).await.unwrap().unwrap();
        assert_eq!(state.usage_count, 20);
    }

    #[tokio::test]
    async fn test_record_usage_on_missing_user_fails() {
        let store = InMemoryStore::new();
        let err = store.record_usage(&UserId::new("ghost"), 0, today()).await.unwrap_err();
        assert!(matches!(err, GateError::Store(_)));
    }

    #[tokio::test]
    async fn test_remove() {
        let store =
            InMemoryStore::with_users([UserEntitlementState::provisioned(UserId::new("u1"), None)]);
        assert!(store.remove(&UserId::new("u1")).await.unwrap());
        assert!(!store.remove(&UserId::new("u1")).await.unwrap());
    }
}
