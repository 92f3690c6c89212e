//! Plan-capped, owner-scoped operations on custom voice profiles.

use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use super::{CustomVoiceProfile, VoiceProfileDraft, VoiceProfileId, VoiceProfileStore};
use crate::{
    decision::{Decision, Denial, GatedResource},
    entitlement::UserId,
    error::{GateError, Result},
    plan::{Limit, Plan},
    security::audit::{AuditEvent, AuditEventType},
};

/// Decides whether a user owning `owned` profiles may create another.
///
/// Denies with `FeatureDisabled` when the plan has no custom voices, and
/// with `ResourceLimitExceeded` when `owned` has reached a capped
/// `max_profiles`. An unlimited cap never denies.
pub fn authorize_create(plan: &Plan, owned: u32) -> Decision {
    let rules = plan.custom_voice;
    if !rules.enabled {
        return Decision::Deny(Denial::FeatureDisabled { resource: GatedResource::CustomVoice });
    }
    match rules.max_profiles {
        Limit::Capped(max) if owned >= max => {
            Decision::Deny(Denial::ResourceLimitExceeded { max })
        }
        _ => Decision::Allow,
    }
}

/// Custom voice operations on behalf of an authenticated user.
#[derive(Clone)]
pub struct CustomVoices {
    store: Arc<dyn VoiceProfileStore>,
}

impl CustomVoices {
    /// Wraps a profile store.
    #[must_use]
    pub fn new(store: Arc<dyn VoiceProfileStore>) -> Self {
        Self { store }
    }

    /// Creates a profile owned by `owner`, subject to the plan's cap.
    ///
    /// # Errors
    ///
    /// - [`GateError::Denied`] when the plan disables custom voices or the cap is reached
    /// - [`GateError::InvalidInput`] when the draft fails validation
    #[instrument(skip(self, plan, draft), fields(user_id = %owner), level = "debug")]
    pub async fn create(
        &self,
        owner: &UserId,
        plan: &Plan,
        draft: VoiceProfileDraft,
    ) -> Result<CustomVoiceProfile> {
        let owned = self.store.count_owned(owner).await?;
        if let Decision::Deny(denial) = authorize_create(plan, owned) {
            AuditEvent::new(AuditEventType::AccessDenied, owner.as_str(), Uuid::new_v4())
                .with_feature(GatedResource::CustomVoice.to_string())
                .with_reason(denial.code())
                .emit();
            return Err(denial.into());
        }

        let profile = draft.normalize()?.into_profile(VoiceProfileId::new_v4(), owner.clone());
        self.store.insert(profile.clone()).await?;

        AuditEvent::new(AuditEventType::VoiceProfileCreated, owner.as_str(), Uuid::new_v4())
            .with_resource_id(profile.id)
            .emit();
        Ok(profile)
    }

    /// Profiles owned by `owner`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list(&self, owner: &UserId) -> Result<Vec<CustomVoiceProfile>> {
        self.store.list_owned(owner).await
    }

    /// Loads a profile if `owner` owns it.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotFoundOrForbidden`] if the profile is missing
    /// or owned by someone else.
    pub async fn get(&self, owner: &UserId, id: VoiceProfileId) -> Result<CustomVoiceProfile> {
        let profile = self.store.get(id).await?.ok_or(GateError::NotFoundOrForbidden)?;
        if profile.user_id != *owner {
            AuditEvent::new(AuditEventType::OwnershipViolation, owner.as_str(), Uuid::new_v4())
                .with_resource_id(id)
                .emit();
            return Err(GateError::NotFoundOrForbidden);
        }
        Ok(profile)
    }

    /// Replaces the fields of a profile `owner` owns. Id and owner are kept.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotFoundOrForbidden`] on a missing or foreign
    /// profile, [`GateError::InvalidInput`] on an invalid draft.
    pub async fn update(
        &self,
        owner: &UserId,
        id: VoiceProfileId,
        draft: VoiceProfileDraft,
    ) -> Result<CustomVoiceProfile> {
        let existing = self.get(owner, id).await?;
        let profile = draft.normalize()?.into_profile(existing.id, existing.user_id);

        if !self.store.update(profile.clone()).await? {
            return Err(GateError::NotFoundOrForbidden);
        }

        AuditEvent::new(AuditEventType::VoiceProfileUpdated, owner.as_str(), Uuid::new_v4())
            .with_resource_id(id)
            .emit();
        Ok(profile)
    }

    /// Deletes a profile `owner` owns.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotFoundOrForbidden`] on a missing or foreign profile.
    pub async fn delete(&self, owner: &UserId, id: VoiceProfileId) -> Result<()> {
        self.get(owner, id).await?;
        if !self.store.delete(id).await? {
            return Err(GateError::NotFoundOrForbidden);
        }

        AuditEvent::new(AuditEventType::VoiceProfileDeleted, owner.as_str(), Uuid::new_v4())
            .with_resource_id(id)
            .emit();
        Ok(())
    }

    /// Removes every profile of a deleted account.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn purge(&self, owner: &UserId) -> Result<u32> {
        self.store.delete_all_owned(owner).await
    }
}

impl std::fmt::Debug for CustomVoices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomVoices").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        plan::{CustomVoiceRules, PlanRegistry, Tier},
        store::InMemoryStore,
    };

    fn plan_with(max_profiles: Limit) -> Plan {
        let mut plan = (**PlanRegistry::builtin().get(Tier::Pro)).clone();
        plan.custom_voice = CustomVoiceRules { enabled: true, max_profiles };
        plan
    }

    fn draft(name: &str) -> VoiceProfileDraft {
        VoiceProfileDraft { name: name.into(), ..Default::default() }
    }

    #[test]
    fn test_authorize_create_respects_cap() {
        let plan = plan_with(Limit::Capped(2));
        assert_eq!(authorize_create(&plan, 0), Decision::Allow);
        assert_eq!(authorize_create(&plan, 1), Decision::Allow);
        assert_eq!(
            authorize_create(&plan, 2),
            Decision::Deny(Denial::ResourceLimitExceeded { max: 2 })
        );
    }

    #[test]
    fn test_authorize_create_unlimited() {
        let plan = plan_with(Limit::Unlimited);
        assert_eq!(authorize_create(&plan, u32::MAX), Decision::Allow);
    }

    #[test]
    fn test_authorize_create_disabled() {
        let plan = (**PlanRegistry::builtin().get(Tier::Free)).clone();
        assert_eq!(
            authorize_create(&plan, 0),
            Decision::Deny(Denial::FeatureDisabled { resource: GatedResource::CustomVoice })
        );
    }

    #[tokio::test]
    async fn test_create_until_cap() {
        let voices = CustomVoices::new(Arc::new(InMemoryStore::new()));
        let owner = UserId::new("user_a");
        let plan = plan_with(Limit::Capped(1));

        let created = voices.create(&owner, &plan, draft("Brand")).await.unwrap();
        assert_eq!(created.user_id, owner);

        let err = voices.create(&owner, &plan, draft("Second")).await.unwrap_err();
        assert!(matches!(err, GateError::Denied(Denial::ResourceLimitExceeded { max: 1 })));
        assert_eq!(voices.list(&owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cap_checked_before_validation() {
        let voices = CustomVoices::new(Arc::new(InMemoryStore::new()));
        let plan = plan_with(Limit::Capped(0));

        let err = voices.create(&UserId::new("user_a"), &plan, draft("")).await.unwrap_err();
        assert!(matches!(err, GateError::Denied(_)));
    }

    #[tokio::test]
    async fn test_ownership_isolation() {
        let voices = CustomVoices::new(Arc::new(InMemoryStore::new()));
        let alice = UserId::new("user_alice");
        let bob = UserId::new("user_bob");
        let plan = plan_with(Limit::Unlimited);

        let profile = voices.create(&alice, &plan, draft("Alice voice")).await.unwrap();

        assert!(matches!(voices.get(&bob, profile.id).await, Err(GateError::NotFoundOrForbidden)));
        assert!(matches!(
            voices.update(&bob, profile.id, draft("Hijacked")).await,
            Err(GateError::NotFoundOrForbidden)
        ));
        assert!(matches!(
            voices.delete(&bob, profile.id).await,
            Err(GateError::NotFoundOrForbidden)
        ));
        assert!(voices.list(&bob).await.unwrap().is_empty());

        // Foreign and missing look the same.
        let missing = VoiceProfileId::new_v4();
        assert!(matches!(voices.get(&bob, missing).await, Err(GateError::NotFoundOrForbidden)));

        assert_eq!(voices.get(&alice, profile.id).await.unwrap().name, "Alice voice");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let voices = CustomVoices::new(Arc::new(InMemoryStore::new()));
        let owner = UserId::new("user_a");
        let plan = plan_with(Limit::Unlimited);

        let profile = voices.create(&owner, &plan, draft("Old")).await.unwrap();
        let updated = voices
            .update(
                &owner,
                profile.id,
                VoiceProfileDraft { tone_traits: vec!["ironico".into()], ..draft("New") },
            )
            .await
            .unwrap();

        assert_eq!(updated.id, profile.id);
        assert_eq!(updated.name, "New");
        assert_eq!(updated.tone_traits, vec!["ironico"]);

        voices.delete(&owner, profile.id).await.unwrap();
        assert!(matches!(voices.get(&owner, profile.id).await, Err(GateError::NotFoundOrForbidden)));
    }

    #[tokio::test]
    async fn test_purge() {
        let voices = CustomVoices::new(Arc::new(InMemoryStore::new()));
        let owner = UserId::new("user_a");
        let plan = plan_with(Limit::Unlimited);
        for name in ["A", "B", "C"] {
            voices.create(&owner, &plan, draft(name)).await.unwrap();
        }

        assert_eq!(voices.purge(&owner).await.unwrap(), 3);
        assert!(voices.list(&owner).await.unwrap().is_empty());
    }
}
