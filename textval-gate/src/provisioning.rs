//! Applies identity-provider lifecycle events to the stores.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::webhook::ProvisioningEvent,
    entitlement::{EntitlementStore, UserEntitlementState},
    error::Result,
    security::audit::{AuditEvent, AuditEventType},
    voice::CustomVoices,
};

/// What applying an event changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisioningOutcome {
    /// A `user.created` event was applied.
    Provisioned {
        /// `false` when the record already existed.
        created: bool,
    },
    /// A `user.deleted` event was applied.
    Removed {
        /// `false` when there was no record to remove.
        existed: bool,
        /// Custom voice profiles deleted with the account.
        voices_removed: u32,
    },
    /// The event was acknowledged without changes.
    Ignored,
}

/// Creates and removes entitlement records.
#[derive(Clone)]
pub struct Provisioner {
    entitlements: Arc<dyn EntitlementStore>,
    voices: CustomVoices,
}

impl Provisioner {
    /// Creates a provisioner.
    #[must_use]
    pub fn new(entitlements: Arc<dyn EntitlementStore>, voices: CustomVoices) -> Self {
        Self { entitlements, voices }
    }

    /// Applies one verified event.
    ///
    /// Creation is idempotent: a redelivered `user.created` leaves the
    /// existing record, including its usage, untouched. Deletion removes the
    /// user's custom voices before the entitlement record.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the provider will redeliver the event.
    #[instrument(skip_all, level = "debug")]
    pub async fn apply(&self, event: ProvisioningEvent) -> Result<ProvisioningOutcome> {
        match event {
            ProvisioningEvent::UserCreated { user_id, email } => {
                let created = self
                    .entitlements
                    .provision(UserEntitlementState::provisioned(user_id.clone(), email))
                    .await?;
                if created {
                    info!(user_id = %user_id, "entitlement record provisioned");
                    AuditEvent::new(AuditEventType::UserProvisioned, user_id.as_str(), Uuid::new_v4())
                        .with_tier("free")
                        .emit();
                } else {
                    info!(user_id = %user_id, "entitlement record already present");
                }
                Ok(ProvisioningOutcome::Provisioned { created })
            }
            ProvisioningEvent::UserDeleted { user_id } => {
                let voices_removed = self.voices.purge(&user_id).await?;
                let existed = self.entitlements.remove(&user_id).await?;
                if existed {
                    info!(user_id = %user_id, voices_removed, "entitlement record removed");
                } else {
                    warn!(user_id = %user_id, "no entitlement record to remove");
                }
                AuditEvent::new(AuditEventType::UserRemoved, user_id.as_str(), Uuid::new_v4())
                    .with_reason(if existed { "deleted" } else { "absent" })
                    .emit();
                Ok(ProvisioningOutcome::Removed { existed, voices_removed })
            }
            ProvisioningEvent::Ignored { event_type } => {
                info!(%event_type, "webhook event ignored");
                Ok(ProvisioningOutcome::Ignored)
            }
        }
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{
        entitlement::{Role, UserId},
        plan::{PlanRegistry, Tier},
        store::InMemoryStore,
        voice::{VoiceProfileDraft, VoiceProfileStore},
    };

    fn setup() -> (Provisioner, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let provisioner = Provisioner::new(store.clone(), CustomVoices::new(store.clone()));
        (provisioner, store)
    }

    #[tokio::test]
    async fn test_user_created_provisions_free_record() {
        let (provisioner, store) = setup();
        let outcome = provisioner
            .apply(ProvisioningEvent::UserCreated {
                user_id: UserId::new("user_1"),
                email: Some("a@b.it".into()),
            })
            .await
            .unwrap();
        assert_eq!(outcome, ProvisioningOutcome::Provisioned { created: true });

        let state = store.fetch(&UserId::new("user_1")).await.unwrap().unwrap();
        assert_eq!(state.role, Role::User);
        assert_eq!(state.subscription_tier, None);
        assert_eq!(state.usage_count, 0);
        assert_eq!(state.last_used_date, None);
        assert_eq!(state.email.as_deref(), Some("a@b.it"));
    }

    #[tokio::test]
    async fn test_redelivery_keeps_existing_usage() {
        let (provisioner, store) = setup();
        let mut existing = UserEntitlementState::provisioned(UserId::new("user_1"), None);
        existing.usage_count = 7;
        existing.last_used_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        store.put_user(existing).await;

        let outcome = provisioner
            .apply(ProvisioningEvent::UserCreated { user_id: UserId::new("user_1"), email: None })
            .await
            .unwrap();
        assert_eq!(outcome, ProvisioningOutcome::Provisioned { created: false });
        assert_eq!(store.fetch(&UserId::new("user_1")).await.unwrap().unwrap().usage_count, 7);
    }

    #[tokio::test]
    async fn test_user_deleted_cascades_to_voices() {
        let (provisioner, store) = setup();
        let user = UserId::new("user_1");
        store.put_user(UserEntitlementState::provisioned(user.clone(), None)).await;

        let voices = CustomVoices::new(store.clone());
        let pro = PlanRegistry::builtin();
        for name in ["Uno", "Due"] {
            let draft = VoiceProfileDraft { name: name.into(), ..Default::default() };
            voices.create(&user, pro.get(Tier::Pro), draft).await.unwrap();
        }

        let outcome =
            provisioner.apply(ProvisioningEvent::UserDeleted { user_id: user.clone() }).await.unwrap();
        assert_eq!(outcome, ProvisioningOutcome::Removed { existed: true, voices_removed: 2 });
        assert!(store.fetch(&user).await.unwrap().is_none());
        assert_eq!(store.count_owned(&user).await.unwrap(), 0);

        let again = provisioner.apply(ProvisioningEvent::UserDeleted { user_id: user }).await.unwrap();
        assert_eq!(again, ProvisioningOutcome::Removed { existed: false, voices_removed: 0 });
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let (provisioner, _) = setup();
        let outcome = provisioner
            .apply(ProvisioningEvent::Ignored { event_type: "session.created".into() })
            .await
            .unwrap();
        assert_eq!(outcome, ProvisioningOutcome::Ignored);
    }
}
