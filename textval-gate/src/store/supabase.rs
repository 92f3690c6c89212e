//! Store backed by a Supabase project through its PostgREST API.
//!
//! Expected tables:
//!
//! - `profiles`: `id text primary key, email text, role text,
//!   subscription_tier text, usage_count int, last_used_date date`
//! - `custom_voice_profiles`: `id uuid primary key, user_id text references
//!   profiles(id) on delete cascade, name text, mission text, archetype text,
//!   tone_traits text[], banned_terms text[], created_at timestamptz default now()`
//!
//! Usage is recorded by writing `observed + 1`, a plain read-then-write.
//! Two concurrent requests of the same user may both observe the same count
//! and both write the same value, letting a call through uncounted.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, header::HeaderValue};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use crate::{
    entitlement::{EntitlementStore, Role, UserEntitlementState, UserId},
    error::{GateError, Result},
    http::{base_url, create_http_client, endpoint},
    voice::{CustomVoiceProfile, VoiceProfileId, VoiceProfileStore},
};

const PROFILES: &str = "rest/v1/profiles";
const VOICES: &str = "rest/v1/custom_voice_profiles";
const PROFILE_COLUMNS: &str = "id,email,role,subscription_tier,usage_count,last_used_date";
const VOICE_COLUMNS: &str = "id,user_id,name,mission,archetype,tone_traits,banned_terms";

/// PostgREST client for the `profiles` and `custom_voice_profiles` tables.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    profiles: Url,
    voices: Url,
    service_key: String,
}

impl SupabaseStore {
    /// Connects to a project with its service-role key.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] for an invalid project URL or key.
    pub fn new(project_url: &str, service_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let service_key = service_key.into();
        if service_key.is_empty() || HeaderValue::from_str(&service_key).is_err() {
            return Err(GateError::Config("Supabase service key is empty or invalid".into()));
        }

        let base = base_url(project_url)?;
        Ok(Self {
            client: create_http_client(timeout)?,
            profiles: endpoint(&base, PROFILES)?,
            voices: endpoint(&base, VOICES)?,
            service_key,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", &self.service_key).bearer_auth(&self.service_key)
    }

    async fn rows<T: DeserializeOwned>(request: RequestBuilder) -> Result<Vec<T>> {
        let response = request.send().await?.error_for_status()?;
        response.json().await.map_err(GateError::HttpError)
    }

    async fn no_content(request: RequestBuilder) -> Result<()> {
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

impl std::fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("profiles", &self.profiles.as_str())
            .field("voices", &self.voices.as_str())
            .finish_non_exhaustive()
    }
}

/// Row shape of the `profiles` table. Columns may be null.
#[derive(Debug, Serialize, Deserialize)]
struct ProfileRow {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    subscription_tier: Option<String>,
    #[serde(default)]
    usage_count: Option<i64>,
    #[serde(default)]
    last_used_date: Option<NaiveDate>,
}

impl From<ProfileRow> for UserEntitlementState {
    fn from(row: ProfileRow) -> Self {
        Self {
            user_id: UserId::new(row.id),
            email: row.email,
            role: Role::from_stored(row.role.as_deref()),
            subscription_tier: row.subscription_tier,
            usage_count: row.usage_count.and_then(|c| u32::try_from(c).ok()).unwrap_or(0),
            last_used_date: row.last_used_date,
        }
    }
}

impl From<UserEntitlementState> for ProfileRow {
    fn from(state: UserEntitlementState) -> Self {
        Self {
            id: state.user_id.as_str().to_owned(),
            email: state.email,
            role: Some(state.role.as_str().to_owned()),
            subscription_tier: state.subscription_tier,
            usage_count: Some(i64::from(state.usage_count)),
            last_used_date: state.last_used_date,
        }
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl EntitlementStore for SupabaseStore {
    #[instrument(skip(self, user_id), fields(user_id = %user_id), level = "debug")]
    async fn fetch(&self, user_id: &UserId) -> Result<Option<UserEntitlementState>> {
        let request = self
            .authorized(self.client.get(self.profiles.clone()))
            .query(&[("id", eq(user_id)), ("select", PROFILE_COLUMNS.to_owned())]);
        let rows: Vec<ProfileRow> = Self::rows(request).await?;
        Ok(rows.into_iter().next().map(Into::into))
    }

    #[instrument(skip(self, user_id), fields(user_id = %user_id), level = "debug")]
    async fn reset_usage(&self, user_id: &UserId, today: NaiveDate) -> Result<()> {
        let request = self
            .authorized(self.client.patch(self.profiles.clone()))
            .query(&[("id", eq(user_id))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "usage_count": 0, "last_used_date": today }));
        Self::no_content(request).await
    }

    #[instrument(skip(self, user_id), fields(user_id = %user_id), level = "debug")]
    async fn record_usage(&self, user_id: &UserId, observed: u32, today: NaiveDate) -> Result<u32> {
        let next = observed.saturating_add(1);
        let request = self
            .authorized(self.client.patch(self.profiles.clone()))
            .query(&[("id", eq(user_id))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "usage_count": next, "last_used_date": today }));
        Self::no_content(request).await?;
        debug!(usage_count = next, "usage recorded");
        Ok(next)
    }

    #[instrument(skip(self, state), fields(user_id = %state.user_id), level = "debug")]
    async fn provision(&self, state: UserEntitlementState) -> Result<bool> {
        let request = self
            .authorized(self.client.post(self.profiles.clone()))
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(&ProfileRow::from(state));
        let inserted: Vec<ProfileRow> = Self::rows(request).await?;
        Ok(!inserted.is_empty())
    }

    #[instrument(skip(self, user_id), fields(user_id = %user_id), level = "debug")]
    async fn remove(&self, user_id: &UserId) -> Result<bool> {
        let request = self
            .authorized(self.client.delete(self.profiles.clone()))
            .query(&[("id", eq(user_id))])
            .header("Prefer", "return=representation");
        let deleted: Vec<ProfileRow> = Self::rows(request).await?;
        Ok(!deleted.is_empty())
    }
}

#[derive(Deserialize)]
struct IdRow {
    #[allow(dead_code, reason = "only the row count is used")]
    id: VoiceProfileId,
}

fn count(rows: usize) -> u32 {
    u32::try_from(rows).unwrap_or(u32::MAX)
}

#[async_trait]
impl VoiceProfileStore for SupabaseStore {
    async fn count_owned(&self, owner: &UserId) -> Result<u32> {
        let request = self
            .authorized(self.client.get(self.voices.clone()))
            .query(&[("user_id", eq(owner)), ("select", "id".to_owned())]);
        let rows: Vec<IdRow> = Self::rows(request).await?;
        Ok(count(rows.len()))
    }

    async fn list_owned(&self, owner: &UserId) -> Result<Vec<CustomVoiceProfile>> {
        let request = self.authorized(self.client.get(self.voices.clone())).query(&[
            ("user_id", eq(owner)),
            ("select", VOICE_COLUMNS.to_owned()),
            ("order", "created_at.asc".to_owned()),
        ]);
        Self::rows(request).await
    }

    async fn get(&self, id: VoiceProfileId) -> Result<Option<CustomVoiceProfile>> {
        let request = self
            .authorized(self.client.get(self.voices.clone()))
            .query(&[("id", eq(id)), ("select", VOICE_COLUMNS.to_owned())]);
        let rows: Vec<CustomVoiceProfile> = Self::rows(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, profile: CustomVoiceProfile) -> Result<()> {
        let request = self
            .authorized(self.client.post(self.voices.clone()))
            .header("Prefer", "return=minimal")
            .json(&profile);
        Self::no_content(request).await
    }

    async fn update(&self, profile: CustomVoiceProfile) -> Result<bool> {
        let request = self
            .authorized(self.client.patch(self.voices.clone()))
            .query(&[("id", eq(profile.id))])
            .header("Prefer", "return=representation")
            .json(&json!({
                "name": profile.name,
                "mission": profile.mission,
                "archetype": profile.archetype,
                "tone_traits": profile.tone_traits,
                "banned_terms": profile.banned_terms,
            }));
        let rows: Vec<IdRow> = Self::rows(request).await?;
        Ok(!rows.is_empty())
    }

    async fn delete(&self, id: VoiceProfileId) -> Result<bool> {
        let request = self
            .authorized(self.client.delete(self.voices.clone()))
            .query(&[("id", eq(id))])
            .header("Prefer", "return=representation");
        let rows: Vec<IdRow> = Self::rows(request).await?;
        Ok(!rows.is_empty())
    }

    async fn delete_all_owned(&self, owner: &UserId) -> Result<u32> {
        let request = self
            .authorized(self.client.delete(self.voices.clone()))
            .query(&[("user_id", eq(owner))])
            .header("Prefer", "return=representation");
        let rows: Vec<IdRow> = Self::rows(request).await?;
        Ok(count(rows.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion_tolerates_nulls() {
        let row: ProfileRow = serde_json::from_value(json!({
            "id": "user_1",
            "email": null,
            "role": null,
            "subscription_tier": null,
            "usage_count": null,
            "last_used_date": null
        }))
        .unwrap();

        let state = UserEntitlementState::from(row);
        assert_eq!(state.role, Role::User);
        assert_eq!(state.usage_count, 0);
        assert_eq!(state.last_used_date, None);
    }

    #[test]
    fn test_row_conversion_clamps_negative_usage() {
        let row: ProfileRow =
            serde_json::from_value(json!({ "id": "u", "usage_count": -3, "role": "admin" }))
                .unwrap();
        let state = UserEntitlementState::from(row);
        assert_eq!(state.usage_count, 0);
        assert_eq!(state.role, Role::Admin);
    }

    #[test]
    fn test_rejects_empty_key() {
        let result = SupabaseStore::new("https://abc.supabase.co", "", Duration::from_secs(5));
        assert!(matches!(result, Err(GateError::Config(_))));
    }
}
