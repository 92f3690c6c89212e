//! User-defined tone-of-voice profiles.
//!
//! Profiles are owned by exactly one user and never shared. Creation is
//! capped per plan by [`authorize_create`]; every other operation goes
//! through [`CustomVoices`], which enforces ownership and reports a foreign
//! profile exactly like a missing one.

mod service;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use service::{CustomVoices, authorize_create};
use crate::{
    entitlement::UserId,
    error::{GateError, Result},
};

/// Maximum profile name length, in characters.
pub const MAX_NAME_LENGTH: usize = 50;

/// Maximum mission statement length, in characters.
pub const MAX_MISSION_LENGTH: usize = 250;

/// Identifier of a custom voice profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceProfileId(Uuid);

impl VoiceProfileId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for VoiceProfileId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for VoiceProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A stored tone-of-voice profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomVoiceProfile {
    /// Profile id.
    pub id: VoiceProfileId,
    /// Owner; immutable after creation.
    pub user_id: UserId,
    /// Display name, 1 to 50 characters.
    pub name: String,
    /// What the voice should achieve, at most 250 characters.
    #[serde(default)]
    pub mission: Option<String>,
    /// Persona the model should adopt.
    #[serde(default)]
    pub archetype: Option<String>,
    /// Adjectives describing the tone, in order of importance.
    #[serde(default)]
    pub tone_traits: Vec<String>,
    /// Words and phrases that must not appear in the output.
    #[serde(default)]
    pub banned_terms: Vec<String>,
}

/// Client-supplied fields for creating or replacing a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfileDraft {
    /// Display name.
    pub name: String,
    /// Mission statement.
    #[serde(default)]
    pub mission: Option<String>,
    /// Persona.
    #[serde(default)]
    pub archetype: Option<String>,
    /// Tone adjectives.
    #[serde(default)]
    pub tone_traits: Vec<String>,
    /// Forbidden terms.
    #[serde(default)]
    pub banned_terms: Vec<String>,
}

impl VoiceProfileDraft {
    /// Trims fields, drops blank list entries and checks length bounds.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidInput`] if the name is empty or longer
    /// than [`MAX_NAME_LENGTH`], or the mission exceeds [`MAX_MISSION_LENGTH`].
    pub fn normalize(self) -> Result<Self> {
        let name = self.name.trim().to_owned();
        let name_len = name.chars().count();
        if name_len == 0 || name_len > MAX_NAME_LENGTH {
            return Err(GateError::InvalidInput(format!(
                "name must be between 1 and {MAX_NAME_LENGTH} characters"
            )));
        }

        let mission = non_blank(self.mission);
        if mission.as_ref().is_some_and(|m| m.chars().count() > MAX_MISSION_LENGTH) {
            return Err(GateError::InvalidInput(format!(
                "mission must be at most {MAX_MISSION_LENGTH} characters"
            )));
        }

        Ok(Self {
            name,
            mission,
            archetype: non_blank(self.archetype),
            tone_traits: clean_list(self.tone_traits),
            banned_terms: clean_list(self.banned_terms),
        })
    }

    fn into_profile(self, id: VoiceProfileId, user_id: UserId) -> CustomVoiceProfile {
        CustomVoiceProfile {
            id,
            user_id,
            name: self.name,
            mission: self.mission,
            archetype: self.archetype,
            tone_traits: self.tone_traits,
            banned_terms: self.banned_terms,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.trim().to_owned()).filter(|v| !v.is_empty()).collect()
}

/// Persistence for custom voice profiles.
#[async_trait]
pub trait VoiceProfileStore: Send + Sync {
    /// Number of profiles owned by a user.
    async fn count_owned(&self, owner: &UserId) -> Result<u32>;

    /// Profiles owned by a user, in creation order.
    async fn list_owned(&self, owner: &UserId) -> Result<Vec<CustomVoiceProfile>>;

    /// Loads a profile regardless of owner.
    async fn get(&self, id: VoiceProfileId) -> Result<Option<CustomVoiceProfile>>;

    /// Inserts a new profile.
    async fn insert(&self, profile: CustomVoiceProfile) -> Result<()>;

    /// Replaces an existing profile. Returns `false` if it does not exist.
    async fn update(&self, profile: CustomVoiceProfile) -> Result<bool>;

    /// Deletes a profile. Returns `false` if it does not exist.
    async fn delete(&self, id: VoiceProfileId) -> Result<bool>;

    /// Deletes every profile of a user and returns how many were removed.
    async fn delete_all_owned(&self, owner: &UserId) -> Result<u32>;
}
