//! Prompt templates for every workflow profile.
//!
//! The catalog is compiled into the binary from `catalog.toml` and is the
//! only place that maps `(workflow, profile)` to prompt text. Each workflow
//! has a frame with `{role}`, `{instructions}` and `{text}` placeholders
//! that the profile's template fills in.
//!
//! Plans and the catalog are maintained separately, so a plan may
//! allow-list a profile that has no template. [`TemplateCatalog::validate_against`]
//! finds those at startup; at request time the lookup fails with
//! [`GateError::UnknownProfileTemplate`].

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    error::{GateError, Result},
    plan::{PlanRegistry, Workflow},
    voice::CustomVoiceProfile,
};

const EMBEDDED: &str = include_str!("catalog.toml");

const DEFAULT_ARCHETYPE: &str = "editor professionista";
const DEFAULT_MISSION: &str = "riscrivere testi in modo chiaro e professionale";
const DEFAULT_TONE: &str = "professionale";

/// Role and instructions of one profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProfileTemplate {
    /// Persona and goal given to the model.
    pub role: String,
    /// Numbered task instructions.
    pub instructions: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Frames {
    validator: String,
    interpreter: String,
    compliance: String,
    strategist: String,
    quality_check: String,
    custom_voice: String,
}

/// All prompt templates, by workflow and profile name.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateCatalog {
    frames: Frames,
    #[serde(default)]
    validator: BTreeMap<String, ProfileTemplate>,
    #[serde(default)]
    interpreter: BTreeMap<String, ProfileTemplate>,
    #[serde(default)]
    compliance: BTreeMap<String, ProfileTemplate>,
    #[serde(default)]
    strategist: BTreeMap<String, ProfileTemplate>,
}

impl TemplateCatalog {
    /// Loads the catalog shipped with the crate.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the embedded document is invalid.
    pub fn embedded() -> Result<Self> {
        Self::from_toml(EMBEDDED)
    }

    /// Parses a catalog document.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] on malformed TOML or missing frames.
    pub fn from_toml(doc: &str) -> Result<Self> {
        toml::from_str(doc).map_err(|e| GateError::Config(format!("invalid template catalog: {e}")))
    }

    fn profiles(&self, workflow: Workflow) -> &BTreeMap<String, ProfileTemplate> {
        match workflow {
            Workflow::Validator => &self.validator,
            Workflow::Interpreter => &self.interpreter,
            Workflow::Compliance => &self.compliance,
            Workflow::Strategist => &self.strategist,
        }
    }

    fn frame(&self, workflow: Workflow) -> &str {
        match workflow {
            Workflow::Validator => &self.frames.validator,
            Workflow::Interpreter => &self.frames.interpreter,
            Workflow::Compliance => &self.frames.compliance,
            Workflow::Strategist => &self.frames.strategist,
        }
    }

    /// Looks up a template by exact profile name.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnknownProfileTemplate`] when the profile has no
    /// template.
    pub fn template(&self, workflow: Workflow, profile: &str) -> Result<&ProfileTemplate> {
        self.profiles(workflow).get(profile).ok_or_else(|| GateError::UnknownProfileTemplate {
            workflow,
            profile: profile.to_owned(),
        })
    }

    /// Profile names available for a workflow, sorted.
    pub fn profile_names(&self, workflow: Workflow) -> impl Iterator<Item = &str> {
        self.profiles(workflow).keys().map(String::as_str)
    }

    /// Allow-listed profiles that have no template, as
    /// `(plan name, workflow, profile)`.
    #[must_use]
    pub fn validate_against(&self, registry: &PlanRegistry) -> Vec<(&'static str, Workflow, String)> {
        let mut missing = Vec::new();
        for (plan_name, plan) in registry.iter() {
            for workflow in Workflow::ALL {
                if !plan.is_enabled(workflow) {
                    continue;
                }
                for profile in plan.rules(workflow).allowed_profiles.listed() {
                    if !self.profiles(workflow).contains_key(profile) {
                        missing.push((plan_name, workflow, profile.to_owned()));
                    }
                }
            }
        }
        missing
    }

    /// Builds the main prompt for a catalog profile.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnknownProfileTemplate`] when the profile has no
    /// template.
    pub fn render_primary(&self, workflow: Workflow, profile: &str, text: &str) -> Result<String> {
        let template = self.template(workflow, profile)?;
        Ok(render(
            self.frame(workflow),
            &[("role", &template.role), ("instructions", &template.instructions), ("text", text)],
        ))
    }

    /// Builds the quality-check prompt comparing `original` and `output`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnknownProfileTemplate`] when the profile has no
    /// template.
    pub fn render_quality_check(
        &self,
        workflow: Workflow,
        profile: &str,
        original: &str,
        output: &str,
    ) -> Result<String> {
        let template = self.template(workflow, profile)?;
        Ok(render(
            &self.frames.quality_check,
            &[("role", &template.role), ("original", original), ("output", output)],
        ))
    }

    /// Builds the rewrite prompt for a user-defined voice.
    ///
    /// Unset fields fall back to a neutral professional editor.
    #[must_use]
    pub fn render_custom_voice(&self, voice: &CustomVoiceProfile, text: &str) -> String {
        let tone_traits = if voice.tone_traits.is_empty() {
            DEFAULT_TONE.to_owned()
        } else {
            voice.tone_traits.join(", ")
        };
        let banned_terms = voice.banned_terms.join(", ");
        render(
            &self.frames.custom_voice,
            &[
                ("archetype", voice.archetype.as_deref().unwrap_or(DEFAULT_ARCHETYPE)),
                ("mission", voice.mission.as_deref().unwrap_or(DEFAULT_MISSION)),
                ("tone_traits", &tone_traits),
                ("banned_terms", &banned_terms),
                ("text", text),
            ],
        )
    }
}

/// Substitutes `{name}` placeholders in a single pass.
///
/// Substituted values are never rescanned, so user text containing
/// placeholder syntax is inserted verbatim. Braces that do not form a known
/// placeholder are kept.
fn render(frame: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(frame.len() + vars.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = frame;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter().find(|(key, _)| *key == name).map(|(_, value)| (close, *value))
        });
        match value {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entitlement::UserId, voice::VoiceProfileId};

    fn catalog() -> TemplateCatalog {
        TemplateCatalog::embedded().unwrap()
    }

    #[test]
    fn test_embedded_catalog_sizes() {
        let catalog = catalog();
        assert_eq!(catalog.profile_names(Workflow::Validator).count(), 18);
        assert_eq!(catalog.profile_names(Workflow::Interpreter).count(), 15);
        assert_eq!(catalog.profile_names(Workflow::Compliance).count(), 14);
        assert_eq!(catalog.profile_names(Workflow::Strategist).count(), 3);
    }

    #[test]
    fn test_builtin_plans_are_covered() {
        assert!(catalog().validate_against(&PlanRegistry::builtin()).is_empty());
    }

    #[test]
    fn test_drift_is_reported() {
        let mut doc = String::from(
            r#"
            [free]
            shared_daily_limit = 10
            [free.validator]
            allowed_profiles = ["Generico", "Fantasma"]
            [free.interpreter]
            allowed_profiles = []
            "#,
        );
        for (tier, limit) in [("starter", 10), ("pro", 10), ("business", 10), ("admin", -1)] {
            doc.push_str(&format!(
                "[{tier}]\nshared_daily_limit = {limit}\n[{tier}.validator]\n[{tier}.interpreter]\n"
            ));
        }
        let registry = PlanRegistry::from_toml(&doc).unwrap();
        let missing = catalog().validate_against(&registry);
        assert_eq!(missing, vec![("free", Workflow::Validator, "Fantasma".to_owned())]);
    }

    #[test]
    fn test_unknown_template() {
        let err = catalog().template(Workflow::Interpreter, "Generico").unwrap_err();
        assert!(matches!(
            err,
            GateError::UnknownProfileTemplate { workflow: Workflow::Interpreter, ref profile } if profile == "Generico"
        ));
    }

    #[test]
    fn test_profile_lookup_is_case_sensitive() {
        let catalog = catalog();
        assert!(catalog.template(Workflow::Validator, "Generico").is_ok());
        assert!(catalog.template(Workflow::Validator, "generico").is_err());
    }

    #[test]
    fn test_render_primary_embeds_text_once() {
        let prompt = catalog()
            .render_primary(Workflow::Validator, "Generico", "ciao {role} mondo")
            .unwrap();
        assert!(prompt.contains("editor professionista"));
        assert!(prompt.contains("ciao {role} mondo"));
        assert!(!prompt.contains("{text}"));
    }

    #[test]
    fn test_quality_check_keeps_json_braces() {
        let prompt = catalog()
            .render_quality_check(Workflow::Validator, "Generico", "prima", "dopo")
            .unwrap();
        assert!(prompt.contains(r#"{"reasoning": "...", "human_quality_score": <punteggio>}"#));
        assert!(prompt.contains("ORIGINALE: prima"));
        assert!(prompt.contains("PRODOTTO: dopo"));
    }

    #[test]
    fn test_custom_voice_defaults() {
        let voice = CustomVoiceProfile {
            id: VoiceProfileId::new_v4(),
            user_id: UserId::new("user_1"),
            name: "Brand".into(),
            mission: None,
            archetype: None,
            tone_traits: vec![],
            banned_terms: vec!["sinergia".into(), "disruptive".into()],
        };
        let prompt = catalog().render_custom_voice(&voice, "testo");
        assert!(prompt.contains(r#"Agisci come un "editor professionista""#));
        assert!(prompt.contains("riscrivere testi in modo chiaro e professionale"));
        assert!(prompt.contains("SEMPRE: professionale."));
        assert!(prompt.contains("sinergia, disruptive"));
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        assert_eq!(render("{a} {b} {", &[("a", "x")]), "x {b} {");
        assert_eq!(render("{a}{a}", &[("a", "{a}")]), "{a}{a}");
    }
}
