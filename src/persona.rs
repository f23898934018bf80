//! Persona profiles and the registry
//!
//! A persona is a named response identity: system prompt, activation
//! phrases, per-provider voice mapping, and the set of tools it may call.
//! Profiles are loaded once at startup from a profile directory of JSON
//! files and are immutable for the process lifetime.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single persona profile
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersonaProfile {
    /// Unique persona name (file stem of the persona JSON)
    #[serde(default)]
    pub name: String,

    /// System prompt establishing the persona's identity
    pub prompt: String,

    /// Wake phrases that route an utterance to this persona
    #[serde(default)]
    pub activation_phrases: Vec<String>,

    /// Voice id per TTS provider (e.g. "openai" -> "onyx")
    #[serde(default)]
    pub voices: HashMap<String, String>,

    /// Tools this persona may invoke
    #[serde(default)]
    pub allowed_tools: HashSet<String>,

    /// Spoken when the model or a tool fails; overrides the global fallback
    #[serde(default)]
    pub fallback: Option<String>,
}

impl PersonaProfile {
    /// Voice for the given TTS provider, if mapped
    #[must_use]
    pub fn voice_for(&self, provider: &str) -> Option<&str> {
        self.voices.get(provider).map(String::as_str)
    }

    /// Whether this persona may invoke the named tool
    #[must_use]
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.contains(tool)
    }
}

/// Loaded persona profiles, in declaration order
///
/// Declaration order is the sorted filename order of the profile
/// directory; the activation tie-break depends on it being stable.
#[derive(Debug, Default)]
pub struct PersonaRegistry {
    profiles: Vec<PersonaProfile>,
}

impl PersonaRegistry {
    /// Load every `*.json` persona file in a profile directory
    ///
    /// Duplicate activation phrases across personas are logged and the
    /// later occurrence dropped, so routing stays unambiguous.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the directory is missing, unreadable,
    /// contains a malformed persona file, or yields no personas.
    pub fn load(profile_dir: &Path) -> Result<Self> {
        if !profile_dir.is_dir() {
            return Err(Error::Config(format!(
                "profile directory not found: {}",
                profile_dir.display()
            )));
        }

        let mut paths: Vec<_> = std::fs::read_dir(profile_dir)
            .map_err(|e| {
                Error::Config(format!("cannot read {}: {e}", profile_dir.display()))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut registry = Self::default();
        let mut seen_phrases: HashSet<String> = HashSet::new();

        for path in paths {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
            let mut profile: PersonaProfile = serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!("malformed persona {}: {e}", path.display()))
            })?;
            profile.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            profile.activation_phrases.retain(|phrase| {
                let key = phrase.to_lowercase();
                if seen_phrases.contains(&key) {
                    tracing::warn!(
                        persona = %profile.name,
                        phrase = %phrase,
                        "duplicate activation phrase dropped"
                    );
                    false
                } else {
                    seen_phrases.insert(key);
                    true
                }
            });

            tracing::info!(
                persona = %profile.name,
                phrases = profile.activation_phrases.len(),
                tools = profile.allowed_tools.len(),
                "loaded persona"
            );
            registry.profiles.push(profile);
        }

        if registry.profiles.is_empty() {
            return Err(Error::Config(format!(
                "no personas in {}",
                profile_dir.display()
            )));
        }

        Ok(registry)
    }

    /// Build a registry from already-constructed profiles (tests)
    #[must_use]
    pub fn from_profiles(profiles: Vec<PersonaProfile>) -> Self {
        Self { profiles }
    }

    /// Profiles in declaration order
    #[must_use]
    pub fn profiles(&self) -> &[PersonaProfile] {
        &self.profiles
    }

    /// Look up a persona by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PersonaProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Number of loaded personas
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
