// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Named model classes: ordered groups of model ids that agents can select
//! instead of a concrete model.  The built-in classes are seeded from the
//! bundled catalog and may be reshaped at runtime.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

use serde::{Deserialize, Serialize};

/// The class an unknown class name resolves to.
pub const DEFAULT_CLASS: &str = "standard";

/// An ordered group of model ids.
///
/// Resolution picks the first member that passes capability and key checks,
/// or a uniformly random passing member when `random` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelClass {
    pub models: Vec<String>,
    #[serde(default)]
    pub random: bool,
}

impl ModelClass {
    pub fn new(models: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { models: models.into_iter().map(Into::into).collect(), random: false }
    }
}

fn default_classes() -> HashMap<String, ModelClass> {
    let mut m = HashMap::new();
    m.insert(
        "standard".into(),
        ModelClass::new(["gpt-5", "gpt-4.1", "claude-sonnet-4", "gemini-2.5-pro", "grok-4"]),
    );
    m.insert(
        "mini".into(),
        ModelClass::new(["gpt-5-mini", "gpt-4o-mini", "claude-3-5-haiku", "gemini-2.5-flash"]),
    );
    m.insert(
        "reasoning".into(),
        ModelClass::new(["o3", "claude-opus-4", "deepseek-reasoner", "gemini-2.5-pro"]),
    );
    m.insert("code".into(), ModelClass::new(["claude-sonnet-4", "gpt-5", "deepseek-chat"]));
    m.insert(
        "summary".into(),
        ModelClass::new(["gpt-4o-mini", "gemini-2.5-flash", "claude-3-5-haiku"]),
    );
    m.insert(
        "voice".into(),
        ModelClass::new(["gpt-4o-mini-tts", "eleven_turbo_v2_5", "eleven_multilingual_v2"]),
    );
    m.insert("transcription".into(), ModelClass::new(["gpt-4o-transcribe", "whisper-1"]));
    m.insert(
        "embedding".into(),
        ModelClass::new(["text-embedding-3-small", "text-embedding-3-large"]),
    );
    m.insert("image".into(), ModelClass::new(["gpt-image-1", "dall-e-3"]));
    m
}

fn classes() -> MutexGuard<'static, HashMap<String, ModelClass>> {
    static CLASSES: OnceLock<Mutex<HashMap<String, ModelClass>>> = OnceLock::new();
    CLASSES
        .get_or_init(|| Mutex::new(default_classes()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

/// Resolve a class by name.  Unknown names resolve to the `standard` class.
pub fn get_model_class(name: &str) -> ModelClass {
    let map = classes();
    map.get(name)
        .or_else(|| map.get(DEFAULT_CLASS))
        .cloned()
        .unwrap_or_default()
}

/// Replace the model list of a class, creating the class if necessary.
pub fn set_model_class_models(name: &str, models: Vec<String>) {
    classes().entry(name.to_string()).or_default().models = models;
}

/// Append a model to a class unless it is already a member.
pub fn add_model_to_class(name: &str, model: &str) {
    let mut map = classes();
    let class = map.entry(name.to_string()).or_default();
    if !class.models.iter().any(|m| m == model) {
        class.models.push(model.to_string());
    }
}

/// Remove a model from a class.  Removing the last member leaves an empty
/// class rather than deleting it.
pub fn remove_model_from_class(name: &str, model: &str) {
    if let Some(class) = classes().get_mut(name) {
        class.models.retain(|m| m != model);
    }
}

/// Toggle random selection for a class.
pub fn set_model_class_random(name: &str, random: bool) {
    classes().entry(name.to_string()).or_default().random = random;
}

/// Replace a class wholesale.
pub fn override_model_class(name: &str, class: ModelClass) {
    classes().insert(name.to_string(), class);
}

/// Snapshot of every class.
pub fn get_all_model_classes() -> HashMap<String, ModelClass> {
    classes().clone()
}

/// Bulk update: each entry replaces the class of the same name.
pub fn update_model_classes(updates: HashMap<String, ModelClass>) {
    let mut map = classes();
    for (name, class) in updates {
        map.insert(name, class);
    }
}

/// Restore the built-in class set.  Used by tests.
pub fn reset_model_classes() {
    *classes() = default_classes();
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
