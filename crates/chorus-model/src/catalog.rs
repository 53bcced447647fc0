// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models, with a runtime overlay
//! for externally registered entries.

use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};

/// Input modality a model consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Audio,
    Image,
}

/// Price vector, USD per 1M tokens (voice models: per 1M input characters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
    /// Discounted rate for prompt tokens served from the provider cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFeatures {
    pub context_length: u32,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_functions: bool,
    pub input_modality: InputModality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dimensions: Option<u32>,
}

/// Rough quality/latency hints, 0–100.  Informational only: class resolution
/// follows class order (or random selection), never these numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelScores {
    pub intelligence: Option<u8>,
    pub speed: Option<u8>,
}

/// Metadata for a single model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model identifier as sent to the provider (e.g. "gpt-4o").
    pub id: String,
    /// Provider identifier: "openai" | "anthropic" | "mock" | ...
    pub provider: String,
    pub cost: ModelCost,
    pub features: ModelFeatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<ModelScores>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelEntry>,
}

fn static_entries() -> &'static [ModelEntry] {
    static ENTRIES: OnceLock<Vec<ModelEntry>> = OnceLock::new();
    ENTRIES.get_or_init(|| {
        let yaml = include_str!("../models.yaml");
        let catalog: CatalogFile =
            serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
        catalog.models
    })
}

fn external_entries() -> &'static RwLock<Vec<ModelEntry>> {
    static EXTERNAL: OnceLock<RwLock<Vec<ModelEntry>>> = OnceLock::new();
    EXTERNAL.get_or_init(|| RwLock::new(Vec::new()))
}

/// All catalog entries: externally registered entries first, then the
/// bundled static catalog.
pub fn all_models() -> Vec<ModelEntry> {
    let ext = external_entries().read().expect("catalog lock poisoned");
    ext.iter().cloned().chain(static_entries().iter().cloned()).collect()
}

/// Look up a model by id.  External registrations shadow static entries.
pub fn lookup(model_id: &str) -> Option<ModelEntry> {
    {
        let ext = external_entries().read().expect("catalog lock poisoned");
        if let Some(e) = ext.iter().find(|e| e.id == model_id) {
            return Some(e.clone());
        }
    }
    static_entries().iter().find(|e| e.id == model_id).cloned()
}

/// Register (or replace) an external model entry at runtime.
pub fn register_model(entry: ModelEntry) {
    let mut ext = external_entries().write().expect("catalog lock poisoned");
    ext.retain(|e| e.id != entry.id);
    ext.push(entry);
}

/// Remove every externally registered entry.  Used by tests.
pub fn clear_external_models() {
    external_entries().write().expect("catalog lock poisoned").clear();
}

/// Convenience: the provider id a model belongs to.
pub fn provider_of(model_id: &str) -> Option<String> {
    lookup(model_id).map(|e| e.provider)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
