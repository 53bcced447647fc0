// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Agent → model resolution and capability reporting.
//!
//! An agent names either an explicit `model` or a `model_class`.  Resolution
//! filters class members to models whose provider passes the API-key check
//! and covers the requested capability, then picks the first usable member
//! (or a uniformly random one when the class has `random` set).

use anyhow::bail;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::{
    catalog, classes,
    classes::DEFAULT_CLASS,
    provider::Capability,
    registry::{self, provider_key_available},
};

/// Environment lookup used for API-key checks.  Production callers use
/// [`env_lookup`]; tests inject a closure over a fixed map.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// The process environment, as an [`EnvLookup`].
pub fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// The model/class portion of an agent definition, as accepted by
/// [`can_run_agent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub model: Option<String>,
    pub model_class: Option<String>,
}

/// The answer to "can this agent run here?".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub can_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(default)]
    pub unavailable_models: Vec<String>,
    /// Set when every unavailable model is missing the same provider key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Whether `model_id` is usable for `kind` right now: its provider must be
/// known (or runtime-registered), hold a valid API key, and cover `kind`.
fn model_available(model_id: &str, kind: Capability, env: EnvLookup) -> bool {
    // A runtime-registered provider claiming the model answers for itself.
    if let Some(entry) = catalog::lookup(model_id) {
        if let Some(p) = registry::registered_provider(&entry.provider) {
            if p.supports_model(model_id) {
                return p.has_capability(kind);
            }
        }
        let Some(meta) = registry::get_provider_meta(&entry.provider) else {
            return false;
        };
        if !meta.capabilities.contains(&kind) {
            return false;
        }
        if kind == Capability::Embedding && entry.features.embedding_dimensions.is_none() {
            return false;
        }
        return provider_key_available(meta, env);
    }
    false
}

/// Resolve an agent's model choice to a concrete model id.
///
/// An explicit `model` always wins over `model_class`.  With neither set, the
/// `standard` class is used.
pub fn resolve_model(
    model: Option<&str>,
    model_class: Option<&str>,
    kind: Capability,
) -> anyhow::Result<String> {
    resolve_model_with_env(model, model_class, kind, &env_lookup)
}

pub fn resolve_model_with_env(
    model: Option<&str>,
    model_class: Option<&str>,
    kind: Capability,
    env: EnvLookup,
) -> anyhow::Result<String> {
    if let Some(m) = model {
        return Ok(m.to_string());
    }

    let class_name = model_class.unwrap_or(DEFAULT_CLASS);
    let class = classes::get_model_class(class_name);
    let usable: Vec<&String> =
        class.models.iter().filter(|m| model_available(m, kind, env)).collect();

    if usable.is_empty() {
        bail!(
            "no usable model in class {class_name:?}: \
             no provider API keys available for any of {:?}",
            class.models
        );
    }

    let chosen = if class.random {
        *usable
            .choose(&mut rand::thread_rng())
            .expect("usable list is non-empty")
    } else {
        usable[0]
    };
    Ok(chosen.clone())
}

/// Answer whether an agent described by `spec` can run in this environment.
pub fn can_run_agent(spec: &ModelSpec) -> CapabilityReport {
    can_run_agent_with_env(spec, &env_lookup)
}

pub fn can_run_agent_with_env(spec: &ModelSpec, env: EnvLookup) -> CapabilityReport {
    // An explicit model takes precedence over a class: only that model's
    // provider key is considered.
    if let Some(model) = &spec.model {
        return report_for_model(model, env);
    }

    let class_name = spec.model_class.as_deref().unwrap_or(DEFAULT_CLASS);
    let class = classes::get_model_class(class_name);

    let mut report = CapabilityReport::default();
    let mut missing: Vec<String> = Vec::new();
    for model in &class.models {
        if model_available(model, Capability::Chat, env) {
            report.available_models.push(model.clone());
        } else {
            report.unavailable_models.push(model.clone());
            if let Some(provider) = catalog::provider_of(model) {
                missing.push(provider);
            }
        }
    }

    report.can_run = !report.available_models.is_empty();
    if report.can_run {
        let model = report.available_models[0].clone();
        report.provider = catalog::provider_of(&model);
        report.model = Some(model);
    } else {
        missing.sort();
        missing.dedup();
        if missing.len() == 1 {
            report.missing_provider = Some(missing.remove(0));
        }
        report.reason = Some(format!(
            "No API keys available for any model in class {class_name:?}"
        ));
    }
    report
}

fn report_for_model(model: &str, env: EnvLookup) -> CapabilityReport {
    let mut report = CapabilityReport { model: Some(model.to_string()), ..Default::default() };

    let Some(entry) = catalog::lookup(model) else {
        report.reason = Some(format!("Unknown model {model:?}"));
        report.unavailable_models.push(model.to_string());
        return report;
    };
    report.provider = Some(entry.provider.clone());

    if registry::registered_provider(&entry.provider)
        .map(|p| p.supports_model(model))
        .unwrap_or(false)
    {
        report.can_run = true;
        report.available_models.push(model.to_string());
        return report;
    }

    match registry::get_provider_meta(&entry.provider) {
        Some(meta) if provider_key_available(meta, env) => {
            report.can_run = true;
            report.available_models.push(model.to_string());
        }
        Some(meta) => {
            report.unavailable_models.push(model.to_string());
            report.missing_provider = Some(meta.id.to_string());
            report.reason = Some(match meta.key_env {
                Some(var) => format!("No API keys available: {var} is not set or invalid"),
                None => format!("Provider {} is unavailable", meta.id),
            });
        }
        None => {
            report.unavailable_models.push(model.to_string());
            report.missing_provider = Some(entry.provider.clone());
            report.reason = Some(format!("Unknown provider {:?}", entry.provider));
        }
    }
    report
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
