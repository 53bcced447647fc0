// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Provider registry: static metadata for every supported provider plus the
//! runtime instance table that maps a model id to a provider adapter.
//!
//! The metadata table is the single source of truth for which provider ids
//! exist, which environment variable holds each API key, and what format the
//! key must have.  Adapter construction lives in [`get_model_provider`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::bail;

use crate::{
    catalog,
    elevenlabs::ElevenLabsProvider,
    openai_compat::OpenAiCompatProvider,
    provider::{Capability, Provider},
};

/// Metadata describing a registered provider.
#[derive(Debug, Clone)]
pub struct ProviderMeta {
    /// Unique provider id used in catalog `provider` fields (e.g. `"openai"`).
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// Environment variable holding the API key.  `None` for providers that
    /// require no key (mock, local servers).
    pub key_env: Option<&'static str>,
    /// Required key prefix, when the provider issues keys with a fixed format.
    pub key_prefix: Option<&'static str>,
    /// Capabilities of the built-in adapter for this provider.
    pub capabilities: &'static [Capability],
}

const CHAT: &[Capability] = &[Capability::Chat];
const ALL: &[Capability] = &[
    Capability::Chat,
    Capability::Voice,
    Capability::Transcription,
    Capability::Embedding,
    Capability::Image,
];

/// Complete registry of supported providers.
pub static PROVIDERS: &[ProviderMeta] = &[
    ProviderMeta {
        id: "openai",
        name: "OpenAI",
        key_env: Some("OPENAI_API_KEY"),
        key_prefix: None,
        capabilities: ALL,
    },
    ProviderMeta {
        id: "anthropic",
        name: "Anthropic",
        key_env: Some("ANTHROPIC_API_KEY"),
        key_prefix: Some("sk-ant-"),
        capabilities: CHAT,
    },
    ProviderMeta {
        id: "google",
        name: "Google Gemini",
        key_env: Some("GOOGLE_API_KEY"),
        key_prefix: None,
        capabilities: CHAT,
    },
    ProviderMeta {
        id: "xai",
        name: "xAI",
        key_env: Some("XAI_API_KEY"),
        key_prefix: None,
        capabilities: CHAT,
    },
    ProviderMeta {
        id: "deepseek",
        name: "DeepSeek",
        key_env: Some("DEEPSEEK_API_KEY"),
        key_prefix: None,
        capabilities: CHAT,
    },
    ProviderMeta {
        id: "openrouter",
        name: "OpenRouter",
        key_env: Some("OPENROUTER_API_KEY"),
        key_prefix: Some("sk-or-"),
        capabilities: CHAT,
    },
    ProviderMeta {
        id: "elevenlabs",
        name: "ElevenLabs",
        key_env: Some("ELEVENLABS_API_KEY"),
        key_prefix: None,
        capabilities: &[Capability::Voice],
    },
    ProviderMeta {
        id: "mock",
        name: "Mock",
        key_env: None,
        key_prefix: None,
        capabilities: ALL,
    },
];

/// Look up provider metadata by id.
pub fn get_provider_meta(id: &str) -> Option<&'static ProviderMeta> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// Whether a usable API key for this provider is present.
///
/// `env` abstracts `std::env::var` so capability checks stay hermetic in
/// tests.  A provider with no `key_env` is always available.  When the
/// provider specifies a key prefix, the key format is validated as well.
pub fn provider_key_available(meta: &ProviderMeta, env: &dyn Fn(&str) -> Option<String>) -> bool {
    let Some(var) = meta.key_env else { return true };
    let Some(key) = env(var) else { return false };
    if key.trim().is_empty() {
        return false;
    }
    match meta.key_prefix {
        Some(prefix) => key.starts_with(prefix),
        None => true,
    }
}

fn registered() -> &'static RwLock<HashMap<String, Arc<dyn Provider>>> {
    static REGISTERED: OnceLock<RwLock<HashMap<String, Arc<dyn Provider>>>> = OnceLock::new();
    REGISTERED.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Install a provider instance at runtime, keyed by its id.  Registered
/// instances take precedence over the built-in adapters; this is how tests
/// wire in scripted providers.
pub fn register_provider(provider: Arc<dyn Provider>) {
    registered()
        .write()
        .expect("provider registry lock poisoned")
        .insert(provider.id().to_string(), provider);
}

/// Remove every runtime-registered provider.  Used by tests.
pub fn clear_registered_providers() {
    registered().write().expect("provider registry lock poisoned").clear();
}

/// Fetch a runtime-registered provider by id.
pub fn registered_provider(id: &str) -> Option<Arc<dyn Provider>> {
    registered().read().expect("provider registry lock poisoned").get(id).cloned()
}

/// Map a model id to a provider adapter.
///
/// Runtime-registered providers are consulted first (any instance claiming
/// the model wins); otherwise the model's catalog provider selects a built-in
/// adapter.
pub fn get_model_provider(model_id: &str) -> anyhow::Result<Arc<dyn Provider>> {
    {
        let reg = registered().read().expect("provider registry lock poisoned");
        for provider in reg.values() {
            if provider.supports_model(model_id) {
                return Ok(Arc::clone(provider));
            }
        }
    }

    let Some(entry) = catalog::lookup(model_id) else {
        bail!("no provider found for unknown model {model_id:?}");
    };
    builtin_provider(&entry.provider)
}

/// Construct (or fetch the cached instance of) the built-in adapter for a
/// provider id.
fn builtin_provider(provider_id: &str) -> anyhow::Result<Arc<dyn Provider>> {
    static BUILTINS: OnceLock<RwLock<HashMap<String, Arc<dyn Provider>>>> = OnceLock::new();
    let cache = BUILTINS.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(p) = cache.read().expect("builtin cache lock poisoned").get(provider_id) {
        return Ok(Arc::clone(p));
    }

    let provider: Arc<dyn Provider> = match provider_id {
        "openai" => Arc::new(OpenAiCompatProvider::openai()),
        "anthropic" => Arc::new(OpenAiCompatProvider::anthropic()),
        "google" => Arc::new(OpenAiCompatProvider::google()),
        "xai" => Arc::new(OpenAiCompatProvider::xai()),
        "deepseek" => Arc::new(OpenAiCompatProvider::deepseek()),
        "openrouter" => Arc::new(OpenAiCompatProvider::openrouter()),
        "elevenlabs" => Arc::new(ElevenLabsProvider::from_env()),
        other => bail!(
            "no built-in adapter for provider {other:?}; \
             register one with register_provider()"
        ),
    };

    cache
        .write()
        .expect("builtin cache lock poisoned")
        .insert(provider_id.to_string(), Arc::clone(&provider));
    Ok(provider)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for p in PROVIDERS {
            assert!(seen.insert(p.id), "duplicate provider id: {}", p.id);
        }
    }

    #[test]
    fn anthropic_requires_prefixed_key() {
        let meta = get_provider_meta("anthropic").unwrap();
        let good = |_: &str| Some("sk-ant-abc123".to_string());
        let bad = |_: &str| Some("sk-wrong".to_string());
        let missing = |_: &str| None;
        assert!(provider_key_available(meta, &good));
        assert!(!provider_key_available(meta, &bad));
        assert!(!provider_key_available(meta, &missing));
    }

    #[test]
    fn openrouter_requires_prefixed_key() {
        let meta = get_provider_meta("openrouter").unwrap();
        assert!(provider_key_available(meta, &|_| Some("sk-or-v1-xyz".into())));
        assert!(!provider_key_available(meta, &|_| Some("sk-proj-xyz".into())));
    }

    #[test]
    fn mock_provider_needs_no_key() {
        let meta = get_provider_meta("mock").unwrap();
        assert!(provider_key_available(meta, &|_| None));
    }

    #[test]
    fn empty_key_counts_as_missing() {
        let meta = get_provider_meta("openai").unwrap();
        assert!(!provider_key_available(meta, &|_| Some("  ".into())));
    }

    #[test]
    fn get_model_provider_resolves_catalog_models() {
        let p = get_model_provider("gpt-4o").unwrap();
        assert_eq!(p.id(), "openai");
        let p = get_model_provider("claude-sonnet-4").unwrap();
        assert_eq!(p.id(), "anthropic");
        let p = get_model_provider("eleven_turbo_v2_5").unwrap();
        assert_eq!(p.id(), "elevenlabs");
    }

    #[test]
    fn get_model_provider_fails_for_unknown_model() {
        let err = get_model_provider("definitely-not-a-model").unwrap_err();
        assert!(err.to_string().contains("no provider found"));
    }
}
