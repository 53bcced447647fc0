// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Model layer: conversation/message types, the stream event envelope, the
//! model catalog and named classes, provider adapters, and the routing that
//! maps an agent definition to a concrete model + provider.

pub mod catalog;
pub mod classes;
pub mod events;
pub mod registry;
pub mod router;
mod elevenlabs;
mod mock;
mod openai_compat;
mod provider;
mod types;

pub use catalog::{InputModality, ModelCost, ModelEntry, ModelFeatures, ModelScores};
pub use classes::{
    add_model_to_class, get_all_model_classes, get_model_class, override_model_class,
    remove_model_from_class, reset_model_classes, set_model_class_models, set_model_class_random,
    update_model_classes, ModelClass, DEFAULT_CLASS,
};
pub use elevenlabs::ElevenLabsProvider;
pub use events::{AgentSnapshot, EventPayload, StreamEvent};
pub use mock::{MockProvider, Script, ScriptedProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{ByteStream, Capability, EmbedOutput, EventStream, Provider, VoiceOutput};
pub use registry::{
    clear_registered_providers, get_model_provider, get_provider_meta, register_provider,
    ProviderMeta, PROVIDERS,
};
pub use router::{
    can_run_agent, can_run_agent_with_env, resolve_model, resolve_model_with_env,
    CapabilityReport, ModelSpec,
};
pub use types::*;
