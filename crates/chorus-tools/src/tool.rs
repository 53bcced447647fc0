// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use chorus_model::ToolSchema;

/// JSON-schema function spec for one tool, as presented to the model.
#[derive(Debug, Clone)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

impl ToolFunction {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self { name: name.into(), description: description.into(), parameters }
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// One declared parameter, in call-site order.  The loop uses this to map
/// the model's named arguments onto positional callables.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    /// Scalar values provided for an array parameter are wrapped in a
    /// single-element array before invocation.
    pub is_array: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: true, is_array: false }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: false, is_array: false }
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }
}

type NamedFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;
type PositionalFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// How a tool's callable receives its arguments.
#[derive(Clone)]
pub enum ToolBinding {
    /// The callable takes the whole argument object.
    Named(NamedFn),
    /// The callable takes arguments in declared parameter order.
    Positional(PositionalFn),
}

/// A user-supplied tool: a function spec the model sees plus the callable
/// the loop executes.
#[derive(Clone)]
pub struct Tool {
    pub definition: ToolFunction,
    /// Declared parameter order; only consulted for positional bindings.
    pub params: Vec<ParamSpec>,
    /// When false, tool output is returned to the model verbatim, with no
    /// truncation of any kind.
    pub allow_summary: bool,
    pub binding: ToolBinding,
}

impl Tool {
    /// A tool whose callable takes the raw argument object.
    pub fn named<F>(definition: ToolFunction, f: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static,
    {
        Self { definition, params: Vec::new(), allow_summary: true, binding: ToolBinding::Named(Arc::new(f)) }
    }

    /// A tool whose callable takes arguments in `params` order.
    pub fn positional<F>(definition: ToolFunction, params: Vec<ParamSpec>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static,
    {
        Self {
            definition,
            params,
            allow_summary: true,
            binding: ToolBinding::Positional(Arc::new(f)),
        }
    }

    pub fn with_allow_summary(mut self, allow: bool) -> Self {
        self.allow_summary = allow;
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.definition.name)
            .field("params", &self.params)
            .field("allow_summary", &self.allow_summary)
            .finish_non_exhaustive()
    }
}

/// Find a tool by its declared function name.
pub fn find_tool<'a>(tools: &'a [Tool], name: &str) -> Option<&'a Tool> {
    tools.iter().find(|t| t.definition.name == name)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
