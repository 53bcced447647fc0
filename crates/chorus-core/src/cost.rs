// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide usage ledger.
//!
//! Entries are append-only; `reset()` clears them.  Cost is computed from
//! the model's catalog price vector at append time, with the cached share
//! billed at the cached rate and deducted from the input share.

use std::sync::{Mutex, OnceLock};

use chorus_model::{catalog, UsageEntry};

pub type UsageCallback = std::sync::Arc<dyn Fn(&UsageEntry) + Send + Sync>;

pub struct CostTracker {
    entries: Mutex<Vec<UsageEntry>>,
    callbacks: Mutex<Vec<UsageCallback>>,
}

impl CostTracker {
    fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()), callbacks: Mutex::new(Vec::new()) }
    }

    /// Append an entry, computing its cost from catalog prices unless the
    /// caller already set one.  Registered callbacks fire synchronously,
    /// after the append, before any event delivery.
    pub fn add_usage(&self, mut entry: UsageEntry) -> UsageEntry {
        if entry.cost == 0.0 {
            entry.cost = compute_cost(&entry);
        }
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).push(entry.clone());
        let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for cb in callbacks {
            cb(&entry);
        }
        entry
    }

    /// Sum of all appended entry costs.
    pub fn get_total_cost(&self) -> f64 {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).iter().map(|e| e.cost).sum()
    }

    pub fn entries(&self) -> Vec<UsageEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last_entry(&self) -> Option<UsageEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }

    /// Clear the ledger.  Callbacks stay registered.
    pub fn reset(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Register a callback invoked for every appended entry.
    pub fn on_add_usage(&self, cb: UsageCallback) {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).push(cb);
    }

    /// Drop all registered callbacks.  Used by tests.
    pub fn clear_callbacks(&self) {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// The process-wide tracker.
pub fn cost_tracker() -> &'static CostTracker {
    static TRACKER: OnceLock<CostTracker> = OnceLock::new();
    TRACKER.get_or_init(CostTracker::new)
}

/// Price an entry against the catalog.  Unknown models cost nothing.
fn compute_cost(entry: &UsageEntry) -> f64 {
    let Some(model) = catalog::lookup(&entry.model) else { return 0.0 };
    let per_token = 1.0 / 1_000_000.0;
    let cached = entry.cached_tokens.min(entry.input_tokens);
    let uncached_input = entry.input_tokens - cached;
    let mut cost = uncached_input as f64 * model.cost.input * per_token
        + entry.output_tokens as f64 * model.cost.output * per_token;
    cost += match model.cost.cached {
        Some(rate) => cached as f64 * rate * per_token,
        None => cached as f64 * model.cost.input * per_token,
    };
    cost
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
