// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Delta coalescing.
//!
//! Providers emit many tiny text deltas.  The buffer flushes on a growing
//! threshold: the first flush happens after `start` buffered bytes, each
//! flush raises the threshold by `step` up to `max`, and a wall-clock cap
//! forces a flush when output has been held too long.  Consumers get a
//! near-instant first paint and far fewer events over a long completion.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chorus_model::StreamEvent;

#[derive(Debug, Clone)]
pub struct DeltaBufferOptions {
    /// Initial flush threshold, in bytes.
    pub start: usize,
    /// Threshold ceiling.
    pub max: usize,
    /// Threshold growth per flush.
    pub step: usize,
    /// Flush whenever this much wall-clock time has passed since the last
    /// flush, regardless of buffered length.  `None` disables the cap.
    pub max_age: Option<Duration>,
}

impl Default for DeltaBufferOptions {
    fn default() -> Self {
        Self { start: 20, max: 400, step: 20, max_age: Some(Duration::from_millis(500)) }
    }
}

#[derive(Debug)]
pub struct DeltaBuffer {
    opts: DeltaBufferOptions,
    buf: String,
    threshold: usize,
    last_flush: Instant,
}

impl DeltaBuffer {
    pub fn new(opts: DeltaBufferOptions) -> Self {
        let threshold = opts.start;
        Self { opts, buf: String::new(), threshold, last_flush: Instant::now() }
    }

    /// Append a chunk; returns the coalesced payload when a flush fires.
    pub fn add(&mut self, chunk: &str) -> Option<String> {
        self.buf.push_str(chunk);
        let expired = self
            .opts
            .max_age
            .map(|age| self.last_flush.elapsed() >= age)
            .unwrap_or(false);
        if self.buf.len() >= self.threshold || (expired && !self.buf.is_empty()) {
            return Some(self.take());
        }
        None
    }

    /// Drain any remaining content.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn take(&mut self) -> String {
        self.threshold = (self.threshold + self.opts.step).min(self.opts.max);
        self.last_flush = Instant::now();
        std::mem::take(&mut self.buf)
    }
}

/// Per-invocation buffer store, keyed by message id.
pub type DeltaStore = HashMap<String, DeltaBuffer>;

/// Feed one provider delta through the store.  Returns zero or one output
/// events built by `make_event` from the coalesced payload.
pub fn buffer_delta(
    store: &mut DeltaStore,
    opts: &DeltaBufferOptions,
    message_id: &str,
    chunk: &str,
    make_event: impl FnOnce(String) -> StreamEvent,
) -> Vec<StreamEvent> {
    let buffer = store
        .entry(message_id.to_string())
        .or_insert_with(|| DeltaBuffer::new(opts.clone()));
    match buffer.add(chunk) {
        Some(payload) => vec![make_event(payload)],
        None => vec![],
    }
}

/// Drain every buffer and clear the store, omitting empty buffers.
pub fn flush_all(
    store: &mut DeltaStore,
    mut make_event: impl FnMut(&str, String) -> StreamEvent,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for (message_id, mut buffer) in store.drain() {
        if let Some(payload) = buffer.flush() {
            events.push(make_event(&message_id, payload));
        }
    }
    events
}

/// Flush a single message's buffer and remove it from the store.
pub fn flush_message(store: &mut DeltaStore, message_id: &str) -> Option<String> {
    store.remove(message_id).and_then(|mut b| b.flush())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
