// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide pause controller.
//!
//! Pausing is cooperative: every in-flight and future invocation waits at
//! its next provider-call boundary until resumed.  The controller is a
//! singleton by design; pausing pauses everything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;

/// Default interval at which wait loops re-check the pause flag.
pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_millis(100);

/// Notification sent to subscribers on every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    Paused,
    Resumed,
}

pub struct PauseController {
    paused: AtomicBool,
    notify: broadcast::Sender<PauseState>,
}

impl PauseController {
    fn new() -> Self {
        let (notify, _) = broadcast::channel(16);
        Self { paused: AtomicBool::new(false), notify }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Set the pause flag.  Calling `pause` while already paused is a no-op
    /// and fires no notification.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            let _ = self.notify.send(PauseState::Paused);
        }
    }

    /// Clear the pause flag.  Calling `resume` while running is a no-op.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            let _ = self.notify.send(PauseState::Resumed);
        }
    }

    /// Subscribe to pause/resume notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PauseState> {
        self.notify.subscribe()
    }

    /// Block until the controller is unpaused, checking every `poll`.
    ///
    /// When `abort` fires during the wait, the distinguished abort error is
    /// returned so callers can surface a terminal `error` event.
    pub async fn wait_while_paused(
        &self,
        poll: Duration,
        abort: Option<&CancellationToken>,
    ) -> Result<(), OrchestratorError> {
        while self.is_paused() {
            match abort {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(OrchestratorError::aborted()),
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
                None => tokio::time::sleep(poll).await,
            }
        }
        Ok(())
    }
}

/// The process-wide controller, initialized lazily on first access.
pub fn pause_controller() -> &'static PauseController {
    static CONTROLLER: OnceLock<PauseController> = OnceLock::new();
    CONTROLLER.get_or_init(PauseController::new)
}

/// Pause all orchestration in this process.
pub fn pause() {
    pause_controller().pause();
}

/// Resume orchestration.
pub fn resume() {
    pause_controller().resume();
}

pub fn is_paused() -> bool {
    pause_controller().is_paused()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
