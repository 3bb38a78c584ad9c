// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle events emitted by the session manager and generator, fanned
//! out over SSE by `mnemo-gateway` (spec §4.5).
//!
//! The session manager and generator are agnostic to how -- or whether --
//! events reach a subscriber: writes are best-effort and never block a
//! caller, so this is a plain synchronous trait rather than an async
//! channel the emitter would need to await.

use mnemo_core::types::Observation;

/// One of the seven lifecycle event kinds named in spec §4.5.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Aggregates `isProcessing` + `queueDepth` across all active sessions.
    ProcessingStatus { is_processing: bool, queue_depth: u64 },
    SessionStarted {
        session_db_id: i64,
        content_session_id: String,
    },
    SessionCompleted {
        session_db_id: i64,
        content_session_id: String,
    },
    ObservationQueued {
        session_db_id: i64,
        content_session_id: String,
    },
    SummarizeQueued {
        session_db_id: i64,
        content_session_id: String,
    },
    NewObservation {
        session_db_id: i64,
        observation: Observation,
    },
    NewPrompt {
        session_db_id: i64,
        content_session_id: String,
        prompt_number: i64,
    },
}

/// Fan-out sink for lifecycle events, implemented by `mnemo-gateway`'s SSE
/// broadcaster. SSE writes are best-effort and do not block handlers (spec
/// §4.5) -- `emit` is therefore synchronous and infallible from the
/// caller's point of view.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

/// No-op sink for contexts with no HTTP surface attached (tests, offline
/// tools).
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SessionEvent) {}
}
