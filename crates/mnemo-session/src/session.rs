// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ActiveSession`: the in-memory record the session manager keeps for one
//! resident session (spec §4.3).
//!
//! Created idempotently by `manager::initialize_session`, it owns its own
//! cancellation token and wake notifier -- never shared across sessions,
//! never reused past a `delete_session` (spec §9 "Ownership of
//! cancellation").

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mnemo_config::model::ProviderKind;
use mnemo_core::types::ConversationTurn;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of the generator's most recent call against a provider,
/// surfaced through `/api/health` (spec §7 "User-visible behavior").
#[derive(Debug, Clone)]
pub struct LastInteraction {
    pub success: bool,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Mutable fields of one [`ActiveSession`], guarded by a single mutex.
///
/// Contention is low -- one generator task plus occasional HTTP reads --
/// and a single lock avoids ordering bugs between fields that change
/// together on each generator turn (memory-session-id, conversation
/// history, and restart counters all move in lockstep).
pub struct ActiveSessionState {
    /// The generator's own resumable identity. Never loaded from storage
    /// into a freshly constructed session (spec §9 "Avoid stale resume").
    pub memory_session_id: Option<String>,
    pub project: String,
    pub user_prompt: Option<String>,
    pub last_prompt_number: i64,
    pub cumulative_input_tokens: i64,
    pub cumulative_output_tokens: i64,
    /// Set when a message is enqueued into an empty queue; cleared once
    /// the queue drains. Lets the generator timestamp backlog output by
    /// when the work actually arrived, not by when it got around to it.
    pub earliest_pending_timestamp: Option<DateTime<Utc>>,
    /// Shared across provider switches so a fallback provider sees the
    /// same context as its predecessor (spec §9 "Shared conversation
    /// history").
    pub conversation_history: Vec<ConversationTurn>,
    pub current_provider: Option<ProviderKind>,
    pub consecutive_restarts: u32,
    pub force_init: bool,
    pub idle_timed_out: bool,
    pub last_generator_activity: Instant,
    pub processing_message_ids: HashSet<String>,
    pub last_interaction: Option<LastInteraction>,
}

/// One session resident in memory, owned by `manager::SessionManager`'s map
/// (spec §4.3). Not persisted directly -- mirrors (and is reconstructed
/// from) the durable `Session` row plus queue state.
pub struct ActiveSession {
    pub session_db_id: i64,
    pub content_session_id: String,
    start_time: Instant,
    pub notify: Notify,
    pub cancellation: CancellationToken,
    pub spawn_in_progress: AtomicBool,
    pub generator_handle: Mutex<Option<JoinHandle<()>>>,
    pub state: Mutex<ActiveSessionState>,
}

impl ActiveSession {
    pub fn new(
        session_db_id: i64,
        content_session_id: String,
        project: String,
        user_prompt: Option<String>,
    ) -> Self {
        Self {
            session_db_id,
            content_session_id,
            start_time: Instant::now(),
            notify: Notify::new(),
            cancellation: CancellationToken::new(),
            spawn_in_progress: AtomicBool::new(false),
            generator_handle: Mutex::new(None),
            state: Mutex::new(ActiveSessionState {
                memory_session_id: None,
                project,
                user_prompt,
                last_prompt_number: 0,
                cumulative_input_tokens: 0,
                cumulative_output_tokens: 0,
                earliest_pending_timestamp: None,
                conversation_history: Vec::new(),
                current_provider: None,
                consecutive_restarts: 0,
                force_init: false,
                idle_timed_out: false,
                last_generator_activity: Instant::now(),
                processing_message_ids: HashSet::new(),
                last_interaction: None,
            }),
        }
    }

    /// Wakes one waiter inside `manager::next_message` (spec §4.3
    /// "message-iterator").
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn age(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_session_has_no_memory_session_id() {
        let session = ActiveSession::new(1, "c1".into(), "proj".into(), Some("hi".into()));
        let state = session.state.lock().await;
        assert!(state.memory_session_id.is_none());
        assert_eq!(state.consecutive_restarts, 0);
        assert!(!state.idle_timed_out);
    }

    #[tokio::test]
    async fn wake_does_not_panic_without_a_waiter() {
        let session = ActiveSession::new(1, "c1".into(), "proj".into(), None);
        session.wake();
    }

    #[test]
    fn age_is_near_zero_on_creation() {
        let session = ActiveSession::new(1, "c1".into(), "proj".into(), None);
        assert!(session.age() < Duration::from_secs(1));
    }
}
