// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Re-exports the entity types owned by `mnemo-core`. Storage has no types
//! of its own -- query modules read and write the shared model directly.

pub use mnemo_core::types::{
    MessagePayload, Observation, ObservationDraft, ObservationType, PendingMessage,
    PendingMessageStatus, Session, SessionStatus, SessionSummary, SummaryDraft, UserPrompt,
};
