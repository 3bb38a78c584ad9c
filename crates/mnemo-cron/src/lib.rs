// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic maintenance tasks for the mnemo memory service (spec §4.6):
//! the orphan-subprocess reaper and the stale-session reaper.

pub mod reapers;

pub use reapers::{reap_orphan_subprocesses, spawn_reapers};
