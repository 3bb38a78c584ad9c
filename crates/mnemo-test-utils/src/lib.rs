// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test scaffolding shared by `mnemo-session`, `mnemo-gateway`, and the
//! `mnemo` binary's integration suite.
//!
//! [`MockProvider`] implements `mnemo-core`'s `ProviderAdapter` against a
//! scripted queue of outcomes instead of a subprocess, and [`TestHarness`]
//! wires a temp-dir SQLite storage engine and a full `ProviderSet` of mock
//! providers behind a `SessionManager`, so a test can drive the generator
//! loop end-to-end without a real LLM binary on PATH.

pub mod harness;
pub mod mock_provider;

pub use harness::TestHarness;
pub use mock_provider::MockProvider;
