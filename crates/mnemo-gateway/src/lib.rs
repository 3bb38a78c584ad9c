// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP surface for the mnemo memory service (spec §4.5/§6).
//!
//! Exposes the session lifecycle endpoints the hook scripts call
//! (`/api/sessions/*`), an SSE fan-out of lifecycle events (`/stream`), and
//! the unauthenticated health/readiness/version/context-injection routes
//! that must keep working even while the worker is still starting up.
//!
//! `mnemo-gateway` depends only on `mnemo-core`'s traits and `mnemo-session`'s
//! manager -- it has no knowledge of SQLite or any particular provider.

pub mod auth;
pub mod handlers;
pub mod privacy;
pub mod server;
pub mod sse;

pub use server::{start_server, GatewayState, InitGate};
pub use sse::{new_event_channel, BroadcastSink};
