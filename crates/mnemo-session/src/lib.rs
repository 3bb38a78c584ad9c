// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle, provider-agnostic generator loop, and graceful
//! shutdown for the mnemo memory service (spec §4.3/§4.4/§4.7).
//!
//! This crate owns no storage engine and no concrete provider: it is
//! wired against a `dyn StorageAdapter` and a [`generator::ProviderSet`]
//! of `dyn ProviderAdapter`s by the `mnemo` binary's `serve` entrypoint.
//! Lifecycle events reach the outside world only through the
//! [`events::EventSink`] seam, so this crate never depends on the HTTP
//! surface that consumes them.

pub mod events;
pub mod generator;
pub mod manager;
pub mod session;
pub mod shutdown;

pub use events::{EventSink, NullSink, SessionEvent};
pub use generator::{ensure_generator_running, ProviderSet};
pub use manager::{ClaimedMessage, SessionManager};
pub use session::{ActiveSession, ActiveSessionState, LastInteraction};
pub use shutdown::{install_signal_handler, ShutdownCoordinator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_root_reexports_resolve() {
        fn _assert_event_sink<T: EventSink>() {}
        _assert_event_sink::<NullSink>();
    }
}
