// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded SQLite persistence layer for the mnemo memory service.
//!
//! Provides WAL-mode SQLite storage with defensive, self-checking
//! migrations, a single-writer concurrency model via `tokio-rusqlite`, and
//! a `SqliteStorage` implementation of `mnemo_core::traits::StorageAdapter`.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod writer;

pub use adapter::SqliteStorage;
pub use database::Database;
