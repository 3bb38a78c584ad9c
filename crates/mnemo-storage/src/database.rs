// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. The [`Database`] struct IS the single writer -- query modules
//! accept `&Database` and call through `connection().call()`. Do NOT create
//! additional `Connection` instances for writes.

use std::path::Path;

use mnemo_core::MnemoError;
use tracing::{debug, info};

use crate::migrations;

/// An open handle to the embedded relational store.
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

/// Maps a `tokio_rusqlite` call error (which wraps either a `rusqlite::Error`
/// or a closure panic) into the crate-wide error type.
pub fn map_tr_err(err: tokio_rusqlite::Error) -> MnemoError {
    MnemoError::Storage {
        source: Box::new(err),
    }
}

impl Database {
    /// Opens (creating if absent) the database file at `path`, applies the
    /// standard PRAGMAs, and runs all pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, MnemoError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| MnemoError::Storage {
                    source: Box::new(e),
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(map_tr_err)?;

        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        let db = Self { conn };
        db.run_migrations().await?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// Opens an in-memory database, for tests that don't need a file.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, MnemoError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(map_tr_err)?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
        let db = Self { conn };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), MnemoError> {
        self.conn
            .call(|conn| migrations::run_all(conn))
            .await
            .map_err(map_tr_err)?;
        debug!("migrations applied");
        Ok(())
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoints the WAL and closes the connection.
    pub async fn close(self) -> Result<(), MnemoError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(|(_, e)| map_tr_err(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_file_and_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("mnemo.db");
        let db = Database::open(&path).await.unwrap();
        assert!(path.exists());

        let version: i64 = db
            .connection()
            .call(|conn| {
                conn.query_row("SELECT MAX(version) FROM schema_versions", [], |r| r.get(0))
            })
            .await
            .unwrap();
        assert!(version >= 1);
    }

    #[tokio::test]
    async fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnemo.db");
        let db = Database::open(&path).await.unwrap();
        db.close().await.unwrap();

        let db2 = Database::open(&path).await.unwrap();
        db2.close().await.unwrap();
    }
}
