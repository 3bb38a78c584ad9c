// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Schema migrations.
//!
//! Each migration is a `{applied, apply}` pair checked against the live
//! schema via `sqlite_master`/`pragma_table_info` introspection rather than
//! trusted blindly from a version-table row -- a row recording "migration 3
//! applied" does not guarantee the columns it added are actually present if
//! an earlier run was killed mid-transaction. `schema_versions` records
//! completed migrations for fast-path skip; introspection is the fallback
//! that makes re-running a half-applied migration safe.

use rusqlite::{Connection, Transaction};

trait Migration {
    fn version(&self) -> i64;
    fn applied(&self, conn: &Connection) -> Result<bool, rusqlite::Error>;
    fn apply(&self, tx: &Transaction) -> Result<(), rusqlite::Error>;

    /// SQLite forbids `ALTER TABLE ADD FOREIGN KEY` and forbids toggling the
    /// `foreign_keys` pragma inside a transaction, so a migration that adds a
    /// foreign key via table rebuild needs it off for the duration of
    /// `apply` and back on once committed.
    fn needs_foreign_keys_off(&self) -> bool {
        false
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |_| Ok(()),
    )
    .map(|_| true)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(false),
        e => Err(e),
    })
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// True if `table` has a single-column `UNIQUE` index on `column` (a plain
/// `UNIQUE` column constraint shows up here the same as `CREATE UNIQUE
/// INDEX` would).
fn unique_single_column_index_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, rusqlite::Error> {
    let mut list_stmt = conn.prepare(&format!("PRAGMA index_list({table})"))?;
    let index_names: Vec<String> = list_stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let unique: i64 = row.get(2)?;
            Ok((name, unique))
        })?
        .filter_map(|r| r.ok())
        .filter(|(_, unique)| *unique != 0)
        .map(|(name, _)| name)
        .collect();

    for index_name in index_names {
        let mut info_stmt = conn.prepare(&format!("PRAGMA index_info({index_name})"))?;
        let columns: Vec<String> = info_stmt
            .query_map([], |row| row.get::<_, String>(2))?
            .filter_map(|r| r.ok())
            .collect();
        if columns.len() == 1 && columns[0] == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// True if `table` declares a `FOREIGN KEY(column) REFERENCES ref_table`.
fn foreign_key_references(
    conn: &Connection,
    table: &str,
    column: &str,
    ref_table: &str,
) -> Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let target_table: String = row.get(2)?;
        let from_column: String = row.get(3)?;
        if target_table == ref_table && from_column == column {
            return Ok(true);
        }
    }
    Ok(false)
}

struct InitialSchema;

impl Migration for InitialSchema {
    fn version(&self) -> i64 {
        1
    }

    fn applied(&self, conn: &Connection) -> Result<bool, rusqlite::Error> {
        for table in [
            "sessions",
            "observations",
            "session_summaries",
            "user_prompts",
            "pending_messages",
        ] {
            if !table_exists(conn, table)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn apply(&self, tx: &Transaction) -> Result<(), rusqlite::Error> {
        tx.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                session_db_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                content_session_id TEXT NOT NULL UNIQUE,
                memory_session_id  TEXT,
                project            TEXT NOT NULL,
                first_user_prompt  TEXT,
                started_at         TEXT NOT NULL,
                completed_at       TEXT,
                status             TEXT NOT NULL DEFAULT 'active',
                prompt_counter     INTEGER NOT NULL DEFAULT 0,
                custom_title       TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);

            CREATE TABLE IF NOT EXISTS observations (
                id                 TEXT PRIMARY KEY,
                memory_session_id  TEXT NOT NULL,
                project            TEXT NOT NULL,
                observation_type   TEXT NOT NULL,
                title              TEXT NOT NULL,
                subtitle           TEXT,
                narrative          TEXT NOT NULL,
                facts              TEXT NOT NULL DEFAULT '[]',
                concepts           TEXT NOT NULL DEFAULT '[]',
                files_read         TEXT NOT NULL DEFAULT '[]',
                files_modified     TEXT NOT NULL DEFAULT '[]',
                prompt_number      INTEGER NOT NULL,
                discovery_tokens   INTEGER NOT NULL DEFAULT 0,
                content_hash       TEXT NOT NULL,
                created_at         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_observations_project_time ON observations(project, created_at);
            CREATE INDEX IF NOT EXISTS idx_observations_content_hash ON observations(content_hash, created_at);
            CREATE INDEX IF NOT EXISTS idx_observations_memory_session ON observations(memory_session_id);

            CREATE TABLE IF NOT EXISTS session_summaries (
                id                 TEXT PRIMARY KEY,
                memory_session_id  TEXT NOT NULL,
                project            TEXT NOT NULL,
                request            TEXT NOT NULL,
                investigated       TEXT,
                learned            TEXT,
                completed          TEXT,
                next_steps         TEXT,
                files_read         TEXT NOT NULL DEFAULT '[]',
                files_edited       TEXT NOT NULL DEFAULT '[]',
                notes              TEXT,
                prompt_number      INTEGER NOT NULL,
                discovery_tokens   INTEGER NOT NULL DEFAULT 0,
                created_at         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_summaries_memory_session ON session_summaries(memory_session_id);

            CREATE TABLE IF NOT EXISTS user_prompts (
                id                  TEXT PRIMARY KEY,
                content_session_id  TEXT NOT NULL,
                prompt_number       INTEGER NOT NULL,
                prompt_text         TEXT NOT NULL,
                created_at          TEXT NOT NULL,
                UNIQUE(content_session_id, prompt_number)
            );

            CREATE TABLE IF NOT EXISTS pending_messages (
                id                          TEXT PRIMARY KEY,
                session_db_id               INTEGER NOT NULL,
                content_session_id          TEXT NOT NULL,
                payload                     TEXT NOT NULL,
                prompt_number               INTEGER NOT NULL,
                status                      TEXT NOT NULL DEFAULT 'pending',
                retry_count                 INTEGER NOT NULL DEFAULT 0,
                created_at_epoch            INTEGER NOT NULL,
                started_processing_at_epoch INTEGER,
                completed_at_epoch          INTEGER,
                failed_at_epoch             INTEGER,
                FOREIGN KEY(session_db_id) REFERENCES sessions(session_db_id)
            );
            CREATE INDEX IF NOT EXISTS idx_pending_session_status ON pending_messages(session_db_id, status, created_at_epoch);
            CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_messages(status);
            ",
        )
    }
}

/// Adds `custom_title` to `sessions` for installs created before the column
/// existed. A no-op on fresh databases, since `InitialSchema` already
/// includes it -- kept for upgrade paths from the first shipped schema.
struct SessionsCustomTitle;

impl Migration for SessionsCustomTitle {
    fn version(&self) -> i64 {
        2
    }

    fn applied(&self, conn: &Connection) -> Result<bool, rusqlite::Error> {
        if !table_exists(conn, "sessions")? {
            return Ok(false);
        }
        column_exists(conn, "sessions", "custom_title")
    }

    fn apply(&self, tx: &Transaction) -> Result<(), rusqlite::Error> {
        if !column_exists(tx, "sessions", "custom_title")? {
            tx.execute_batch("ALTER TABLE sessions ADD COLUMN custom_title TEXT;")?;
        }
        Ok(())
    }
}

/// Adds a `UNIQUE` constraint to `sessions.memory_session_id` and a
/// `FOREIGN KEY(memory_session_id) REFERENCES sessions(memory_session_id)
/// ON UPDATE CASCADE ON DELETE CASCADE` to `observations` and
/// `session_summaries`, so a `memory_session_id` rename (spec §4.2 stale
/// resume) or session deletion propagates to its observations and
/// summaries instead of orphaning them. SQLite can't `ALTER TABLE ADD
/// FOREIGN KEY`, so all three tables are rebuilt.
struct CascadeForeignKeys;

impl Migration for CascadeForeignKeys {
    fn version(&self) -> i64 {
        3
    }

    fn needs_foreign_keys_off(&self) -> bool {
        true
    }

    fn applied(&self, conn: &Connection) -> Result<bool, rusqlite::Error> {
        for table in ["sessions", "observations", "session_summaries"] {
            if !table_exists(conn, table)? {
                return Ok(false);
            }
        }
        Ok(unique_single_column_index_exists(conn, "sessions", "memory_session_id")?
            && foreign_key_references(conn, "observations", "memory_session_id", "sessions")?
            && foreign_key_references(conn, "session_summaries", "memory_session_id", "sessions")?)
    }

    fn apply(&self, tx: &Transaction) -> Result<(), rusqlite::Error> {
        // Crash recovery: a prior run may have been killed mid-rebuild.
        tx.execute_batch(
            "DROP TABLE IF EXISTS sessions_new;
             DROP TABLE IF EXISTS observations_new;
             DROP TABLE IF EXISTS session_summaries_new;",
        )?;

        tx.execute_batch(
            "
            CREATE TABLE sessions_new (
                session_db_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                content_session_id TEXT NOT NULL UNIQUE,
                memory_session_id  TEXT UNIQUE,
                project            TEXT NOT NULL,
                first_user_prompt  TEXT,
                started_at         TEXT NOT NULL,
                completed_at       TEXT,
                status             TEXT NOT NULL DEFAULT 'active',
                prompt_counter     INTEGER NOT NULL DEFAULT 0,
                custom_title       TEXT
            );
            INSERT INTO sessions_new SELECT
                session_db_id, content_session_id, memory_session_id, project,
                first_user_prompt, started_at, completed_at, status,
                prompt_counter, custom_title
            FROM sessions;
            DROP TABLE sessions;
            ALTER TABLE sessions_new RENAME TO sessions;
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);

            CREATE TABLE observations_new (
                id                 TEXT PRIMARY KEY,
                memory_session_id  TEXT NOT NULL,
                project            TEXT NOT NULL,
                observation_type   TEXT NOT NULL,
                title              TEXT NOT NULL,
                subtitle           TEXT,
                narrative          TEXT NOT NULL,
                facts              TEXT NOT NULL DEFAULT '[]',
                concepts           TEXT NOT NULL DEFAULT '[]',
                files_read         TEXT NOT NULL DEFAULT '[]',
                files_modified     TEXT NOT NULL DEFAULT '[]',
                prompt_number      INTEGER NOT NULL,
                discovery_tokens   INTEGER NOT NULL DEFAULT 0,
                content_hash       TEXT NOT NULL,
                created_at         TEXT NOT NULL,
                FOREIGN KEY(memory_session_id) REFERENCES sessions(memory_session_id)
                    ON UPDATE CASCADE ON DELETE CASCADE
            );
            INSERT INTO observations_new SELECT
                id, memory_session_id, project, observation_type, title, subtitle,
                narrative, facts, concepts, files_read, files_modified,
                prompt_number, discovery_tokens, content_hash, created_at
            FROM observations;
            DROP TABLE observations;
            ALTER TABLE observations_new RENAME TO observations;
            CREATE INDEX IF NOT EXISTS idx_observations_project_time ON observations(project, created_at);
            CREATE INDEX IF NOT EXISTS idx_observations_content_hash ON observations(content_hash, created_at);
            CREATE INDEX IF NOT EXISTS idx_observations_memory_session ON observations(memory_session_id);

            CREATE TABLE session_summaries_new (
                id                 TEXT PRIMARY KEY,
                memory_session_id  TEXT NOT NULL,
                project            TEXT NOT NULL,
                request            TEXT NOT NULL,
                investigated       TEXT,
                learned            TEXT,
                completed          TEXT,
                next_steps         TEXT,
                files_read         TEXT NOT NULL DEFAULT '[]',
                files_edited       TEXT NOT NULL DEFAULT '[]',
                notes              TEXT,
                prompt_number      INTEGER NOT NULL,
                discovery_tokens   INTEGER NOT NULL DEFAULT 0,
                created_at         TEXT NOT NULL,
                FOREIGN KEY(memory_session_id) REFERENCES sessions(memory_session_id)
                    ON UPDATE CASCADE ON DELETE CASCADE
            );
            INSERT INTO session_summaries_new SELECT
                id, memory_session_id, project, request, investigated, learned,
                completed, next_steps, files_read, files_edited, notes,
                prompt_number, discovery_tokens, created_at
            FROM session_summaries;
            DROP TABLE session_summaries;
            ALTER TABLE session_summaries_new RENAME TO session_summaries;
            CREATE INDEX IF NOT EXISTS idx_summaries_memory_session ON session_summaries(memory_session_id);
            ",
        )
    }
}

fn all_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(InitialSchema),
        Box::new(SessionsCustomTitle),
        Box::new(CascadeForeignKeys),
    ]
}

/// Runs every migration not yet reflected in the live schema, recording each
/// completed version in `schema_versions`. Safe to call on every open.
pub fn run_all(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );",
    )?;

    for migration in all_migrations() {
        if migration.applied(conn)? {
            conn.execute(
                "INSERT OR IGNORE INTO schema_versions (version, applied_at) VALUES (?1, datetime('now'))",
                [migration.version()],
            )?;
            continue;
        }

        let needs_fk_off = migration.needs_foreign_keys_off();
        if needs_fk_off {
            conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        }

        let tx = conn.transaction()?;
        migration.apply(&tx)?;
        tx.execute(
            "INSERT OR REPLACE INTO schema_versions (version, applied_at) VALUES (?1, datetime('now'))",
            [migration.version()],
        )?;
        tx.commit()?;

        if needs_fk_off {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_all_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();
        run_all(&mut conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_versions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn cascade_migration_adds_unique_and_foreign_keys() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();

        assert!(unique_single_column_index_exists(&conn, "sessions", "memory_session_id").unwrap());
        assert!(foreign_key_references(&conn, "observations", "memory_session_id", "sessions").unwrap());
        assert!(foreign_key_references(&conn, "session_summaries", "memory_session_id", "sessions").unwrap());
    }

    #[test]
    fn cascade_migration_preserves_existing_rows_and_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO sessions (content_session_id, memory_session_id, project, started_at)
             VALUES ('c1', 'mem-1', 'proj', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO observations
                (id, memory_session_id, project, observation_type, title, narrative,
                 prompt_number, content_hash, created_at)
             VALUES ('o1', 'mem-1', 'proj', 'discovery', 't', 'n', 1, 'h', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        let tx = conn.transaction().unwrap();
        CascadeForeignKeys.apply(&tx).unwrap();
        tx.commit().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
        assert!(CascadeForeignKeys.applied(&conn).unwrap());

        // Re-applying on an already-migrated schema is a no-op that doesn't
        // lose rows, matching the drop-leftover-*_new crash recovery step.
        conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        let tx = conn.transaction().unwrap();
        CascadeForeignKeys.apply(&tx).unwrap();
        tx.commit().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn applied_detects_partially_built_schema() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE sessions (session_db_id INTEGER);")
            .unwrap();
        assert!(!InitialSchema.applied(&conn).unwrap());
    }

    #[test]
    fn migrations_create_expected_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();
        for table in [
            "sessions",
            "observations",
            "session_summaries",
            "user_prompts",
            "pending_messages",
        ] {
            assert!(table_exists(&conn, table).unwrap(), "missing {table}");
        }
        assert!(column_exists(&conn, "sessions", "custom_title").unwrap());
    }
}
