// Copyright 2025 mobile_rag_engine contributors
// SPDX-License-Identifier: MIT
//
// Licensed under the MIT License. You may obtain a copy of the License at
// https://opensource.org/licenses/MIT
//
// This software is provided "AS IS", without warranty of any kind, express or
// implied, including but not limited to the warranties of merchantability,
// fitness for a particular purpose, and noninfringement. In no event shall the
// authors or copyright holders be liable for any claim, damages, or other
// liability arising from the use of this software.
//
// CONTRIBUTOR GUIDELINES:
// This file is part of the core engine. Any modifications require owner approval.
// Please submit a PR with detailed explanation of changes before modifying.
//
//! SQLite connection pools for vector stores.
//!
//! Each store owns its pool; nothing here is process-wide. Connections are
//! returned to the pool when dropped.

use std::time::Duration;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use log::info;
use crate::api::error::Result;

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Path that selects a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_size: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Open a pool on `db_path` with tuned SQLite settings.
///
/// # SQLite Optimizations
/// - WAL mode: Better concurrency for read-heavy workloads
/// - 64MB page cache: Reduces disk I/O
/// - Memory temp storage: Faster temporary operations
/// - 256MB mmap: Memory-mapped I/O for large databases
///
/// Every connection to `:memory:` is a separate database, so that path is
/// served by a single connection that is never reaped or recycled.
pub fn open_pool(db_path: &str, config: &PoolConfig) -> Result<SqlitePool> {
    let in_memory = db_path == MEMORY_PATH;
    let max_size = if in_memory { 1 } else { config.max_size.max(1) };
    info!("[db_pool] Opening pool: path={}, max_size={}", db_path, max_size);

    let manager = if in_memory {
        SqliteConnectionManager::memory()
    } else {
        SqliteConnectionManager::file(db_path)
    };
    let manager = manager.with_init(move |conn| {
        if !in_memory {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA mmap_size = 268435456;",
        )?;
        Ok(())
    });

    let mut builder = Pool::builder()
        .max_size(max_size)
        .min_idle(Some(1)) // Keep at least 1 connection alive
        .connection_timeout(config.connection_timeout);
    if in_memory {
        // Dropping the only connection drops the database with it
        builder = builder.idle_timeout(None).max_lifetime(None);
    }
    let pool = builder.build(manager)?;

    info!("[db_pool] Pool ready");
    Ok(pool)
}

/// Pool statistics for monitoring: (connections, idle_connections, max_size).
pub fn pool_stats(pool: &SqlitePool) -> (u32, u32, u32) {
    let state = pool.state();
    (state.connections, state.idle_connections, pool.max_size())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn test_connections_share_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("pool.sqlite");
        let pool = open_pool(db_path.to_str().unwrap(), &PoolConfig { max_size: 2, ..Default::default() }).unwrap();

        let conn = pool.get().unwrap();
        conn.execute("CREATE TABLE test (id INTEGER)", params![]).unwrap();
        drop(conn);

        let conn2 = pool.get().unwrap();
        let count: i32 = conn2
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_pool_stats() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("stats.sqlite");
        let pool = open_pool(db_path.to_str().unwrap(), &PoolConfig::default()).unwrap();

        let stats = pool_stats(&pool);
        assert_eq!(stats.2, 4); // max_size
        assert!(stats.0 >= 1); // at least min_idle connection
    }

    #[test]
    fn test_memory_pool_is_single_connection() {
        let pool = open_pool(MEMORY_PATH, &PoolConfig::default()).unwrap();
        assert_eq!(pool_stats(&pool).2, 1);
        assert_eq!(pool.idle_timeout(), None);
        assert_eq!(pool.max_lifetime(), None);
    }

    #[test]
    fn test_wal_enabled_on_files() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("wal.sqlite");
        let pool = open_pool(db_path.to_str().unwrap(), &PoolConfig::default()).unwrap();
        let mode: String = pool.get().unwrap().query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
