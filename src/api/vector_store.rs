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
//! Persistent document store with brute-force cosine search.
//!
//! A store locks onto one embedding dimension: the configured one, or the
//! length of the first inserted embedding. Every later insert and query must
//! match it until [`VectorStore::clear`] resets it.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use flutter_rust_bridge::frb;
use rusqlite::{params, OptionalExtension};
use serde::{Serialize, Deserialize};
use log::{info, debug};
use crate::api::db_pool::{open_pool, PoolConfig, SqlitePool};
use crate::api::error::{RagError, Result};
use crate::api::similarity::cosine_similarity;
use crate::api::vector_codec::{blob_dimension, decode_vector, encode_vector};

const CREATE_SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        metadata TEXT,
        created_at INTEGER DEFAULT (strftime('%s', 'now'))
    );
    CREATE INDEX IF NOT EXISTS idx_created_at ON documents(created_at);
";

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    /// Fixed embedding dimension; `None` adopts the first inserted length.
    pub dimension: Option<usize>,
    pub pool: PoolConfig,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self { dimension: None, pool: PoolConfig::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub similarity: f64,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStoreStats {
    pub document_count: i64,
    /// Detected dimension, 0 while unset.
    pub vector_dimension: usize,
}

/// A stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Option<String>,
    pub created_at: i64,
}

struct OpenStore {
    pool: SqlitePool,
    path: String,
    detected_dimension: Option<usize>,
}

enum StoreState {
    Uninitialized,
    Open(OpenStore),
    Closed,
}

impl StoreState {
    fn open(&self) -> Result<&OpenStore> {
        match self {
            StoreState::Open(store) => Ok(store),
            StoreState::Uninitialized => Err(RagError::NotInitialized("call initialize() first".to_string())),
            StoreState::Closed => Err(RagError::NotInitialized("store has been closed".to_string())),
        }
    }

    fn open_mut(&mut self) -> Result<&mut OpenStore> {
        match self {
            StoreState::Open(store) => Ok(store),
            StoreState::Uninitialized => Err(RagError::NotInitialized("call initialize() first".to_string())),
            StoreState::Closed => Err(RagError::NotInitialized("store has been closed".to_string())),
        }
    }
}

/// Handle to one persisted `documents` table.
///
/// `initialize`, `add_document`, `clear` and `close` take the write lock;
/// `search`, `stats` and `get_document` share the read lock, so searches run
/// concurrently but never observe a half-applied write.
pub struct VectorStore {
    config: VectorStoreConfig,
    state: RwLock<StoreState>,
}

impl VectorStore {
    pub fn new(config: VectorStoreConfig) -> Self {
        Self { config, state: RwLock::new(StoreState::Uninitialized) }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self::new(VectorStoreConfig { dimension: Some(dimension), ..Default::default() })
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|e| RagError::DatabaseError(format!("Lock error: {}", e)))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|e| RagError::DatabaseError(format!("Lock error: {}", e)))
    }

    /// Open (or create) the database at `db_path`.
    ///
    /// Safe on an existing database. An already open store is reopened on
    /// the new path. The dimension is restored from stored rows if any exist;
    /// rows that disagree with a configured dimension fail with
    /// `DimensionMismatch` and leave the store as it was.
    pub fn initialize(&self, db_path: &str) -> Result<()> {
        info!("[vector_store] Initializing: {}", db_path);
        let mut state = self.write_state()?;

        let pool = open_pool(db_path, &self.config.pool)?;
        let conn = pool.get()?;
        conn.execute_batch(CREATE_SCHEMA_SQL)?;

        let first_blob: Option<Vec<u8>> = conn
            .query_row("SELECT embedding FROM documents ORDER BY rowid LIMIT 1", [], |row| row.get(0))
            .optional()?;
        let detected_dimension = match first_blob {
            Some(blob) => Some(blob_dimension(&blob)?),
            None => None,
        };
        drop(conn);

        if let (Some(configured), Some(stored)) = (self.config.dimension, detected_dimension) {
            if configured != stored {
                return Err(RagError::DimensionMismatch { expected: configured, actual: stored });
            }
        }
        if let Some(dim) = detected_dimension {
            info!("[vector_store] Restored dimension {} from existing rows", dim);
        }
        if let StoreState::Open(previous) = &*state {
            info!("[vector_store] Reopening (was {})", previous.path);
        }

        *state = StoreState::Open(OpenStore {
            pool,
            path: db_path.to_string(),
            detected_dimension,
        });
        info!("[vector_store] Initialization complete");
        Ok(())
    }

    /// Insert or replace the document `id`.
    pub fn add_document(&self, id: &str, content: &str, embedding: &[f32], metadata: Option<&str>) -> Result<()> {
        debug!("[vector_store] add id={}, content length: {} chars, embedding dims: {}", id, content.chars().count(), embedding.len());
        let mut state = self.write_state()?;
        let store = state.open_mut()?;

        if embedding.is_empty() {
            return Err(RagError::InvalidInput("Embedding vector is empty".to_string()));
        }

        let dimension = match store.detected_dimension {
            Some(dim) => dim,
            None => match self.config.dimension {
                Some(configured) if configured != embedding.len() => {
                    return Err(RagError::DimensionMismatch { expected: configured, actual: embedding.len() });
                }
                Some(configured) => configured,
                None => embedding.len(),
            },
        };
        if embedding.len() != dimension {
            return Err(RagError::DimensionMismatch { expected: dimension, actual: embedding.len() });
        }

        let conn = store.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (id, content, embedding, metadata) VALUES (?1, ?2, ?3, ?4)",
            params![id, content, encode_vector(embedding), metadata],
        )?;

        if store.detected_dimension.is_none() {
            info!("[vector_store] Dimension set to {}", dimension);
            store.detected_dimension = Some(dimension);
        }
        Ok(())
    }

    /// Full scan ranked by cosine similarity.
    ///
    /// Rows scoring below `threshold` are dropped, the rest sorted by
    /// descending similarity (ties keep scan order), at most `top_k` returned.
    pub fn search(&self, query_embedding: &[f32], top_k: usize, threshold: f64) -> Result<Vec<SearchResult>> {
        debug!("[vector_store] search, query dims: {}, top_k: {}, threshold: {}", query_embedding.len(), top_k, threshold);
        let state = self.read_state()?;
        let store = state.open()?;

        if let Some(dim) = store.detected_dimension {
            if query_embedding.len() != dim {
                return Err(RagError::DimensionMismatch { expected: dim, actual: query_embedding.len() });
            }
        }

        let conn = store.pool.get()?;
        let mut stmt = conn.prepare("SELECT id, content, embedding, metadata FROM documents ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut candidates: Vec<SearchResult> = Vec::new();
        for row in rows {
            let (id, content, blob, metadata) = row?;
            let embedding = decode_vector(&blob)?;
            let similarity = cosine_similarity(query_embedding, &embedding);
            // NaN never passes
            if similarity >= threshold {
                candidates.push(SearchResult { id, content, similarity, metadata });
            }
        }

        candidates.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(top_k);

        info!("[vector_store] Search complete, {} results", candidates.len());
        Ok(candidates)
    }

    #[frb(sync)]
    pub fn stats(&self) -> Result<VectorStoreStats> {
        let state = self.read_state()?;
        let store = state.open()?;
        let conn = store.pool.get()?;
        let document_count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(VectorStoreStats {
            document_count,
            vector_dimension: store.detected_dimension.unwrap_or(0),
        })
    }

    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let state = self.read_state()?;
        let store = state.open()?;
        let conn = store.pool.get()?;

        let row = conn
            .query_row(
                "SELECT id, content, embedding, metadata, created_at FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, content, blob, metadata, created_at)) => Ok(Some(DocumentRecord {
                id,
                content,
                embedding: decode_vector(&blob)?,
                metadata,
                created_at,
            })),
            None => Ok(None),
        }
    }

    /// Delete every row and forget the detected dimension. The store stays open.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.write_state()?;
        let store = state.open_mut()?;
        let conn = store.pool.get()?;
        conn.execute("DELETE FROM documents", [])?;
        store.detected_dimension = None;
        info!("[vector_store] All documents deleted");
        Ok(())
    }

    /// Release the database. Calling it again, or before `initialize`, is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.write_state()?;
        if let StoreState::Open(store) = &*state {
            info!("[vector_store] Closing {}", store.path);
            *state = StoreState::Closed;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state
            .read()
            .map(|state| matches!(*state, StoreState::Open(_)))
            .unwrap_or(false)
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new(VectorStoreConfig::default())
    }
}
