// Copyright 2025 mobile_rag_engine contributors
// SPDX-License-Identifier: MIT
//
// CONTRIBUTOR GUIDELINES:
// This file is part of the core engine. Any modifications require owner approval.
// Please submit a PR with detailed explanation of changes before modifying.

//! On-device retrieval core: SentencePiece tokenization and a SQLite-backed
//! embedding store with cosine search, bit-identical across platforms.

pub mod api;

pub use api::error::{RagError, Result};
pub use api::tokenizer::{SentencePieceTokenizer, TextTokenizer, TokenizerConfig};
pub use api::vector_store::{SearchResult, VectorStore, VectorStoreConfig, VectorStoreStats};
