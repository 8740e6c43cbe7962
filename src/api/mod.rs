// Copyright 2025 mobile_rag_engine contributors
// SPDX-License-Identifier: MIT
//
// CONTRIBUTOR GUIDELINES:
// This file is part of the core engine. Any modifications require owner approval.
// Please submit a PR with detailed explanation of changes before modifying.

pub mod error;
pub mod logger;
pub mod vocabulary;
pub mod tokenizer;
pub mod embedding_input;
pub mod vector_codec;
pub mod similarity;
pub mod db_pool;
pub mod vector_store;
pub mod worker;
