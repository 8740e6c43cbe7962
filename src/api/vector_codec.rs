// Copyright 2025 mobile_rag_engine contributors
// SPDX-License-Identifier: MIT
//
// CONTRIBUTOR GUIDELINES:
// This file is part of the core engine. Any modifications require owner approval.
// Please submit a PR with detailed explanation of changes before modifying.

//! Embedding blob format: N little-endian IEEE-754 f32 values, 4N bytes,
//! no header.

use flutter_rust_bridge::frb;
use crate::api::error::{RagError, Result};

/// Serialize an embedding into its blob representation.
#[frb(sync)]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for f in vector {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

/// Inverse of [`encode_vector`]. Fails if the length is not a multiple of 4.
#[frb(sync)]
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::FormatError(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Dimension of an encoded blob without decoding it.
pub fn blob_dimension(bytes: &[u8]) -> Result<usize> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::FormatError(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes.len() / 4)
}
