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
//! SentencePiece `.model` vocabulary parsing.
//!
//! Only the subset of the protobuf wire format the model file uses is decoded:
//! top-level field 1 repeats once per piece, each a nested message with
//! field 1 = piece (string), field 2 = score (fixed32 float) and
//! field 3 = piece type (varint, skipped). Every other field is skipped by
//! wire type.

use std::collections::HashMap;
use std::path::Path;
use log::{info, debug};
use sha2::{Sha256, Digest};
use crate::api::error::{RagError, Result};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

const FIELD_PIECES: u64 = 1;
const FIELD_PIECE_TEXT: u64 = 1;
const FIELD_PIECE_SCORE: u64 = 2;
const FIELD_PIECE_TYPE: u64 = 3;

/// Piece type written by [`write_vocabulary`] (SentencePiece `NORMAL`).
const PIECE_TYPE_NORMAL: u64 = 1;

/// Longest legal varint encoding of a u64.
const MAX_VARINT_BYTES: usize = 10;

/// A single vocabulary piece. Its position in the vocabulary is its token id.
#[derive(Debug, Clone, PartialEq)]
pub struct VocabularyEntry {
    pub piece: String,
    pub score: f32,
}

struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = *self.buf.get(self.pos).ok_or_else(|| {
                RagError::FormatError(format!("truncated varint at offset {}", self.pos))
            })?;
            self.pos += 1;

            // The tenth byte may only carry the final bit of a u64.
            if i == MAX_VARINT_BYTES - 1 && byte > 1 {
                return Err(RagError::FormatError(format!("varint overflow at offset {}", self.pos - 1)));
            }
            result |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(RagError::FormatError(format!("varint longer than {} bytes", MAX_VARINT_BYTES)))
    }

    fn read_tag(&mut self) -> Result<(u64, u8)> {
        let tag = self.read_varint()?;
        Ok((tag >> 3, (tag & 0x07) as u8))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                RagError::FormatError(format!(
                    "field of {} bytes at offset {} runs past end of buffer ({} bytes)",
                    len,
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_len_delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| RagError::FormatError(format!("length {} does not fit in memory", len)))?;
        self.read_bytes(len)
    }

    fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn skip(&mut self, wire_type: u8) -> Result<()> {
        match wire_type {
            WIRE_VARINT => self.read_varint().map(|_| ()),
            WIRE_FIXED64 => self.read_bytes(8).map(|_| ()),
            WIRE_LEN => self.read_len_delimited().map(|_| ()),
            WIRE_FIXED32 => self.read_bytes(4).map(|_| ()),
            other => Err(RagError::FormatError(format!("unknown protobuf wire type: {}", other))),
        }
    }
}

fn parse_piece(payload: &[u8]) -> Result<VocabularyEntry> {
    let mut reader = WireReader::new(payload);
    let mut piece = String::new();
    let mut score = 0.0f32;

    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (FIELD_PIECE_TEXT, WIRE_LEN) => {
                let raw = reader.read_len_delimited()?;
                piece = String::from_utf8(raw.to_vec())
                    .map_err(|e| RagError::FormatError(format!("piece is not valid UTF-8: {}", e)))?;
            }
            (FIELD_PIECE_SCORE, WIRE_FIXED32) => {
                score = f32::from_bits(reader.read_fixed32()?);
            }
            (FIELD_PIECE_TYPE, WIRE_VARINT) => {
                reader.read_varint()?;
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(VocabularyEntry { piece, score })
}

/// Decode a SentencePiece model buffer into its ordered pieces.
///
/// Stops at the end of the buffer. Any truncated field, overflowing varint,
/// unknown wire type or non-UTF-8 piece fails the whole parse.
pub fn parse_vocabulary(bytes: &[u8]) -> Result<Vec<VocabularyEntry>> {
    let mut reader = WireReader::new(bytes);
    let mut entries = Vec::new();

    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        if field == FIELD_PIECES && wire_type == WIRE_LEN {
            let payload = reader.read_len_delimited()?;
            entries.push(parse_piece(payload)?);
        } else {
            debug!("[vocabulary] Skipping field {} (wire type {})", field, wire_type);
            reader.skip(wire_type)?;
        }
    }

    Ok(entries)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn write_tag(out: &mut Vec<u8>, field: u64, wire_type: u8) {
    write_varint(out, (field << 3) | u64::from(wire_type));
}

/// Serialize pieces into the wire layout [`parse_vocabulary`] reads.
///
/// Every piece is tagged as a normal piece. Useful for fixtures and for
/// shipping hand-built vocabularies alongside a model.
pub fn write_vocabulary(entries: &[VocabularyEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        let mut msg = Vec::with_capacity(entry.piece.len() + 10);
        write_tag(&mut msg, FIELD_PIECE_TEXT, WIRE_LEN);
        write_varint(&mut msg, entry.piece.len() as u64);
        msg.extend_from_slice(entry.piece.as_bytes());
        write_tag(&mut msg, FIELD_PIECE_SCORE, WIRE_FIXED32);
        msg.extend_from_slice(&entry.score.to_le_bytes());
        write_tag(&mut msg, FIELD_PIECE_TYPE, WIRE_VARINT);
        write_varint(&mut msg, PIECE_TYPE_NORMAL);

        write_tag(&mut out, FIELD_PIECES, WIRE_LEN);
        write_varint(&mut out, msg.len() as u64);
        out.extend_from_slice(&msg);
    }
    out
}

/// Immutable vocabulary with both lookup directions.
///
/// Ids are dense: the id of a piece is its index in [`entries`](Self::entries).
/// When a piece string occurs more than once the lowest id owns it.
#[derive(Debug, Clone)]
pub struct VocabularyStore {
    entries: Vec<VocabularyEntry>,
    piece_to_id: HashMap<String, u32>,
    max_piece_chars: usize,
    fingerprint: String,
}

impl VocabularyStore {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let entries = parse_vocabulary(bytes)?;
        if entries.is_empty() {
            return Err(RagError::FormatError("vocabulary contains no pieces".to_string()));
        }

        let mut piece_to_id = HashMap::with_capacity(entries.len());
        let mut max_piece_chars = 0;
        for (id, entry) in entries.iter().enumerate() {
            piece_to_id.entry(entry.piece.clone()).or_insert(id as u32);
            max_piece_chars = max_piece_chars.max(entry.piece.chars().count());
        }

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let fingerprint = format!("{:x}", hasher.finalize());

        info!("[vocabulary] Loaded {} pieces (longest {} chars)", entries.len(), max_piece_chars);
        Ok(Self { entries, piece_to_id, max_piece_chars, fingerprint })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[VocabularyEntry] {
        &self.entries
    }

    pub fn piece(&self, id: u32) -> Option<&str> {
        self.entries.get(id as usize).map(|e| e.piece.as_str())
    }

    pub fn id_of(&self, piece: &str) -> Option<u32> {
        self.piece_to_id.get(piece).copied()
    }

    pub fn score(&self, id: u32) -> Option<f32> {
        self.entries.get(id as usize).map(|e| e.score)
    }

    /// Length in characters of the longest piece.
    pub fn max_piece_chars(&self) -> usize {
        self.max_piece_chars
    }

    /// SHA-256 of the bytes this vocabulary was parsed from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(piece: &str, score: f32) -> VocabularyEntry {
        VocabularyEntry { piece: piece.to_string(), score }
    }

    #[test]
    fn test_parse_pieces_in_order() {
        let bytes = write_vocabulary(&[entry("<unk>", 0.0), entry("▁hello", -1.5), entry("o", -3.25)]);
        let parsed = parse_vocabulary(&bytes).unwrap();
        assert_eq!(parsed, vec![entry("<unk>", 0.0), entry("▁hello", -1.5), entry("o", -3.25)]);
    }

    #[test]
    fn test_skips_unknown_top_level_fields() {
        let mut bytes = Vec::new();
        // field 2, varint (multi-byte value)
        write_tag(&mut bytes, 2, WIRE_VARINT);
        write_varint(&mut bytes, 300);
        // field 3, fixed64
        write_tag(&mut bytes, 3, WIRE_FIXED64);
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend(write_vocabulary(&[entry("a", 1.0)]));
        // field 4, length-delimited
        write_tag(&mut bytes, 4, WIRE_LEN);
        write_varint(&mut bytes, 3);
        bytes.extend_from_slice(b"xyz");
        // field 5, fixed32
        write_tag(&mut bytes, 5, WIRE_FIXED32);
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        bytes.extend(write_vocabulary(&[entry("b", 2.0)]));

        let parsed = parse_vocabulary(&bytes).unwrap();
        assert_eq!(parsed, vec![entry("a", 1.0), entry("b", 2.0)]);
    }

    #[test]
    fn test_high_field_numbers_use_multibyte_tags() {
        let mut bytes = Vec::new();
        write_tag(&mut bytes, 200, WIRE_VARINT);
        write_varint(&mut bytes, 7);
        bytes.extend(write_vocabulary(&[entry("z", 0.5)]));
        assert_eq!(parse_vocabulary(&bytes).unwrap(), vec![entry("z", 0.5)]);
    }

    #[test]
    fn test_unknown_wire_type_is_error() {
        // field 1, wire type 3 (start group)
        let bytes: Vec<u8> = vec![(1 << 3) | 3, 0];
        assert!(matches!(parse_vocabulary(&bytes), Err(RagError::FormatError(_))));
    }

    #[test]
    fn test_truncated_piece_is_error() {
        let bytes = write_vocabulary(&[entry("hello", 1.0)]);
        for cut in 1..bytes.len() {
            let result = parse_vocabulary(&bytes[..cut]);
            assert!(matches!(result, Err(RagError::FormatError(_))), "cut at {} parsed", cut);
        }
    }

    #[test]
    fn test_overflowing_varint_is_error() {
        let mut bytes = vec![(2 << 3) | WIRE_VARINT];
        bytes.extend_from_slice(&[0xFF; 9]);
        bytes.push(0x02);
        assert!(matches!(parse_vocabulary(&bytes), Err(RagError::FormatError(_))));

        let mut endless = vec![(2 << 3) | WIRE_VARINT];
        endless.extend_from_slice(&[0x80; 11]);
        assert!(matches!(parse_vocabulary(&endless), Err(RagError::FormatError(_))));
    }

    #[test]
    fn test_max_u64_varint_is_accepted() {
        let mut bytes = Vec::new();
        write_tag(&mut bytes, 2, WIRE_VARINT);
        write_varint(&mut bytes, u64::MAX);
        bytes.extend(write_vocabulary(&[entry("a", 0.0)]));
        assert_eq!(parse_vocabulary(&bytes).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_utf8_piece_is_error() {
        let mut msg = Vec::new();
        write_tag(&mut msg, FIELD_PIECE_TEXT, WIRE_LEN);
        write_varint(&mut msg, 2);
        msg.extend_from_slice(&[0xC3, 0x28]);
        let mut bytes = Vec::new();
        write_tag(&mut bytes, FIELD_PIECES, WIRE_LEN);
        write_varint(&mut bytes, msg.len() as u64);
        bytes.extend(msg);
        assert!(matches!(parse_vocabulary(&bytes), Err(RagError::FormatError(_))));
    }

    #[test]
    fn test_store_rejects_empty_vocabulary() {
        assert!(matches!(VocabularyStore::from_bytes(&[]), Err(RagError::FormatError(_))));
    }

    #[test]
    fn test_store_lookups() {
        let bytes = write_vocabulary(&[entry("<unk>", 0.0), entry("ab", -1.0), entry("▁", -2.0), entry("ab", -4.0)]);
        let vocab = VocabularyStore::from_bytes(&bytes).unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.piece(2), Some("▁"));
        assert_eq!(vocab.piece(4), None);
        assert_eq!(vocab.score(1), Some(-1.0));
        // Duplicate piece resolves to the lowest id
        assert_eq!(vocab.id_of("ab"), Some(1));
        assert_eq!(vocab.id_of("missing"), None);
        assert_eq!(vocab.max_piece_chars(), 5);
    }

    #[test]
    fn test_fingerprint_tracks_bytes() {
        let a = VocabularyStore::from_bytes(&write_vocabulary(&[entry("a", 0.0)])).unwrap();
        let a2 = VocabularyStore::from_bytes(&write_vocabulary(&[entry("a", 0.0)])).unwrap();
        let b = VocabularyStore::from_bytes(&write_vocabulary(&[entry("b", 0.0)])).unwrap();
        assert_eq!(a.fingerprint(), a2.fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let result = VocabularyStore::from_file("/nonexistent/tokenizer.model");
        assert!(matches!(result, Err(RagError::IoError(_))));
    }
}
