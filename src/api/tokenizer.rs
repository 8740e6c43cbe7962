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
//! Text tokenization for vocabulary-based embedding models.
//!
//! [`SentencePieceTokenizer`] implements greedy longest-match over a
//! SentencePiece vocabulary and must produce the same ids on every platform.
//! [`HuggingFaceTokenizer`] wraps a `tokenizer.json` through the `tokenizers`
//! crate for models that ship that format instead.

use std::path::Path;
use flutter_rust_bridge::frb;
use log::{info, debug};
use crate::api::error::{RagError, Result};
use crate::api::vocabulary::VocabularyStore;

/// Glyph that stands in for an ASCII space inside vocabulary pieces (U+2581).
pub const SPACE_MARKER: char = '\u{2581}';

/// Id emitted for text no piece matches.
pub const UNK_TOKEN_ID: u32 = 0;

/// Task prefix the source embedding models were trained with.
pub const DEFAULT_TASK_PREFIX: &str = "task: search result | query: ";

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizerConfig {
    /// Replacement glyph for literal spaces.
    pub space_marker: char,
    /// Fixed text tokenized once and prepended by [`SentencePieceTokenizer::encode`].
    pub task_prefix: Option<String>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            space_marker: SPACE_MARKER,
            task_prefix: None,
        }
    }
}

/// Backend-independent tokenizer surface.
///
/// `tokenize` never adds BOS/EOS; callers bracket the final sequence.
pub trait TextTokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>>;
    fn decode_tokens(&self, token_ids: &[u32]) -> Result<String>;
    fn vocab_size(&self) -> usize;

    /// Glyph marking a word-initial space, for backends whose pieces carry one.
    fn space_marker(&self) -> Option<char> {
        None
    }
}

#[derive(Debug, Clone)]
struct PrefixCache {
    vocab_fingerprint: String,
    tokens: Vec<u32>,
}

/// Greedy longest-match tokenizer over a SentencePiece vocabulary.
///
/// Among matching pieces the longest wins; pieces of equal length that match
/// are the same string, and a repeated piece string belongs to its lowest id,
/// so ties always resolve to the lowest token id.
#[derive(Debug, Clone)]
pub struct SentencePieceTokenizer {
    vocab: VocabularyStore,
    config: TokenizerConfig,
    prefix_cache: Option<PrefixCache>,
}

impl SentencePieceTokenizer {
    pub fn new(vocab: VocabularyStore, config: TokenizerConfig) -> Self {
        let mut tokenizer = Self { vocab, config, prefix_cache: None };
        tokenizer.rebuild_prefix_cache();
        tokenizer
    }

    pub fn from_bytes(bytes: &[u8], config: TokenizerConfig) -> Result<Self> {
        Ok(Self::new(VocabularyStore::from_bytes(bytes)?, config))
    }

    pub fn from_file<P: AsRef<Path>>(path: P, config: TokenizerConfig) -> Result<Self> {
        Ok(Self::new(VocabularyStore::from_file(path)?, config))
    }

    fn rebuild_prefix_cache(&mut self) {
        self.prefix_cache = self.config.task_prefix.as_deref().map(|prefix| {
            let tokens = self.greedy_encode(prefix);
            debug!("[tokenizer] Cached {} prefix tokens", tokens.len());
            PrefixCache {
                vocab_fingerprint: self.vocab.fingerprint().to_string(),
                tokens,
            }
        });
    }

    /// Replace or remove the cached task prefix.
    pub fn set_task_prefix(&mut self, prefix: Option<String>) {
        self.config.task_prefix = prefix;
        self.rebuild_prefix_cache();
    }

    /// Swap in a new vocabulary. The prefix cache is rebuilt unless the
    /// vocabulary bytes are unchanged.
    pub fn reload_vocabulary(&mut self, bytes: &[u8]) -> Result<()> {
        let vocab = VocabularyStore::from_bytes(bytes)?;
        let unchanged = vocab.fingerprint() == self.vocab.fingerprint();
        self.vocab = vocab;
        if !unchanged {
            info!("[tokenizer] Vocabulary changed, rebuilding prefix cache");
            self.rebuild_prefix_cache();
        }
        Ok(())
    }

    pub fn cached_prefix(&self) -> Option<&[u32]> {
        self.prefix_cache
            .as_ref()
            .filter(|cache| cache.vocab_fingerprint == self.vocab.fingerprint())
            .map(|cache| cache.tokens.as_slice())
    }

    pub fn vocabulary(&self) -> &VocabularyStore {
        &self.vocab
    }

    pub fn unk_id(&self) -> u32 {
        UNK_TOKEN_ID
    }

    pub fn piece_to_id(&self, piece: &str) -> Option<u32> {
        self.vocab.id_of(piece)
    }

    pub fn id_to_piece(&self, id: u32) -> Option<&str> {
        self.vocab.piece(id)
    }

    fn normalize(&self, text: &str) -> String {
        text.replace(' ', &self.config.space_marker.to_string())
    }

    /// Longest piece that prefixes `rest`, as (id, byte length).
    fn longest_match(&self, rest: &str) -> Option<(u32, usize)> {
        let max_chars = self.vocab.max_piece_chars();
        let ends: Vec<usize> = rest
            .char_indices()
            .take(max_chars)
            .map(|(idx, ch)| idx + ch.len_utf8())
            .collect();

        ends.iter()
            .rev()
            .find_map(|&end| self.vocab.id_of(&rest[..end]).map(|id| (id, end)))
    }

    /// Greedy longest-match encoding without prefix, BOS or EOS.
    ///
    /// Text no piece covers degrades to one unknown id per character.
    pub fn greedy_encode(&self, text: &str) -> Vec<u32> {
        let normalized = self.normalize(text);
        let mut ids = Vec::new();
        let mut rest = normalized.as_str();

        while let Some(ch) = rest.chars().next() {
            match self.longest_match(rest) {
                Some((id, len)) => {
                    ids.push(id);
                    rest = &rest[len..];
                }
                None => {
                    ids.push(UNK_TOKEN_ID);
                    rest = &rest[ch.len_utf8()..];
                }
            }
        }
        ids
    }

    /// Cached task prefix (if configured) followed by the greedy encoding of `text`.
    #[frb(sync)]
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let body = self.greedy_encode(text);
        match self.cached_prefix() {
            Some(prefix) => {
                let mut ids = Vec::with_capacity(prefix.len() + body.len());
                ids.extend_from_slice(prefix);
                ids.extend(body);
                ids
            }
            None => body,
        }
    }

    /// Concatenate the pieces for `token_ids`, restore spaces and trim
    /// horizontal whitespace from both ends. Line breaks are kept.
    /// Ids outside the vocabulary are dropped.
    #[frb(sync)]
    pub fn decode(&self, token_ids: &[u32]) -> String {
        let joined: String = token_ids.iter().filter_map(|id| self.vocab.piece(*id)).collect();
        joined
            .replace(self.config.space_marker, " ")
            .trim_matches(is_horizontal_whitespace)
            .to_string()
    }
}

fn is_horizontal_whitespace(c: char) -> bool {
    c.is_whitespace() && !matches!(c, '\n' | '\r' | '\u{0B}' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}')
}

impl TextTokenizer for SentencePieceTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self.encode(text))
    }

    fn decode_tokens(&self, token_ids: &[u32]) -> Result<String> {
        Ok(self.decode(token_ids))
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn space_marker(&self) -> Option<char> {
        Some(self.config.space_marker)
    }
}

/// `tokenizer.json` backend.
pub struct HuggingFaceTokenizer {
    inner: tokenizers::Tokenizer,
    prefix_tokens: Vec<u32>,
}

impl HuggingFaceTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P, config: &TokenizerConfig) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RagError::IoError(format!("tokenizer file not found: {}", path.display())));
        }
        let mut inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| RagError::FormatError(format!("Failed to load tokenizer: {}", e)))?;

        inner.with_padding(None);
        inner.with_truncation(None).ok();

        let mut tokenizer = Self { inner, prefix_tokens: Vec::new() };
        if let Some(prefix) = config.task_prefix.as_deref() {
            tokenizer.prefix_tokens = tokenizer.encode_raw(prefix)?;
        }
        info!("[tokenizer] Loaded tokenizer.json with {} tokens", tokenizer.vocab_size());
        Ok(tokenizer)
    }

    fn encode_raw(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| RagError::InvalidInput(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl TextTokenizer for HuggingFaceTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = self.prefix_tokens.clone();
        ids.extend(self.encode_raw(text)?);
        Ok(ids)
    }

    fn decode_tokens(&self, token_ids: &[u32]) -> Result<String> {
        self.inner
            .decode(token_ids, true)
            .map_err(|e| RagError::InvalidInput(format!("Decoding failed: {}", e)))
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

/// Load a tokenizer, picking the backend from the file extension:
/// `.json` is a HuggingFace tokenizer, anything else a SentencePiece model.
pub fn load_tokenizer<P: AsRef<Path>>(path: P, config: TokenizerConfig) -> Result<Box<dyn TextTokenizer>> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        Ok(Box::new(HuggingFaceTokenizer::from_file(path, &config)?))
    } else {
        Ok(Box::new(SentencePieceTokenizer::from_file(path, config)?))
    }
}
