// Copyright 2025 mobile_rag_engine contributors
// SPDX-License-Identifier: MIT
//
// CONTRIBUTOR GUIDELINES:
// This file is part of the core engine. Any modifications require owner approval.
// Please submit a PR with detailed explanation of changes before modifying.

//! Fixed-length model inputs for embedding models.

use log::debug;
use crate::api::error::{RagError, Result};
use crate::api::tokenizer::TextTokenizer;

/// The embedding model itself: a padded token buffer in, a vector out.
pub trait EmbeddingSink {
    fn embed(&self, tokens: &[u32]) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceConfig {
    pub bos_id: u32,
    pub eos_id: u32,
    pub pad_id: u32,
    /// Model input length; shorter sequences are padded, longer truncated.
    pub max_sequence_length: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            bos_id: 2,
            eos_id: 1,
            pad_id: 0,
            max_sequence_length: 256,
        }
    }
}

/// Truncate or right-pad `tokens` to exactly `length`.
pub fn pad_or_truncate(mut tokens: Vec<u32>, length: usize, pad_id: u32) -> Vec<u32> {
    tokens.resize(length, pad_id);
    tokens
}

/// Tokenize `text` into a model input.
///
/// The text is encoded after the tokenizer's cached task prefix, with a
/// leading space marker when the backend uses one, bracketed once by
/// BOS/EOS, then fitted to `max_sequence_length`. A truncated sequence
/// loses its EOS.
pub fn build_model_input(tokenizer: &dyn TextTokenizer, text: &str, config: &SequenceConfig) -> Result<Vec<u32>> {
    let body = match tokenizer.space_marker() {
        Some(marker) => tokenizer.tokenize(&format!("{}{}", marker, text))?,
        None => tokenizer.tokenize(text)?,
    };

    let mut tokens = Vec::with_capacity(body.len() + 2);
    tokens.push(config.bos_id);
    tokens.extend(body);
    tokens.push(config.eos_id);

    if tokens.len() > config.max_sequence_length {
        debug!("[embedding_input] Truncating {} tokens to {}", tokens.len(), config.max_sequence_length);
    }
    Ok(pad_or_truncate(tokens, config.max_sequence_length, config.pad_id))
}

/// Tokenize and embed `text` in one step.
pub fn embed_text(
    sink: &dyn EmbeddingSink,
    tokenizer: &dyn TextTokenizer,
    text: &str,
    config: &SequenceConfig,
) -> Result<Vec<f32>> {
    let tokens = build_model_input(tokenizer, text, config)?;
    let embedding = sink.embed(&tokens)?;
    if embedding.is_empty() {
        return Err(RagError::InvalidInput("embedding model returned an empty vector".to_string()));
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tokenizer::{SentencePieceTokenizer, TokenizerConfig};
    use crate::api::vocabulary::{write_vocabulary, VocabularyEntry};

    fn tokenizer(prefix: Option<&str>) -> SentencePieceTokenizer {
        let entries: Vec<VocabularyEntry> = ["<pad>", "</s>", "<s>", "▁", "▁hi", "q:", "x"]
            .iter()
            .map(|p| VocabularyEntry { piece: p.to_string(), score: 0.0 })
            .collect();
        let config = TokenizerConfig { task_prefix: prefix.map(str::to_string), ..Default::default() };
        SentencePieceTokenizer::from_bytes(&write_vocabulary(&entries), config).unwrap()
    }

    struct CountingSink;

    impl EmbeddingSink for CountingSink {
        fn embed(&self, tokens: &[u32]) -> Result<Vec<f32>> {
            let non_pad = tokens.iter().filter(|t| **t != 0).count();
            Ok(vec![non_pad as f32, tokens.len() as f32])
        }
    }

    /// Backend without a space marker: one id per code point.
    struct CodePointTokenizer;

    impl TextTokenizer for CodePointTokenizer {
        fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.chars().map(u32::from).collect())
        }

        fn decode_tokens(&self, token_ids: &[u32]) -> Result<String> {
            Ok(token_ids.iter().filter_map(|id| char::from_u32(*id)).collect())
        }

        fn vocab_size(&self) -> usize {
            0x110000
        }
    }

    struct EmptySink;

    impl EmbeddingSink for EmptySink {
        fn embed(&self, _tokens: &[u32]) -> Result<Vec<f32>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_pad_or_truncate() {
        assert_eq!(pad_or_truncate(vec![5, 6], 4, 0), vec![5, 6, 0, 0]);
        assert_eq!(pad_or_truncate(vec![5, 6, 7], 2, 0), vec![5, 6]);
        assert_eq!(pad_or_truncate(vec![5], 1, 0), vec![5]);
    }

    #[test]
    fn test_bos_eos_wrap_whole_sequence_once() {
        let tok = tokenizer(Some("q:"));
        let config = SequenceConfig { max_sequence_length: 6, ..Default::default() };
        let input = build_model_input(&tok, "hi", &config).unwrap();
        // BOS, prefix "q:", "▁hi", EOS, padding
        assert_eq!(input, vec![2, 5, 4, 1, 0, 0]);
    }

    #[test]
    fn test_marker_only_for_backends_that_use_one() {
        let config = SequenceConfig { max_sequence_length: 5, ..Default::default() };
        let input = build_model_input(&CodePointTokenizer, "ab", &config).unwrap();
        assert_eq!(input, vec![2, 97, 98, 1, 0]);

        let input = build_model_input(&tokenizer(None), "hi", &config).unwrap();
        assert_eq!(input, vec![2, 4, 1, 0, 0]);
    }

    #[test]
    fn test_long_input_is_truncated() {
        let tok = tokenizer(None);
        let config = SequenceConfig { max_sequence_length: 4, ..Default::default() };
        let input = build_model_input(&tok, "xxxxxx", &config).unwrap();
        assert_eq!(input, vec![2, 3, 6, 6]);
    }

    #[test]
    fn test_embed_text_runs_sink() {
        let tok = tokenizer(None);
        let embedding = embed_text(&CountingSink, &tok, "hi", &SequenceConfig::default()).unwrap();
        assert_eq!(embedding, vec![3.0, 256.0]);
    }

    #[test]
    fn test_embed_text_rejects_empty_vectors() {
        let tok = tokenizer(None);
        let result = embed_text(&EmptySink, &tok, "hi", &SequenceConfig::default());
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
    }
}
