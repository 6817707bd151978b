//! Token counting implementation.
//!
//! Uses tiktoken-rs for exact BPE token counting with lazy-loaded encoders.

use std::sync::OnceLock;

use serde_json::Value;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

use crate::error::{Result, TrimError};
use crate::models::{Encoding, Provider};

/// Characters per token assumed by the heuristic estimate
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Per-message overhead for chat message accounting
const TOKENS_PER_MESSAGE: usize = 3;

/// Reply primer appended after the last chat message
const TOKENS_REPLY_PRIMER: usize = 3;

// Lazy-loaded tokenizer instances (thread-safe, shared read-only)
static CL100K: OnceLock<std::result::Result<CoreBPE, String>> = OnceLock::new();
static O200K: OnceLock<std::result::Result<CoreBPE, String>> = OnceLock::new();

/// Get the BPE table for an exact encoding (lazy-loaded)
fn bpe(encoding: Encoding) -> Result<&'static CoreBPE> {
    let slot = match encoding {
        Encoding::Cl100kBase => CL100K.get_or_init(|| cl100k_base().map_err(|e| e.to_string())),
        Encoding::O200kBase => O200K.get_or_init(|| o200k_base().map_err(|e| e.to_string())),
        Encoding::Heuristic => {
            return Err(TrimError::Tokenizer(
                "heuristic encoding has no BPE table".to_string(),
            ))
        },
    };
    slot.as_ref()
        .map_err(|e| TrimError::Tokenizer(format!("failed to load {}: {e}", encoding.name())))
}

/// Heuristic token count (~4 characters per token)
///
/// Rounds up, so any non-empty text counts as at least one token and the
/// empty string counts as zero.
///
/// # Example
/// ```
/// use prompttrim::tokenizer::heuristic_count;
///
/// assert_eq!(heuristic_count(""), 0);
/// assert_eq!(heuristic_count("a"), 1);
/// assert_eq!(heuristic_count("abcde"), 2);
/// ```
pub fn heuristic_count(text: &str) -> usize {
    text.chars().count().div_ceil(DEFAULT_CHARS_PER_TOKEN)
}

/// Count tokens with a specific encoding
///
/// Heuristic encoding never fails; exact encodings fail only if the BPE
/// table cannot be loaded.
pub fn count_tokens_with_encoding(text: &str, encoding: Encoding) -> Result<usize> {
    match encoding {
        Encoding::Heuristic => Ok(heuristic_count(text)),
        exact => Ok(bpe(exact)?.encode_ordinary(text).len()),
    }
}

/// Percentage of tokens saved going from `original` to `compressed`.
///
/// Returns 0.0 when there was nothing to save.
pub fn savings_percent(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - compressed as f64 / original as f64) * 100.0
}

/// Token accountant: converts text into token counts per provider family.
///
/// Deterministic for identical (text, provider, model) inputs; never touches
/// the network. Exact counts are used where the provider publishes its
/// tokenizer, everything else is estimated with a characters-per-token
/// heuristic that can be overridden.
///
/// # Example
/// ```
/// use prompttrim::models::Provider;
/// use prompttrim::tokenizer::TokenAccountant;
///
/// let accountant = TokenAccountant::new();
///
/// let anthropic = accountant.estimate("Hello, world!", Provider::Anthropic);
/// assert_eq!(anthropic, 4); // 13 chars / 4, rounded up
///
/// let counts = accountant
///     .count_batch(&["Hello", "World"], Provider::OpenAI, "gpt-4o-mini")
///     .unwrap();
/// assert_eq!(counts.len(), 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TokenAccountant {
    chars_per_token: usize,
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenAccountant {
    /// Create an accountant with the default heuristic (4 chars per token)
    pub fn new() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    /// Override the heuristic's characters-per-token ratio
    pub fn with_chars_per_token(mut self, chars_per_token: usize) -> Self {
        self.chars_per_token = chars_per_token.max(1);
        self
    }

    /// Heuristic estimate using this accountant's ratio
    pub fn approximate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    /// Estimate tokens for a provider family without naming a model.
    ///
    /// Exact families use their base encoding; a tokenizer failure degrades
    /// to the heuristic.
    pub fn estimate(&self, text: &str, provider: Provider) -> usize {
        self.count(text, provider, "").unwrap_or_else(|e| {
            tracing::warn!("Token estimate fell back to heuristic: {}", e);
            self.approximate(text)
        })
    }

    /// Count tokens for a specific provider/model pair.
    ///
    /// Exact when a tokenizer exists for the pair, heuristic otherwise.
    pub fn count(&self, text: &str, provider: Provider, model: &str) -> Result<usize> {
        match Encoding::for_provider(provider, model) {
            Encoding::Heuristic => Ok(self.approximate(text)),
            exact => Ok(bpe(exact)?.encode_ordinary(text).len()),
        }
    }

    /// Count tokens for several texts, in input order.
    ///
    /// All-or-nothing: if the encoder cannot be loaded the whole batch fails.
    pub fn count_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        provider: Provider,
        model: &str,
    ) -> Result<Vec<usize>> {
        match Encoding::for_provider(provider, model) {
            Encoding::Heuristic => Ok(texts
                .iter()
                .map(|t| self.approximate(t.as_ref()))
                .collect()),
            exact => {
                let bpe = bpe(exact)?;
                Ok(texts
                    .iter()
                    .map(|t| bpe.encode_ordinary(t.as_ref()).len())
                    .collect())
            },
        }
    }

    /// Count tokens for chat-completion style messages.
    ///
    /// Every message costs 3 tokens plus its string fields, and the reply
    /// primer adds 3 more.
    pub fn count_messages(&self, messages: &[Value], provider: Provider, model: &str) -> Result<usize> {
        let mut total = 0;
        for message in messages {
            total += TOKENS_PER_MESSAGE;
            if let Some(fields) = message.as_object() {
                for value in fields.values() {
                    if let Some(text) = value.as_str() {
                        total += self.count(text, provider, model)?;
                    }
                }
            }
        }
        Ok(total + TOKENS_REPLY_PRIMER)
    }

    /// Cut `text` down to its first `max_tokens` tokens.
    ///
    /// Returns `Ok(None)` when the text already fits. Fails when the pair
    /// has no exact tokenizer or when the token prefix does not decode to
    /// valid UTF-8 (a multi-byte character split across tokens).
    pub fn truncate(
        &self,
        text: &str,
        provider: Provider,
        model: &str,
        max_tokens: usize,
    ) -> Result<Option<String>> {
        let encoding = Encoding::for_provider(provider, model);
        if !encoding.is_exact() {
            return Err(TrimError::Tokenizer(format!(
                "no exact tokenizer for {provider}/{model}"
            )));
        }

        let bpe = bpe(encoding)?;
        let tokens = bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return Ok(None);
        }

        let prefix: Vec<_> = tokens.into_iter().take(max_tokens).collect();
        bpe.decode(prefix)
            .map(Some)
            .map_err(|e| TrimError::Tokenizer(format!("decode failed: {e}")))
    }
}
