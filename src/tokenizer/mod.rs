//! Token accounting.
//!
//! This module provides exact token counting using tiktoken encodings
//! for OpenAI models, with a heuristic fallback for every other provider.
//!
//! # Supported Encodings
//!
//! - **cl100k_base**: GPT-3.5, GPT-4
//! - **o200k_base**: GPT-4o, GPT-4.1, o-series models
//! - **heuristic**: ~4 characters per token, rounded up
//!
//! # Example
//!
//! ```
//! use prompttrim::models::Provider;
//! use prompttrim::tokenizer::TokenAccountant;
//!
//! let accountant = TokenAccountant::new();
//! let tokens = accountant.estimate("Hello, world!", Provider::OpenAI);
//! println!("Token count: {}", tokens);
//! ```

mod counter;

pub use counter::{
    count_tokens_with_encoding, heuristic_count, savings_percent, TokenAccountant,
    DEFAULT_CHARS_PER_TOKEN,
};
