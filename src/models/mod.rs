//! Provider families and tokenizer encodings.
//!
//! The gateway, the token accountant and the rules enforcer all key their
//! behaviour off these two enums: which credential and default model a
//! provider uses, and whether its tokens can be counted exactly.

mod card;

pub use card::{Encoding, Provider};
