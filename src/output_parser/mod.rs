//! # LLM Output Parser
//!
//! Defensive parser for extracting structured data from LLM responses.
//! Handles think blocks, markdown fences, and malformed JSON without
//! requiring an additional LLM call.
//!
//! ## Parsers Available
//!
//! | Parser | Use Case |
//! |--------|----------|
//! | [`parse_json`] | Extract typed JSON structs |
//! | [`parse_json_value`] | Extract untyped JSON |
//!
//! ## Shared Utilities
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`strip_think_tags`] | Remove `<think>` blocks from text |
//! | [`try_repair_json`] | Fix common LLM JSON errors |

pub mod error;
pub mod extract;
pub mod json;
pub mod repair;
pub mod streaming;

pub use error::ParseError;
pub use extract::{preprocess, strip_think_tags};
pub use json::{parse_json, parse_json_value};
pub use repair::try_repair_json;
