//! localdex-text
//!
//! Lexical search: an in-process BM25 engine that is always available and,
//! with the `native` feature, a tantivy engine. Both evaluate the same query
//! language (see `query`) and return scores normalized to `[0, 1]`.

pub mod builtin;
pub mod factory;
#[cfg(feature = "native")]
pub mod native;
pub mod query;
#[cfg(feature = "native")]
pub mod tantivy_utils;

pub use builtin::BuiltinLexicalStore;
pub use factory::{native_availability, open_lexical, select_engine};
#[cfg(feature = "native")]
pub use native::TantivyLexicalStore;
