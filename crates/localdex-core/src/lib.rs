pub mod chunker;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod layout;
pub mod metadata;
pub mod persist;
pub mod policy;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
