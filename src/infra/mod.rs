//! Infrastructure - configuration loading
//!
//! - `config` - add-on options JSON loading and typed accessors

pub mod config;

// Re-export commonly used types
pub use config::{CommMode, Config};
