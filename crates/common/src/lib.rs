//! Shared error taxonomy and plain data types used across the lore crates.

pub mod error;
pub mod types;

pub use error::{Error, Result};
