pub mod openai;
pub mod openai_compat;

pub use openai::{OpenAiProvider, resolve_endpoint};
