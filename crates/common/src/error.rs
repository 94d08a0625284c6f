//! Typed failures reported by the retrieval and ranking core.
//!
//! The core never retries and never decides on a fallback by itself: every
//! capability failure is surfaced as one of these variants and the boundary
//! layer (chat service, CLI) chooses between degrading and aborting.

/// Failure of a core operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller supplied inconsistent input (mismatched list lengths, importance
    /// outside `[0, 1]`, wrong vector dimension). Fatal to that call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The embedding provider or the vector index could not be reached.
    #[error("retrieval unavailable: {0:#}")]
    RetrievalUnavailable(#[source] anyhow::Error),

    /// The memory store (or the embedder it depends on) could not be reached.
    #[error("memory unavailable: {0:#}")]
    MemoryUnavailable(#[source] anyhow::Error),

    /// The conversation history collaborator failed.
    #[error("conversation history unavailable: {0:#}")]
    HistoryUnavailable(#[source] anyhow::Error),

    /// The generation capability failed or returned an unusable response.
    #[error("generation unavailable: {0:#}")]
    GenerationUnavailable(#[source] anyhow::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn retrieval(err: impl Into<anyhow::Error>) -> Self {
        Self::RetrievalUnavailable(err.into())
    }

    pub fn memory(err: impl Into<anyhow::Error>) -> Self {
        Self::MemoryUnavailable(err.into())
    }

    pub fn history(err: impl Into<anyhow::Error>) -> Self {
        Self::HistoryUnavailable(err.into())
    }

    pub fn generation(err: impl Into<anyhow::Error>) -> Self {
        Self::GenerationUnavailable(err.into())
    }

    /// Whether a boundary layer may substitute an empty result for this failure.
    ///
    /// Validation errors describe a broken request and are never degradable.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::RetrievalUnavailable(_) | Self::MemoryUnavailable(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_source_chain() {
        let err = Error::retrieval(anyhow::anyhow!("connection refused").context("embed query"));
        let msg = err.to_string();
        assert!(msg.starts_with("retrieval unavailable"));
        assert!(msg.contains("embed query"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn only_capability_outages_are_degradable() {
        assert!(Error::retrieval(anyhow::anyhow!("down")).is_degradable());
        assert!(Error::memory(anyhow::anyhow!("down")).is_degradable());
        assert!(!Error::validation("bad").is_degradable());
        assert!(!Error::generation(anyhow::anyhow!("down")).is_degradable());
        assert!(!Error::history(anyhow::anyhow!("down")).is_degradable());
    }
}
