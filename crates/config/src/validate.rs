use crate::{ConfigError, schema::LoreConfig};

impl LoreConfig {
    /// Check option values.
    ///
    /// Returns `Err` for values nothing can work with and `Ok(warnings)` for
    /// values that only degrade results, such as an overlap at least as large
    /// as the chunk size.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.rag.chunk_size == 0 {
            errors.push("rag.chunk_size must be greater than 0".to_string());
        }
        if self.rag.chunk_size > 0 && self.rag.chunk_overlap >= self.rag.chunk_size {
            warnings.push(format!(
                "rag.chunk_overlap ({}) is not smaller than rag.chunk_size ({}); chunks will repeat most of their predecessor",
                self.rag.chunk_overlap, self.rag.chunk_size
            ));
        }
        if !unit_interval(self.rag.similarity_threshold) {
            errors.push(format!(
                "rag.similarity_threshold must be within [0, 1], got {}",
                self.rag.similarity_threshold
            ));
        }
        if self.rag.top_k == 0 {
            warnings.push("rag.top_k is 0; no passages will ever be retrieved".to_string());
        }
        if self.memory.top_k == 0 {
            warnings.push("memory.top_k is 0; no memories will reach the context".to_string());
        }
        if !unit_interval(self.memory.default_importance) {
            errors.push(format!(
                "memory.default_importance must be within [0, 1], got {}",
                self.memory.default_importance
            ));
        }
        if self.embeddings.dimensions == 0 {
            errors.push("embeddings.dimensions must be greater than 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            errors.push(format!(
                "llm.temperature must be within [0, 2], got {}",
                self.llm.temperature
            ));
        }
        for (name, budget) in [
            ("context.max_passage_chars", self.context.max_passage_chars),
            ("context.max_memory_chars", self.context.max_memory_chars),
            ("context.max_history_chars", self.context.max_history_chars),
            ("context.max_query_chars", self.context.max_query_chars),
        ] {
            if budget == 0 {
                warnings.push(format!("{name} is 0; that context section will be empty"));
            }
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }
}

fn unit_interval(v: f32) -> bool {
    (0.0..=1.0).contains(&v)
}
