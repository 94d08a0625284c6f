//! Builds the bounded generation context for one chat turn.
//!
//! Each section has its own character budget (see [`ContextConfig`]):
//!
//! - passages are labelled `[Document N]` in rank order and go into the
//!   final user message; the first passage that does not fit is cut with `…`
//!   when at least `min_passage_chars` of budget remain, otherwise it and
//!   every later passage are dropped;
//! - memories become a numbered list in the system prompt, never in the
//!   conversational messages;
//! - history keeps the newest exchanges that fit, dropping older ones whole
//!   so the model never sees an answer without its question;
//! - the query is cut to its budget.
//!
//! Everything removed is recorded in the [`AssemblyReport`].

use {
    lore_common::types::Role,
    lore_config::{ContextConfig, LoreConfig},
    lore_memory::{ConversationTurn, RetrievalResult, ScoredMemory},
    serde::Serialize,
    tracing::debug,
};

use crate::model::ChatMessage;

const ELLIPSIS: char = '…';
const SEPARATOR: &str = "\n\n";

/// Wording of the assembled context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionProfile {
    pub base_prompt: String,
    /// Heading above the numbered memory list in the system prompt.
    pub memory_heading: String,
    /// Opening line of the user message when passages are present.
    pub context_intro: String,
    /// Prefix of the question in the user message when passages are present.
    pub question_label: String,
    /// Passage label; `{n}` is replaced by the 1-based rank.
    pub document_label: String,
}

impl Default for InstructionProfile {
    fn default() -> Self {
        Self {
            base_prompt: "You are a personal knowledge assistant. You answer questions using \
                          the provided knowledge base passages and what you remember about the \
                          user.\n\
                          Follow these rules:\n\
                          1. Base your answer on the knowledge base; do not make things up.\n\
                          2. If the knowledge base has nothing relevant, say so honestly.\n\
                          3. Use the user's memories to personalise the answer.\n\
                          4. Be accurate, clear and helpful.\n\
                          5. Answer in the language of the question."
                .into(),
            memory_heading: "What you remember about the user:".into(),
            context_intro: "Answer the question using the following knowledge base content:"
                .into(),
            question_label: "Question: ".into(),
            document_label: "[Document {n}]".into(),
        }
    }
}

impl InstructionProfile {
    /// Default wording with a custom base prompt.
    pub fn with_base_prompt(base_prompt: impl Into<String>) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            ..Self::default()
        }
    }

    fn label(&self, rank: usize) -> String {
        self.document_label.replace("{n}", &rank.to_string())
    }
}

/// Inputs of one assembly.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyRequest<'a> {
    /// Oldest first.
    pub history: &'a [ConversationTurn],
    /// Ranked, best first.
    pub passages: &'a [RetrievalResult],
    /// Ranked, best first.
    pub memories: &'a [ScoredMemory],
    pub query: &'a str,
}

/// What the budgets removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyReport {
    pub passages_included: usize,
    pub passages_dropped: usize,
    pub passage_truncated: bool,
    pub memories_included: usize,
    pub memories_dropped: usize,
    pub history_included: usize,
    pub history_dropped: usize,
    pub query_truncated: bool,
}

impl AssemblyReport {
    pub fn is_lossless(&self) -> bool {
        self.passages_dropped == 0
            && !self.passage_truncated
            && self.memories_dropped == 0
            && self.history_dropped == 0
            && !self.query_truncated
    }
}

/// Ready for [`crate::provider::LlmProvider`]: the last message is the user
/// turn with passages and question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub report: AssemblyReport,
}

pub struct ContextAssembler {
    profile: InstructionProfile,
    budgets: ContextConfig,
    history_window: usize,
    memory_top_k: usize,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First `max` chars of `s`, the last one replaced by `…` when cut.
fn cut(s: &str, max: usize) -> (String, bool) {
    if char_len(s) <= max {
        return (s.to_string(), false);
    }
    if max == 0 {
        return (String::new(), true);
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push(ELLIPSIS);
    (out, true)
}

impl ContextAssembler {
    pub fn new(
        profile: InstructionProfile,
        budgets: ContextConfig,
        history_window: usize,
        memory_top_k: usize,
    ) -> Self {
        Self {
            profile,
            budgets,
            history_window,
            memory_top_k,
        }
    }

    pub fn from_config(config: &LoreConfig) -> Self {
        let profile = match &config.chat.system_prompt {
            Some(prompt) => InstructionProfile::with_base_prompt(prompt.clone()),
            None => InstructionProfile::default(),
        };
        Self::new(
            profile,
            config.context.clone(),
            config.chat.history_window,
            config.memory.top_k,
        )
    }

    pub fn assemble(&self, request: AssemblyRequest<'_>) -> AssembledContext {
        let mut report = AssemblyReport::default();

        let system_prompt = self.system_prompt(request.memories, &mut report);
        let mut messages = self.history(request.history, &mut report);
        let passages = self.passages(request.passages, &mut report);

        let (query, query_truncated) = cut(request.query, self.budgets.max_query_chars);
        if query_truncated {
            debug!(
                original = char_len(request.query),
                budget = self.budgets.max_query_chars,
                "query truncated"
            );
        }
        report.query_truncated = query_truncated;

        let user_message = if passages.is_empty() {
            query
        } else {
            format!(
                "{}{SEPARATOR}{passages}{SEPARATOR}{}{query}",
                self.profile.context_intro, self.profile.question_label
            )
        };
        messages.push(ChatMessage::user(user_message));

        AssembledContext {
            system_prompt,
            messages,
            report,
        }
    }

    fn system_prompt(&self, memories: &[ScoredMemory], report: &mut AssemblyReport) -> String {
        let mut prompt = self.profile.base_prompt.clone();
        let candidates = &memories[..memories.len().min(self.memory_top_k)];
        report.memories_dropped = memories.len() - candidates.len();

        let budget = self.budgets.max_memory_chars;
        let mut used = 0usize;
        let mut lines = Vec::new();
        for (i, scored) in candidates.iter().enumerate() {
            let line = format!("{}. {}", i + 1, scored.memory.content);
            let cost = char_len(&line) + 1;
            if used + cost > budget {
                debug!(
                    kept = lines.len(),
                    dropped = candidates.len() - lines.len(),
                    budget,
                    "memory list truncated"
                );
                report.memories_dropped += candidates.len() - lines.len();
                break;
            }
            used += cost;
            lines.push(line);
        }

        report.memories_included = lines.len();
        if !lines.is_empty() {
            prompt.push_str(SEPARATOR);
            prompt.push_str(&self.profile.memory_heading);
            prompt.push('\n');
            prompt.push_str(&lines.join("\n"));
        }
        prompt
    }

    fn history(
        &self,
        history: &[ConversationTurn],
        report: &mut AssemblyReport,
    ) -> Vec<ChatMessage> {
        let window = self.history_window.saturating_mul(2);
        let recent = &history[history.len().saturating_sub(window)..];
        report.history_dropped = history.len() - recent.len();

        // Whole exchanges only, newest first: each one starts at a user turn.
        let budget = self.budgets.max_history_chars;
        let mut used = 0usize;
        let mut end = recent.len();
        while let Some(begin) = recent[..end].iter().rposition(|t| t.role == Role::User) {
            let cost: usize = recent[begin..end]
                .iter()
                .map(|t| char_len(&t.content))
                .sum();
            if used + cost > budget {
                break;
            }
            used += cost;
            end = begin;
        }
        let kept = recent.len() - end;
        if kept < recent.len() {
            debug!(kept, dropped = recent.len() - kept, budget, "history truncated");
        }
        report.history_dropped += recent.len() - kept;
        report.history_included = kept;

        recent[recent.len() - kept..]
            .iter()
            .map(|turn| ChatMessage {
                role: turn.role,
                content: turn.content.clone(),
            })
            .collect()
    }

    fn passages(&self, passages: &[RetrievalResult], report: &mut AssemblyReport) -> String {
        let budget = self.budgets.max_passage_chars;
        let mut used = 0usize;
        let mut blocks: Vec<String> = Vec::new();

        for (i, passage) in passages.iter().enumerate() {
            let block = format!("{}: {}", self.profile.label(i + 1), passage.text);
            let separator = if blocks.is_empty() { 0 } else { char_len(SEPARATOR) };
            let cost = separator + char_len(&block);
            if used + cost <= budget {
                used += cost;
                blocks.push(block);
                continue;
            }

            let remaining = budget.saturating_sub(used + separator);
            if remaining >= self.budgets.min_passage_chars && remaining > 0 {
                let (cut_block, _) = cut(&block, remaining);
                blocks.push(cut_block);
                report.passage_truncated = true;
                debug!(rank = i + 1, kept_chars = remaining, "passage truncated");
            }
            report.passages_dropped = passages.len() - blocks.len();
            debug!(
                kept = blocks.len(),
                dropped = report.passages_dropped,
                budget,
                "passages over budget"
            );
            break;
        }

        report.passages_included = blocks.len();
        blocks.join(SEPARATOR)
    }
}
