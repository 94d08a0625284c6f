//! Generation side of lore: LLM providers, context assembly and the chat
//! service that ties them to the knowledge base.

pub mod chat;
pub mod context;
pub mod model;
pub mod provider;
pub mod providers;

pub use {
    chat::{ChatEvent, ChatRequest, ChatResponse, ChatService, Stage},
    context::{AssembledContext, AssemblyReport, AssemblyRequest, ContextAssembler, InstructionProfile},
    model::{ChatMessage, Completion, StreamEvent, Usage},
    provider::LlmProvider,
};
