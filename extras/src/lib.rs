//! Retrieval helpers that feed Nyx data to language models.

pub mod agent;
pub mod llm;
pub mod parser;
pub mod prompts;
pub mod vectors;

pub use agent::NyxAgent;
pub use llm::{ChatModel, LlmConfig, Message, Provider};
pub use parser::{IfExists, Parser};
pub use vectors::{Metadata, VectorResult};
