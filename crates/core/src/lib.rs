//! # DeepDive Core
//!
//! Domain types, traits, and error definitions for the DeepDive research
//! assistant. This crate has **no framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (the generation model, the tools) is a trait
//! here. Implementations live in their respective crates, which lets tests
//! swap in scripted mocks.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{
    ApprovalState, Conversation, ConversationId, Message, Part, ReasoningState, Role, ToolOutput,
};
pub use provider::{
    ExecutionMode, GenerationRequest, Provider, StreamChunk, ToolCallRequest, ToolDefinition,
    Usage,
};
pub use session::{ConnectionState, ScheduledTask};
pub use tool::{Tool, ToolCall, ToolKind, ToolRegistry, ToolResult};
