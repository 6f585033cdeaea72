//! # Wardline Core
//!
//! Domain types, traits, and error definitions for the Wardline agent
//! orchestration core. This crate has **zero framework dependencies**; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external capability is a trait here:
//! - [`Provider`]: call the model
//! - [`Tool`]: call a tool
//! - [`MemoryStore`]: persist memory tiers
//!
//! Implementations live in their respective crates (or outside this
//! workspace entirely), so the dependency graph points inward.

pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ChannelError, Error, MemoryError, ProviderError, Result, ToolError};
pub use memory::{MemoryStore, Namespace};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{ParamType, Tool, ToolArgs, ToolCall, ToolParam};
