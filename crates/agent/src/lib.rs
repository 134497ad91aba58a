//! BU Orchestrator - conversation synthesis for ranked recommendations
//!
//! This crate turns a ranked recommendation into the artifacts the routing
//! pipeline persists and streams:
//! - A two-message router/BU exchange (ROUTING_CONTEXT + BU_PROPOSAL)
//! - Up to three ranked SKU proposals with clamped confidences
//!
//! # Architecture
//!
//! The deterministic path (`conversation`) is always computed and is the
//! ground truth. An optional [`strategy::ConversationStrategy`] can wrap an
//! LLM (`llm`) to refine wording and SKU ordering, but its output is
//! schema-validated and sanitized against the BU catalog, and any failure
//! falls back to the deterministic output without surfacing an error.
//!
//! # Safety Principle
//!
//! The LLM is strictly a copywriter. It NEVER decides scores, ranks, roles,
//! or routing outcomes. Those are deterministic decisions made upstream.

pub mod conversation;
pub mod llm;
pub mod strategy;

pub use conversation::{
    bu_agent_id, BuConversation, BuConversationInput, BuOrchestrator, SkuProposal, ROUTER_AGENT_ID,
};
pub use llm::{HttpLlmClient, LlmClient};
pub use strategy::{
    ConversationDraft, ConversationRequest, ConversationStrategy, LlmConversationStrategy, SkuDraft,
};
