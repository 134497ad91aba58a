//! Remote delegation engine: session mirroring, human-in-the-loop step
//! decisions, and transactional landing of remote routing outcomes.

pub mod client;
pub mod driver;

pub use client::{
    DelegationTransport, FinalResult, HttpDelegationClient, PendingStep, RemoteAgentMessage,
    RemoteDecisionRequest, RemoteRecommendation, RemoteSkuProposal, SessionEnvelope,
    StartSessionRequest,
};
pub use driver::{DelegationDriver, DelegationError, DELEGATION_ENGINE_VERSION};
