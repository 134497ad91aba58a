//! Wire types and HTTP transport for the remote delegation service.
//!
//! The remote side speaks camelCase JSON. Every call returns the same
//! [`SessionEnvelope`] shape regardless of endpoint, which is what lets the
//! driver apply them through one uniform handler.

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use leadroute_core::config::DelegationConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnvelope {
    pub session_id: String,
    pub status: String,
    #[serde(default)]
    pub pending_step: Option<PendingStep>,
    #[serde(default)]
    pub agent_messages: Vec<RemoteAgentMessage>,
    #[serde(default)]
    pub draft: Option<serde_json::Value>,
    #[serde(default)]
    pub final_result: Option<FinalResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStep {
    pub step_id: String,
    pub step_index: i64,
    pub subagent_name: String,
    #[serde(default)]
    pub request_payload: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAgentMessage {
    pub agent_id: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub message_type: String,
    pub content: String,
}

/// Present only on COMPLETED envelopes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    #[serde(default)]
    pub recommendations: Vec<RemoteRecommendation>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecommendation {
    pub business_unit_id: String,
    pub bu_code: String,
    pub role: String,
    pub rank: u32,
    pub rule_score: f64,
    pub final_score: f64,
    pub confidence: f64,
    pub reason_summary: String,
    #[serde(default)]
    pub sku_proposals: Vec<RemoteSkuProposal>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSkuProposal {
    pub bu_sku_id: String,
    pub rank: u32,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub session_id: String,
    pub routing_run_id: String,
    pub lead_id: String,
    pub triggered_by: String,
    pub thread_id: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDecisionRequest {
    pub decision: String,
    pub reviewer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[async_trait]
pub trait DelegationTransport: Send + Sync {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<SessionEnvelope>;
    async fn send_decision(
        &self,
        session_id: &str,
        step_id: &str,
        request: &RemoteDecisionRequest,
    ) -> Result<SessionEnvelope>;
    async fn get_session(&self, session_id: &str) -> Result<SessionEnvelope>;
}

/// Bearer-authenticated JSON client. Single attempt per call, bounded by the
/// configured timeout; the driver decides what a failure means.
pub struct HttpDelegationClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: secrecy::SecretString,
}

impl HttpDelegationClient {
    pub fn from_config(config: &DelegationConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .context("delegation base url is not configured")?
            .trim_end_matches('/')
            .to_string();
        let auth_token =
            config.auth_token.clone().context("delegation auth token is not configured")?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("could not build delegation HTTP client")?;

        Ok(Self { http, base_url, auth_token })
    }

    async fn read_envelope(&self, response: reqwest::Response) -> Result<SessionEnvelope> {
        let response = response.error_for_status().context("delegation service error status")?;
        response.json().await.context("invalid delegation envelope body")
    }
}

#[async_trait]
impl DelegationTransport for HttpDelegationClient {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<SessionEnvelope> {
        let response = self
            .http
            .post(format!("{}/v1/sessions/start", self.base_url))
            .bearer_auth(self.auth_token.expose_secret())
            .json(request)
            .send()
            .await
            .context("delegation start request failed")?;
        self.read_envelope(response).await
    }

    async fn send_decision(
        &self,
        session_id: &str,
        step_id: &str,
        request: &RemoteDecisionRequest,
    ) -> Result<SessionEnvelope> {
        let response = self
            .http
            .post(format!("{}/v1/sessions/{session_id}/steps/{step_id}/decision", self.base_url))
            .bearer_auth(self.auth_token.expose_secret())
            .json(request)
            .send()
            .await
            .context("delegation decision request failed")?;
        self.read_envelope(response).await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionEnvelope> {
        let response = self
            .http
            .get(format!("{}/v1/sessions/{session_id}", self.base_url))
            .bearer_auth(self.auth_token.expose_secret())
            .send()
            .await
            .context("delegation poll request failed")?;
        self.read_envelope(response).await
    }
}
