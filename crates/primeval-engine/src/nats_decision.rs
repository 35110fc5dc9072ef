//! NATS-based decision provider for the engine.
//!
//! [`NatsDecisionProvider`] implements [`DecisionProvider`] with one NATS
//! request/reply per decision: the [`DecisionRequest`] is published as
//! JSON and the responder answers with an [`ActionProposal`] as JSON.
//!
//! # Subject Convention
//!
//! - **Request:** `{decision_subject}.{agent_id}` (default prefix
//!   `primeval.decide`)
//!
//! Responders typically subscribe to `primeval.decide.*`. The scheduler
//! applies the hard decision timeout around each call, so a missing
//! responder is reported as a timeout or a provider error, never a hang.

use futures::future::BoxFuture;
use primeval_core::decision::{DecisionError, DecisionProvider};
use primeval_types::{ActionProposal, DecisionRequest, EntityId};
use tracing::debug;

use crate::error::EngineError;

/// A decision provider that asks an external responder over NATS.
#[derive(Clone)]
pub struct NatsDecisionProvider {
    /// The NATS client connection.
    client: async_nats::Client,
    /// Subject prefix; the agent id is appended.
    subject: String,
}

impl NatsDecisionProvider {
    /// Create a provider from an existing client.
    pub const fn new(client: async_nats::Client, subject: String) -> Self {
        Self { client, subject }
    }

    /// Connect to a NATS server and create a provider.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Nats`] if the connection fails.
    pub async fn connect(url: &str, subject: impl Into<String>) -> Result<Self, EngineError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| EngineError::Nats {
                message: format!("failed to connect to NATS at {url}: {e}"),
            })?;
        Ok(Self::new(client, subject.into()))
    }

    /// The request subject for one agent.
    fn subject_for(&self, agent_id: EntityId) -> String {
        subject_for(&self.subject, agent_id)
    }
}

fn subject_for(prefix: &str, agent_id: EntityId) -> String {
    format!("{prefix}.{agent_id}")
}

/// Decode a responder's reply.
fn parse_proposal(payload: &[u8]) -> Result<ActionProposal, DecisionError> {
    serde_json::from_slice(payload).map_err(|e| DecisionError::Malformed {
        message: e.to_string(),
    })
}

impl std::fmt::Debug for NatsDecisionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsDecisionProvider")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl DecisionProvider for NatsDecisionProvider {
    fn propose(
        &self,
        request: DecisionRequest,
    ) -> BoxFuture<'static, Result<ActionProposal, DecisionError>> {
        let client = self.client.clone();
        let subject = self.subject_for(request.agent.id);
        Box::pin(async move {
            let payload = serde_json::to_vec(&request).map_err(|e| DecisionError::Provider {
                message: format!("failed to serialize decision request: {e}"),
            })?;

            debug!(tick = request.tick, agent_id = %request.agent.id, %subject, "Requesting decision");
            let reply = client
                .request(subject.clone(), payload.into())
                .await
                .map_err(|e| DecisionError::Provider {
                    message: format!("request on {subject} failed: {e}"),
                })?;

            parse_proposal(&reply.payload)
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
