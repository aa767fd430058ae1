//! Messaging gateways.
//!
//! A gateway sends one message to one phone number and classifies the result
//! three ways: success, retryable failure, permanent failure. The processor
//! maps those onto the backoff and ledger paths; gateways never touch state.
//!
//! HTTP-backed gateways use blocking `reqwest` clients with a bounded timeout
//! and are only called from worker threads.

mod cloud_api;
mod dry_run;
mod scripted;
mod worker;

pub use cloud_api::CloudApiGateway;
pub use dry_run::DryRunGateway;
pub use scripted::ScriptedGateway;
pub use worker::WorkerGateway;

use std::sync::Arc;

use reqwest::StatusCode;
use serde::Serialize;

use crate::config::{DeliveryConfig, GatewayMode};

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub phone: String,
    pub body: String,
    pub media_url: Option<String>,
    pub document_url: Option<String>,
}

/// Result of one gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    /// Rate limiting, upstream 5xx, network trouble.
    Retryable(String),
    /// Validation or authorization rejection.
    Permanent(String),
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }
}

/// Gateway construction error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("gateway misconfigured: {0}")]
    Misconfigured(String),
}

/// Outbound message channel.
pub trait MessagingGateway: Send + Sync {
    fn send(&self, message: &OutgoingMessage) -> SendOutcome;
}

impl<G: MessagingGateway + ?Sized> MessagingGateway for Arc<G> {
    fn send(&self, message: &OutgoingMessage) -> SendOutcome {
        (**self).send(message)
    }
}

/// Build the gateway selected by `gateway_mode`.
pub fn build_gateway(config: &DeliveryConfig) -> Result<Arc<dyn MessagingGateway>, GatewayError> {
    let timeout = config.gateway_timeout();
    Ok(match config.gateway_mode {
        GatewayMode::DryRun => Arc::new(DryRunGateway),
        GatewayMode::Worker => Arc::new(WorkerGateway::new(&config.whatsapp_worker_url, timeout)?),
        GatewayMode::CloudApi => Arc::new(CloudApiGateway::new(
            &config.whatsapp_api_base_url,
            config.whatsapp_api_token.clone(),
            config.whatsapp_phone_number_id.clone(),
            timeout,
        )?),
    })
}

/// Status codes worth retrying.
pub(crate) fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Map an HTTP response status to an outcome. `None` means success.
pub(crate) fn classify(status: StatusCode, body: &str, context: &str) -> Option<SendOutcome> {
    if is_transient(status) {
        tracing::warn!(status = status.as_u16(), context, body, "gateway transient failure");
        return Some(SendOutcome::Retryable(format!(
            "transient failure ({}) while {context}",
            status.as_u16()
        )));
    }
    if status.as_u16() >= 400 {
        tracing::error!(status = status.as_u16(), context, body, "gateway rejected message");
        return Some(SendOutcome::Permanent(if body.is_empty() {
            format!("rejected ({}) while {context}", status.as_u16())
        } else {
            body.to_string()
        }));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        for code in [429, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(matches!(
                classify(status, "", "sending"),
                Some(SendOutcome::Retryable(_))
            ));
        }
    }

    #[test]
    fn other_client_errors_are_permanent_and_keep_the_body() {
        let outcome = classify(StatusCode::BAD_REQUEST, "invalid phone", "sending");
        assert_eq!(outcome, Some(SendOutcome::Permanent("invalid phone".into())));
        assert!(matches!(
            classify(StatusCode::NOT_IMPLEMENTED, "", "sending"),
            Some(SendOutcome::Permanent(_))
        ));
    }

    #[test]
    fn success_codes_pass() {
        assert_eq!(classify(StatusCode::OK, "", "sending"), None);
        assert_eq!(classify(StatusCode::ACCEPTED, "", "sending"), None);
    }

    #[test]
    fn dry_run_mode_builds_without_network() {
        let gateway = build_gateway(&DeliveryConfig::default()).unwrap();
        let outcome = gateway.send(&OutgoingMessage {
            phone: "+15550001".into(),
            body: "hi".into(),
            media_url: None,
            document_url: None,
        });
        assert!(outcome.is_success());
    }
}
