use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::{GatewayError, MessagingGateway, OutgoingMessage, SendOutcome, classify};

/// Self-hosted WhatsApp worker: `POST {base}/send`.
#[derive(Debug, Clone)]
pub struct WorkerGateway {
    client: Client,
    send_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerPayload<'a> {
    to: &'a str,
    body: &'a str,
    media_url: Option<&'a str>,
    document_url: Option<&'a str>,
}

impl WorkerGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sendwave/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            send_url: format!("{}/send", base_url.trim_end_matches('/')),
        })
    }
}

impl MessagingGateway for WorkerGateway {
    fn send(&self, message: &OutgoingMessage) -> SendOutcome {
        let payload = WorkerPayload {
            to: &message.phone,
            body: &message.body,
            media_url: message.media_url.as_deref(),
            document_url: message.document_url.as_deref(),
        };

        debug!(url = %self.send_url, "posting to messaging worker");
        let response = match self.client.post(&self.send_url).json(&payload).send() {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "messaging worker unreachable");
                return SendOutcome::Retryable("Worker unreachable".into());
            }
        };

        let status = response.status();
        let body = response.text().unwrap_or_default();
        classify(status, &body, "sending via worker").unwrap_or(SendOutcome::Success)
    }
}
