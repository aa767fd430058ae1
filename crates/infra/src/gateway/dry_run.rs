use tracing::info;

use super::{MessagingGateway, OutgoingMessage, SendOutcome};

/// Logs each message and reports success. Nothing leaves the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunGateway;

impl MessagingGateway for DryRunGateway {
    fn send(&self, message: &OutgoingMessage) -> SendOutcome {
        info!(
            phone = %message.phone,
            body_len = message.body.len(),
            has_media = message.media_url.is_some(),
            has_document = message.document_url.is_some(),
            "dry run: message not sent"
        );
        SendOutcome::Success
    }
}
