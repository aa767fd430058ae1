use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::warn;

use super::{GatewayError, MessagingGateway, OutgoingMessage, SendOutcome, classify};

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".avi"];
const MAX_FILENAME_CHARS: usize = 50;

/// WhatsApp Cloud API.
///
/// One message becomes up to three API calls: text body, then the media
/// attachment (image or video by extension), then the document. The first
/// failing call decides the outcome.
#[derive(Debug, Clone)]
pub struct CloudApiGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
    phone_number_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Image,
    Video,
    Document,
}

impl MediaKind {
    fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }

    fn for_media_url(url: &str) -> Self {
        let lowered = url.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

impl CloudApiGateway {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        phone_number_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            phone_number_id,
        })
    }

    fn post(&self, token: &str, url: &str, payload: &Value, context: &str) -> Option<SendOutcome> {
        let response = match self.client.post(url).bearer_auth(token).json(payload).send() {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, context, "cloud API request error");
                return Some(SendOutcome::Retryable(format!("Network error while {context}")));
            }
        };
        let status = response.status();
        let body = response.text().unwrap_or_default();
        classify(status, &body, context)
    }
}

fn text_payload(phone: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": phone,
        "type": "text",
        "text": { "preview_url": false, "body": body },
    })
}

fn media_payload(phone: &str, link: &str, kind: MediaKind) -> Value {
    let mut media = json!({ "link": link });
    if kind == MediaKind::Document {
        media["filename"] = Value::String(document_filename(link));
    }
    let mut payload = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": phone,
        "type": kind.as_str(),
    });
    payload[kind.as_str()] = media;
    payload
}

fn document_filename(link: &str) -> String {
    link.rsplit('/')
        .next()
        .unwrap_or(link)
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect()
}

impl MessagingGateway for CloudApiGateway {
    fn send(&self, message: &OutgoingMessage) -> SendOutcome {
        let (Some(token), Some(phone_id)) = (&self.token, &self.phone_number_id) else {
            return SendOutcome::Permanent("WhatsApp Cloud API credentials are missing.".into());
        };

        let body = message.body.trim();
        if body.is_empty() && message.media_url.is_none() && message.document_url.is_none() {
            return SendOutcome::Permanent(
                "Message body and media are empty; nothing to send.".into(),
            );
        }

        let url = format!("{}/{}/messages", self.base_url, phone_id);
        let mut calls: Vec<(Value, String)> = Vec::with_capacity(3);
        if !body.is_empty() {
            calls.push((text_payload(&message.phone, body), "sending text".into()));
        }
        if let Some(link) = &message.media_url {
            let kind = MediaKind::for_media_url(link);
            calls.push((
                media_payload(&message.phone, link, kind),
                format!("sending {}", kind.as_str()),
            ));
        }
        if let Some(link) = &message.document_url {
            calls.push((
                media_payload(&message.phone, link, MediaKind::Document),
                "sending document".into(),
            ));
        }

        for (payload, context) in &calls {
            if let Some(failure) = self.post(token, &url, payload, context) {
                return failure;
            }
        }
        SendOutcome::Success
    }
}
