use serde::Deserialize;
use serde_json::{Value, json};

use sendwave_campaigns::{Campaign, Contact, Recipient};
use sendwave_wallet::{PointsAccount, WalletTransaction};

#[derive(Debug, Deserialize)]
pub struct ContactInput {
    #[serde(default)]
    pub name: Option<String>,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterContactListRequest {
    pub contacts: Vec<ContactInput>,
}

impl RegisterContactListRequest {
    pub fn into_contacts(self) -> Vec<Contact> {
        self.contacts
            .into_iter()
            .map(|c| Contact::new(c.name, c.phone))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub fn campaign_to_json(c: &Campaign) -> Value {
    let template = c.template();
    let throttle = c.throttle();
    json!({
        "id": c.id().to_string(),
        "name": c.name(),
        "list_id": c.list_id().to_string(),
        "session_id": c.session_id().map(|s| s.to_string()),
        "status": c.status().as_str(),
        "template_body": template.body,
        "template_variables": template.variables,
        "media_url": template.media_url,
        "document_url": template.document_url,
        "throttle_min_seconds": throttle.min_seconds(),
        "throttle_max_seconds": throttle.max_seconds(),
        "recipient_count": c.recipient_count(),
        "consecutive_failures": c.consecutive_failures(),
        "created_at": c.created_at().to_rfc3339(),
        "started_at": c.started_at().map(|t| t.to_rfc3339()),
        "completed_at": c.completed_at().map(|t| t.to_rfc3339()),
    })
}

pub fn recipient_to_json(r: &Recipient) -> Value {
    json!({
        "id": r.id().to_string(),
        "campaign_id": r.campaign_id().to_string(),
        "name": r.name(),
        "phone": r.phone(),
        "status": r.status().as_str(),
        "attempts": r.attempts(),
        "last_error": r.last_error(),
        "sent_at": r.sent_at().map(|t| t.to_rfc3339()),
        "read_at": r.read_at().map(|t| t.to_rfc3339()),
        "next_attempt_at": r.next_attempt_at().map(|t| t.to_rfc3339()),
    })
}

pub fn transaction_to_json(t: &WalletTransaction) -> Value {
    json!({
        "id": t.id.to_string(),
        "type": t.kind.as_str(),
        "points": t.points,
        "balance_after": t.balance_after,
        "reference": t.reference,
        "expires_at": t.expires_at.map(|at| at.to_rfc3339()),
        "created_at": t.created_at.to_rfc3339(),
    })
}

pub fn account_to_json(a: &PointsAccount) -> Value {
    json!({
        "user_id": a.user_id().to_string(),
        "balance": a.balance(),
        "plan_expires_at": a.plan_expires_at().map(|at| at.to_rfc3339()),
    })
}
