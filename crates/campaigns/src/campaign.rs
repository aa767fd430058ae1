use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use sendwave_core::{
    AggregateRoot, CampaignId, ContactListId, DomainError, DomainResult, RecipientId, SessionId,
    UserId,
};

use crate::recipient::{Contact, Recipient};
use crate::resolution::Resolution;

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Queued,
    Sending,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Draft => "DRAFT",
            CampaignStatus::Queued => "QUEUED",
            CampaignStatus::Sending => "SENDING",
            CampaignStatus::Paused => "PAUSED",
            CampaignStatus::Completed => "COMPLETED",
            CampaignStatus::Failed => "FAILED",
            CampaignStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }

    /// Workers may dispatch recipients of campaigns in these states.
    pub fn is_active(self) -> bool {
        matches!(self, CampaignStatus::Queued | CampaignStatus::Sending)
    }
}

/// Message template: body with `{{placeholders}}` and optional attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub body: String,
    /// Declared variable names, in the order the author listed them.
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
}

/// Inclusive range of seconds to wait before each send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleWindow {
    min_seconds: u32,
    max_seconds: u32,
}

impl ThrottleWindow {
    pub const DEFAULT_MIN_SECONDS: u32 = 2;
    pub const DEFAULT_MAX_SECONDS: u32 = 5;

    pub fn new(min_seconds: u32, max_seconds: u32) -> DomainResult<Self> {
        if min_seconds < 1 {
            return Err(DomainError::validation(
                "throttle_min_seconds must be at least 1",
            ));
        }
        if max_seconds < min_seconds {
            return Err(DomainError::validation(
                "throttle_max_seconds must be >= throttle_min_seconds",
            ));
        }
        Ok(Self {
            min_seconds,
            max_seconds,
        })
    }

    /// A window that never waits. Test and dry-run wiring only.
    pub fn none() -> Self {
        Self {
            min_seconds: 0,
            max_seconds: 0,
        }
    }

    pub fn min_seconds(&self) -> u32 {
        self.min_seconds
    }

    pub fn max_seconds(&self) -> u32 {
        self.max_seconds
    }

    /// Uniform pick from `[min, max]` seconds, sub-second precision.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = f64::from(self.min_seconds);
        let max = f64::from(self.max_seconds);
        if max <= min {
            return Duration::from_secs_f64(min);
        }
        Duration::from_secs_f64(rng.gen_range(min..=max))
    }
}

impl Default for ThrottleWindow {
    fn default() -> Self {
        Self {
            min_seconds: Self::DEFAULT_MIN_SECONDS,
            max_seconds: Self::DEFAULT_MAX_SECONDS,
        }
    }
}

fn default_throttle_min() -> u32 {
    ThrottleWindow::DEFAULT_MIN_SECONDS
}

fn default_throttle_max() -> u32 {
    ThrottleWindow::DEFAULT_MAX_SECONDS
}

/// Input for creating a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignDraft {
    pub name: String,
    pub list_id: ContactListId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub template_body: String,
    #[serde(default)]
    pub template_variables: Vec<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default = "default_throttle_min")]
    pub throttle_min_seconds: u32,
    #[serde(default = "default_throttle_max")]
    pub throttle_max_seconds: u32,
}

impl CampaignDraft {
    fn template(&self) -> DomainResult<TemplateSpec> {
        if self.template_body.trim().is_empty() {
            return Err(DomainError::validation("template_body must not be empty"));
        }
        Ok(TemplateSpec {
            body: self.template_body.clone(),
            variables: self.template_variables.clone(),
            media_url: self.media_url.clone(),
            document_url: self.document_url.clone(),
        })
    }
}

/// Aggregate root: a bulk-send campaign.
///
/// Holds recipient ids only; recipient rows live in their own table and are
/// loaded by the caller. Every accepted mutation bumps `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    id: CampaignId,
    user_id: UserId,
    list_id: ContactListId,
    session_id: Option<SessionId>,
    name: String,
    status: CampaignStatus,
    template: TemplateSpec,
    throttle: ThrottleWindow,
    /// Circuit-breaker counter; reset by any success and by resume.
    consecutive_failures: u32,
    recipient_ids: Vec<RecipientId>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Campaign {
    /// Create a DRAFT campaign and materialize one QUEUED recipient per contact.
    pub fn create(
        user_id: UserId,
        draft: &CampaignDraft,
        contacts: &[Contact],
        max_recipients: u64,
        now: DateTime<Utc>,
    ) -> DomainResult<(Campaign, Vec<Recipient>)> {
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("campaign name must not be empty"));
        }
        let template = draft.template()?;
        let throttle = ThrottleWindow::new(draft.throttle_min_seconds, draft.throttle_max_seconds)?;

        if contacts.is_empty() {
            return Err(DomainError::validation("contact list has no recipients"));
        }
        if contacts.len() as u64 > max_recipients {
            return Err(DomainError::validation(format!(
                "campaign has {} recipients, limit is {max_recipients}",
                contacts.len()
            )));
        }

        let id = CampaignId::new();
        let recipients: Vec<Recipient> = contacts
            .iter()
            .map(|c| Recipient::from_contact(id, c, now))
            .collect();

        let campaign = Campaign {
            id,
            user_id,
            list_id: draft.list_id,
            session_id: draft.session_id,
            name: name.to_string(),
            status: CampaignStatus::Draft,
            template,
            throttle,
            consecutive_failures: 0,
            recipient_ids: recipients.iter().map(|r| r.id()).collect(),
            created_at: now,
            started_at: None,
            completed_at: None,
            version: 0,
        };

        Ok((campaign, recipients))
    }

    pub fn id(&self) -> CampaignId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn list_id(&self) -> ContactListId {
        self.list_id
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> CampaignStatus {
        self.status
    }

    pub fn template(&self) -> &TemplateSpec {
        &self.template
    }

    pub fn throttle(&self) -> ThrottleWindow {
        self.throttle
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn recipient_ids(&self) -> &[RecipientId] {
        &self.recipient_ids
    }

    pub fn recipient_count(&self) -> u64 {
        self.recipient_ids.len() as u64
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// DRAFT|PAUSED -> QUEUED. `started_at` is only stamped the first time.
    pub fn start(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !matches!(self.status, CampaignStatus::Draft | CampaignStatus::Paused) {
            return Err(self.rejected("start"));
        }
        self.status = CampaignStatus::Queued;
        self.started_at.get_or_insert(now);
        self.version += 1;
        Ok(())
    }

    /// QUEUED|SENDING -> PAUSED.
    pub fn pause(&mut self) -> DomainResult<()> {
        if !self.status.is_active() {
            return Err(self.rejected("pause"));
        }
        self.status = CampaignStatus::Paused;
        self.version += 1;
        Ok(())
    }

    /// PAUSED -> QUEUED, clearing the failure streak.
    pub fn resume(&mut self) -> DomainResult<()> {
        if self.status != CampaignStatus::Paused {
            return Err(self.rejected("resume"));
        }
        self.status = CampaignStatus::Queued;
        self.consecutive_failures = 0;
        self.version += 1;
        Ok(())
    }

    /// Any non-terminal status -> CANCELLED.
    pub fn cancel(&mut self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(self.rejected("cancel"));
        }
        self.status = CampaignStatus::Cancelled;
        self.version += 1;
        Ok(())
    }

    /// QUEUED -> SENDING on first dispatch. Returns whether anything changed.
    pub fn mark_sending(&mut self) -> bool {
        if self.status != CampaignStatus::Queued {
            return false;
        }
        self.status = CampaignStatus::Sending;
        self.version += 1;
        true
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures != 0 {
            self.consecutive_failures = 0;
            self.version += 1;
        }
    }

    /// Count a permanent failure. Returns `true` when this failure tripped the
    /// breaker and forced the campaign to PAUSED.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_failures += 1;
        self.version += 1;
        if self.consecutive_failures >= threshold && self.status.is_active() {
            self.status = CampaignStatus::Paused;
            return true;
        }
        false
    }

    /// Apply an aggregator verdict. Returns whether the status changed.
    pub fn apply_resolution(&mut self, resolution: Resolution, now: DateTime<Utc>) -> bool {
        let next = match resolution {
            Resolution::Completed => CampaignStatus::Completed,
            Resolution::Failed => CampaignStatus::Failed,
            Resolution::InProgress | Resolution::Untouched => return false,
        };
        self.completed_at.get_or_insert(now);
        if self.status == next {
            return false;
        }
        self.status = next;
        self.version += 1;
        true
    }

    fn rejected(&self, action: &str) -> DomainError {
        DomainError::conflict(format!(
            "cannot {action} campaign in status {}",
            self.status.as_str()
        ))
    }
}

impl AggregateRoot for Campaign {
    type Id = CampaignId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn draft() -> CampaignDraft {
        CampaignDraft {
            name: "Spring promo".into(),
            list_id: ContactListId::new(),
            session_id: None,
            template_body: "Hi {{name}}".into(),
            template_variables: vec!["name".into()],
            media_url: None,
            document_url: None,
            throttle_min_seconds: 2,
            throttle_max_seconds: 5,
        }
    }

    fn contacts(n: usize) -> Vec<Contact> {
        (0..n)
            .map(|i| Contact::new(Some(format!("c{i}")), format!("+100000{i}")))
            .collect()
    }

    fn created(n: usize) -> Campaign {
        Campaign::create(UserId::new(), &draft(), &contacts(n), 100, Utc::now())
            .unwrap()
            .0
    }

    #[test]
    fn create_materializes_queued_recipients() {
        let (campaign, recipients) =
            Campaign::create(UserId::new(), &draft(), &contacts(3), 100, Utc::now()).unwrap();

        assert_eq!(campaign.status(), CampaignStatus::Draft);
        assert_eq!(campaign.recipient_count(), 3);
        assert!(recipients.iter().all(|r| r.campaign_id() == campaign.id()));
        assert!(recipients.iter().all(|r| r.is_pending()));
    }

    #[test]
    fn create_rejects_empty_and_oversized_lists() {
        let empty = Campaign::create(UserId::new(), &draft(), &[], 100, Utc::now());
        assert!(matches!(empty, Err(DomainError::Validation(_))));

        let big = Campaign::create(UserId::new(), &draft(), &contacts(4), 3, Utc::now());
        assert!(matches!(big, Err(DomainError::Validation(_))));
    }

    #[test]
    fn create_rejects_inverted_throttle_window() {
        let mut d = draft();
        d.throttle_min_seconds = 6;
        d.throttle_max_seconds = 5;
        assert!(Campaign::create(UserId::new(), &d, &contacts(1), 100, Utc::now()).is_err());

        d.throttle_min_seconds = 0;
        assert!(Campaign::create(UserId::new(), &d, &contacts(1), 100, Utc::now()).is_err());
    }

    #[test]
    fn started_at_is_stamped_once() {
        let mut campaign = created(1);
        let first = Utc::now();
        campaign.start(first).unwrap();
        campaign.pause().unwrap();
        campaign
            .start(first + chrono::Duration::minutes(5))
            .unwrap();

        assert_eq!(campaign.started_at(), Some(first));
    }

    #[test]
    fn lifecycle_rejects_illegal_transitions() {
        let mut campaign = created(1);
        assert!(matches!(campaign.pause(), Err(DomainError::Conflict(_))));
        assert!(matches!(campaign.resume(), Err(DomainError::Conflict(_))));
        assert_eq!(campaign.version(), 0);

        campaign.start(Utc::now()).unwrap();
        let version = campaign.version();
        assert!(campaign.start(Utc::now()).is_err());
        assert_eq!(campaign.version(), version);

        campaign.cancel().unwrap();
        assert!(campaign.cancel().is_err());
        assert!(campaign.start(Utc::now()).is_err());
    }

    #[test]
    fn breaker_pauses_at_threshold_and_resume_clears_streak() {
        let mut campaign = created(5);
        campaign.start(Utc::now()).unwrap();
        campaign.mark_sending();

        assert!(!campaign.record_failure(3));
        assert!(!campaign.record_failure(3));
        assert!(campaign.record_failure(3));
        assert_eq!(campaign.status(), CampaignStatus::Paused);

        campaign.resume().unwrap();
        assert_eq!(campaign.consecutive_failures(), 0);
        assert_eq!(campaign.status(), CampaignStatus::Queued);
    }

    #[test]
    fn success_resets_the_streak() {
        let mut campaign = created(5);
        campaign.start(Utc::now()).unwrap();
        campaign.record_failure(3);
        campaign.record_failure(3);
        campaign.record_success();
        assert!(!campaign.record_failure(3));
        assert_eq!(campaign.status(), CampaignStatus::Queued);
    }

    #[test]
    fn completed_at_is_kept_on_repeat_resolution() {
        let mut campaign = created(1);
        campaign.start(Utc::now()).unwrap();
        let t0 = Utc::now();

        assert!(campaign.apply_resolution(Resolution::Completed, t0));
        assert!(!campaign.apply_resolution(
            Resolution::Completed,
            t0 + chrono::Duration::seconds(30)
        ));
        assert_eq!(campaign.completed_at(), Some(t0));
    }

    #[test]
    fn throttle_samples_stay_inside_the_window() {
        let window = ThrottleWindow::new(2, 5).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = window.sample(&mut rng);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(5));
        }
        assert_eq!(
            ThrottleWindow::new(3, 3).unwrap().sample(&mut rng),
            Duration::from_secs(3)
        );
    }
}
