//! Campaign and recipient persistence.
//!
//! Mutations go through closures that run against a copy of the row(s) under
//! the store's lock; the copy is written back only if the closure returns
//! `Ok`. That gives each recipient transition compare-and-set semantics
//! without exposing locks to callers.

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::InMemoryCampaignStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCampaignStore;

use chrono::{DateTime, Utc};

use sendwave_campaigns::{Campaign, Recipient};
use sendwave_core::{CampaignId, DomainError, RecipientId, UserId};

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("campaign not found: {0}")]
    CampaignNotFound(CampaignId),
    #[error("recipient not found: {0}")]
    RecipientNotFound(RecipientId),
    #[error("campaign already exists: {0}")]
    AlreadyExists(CampaignId),
    /// The mutation closure refused the change; nothing was written.
    #[error(transparent)]
    Rejected(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Mutation applied to a campaign row.
pub type CampaignMutation<'a, T> = dyn FnMut(&mut Campaign) -> Result<T, DomainError> + 'a;

/// Mutation applied to one recipient row.
pub type RecipientMutation<'a, T> = dyn FnMut(&mut Recipient) -> Result<T, DomainError> + 'a;

/// Campaign + recipient store.
pub trait CampaignStore: Send + Sync {
    /// Persist a new campaign together with its recipients.
    fn insert(&self, campaign: Campaign, recipients: Vec<Recipient>) -> Result<(), StoreError>;

    fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>, StoreError>;

    /// A user's campaigns, newest first.
    fn campaigns_for_user(&self, user_id: UserId) -> Result<Vec<Campaign>, StoreError>;

    /// Every campaign in QUEUED or SENDING, across all users.
    fn dispatching_campaigns(&self) -> Result<Vec<Campaign>, StoreError>;

    fn recipient(&self, id: RecipientId) -> Result<Option<Recipient>, StoreError>;

    /// Recipients of a campaign in creation order.
    fn recipients(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>, StoreError>;

    /// Recipients of `user_id` delivered (SENT or READ) at or after `since`,
    /// across all of the user's campaigns.
    fn delivered_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Atomically apply `mutate` to a campaign.
    fn modify_campaign(
        &self,
        id: CampaignId,
        mutate: &mut CampaignMutation<'_, bool>,
    ) -> Result<(Campaign, bool), StoreError>;

    /// Atomically apply `mutate` to a recipient.
    fn modify_recipient(
        &self,
        id: RecipientId,
        mutate: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Recipient, bool), StoreError>;

    /// Atomically apply `campaign_fn` to a campaign and `recipient_fn` to each
    /// of its recipients. Either every change is written or none is.
    /// Returns the updated campaign and the recipients `recipient_fn`
    /// reported as changed.
    fn modify_campaign_and_recipients(
        &self,
        id: CampaignId,
        campaign_fn: &mut CampaignMutation<'_, ()>,
        recipient_fn: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Campaign, Vec<Recipient>), StoreError>;
}

impl<S: CampaignStore + ?Sized> CampaignStore for std::sync::Arc<S> {
    fn insert(&self, campaign: Campaign, recipients: Vec<Recipient>) -> Result<(), StoreError> {
        (**self).insert(campaign, recipients)
    }

    fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>, StoreError> {
        (**self).campaign(id)
    }

    fn campaigns_for_user(&self, user_id: UserId) -> Result<Vec<Campaign>, StoreError> {
        (**self).campaigns_for_user(user_id)
    }

    fn dispatching_campaigns(&self) -> Result<Vec<Campaign>, StoreError> {
        (**self).dispatching_campaigns()
    }

    fn recipient(&self, id: RecipientId) -> Result<Option<Recipient>, StoreError> {
        (**self).recipient(id)
    }

    fn recipients(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>, StoreError> {
        (**self).recipients(campaign_id)
    }

    fn delivered_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).delivered_since(user_id, since)
    }

    fn modify_campaign(
        &self,
        id: CampaignId,
        mutate: &mut CampaignMutation<'_, bool>,
    ) -> Result<(Campaign, bool), StoreError> {
        (**self).modify_campaign(id, mutate)
    }

    fn modify_recipient(
        &self,
        id: RecipientId,
        mutate: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Recipient, bool), StoreError> {
        (**self).modify_recipient(id, mutate)
    }

    fn modify_campaign_and_recipients(
        &self,
        id: CampaignId,
        campaign_fn: &mut CampaignMutation<'_, ()>,
        recipient_fn: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Campaign, Vec<Recipient>), StoreError> {
        (**self).modify_campaign_and_recipients(id, campaign_fn, recipient_fn)
    }
}
