use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use sendwave_campaigns::{Campaign, CampaignStatus, Recipient};
use sendwave_core::{CampaignId, RecipientId, UserId};

use super::{CampaignMutation, CampaignStore, RecipientMutation, StoreError};

#[derive(Debug, Default)]
struct Tables {
    campaigns: HashMap<CampaignId, Campaign>,
    recipients: HashMap<RecipientId, Recipient>,
}

/// In-memory campaign store for tests/dev.
///
/// One lock covers both tables so multi-row mutations are atomic.
#[derive(Debug, Default)]
pub struct InMemoryCampaignStore {
    tables: Mutex<Tables>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Storage("campaign store lock poisoned".into()))
    }
}

impl CampaignStore for InMemoryCampaignStore {
    fn insert(&self, campaign: Campaign, recipients: Vec<Recipient>) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.campaigns.contains_key(&campaign.id()) {
            return Err(StoreError::AlreadyExists(campaign.id()));
        }
        for r in recipients {
            tables.recipients.insert(r.id(), r);
        }
        tables.campaigns.insert(campaign.id(), campaign);
        Ok(())
    }

    fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>, StoreError> {
        Ok(self.lock()?.campaigns.get(&id).cloned())
    }

    fn campaigns_for_user(&self, user_id: UserId) -> Result<Vec<Campaign>, StoreError> {
        let tables = self.lock()?;
        let mut result: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| c.user_id() == user_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
        Ok(result)
    }

    fn dispatching_campaigns(&self) -> Result<Vec<Campaign>, StoreError> {
        Ok(self
            .lock()?
            .campaigns
            .values()
            .filter(|c| matches!(c.status(), CampaignStatus::Queued | CampaignStatus::Sending))
            .cloned()
            .collect())
    }

    fn recipient(&self, id: RecipientId) -> Result<Option<Recipient>, StoreError> {
        Ok(self.lock()?.recipients.get(&id).cloned())
    }

    fn recipients(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>, StoreError> {
        let tables = self.lock()?;
        let campaign = tables
            .campaigns
            .get(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;
        Ok(campaign
            .recipient_ids()
            .iter()
            .filter_map(|id| tables.recipients.get(id).cloned())
            .collect())
    }

    fn delivered_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let tables = self.lock()?;
        let count = tables
            .campaigns
            .values()
            .filter(|c| c.user_id() == user_id)
            .flat_map(|c| c.recipient_ids())
            .filter_map(|id| tables.recipients.get(id))
            .filter(|r| r.status().is_delivered() && r.sent_at().is_some_and(|at| at >= since))
            .count();
        Ok(count as u64)
    }

    fn modify_campaign(
        &self,
        id: CampaignId,
        mutate: &mut CampaignMutation<'_, bool>,
    ) -> Result<(Campaign, bool), StoreError> {
        let mut tables = self.lock()?;
        let current = tables
            .campaigns
            .get(&id)
            .ok_or(StoreError::CampaignNotFound(id))?;

        let mut next = current.clone();
        let changed = mutate(&mut next)?;
        if changed {
            tables.campaigns.insert(id, next.clone());
        }
        Ok((next, changed))
    }

    fn modify_recipient(
        &self,
        id: RecipientId,
        mutate: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Recipient, bool), StoreError> {
        let mut tables = self.lock()?;
        let current = tables
            .recipients
            .get(&id)
            .ok_or(StoreError::RecipientNotFound(id))?;

        let mut next = current.clone();
        let changed = mutate(&mut next)?;
        if changed {
            tables.recipients.insert(id, next.clone());
        }
        Ok((next, changed))
    }

    fn modify_campaign_and_recipients(
        &self,
        id: CampaignId,
        campaign_fn: &mut CampaignMutation<'_, ()>,
        recipient_fn: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Campaign, Vec<Recipient>), StoreError> {
        let mut tables = self.lock()?;
        let mut campaign = tables
            .campaigns
            .get(&id)
            .cloned()
            .ok_or(StoreError::CampaignNotFound(id))?;

        campaign_fn(&mut campaign)?;

        let mut changed = Vec::new();
        for rid in campaign.recipient_ids() {
            let Some(current) = tables.recipients.get(rid) else {
                continue;
            };
            let mut next = current.clone();
            if recipient_fn(&mut next)? {
                changed.push(next);
            }
        }

        for r in &changed {
            tables.recipients.insert(r.id(), r.clone());
        }
        tables.campaigns.insert(id, campaign.clone());
        Ok((campaign, changed))
    }
}
