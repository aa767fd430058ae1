use tracing::{debug, info};

use sendwave_campaigns::{CampaignStatus, DeliveryStatus, NoticeKind, resolve_status};
use sendwave_core::CampaignId;

use super::{DeliveryError, DeliveryServices};

/// Recomputes a campaign's status from its recipients.
///
/// Idempotent and order-independent: concurrent invocations from several
/// workers converge on the same verdict without a campaign-wide lock. The
/// verdict is re-evaluated inside the campaign mutation so a concurrent pause
/// or cancel is never overwritten.
#[derive(Clone)]
pub struct CampaignAggregator {
    services: DeliveryServices,
}

impl CampaignAggregator {
    pub fn new(services: DeliveryServices) -> Self {
        Self { services }
    }

    /// Returns the new status when this call moved the campaign to a terminal
    /// status, `None` otherwise.
    pub fn recompute(&self, campaign_id: CampaignId) -> Result<Option<CampaignStatus>, DeliveryError> {
        let statuses: Vec<DeliveryStatus> = self
            .services
            .store
            .recipients(campaign_id)?
            .iter()
            .map(|r| r.status())
            .collect();

        let now = self.services.clock.now();
        let (campaign, changed) = self.services.store.modify_campaign(campaign_id, &mut |c| {
            let resolution = resolve_status(c.status(), statuses.iter().copied());
            Ok(c.apply_resolution(resolution, now))
        })?;

        if !changed {
            debug!(campaign_id = %campaign_id, status = campaign.status().as_str(), "campaign unchanged");
            return Ok(None);
        }

        info!(
            campaign_id = %campaign_id,
            status = campaign.status().as_str(),
            "campaign finished"
        );
        self.services.notify(
            campaign_id,
            campaign.user_id(),
            NoticeKind::Finished {
                status: campaign.status(),
            },
        );
        Ok(Some(campaign.status()))
    }
}
