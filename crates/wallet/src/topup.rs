//! Top-up rules: fixed plans or ad-hoc points with a bounded expiry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use sendwave_core::{DomainError, DomainResult};

use crate::account::{PointsAccount, TxnKind};

/// Allowed expiry windows for ad-hoc top-ups.
pub const EXPIRY_OPTIONS_DAYS: [u32; 3] = [5, 15, 30];

const DEFAULT_EXPIRY_DAYS: u32 = 30;

/// Subscription plan bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    #[serde(rename = "15d")]
    FifteenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl Plan {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "15d" => Some(Plan::FifteenDays),
            "30d" => Some(Plan::ThirtyDays),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Plan::FifteenDays => "15d",
            Plan::ThirtyDays => "30d",
        }
    }

    pub fn days(self) -> i64 {
        match self {
            Plan::FifteenDays => 15,
            Plan::ThirtyDays => 30,
        }
    }

    pub fn points(self) -> i64 {
        match self {
            Plan::FifteenDays => 1000,
            Plan::ThirtyDays => 2000,
        }
    }
}

/// Incoming top-up request (either a plan or a raw amount).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopupRequest {
    pub points: Option<i64>,
    pub plan_type: Option<String>,
    pub expires_in_days: Option<u32>,
}

/// What a validated top-up grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopupGrant {
    pub kind: TxnKind,
    pub points: i64,
    pub reference: String,
    pub expires_at: DateTime<Utc>,
    /// New plan expiry to store on the account (plan top-ups only).
    pub plan_expires_at: Option<DateTime<Utc>>,
}

impl TopupRequest {
    /// Validate the request against the account and resolve the grant.
    pub fn resolve(&self, account: &PointsAccount, now: DateTime<Utc>) -> DomainResult<TopupGrant> {
        if let Some(code) = self.plan_type.as_deref() {
            let plan = Plan::parse(code)
                .ok_or_else(|| DomainError::validation(format!("unknown plan_type: {code}")))?;
            // Plans stack: a renewal extends from the current expiry if still set.
            let base = account.plan_expires_at().unwrap_or(now);
            let expires_at = base + Duration::days(plan.days());
            return Ok(TopupGrant {
                kind: TxnKind::Allocation,
                points: plan.points(),
                reference: format!("plan:{}", plan.code()),
                expires_at,
                plan_expires_at: Some(expires_at),
            });
        }

        let Some(points) = self.points else {
            return Err(DomainError::validation("provide points or plan_type"));
        };
        if points <= 0 {
            return Err(DomainError::validation("points must be positive"));
        }

        let days = resolve_expiry_days(self.expires_in_days)?;
        Ok(TopupGrant {
            kind: TxnKind::Topup,
            points,
            reference: format!("manual_topup:{days}d"),
            expires_at: now + Duration::days(i64::from(days)),
            plan_expires_at: None,
        })
    }
}

fn resolve_expiry_days(raw: Option<u32>) -> DomainResult<u32> {
    let value = raw.unwrap_or(DEFAULT_EXPIRY_DAYS);
    if EXPIRY_OPTIONS_DAYS.contains(&value) {
        Ok(value)
    } else {
        Err(DomainError::validation(format!(
            "expiry must be one of {:?} days",
            EXPIRY_OPTIONS_DAYS
        )))
    }
}
