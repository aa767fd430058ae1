//! Deployment configuration.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `./sendwave.toml` (or an explicit path)
//! 3. Environment variables, unprefixed (`MAX_DAILY_RECIPIENTS`, `GATEWAY_MODE`, ...)
//!
//! The loaded value is passed explicitly into each component; nothing reads
//! configuration from a global.

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::jobs::{BackoffSchedule, ScheduleParseError};

const ENV_KEYS: &[&str] = &[
    "MAX_CAMPAIGN_RECIPIENTS",
    "MAX_DAILY_RECIPIENTS",
    "POINTS_PER_RECIPIENT",
    "CAMPAIGN_FAILURE_BACKOFF",
    "CONSECUTIVE_FAILURE_THRESHOLD",
    "PAUSE_POLL_SECONDS",
    "IN_FLIGHT_LEASE_SECONDS",
    "WORKER_COUNT",
    "POLL_INTERVAL_MS",
    "GATEWAY_MODE",
    "WHATSAPP_WORKER_URL",
    "WHATSAPP_API_BASE_URL",
    "WHATSAPP_API_TOKEN",
    "WHATSAPP_PHONE_NUMBER_ID",
    "GATEWAY_TIMEOUT_SECONDS",
    "BIND_ADDR",
    "DATABASE_URL",
];

/// Which messaging gateway the workers talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMode {
    /// Log and succeed; nothing leaves the process.
    DryRun,
    /// Self-hosted WhatsApp worker (`POST {base}/send`).
    Worker,
    /// WhatsApp Cloud API.
    CloudApi,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("campaign_failure_backoff: {0}")]
    Backoff(#[from] ScheduleParseError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Raw deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_campaign_recipients: u64,
    pub max_daily_recipients: u64,
    pub points_per_recipient: i64,
    /// Comma-separated seconds, e.g. `"30,60,120"`.
    pub campaign_failure_backoff: String,
    pub consecutive_failure_threshold: u32,
    pub pause_poll_seconds: u64,
    pub in_flight_lease_seconds: u64,
    pub worker_count: usize,
    pub poll_interval_ms: u64,
    pub gateway_mode: GatewayMode,
    pub whatsapp_worker_url: String,
    pub whatsapp_api_base_url: String,
    #[serde(deserialize_with = "opt_string_or_number")]
    pub whatsapp_api_token: Option<String>,
    #[serde(deserialize_with = "opt_string_or_number")]
    pub whatsapp_phone_number_id: Option<String>,
    pub gateway_timeout_seconds: u64,
    pub bind_addr: String,
    pub database_url: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_campaign_recipients: 10_000,
            max_daily_recipients: 30_000,
            points_per_recipient: 2,
            campaign_failure_backoff: "30,60,120".to_string(),
            consecutive_failure_threshold: 3,
            pause_poll_seconds: 15,
            in_flight_lease_seconds: 600,
            worker_count: 4,
            poll_interval_ms: 250,
            gateway_mode: GatewayMode::DryRun,
            whatsapp_worker_url: "http://localhost:5005".to_string(),
            whatsapp_api_base_url: "https://graph.facebook.com/v19.0".to_string(),
            whatsapp_api_token: None,
            whatsapp_phone_number_id: None,
            gateway_timeout_seconds: 30,
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
        }
    }
}

/// Numeric-looking env values (phone number ids) come through as integers.
fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Unsigned(n) => n.to_string(),
        Raw::Signed(n) => n.to_string(),
    }))
}

impl DeliveryConfig {
    /// Defaults, then `./sendwave.toml`, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new("sendwave.toml"))
    }

    /// Defaults, then the given TOML file (if present), then the environment.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(DeliveryConfig::default()))
                .merge(Toml::file(path))
                .merge(Env::raw().only(ENV_KEYS)),
        )
    }

    /// Defaults overlaid with a TOML document. No environment lookup.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(DeliveryConfig::default()))
                .merge(Toml::string(toml)),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backoff_schedule()?;
        if self.consecutive_failure_threshold < 1 {
            return Err(invalid("consecutive_failure_threshold must be >= 1"));
        }
        if self.worker_count < 1 {
            return Err(invalid("worker_count must be >= 1"));
        }
        if self.max_campaign_recipients < 1 || self.max_daily_recipients < 1 {
            return Err(invalid("recipient caps must be >= 1"));
        }
        if self.points_per_recipient < 0 {
            return Err(invalid("points_per_recipient must not be negative"));
        }
        if self.in_flight_lease_seconds / 2 <= self.gateway_timeout_seconds {
            return Err(invalid(
                "in_flight_lease_seconds must be more than twice gateway_timeout_seconds",
            ));
        }
        if self.gateway_mode == GatewayMode::CloudApi
            && (self.whatsapp_api_token.is_none() || self.whatsapp_phone_number_id.is_none())
        {
            return Err(invalid(
                "cloud_api mode requires whatsapp_api_token and whatsapp_phone_number_id",
            ));
        }
        Ok(())
    }

    pub fn backoff_schedule(&self) -> Result<BackoffSchedule, ConfigError> {
        Ok(self.campaign_failure_backoff.parse::<BackoffSchedule>()?)
    }

    /// Parsed settings for the delivery pipeline.
    pub fn policy(&self) -> Result<DeliveryPolicy, ConfigError> {
        Ok(DeliveryPolicy {
            points_per_recipient: self.points_per_recipient,
            max_campaign_recipients: self.max_campaign_recipients,
            max_daily_recipients: self.max_daily_recipients,
            backoff: self.backoff_schedule()?,
            failure_threshold: self.consecutive_failure_threshold,
            pause_poll: Duration::from_secs(self.pause_poll_seconds),
            in_flight_lease: Duration::from_secs(self.in_flight_lease_seconds),
            gateway_timeout: self.gateway_timeout(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_seconds)
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// Settings shared by the lifecycle controller and the recipient processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub points_per_recipient: i64,
    pub max_campaign_recipients: u64,
    pub max_daily_recipients: u64,
    pub backoff: BackoffSchedule,
    /// Consecutive terminal failures that pause a campaign.
    pub failure_threshold: u32,
    /// Deferral delay for jobs of a paused campaign.
    pub pause_poll: Duration,
    /// Age after which a SENDING claim is considered abandoned.
    pub in_flight_lease: Duration,
    /// Upper bound on one gateway call.
    pub gateway_timeout: Duration,
}

impl DeliveryPolicy {
    /// Longest throttle a campaign may ask for. The throttle sleep plus the
    /// gateway call has to finish within half the in-flight lease, so a claim
    /// held by a live worker never looks abandoned.
    pub fn max_throttle_seconds(&self) -> u64 {
        (self.in_flight_lease / 2)
            .saturating_sub(self.gateway_timeout)
            .as_secs()
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            points_per_recipient: 2,
            max_campaign_recipients: 10_000,
            max_daily_recipients: 30_000,
            backoff: BackoffSchedule::default(),
            failure_threshold: 3,
            pause_poll: Duration::from_secs(15),
            in_flight_lease: Duration::from_secs(600),
            gateway_timeout: Duration::from_secs(30),
        }
    }
}
