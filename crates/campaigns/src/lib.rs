//! Campaigns domain module.
//!
//! Business rules for campaigns and their recipients, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). Campaigns reference
//! recipients by id and recipients reference their campaign by id; loading is
//! the caller's job.

pub mod campaign;
pub mod export;
pub mod notice;
pub mod progress;
pub mod recipient;
pub mod resolution;
pub mod template;

pub use campaign::{Campaign, CampaignDraft, CampaignStatus, TemplateSpec, ThrottleWindow};
pub use export::{CSV_HEADER, export_csv, write_csv};
pub use notice::{CampaignNotice, NoticeKind, PauseReason};
pub use progress::CampaignProgress;
pub use recipient::{ClaimOutcome, Contact, DeliveryStatus, Recipient};
pub use resolution::{Resolution, resolve_status};
pub use template::render;
