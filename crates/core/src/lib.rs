//! `sendwave-core`: shared domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::AggregateRoot;
pub use error::{DomainError, DomainResult};
pub use id::{
    CampaignId, ContactId, ContactListId, RecipientId, SessionId, TransactionId, UserId,
};
