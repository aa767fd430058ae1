//! Points wallet module (prepaid balance backed by an append-only ledger).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod account;
pub mod summary;
pub mod topup;

pub use account::{PointsAccount, TxnKind, WalletTransaction};
pub use summary::{WalletLimits, WalletSummary};
pub use topup::{EXPIRY_OPTIONS_DAYS, Plan, TopupGrant, TopupRequest};
