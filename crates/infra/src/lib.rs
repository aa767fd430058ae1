//! Infrastructure layer: configuration, stores, job queue, gateways and the
//! campaign delivery pipeline.

pub mod config;
pub mod contacts;
pub mod delivery;
pub mod gateway;
pub mod jobs;
pub mod ledger;
pub mod pipeline;
pub mod store;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod testkit;
