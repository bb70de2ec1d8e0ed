//! loyalty-core: points accrual, tiers, campaigns, redemptions, referral
//! fraud scoring and customer lifecycle over a single SQLite store.
//!
//! Everything goes through [`engine::LoyaltyEngine`]. Subsystems are
//! stateless views over the store, built per operation inside the
//! engine's transaction.

pub mod accrual_subsystem;
pub mod campaign_subsystem;
pub mod catalog;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fraud_detection_subsystem;
pub mod lifecycle_subsystem;
pub mod notify;
pub mod redemption_subsystem;
pub mod referral_subsystem;
pub mod rng;
pub mod store;
pub mod tier_subsystem;
pub mod types;
pub mod user;

pub use engine::LoyaltyEngine;
pub use error::{LoyaltyError, LoyaltyResult};
