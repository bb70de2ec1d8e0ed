use crate::types::{EntityId, Points};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoyaltyError {
    // ── Infrastructure ─────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Input validation ───────────────────────────────────────
    #[error("Invalid input: {0}")]
    Validation(String),

    // ── Business rules ─────────────────────────────────────────
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: EntityId },

    #[error("Insufficient points: need {required}, have {available}")]
    InsufficientPoints { required: Points, available: Points },

    #[error("Reward '{reward_id}' is out of stock")]
    OutOfStock { reward_id: EntityId },

    #[error("Reward requires tier '{required}', user is '{actual}'")]
    TierNotEligible { required: String, actual: String },

    #[error("Reward '{reward_id}' is not active")]
    RewardInactive { reward_id: EntityId },

    #[error("Invalid redemption transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Referral code '{code}' is not valid")]
    InvalidCode { code: String },

    #[error("An account already exists for '{email}'")]
    DuplicateIdentity { email: String },

    #[error("Campaign '{campaign_id}' budget changed concurrently")]
    BudgetConflict { campaign_id: EntityId },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoyaltyError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Business-rule violations are returned to the caller as-is; every
    /// other variant means the operation should be retried as a whole.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::InsufficientPoints { .. }
                | Self::OutOfStock { .. }
                | Self::TierNotEligible { .. }
                | Self::RewardInactive { .. }
                | Self::InvalidTransition { .. }
                | Self::InvalidCode { .. }
                | Self::DuplicateIdentity { .. }
        )
    }
}

pub type LoyaltyResult<T> = Result<T, LoyaltyError>;
