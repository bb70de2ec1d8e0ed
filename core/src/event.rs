//! Engine events. Each one is both an audit row and a notification payload.
//!
//! RULE: Every state change an operation commits is described by an event.
//! Events are appended to `event_log` inside the operation's transaction,
//! then handed to the notifier after commit.

use crate::types::{EntityId, Points};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variants are appended as features land. Never remove or reorder them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoyaltyEvent {
    // ── Accrual ────────────────────────────────────
    PointsAccrued {
        user_id: EntityId,
        order_id: Option<EntityId>,
        transaction_type: String,
        points: Points,
        new_balance: Points,
    },
    TierChanged {
        user_id: EntityId,
        old_tier: String,
        new_tier: String,
    },
    BalanceAdjusted {
        user_id: EntityId,
        delta: Points,
        new_balance: Points,
        reason: String,
    },

    // ── Campaigns ──────────────────────────────────
    CampaignBudgetConsumed {
        campaign_id: EntityId,
        points: Points,
        used_budget: Points,
    },
    GroupGoalReached {
        campaign_id: EntityId,
        target: i64,
        participants_rewarded: usize,
    },
    GroupGoalRewarded {
        campaign_id: EntityId,
        user_id: EntityId,
        points: Points,
    },

    // ── Redemptions ────────────────────────────────
    RedemptionCreated {
        redemption_id: EntityId,
        user_id: EntityId,
        reward_id: EntityId,
        points_used: Points,
    },
    RedemptionStatusChanged {
        redemption_id: EntityId,
        from: String,
        to: String,
    },

    // ── Referrals ──────────────────────────────────
    ReferralEvaluated {
        action_type: String,
        risk_score: u32,
        blocked: bool,
    },
    UserRegistered {
        user_id: EntityId,
        referred_by: Option<EntityId>,
        bonus_points: Points,
    },
    ReferralStatusChanged {
        referral_id: EntityId,
        status: String,
        points_awarded: Points,
    },

    // ── Lifecycle ──────────────────────────────────
    CustomerStatusChanged {
        user_id: EntityId,
        old_status: String,
        new_status: String,
    },
}

impl LoyaltyEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::PointsAccrued { .. } => "points_accrued",
            Self::TierChanged { .. } => "tier_changed",
            Self::BalanceAdjusted { .. } => "balance_adjusted",
            Self::CampaignBudgetConsumed { .. } => "campaign_budget_consumed",
            Self::GroupGoalReached { .. } => "group_goal_reached",
            Self::GroupGoalRewarded { .. } => "group_goal_rewarded",
            Self::RedemptionCreated { .. } => "redemption_created",
            Self::RedemptionStatusChanged { .. } => "redemption_status_changed",
            Self::ReferralEvaluated { .. } => "referral_evaluated",
            Self::UserRegistered { .. } => "user_registered",
            Self::ReferralStatusChanged { .. } => "referral_status_changed",
            Self::CustomerStatusChanged { .. } => "customer_status_changed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub event_type: String,
    pub payload: String, // JSON-serialized LoyaltyEvent
    pub created_at: DateTime<Utc>,
}
