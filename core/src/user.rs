//! Loyalty member record and the append-only points ledger.

use crate::lifecycle_subsystem::CustomerStatus;
use crate::types::{EntityId, Points};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: EntityId,
    pub email: String,
    pub name: String,
    /// Country or region the member registered from, used by the fraud scorer.
    pub region: Option<String>,
    pub referral_code: String,
    pub points_balance: Points,
    pub total_points_earned: Points,
    pub loyalty_tier: String,
    pub total_spent: f64,
    pub total_orders: i64,
    pub last_purchase_at: Option<DateTime<Utc>>,
    pub customer_status: CustomerStatus,
    pub status_override: Option<CustomerStatus>,
    pub created_at: DateTime<Utc>,
}

/// Registration payload from the surrounding account flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
}

impl NewUser {
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Welcome,
    Referral,
    Redemption,
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Welcome => "welcome",
            Self::Referral => "referral",
            Self::Redemption => "redemption",
            Self::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(Self::Purchase),
            "welcome" => Some(Self::Welcome),
            "referral" => Some(Self::Referral),
            "redemption" => Some(Self::Redemption),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoyaltyTransaction {
    pub transaction_id: EntityId,
    pub user_id: EntityId,
    pub points_change: Points,
    pub transaction_type: TransactionType,
    pub order_id: Option<EntityId>,
    pub order_amount: Option<f64>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
