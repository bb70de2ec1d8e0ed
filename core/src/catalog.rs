//! Rule catalog: admin-maintained configuration read by the engine.
//!
//! Everything here is data. Rules and campaigns are tagged variants
//! (`rule_type`, `campaign_type`) dispatched by the accrual and campaign
//! subsystems; adding a rule type is a new variant plus one match arm.
//! Catalog rows are soft-deactivated via `is_active`, never deleted.

use crate::types::{EntityId, Points};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Points rules ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointsRule {
    pub rule_id: EntityId,
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleKind {
    Base { rate_per_unit: f64 },
    CategoryMultiplier { category_id: String, multiplier: f64 },
    TierMultiplier { tier: String, multiplier: f64 },
    ActionBonus { action: String, points: Points },
}

impl RuleKind {
    /// Stable name stored in the `rule_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Base { .. } => "base",
            Self::CategoryMultiplier { .. } => "category_multiplier",
            Self::TierMultiplier { .. } => "tier_multiplier",
            Self::ActionBonus { .. } => "action_bonus",
        }
    }
}

impl PointsRule {
    /// Active and inside its validity window. Open-ended bounds always match.
    pub fn applies_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.valid_from.map_or(true, |from| now >= from)
            && self.valid_until.map_or(true, |until| now <= until)
    }
}

// ── Tiers ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierDefinition {
    pub tier: String,
    pub sort_order: i64,
    #[serde(default)]
    pub min_points_required: Points,
    #[serde(default)]
    pub min_total_spent: f64,
    #[serde(default)]
    pub min_orders_count: i64,
    #[serde(default = "default_multiplier")]
    pub points_multiplier: f64,
    #[serde(default)]
    pub benefits: Vec<String>,
}

/// The tier ladder, ordered by `sort_order` ascending.
#[derive(Debug, Clone, Default)]
pub struct TierLadder {
    tiers: Vec<TierDefinition>,
}

impl TierLadder {
    pub fn new(mut tiers: Vec<TierDefinition>) -> Self {
        tiers.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.tier.cmp(&b.tier)));
        Self { tiers }
    }

    pub fn get(&self, tier: &str) -> Option<&TierDefinition> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    /// Rank of a tier on the ladder. Unknown tiers rank below every known one.
    pub fn rank(&self, tier: &str) -> i64 {
        self.get(tier).map_or(i64::MIN, |t| t.sort_order)
    }

    pub fn tiers(&self) -> &[TierDefinition] {
        &self.tiers
    }
}

// ── Campaigns ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    DoublePoints,
    Seasonal,
    GroupGoal,
    TierBonus,
}

impl CampaignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoublePoints => "double_points",
            Self::Seasonal => "seasonal",
            Self::GroupGoal => "group_goal",
            Self::TierBonus => "tier_bonus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "double_points" => Some(Self::DoublePoints),
            "seasonal" => Some(Self::Seasonal),
            "group_goal" => Some(Self::GroupGoal),
            "tier_bonus" => Some(Self::TierBonus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub campaign_id: EntityId,
    pub name: String,
    pub campaign_type: CampaignType,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default = "default_multiplier")]
    pub points_multiplier: f64,
    #[serde(default)]
    pub applicable_categories: Vec<String>,
    #[serde(default)]
    pub applicable_tiers: Vec<String>,
    #[serde(default)]
    pub min_order_amount: Option<f64>,
    #[serde(default)]
    pub max_redemptions_per_user: Option<i64>,
    #[serde(default)]
    pub total_budget: Option<Points>,
    #[serde(default)]
    pub used_budget: Points,
    #[serde(default)]
    pub group_goal_target: Option<i64>,
    #[serde(default)]
    pub group_goal_current: i64,
    #[serde(default)]
    pub group_goal_reward: Points,
    /// Lower values apply first when several campaigns stack.
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Campaign {
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.start_at <= now && now <= self.end_at
    }

    /// `None` when the campaign has no budget.
    pub fn remaining_budget(&self) -> Option<Points> {
        self.total_budget.map(|total| (total - self.used_budget).max(0))
    }
}

// ── Rewards ────────────────────────────────────────────────────────

pub const UNLIMITED_STOCK: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoyaltyReward {
    pub reward_id: EntityId,
    pub name: String,
    pub points_required: Points,
    #[serde(default)]
    pub category: String,
    /// `-1` means unlimited.
    #[serde(default = "default_stock")]
    pub stock: i64,
    #[serde(default)]
    pub min_tier: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl LoyaltyReward {
    pub fn is_unlimited(&self) -> bool {
        self.stock == UNLIMITED_STOCK
    }

    pub fn in_stock(&self) -> bool {
        self.is_unlimited() || self.stock > 0
    }
}

fn default_true() -> bool {
    true
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_stock() -> i64 {
    UNLIMITED_STOCK
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tier(name: &str, order: i64) -> TierDefinition {
        TierDefinition {
            tier: name.to_string(),
            sort_order: order,
            min_points_required: 0,
            min_total_spent: 0.0,
            min_orders_count: 0,
            points_multiplier: 1.0,
            benefits: vec![],
        }
    }

    #[test]
    fn ladder_ranks_by_sort_order() {
        let ladder = TierLadder::new(vec![tier("gold", 3), tier("bronze", 1), tier("silver", 2)]);
        assert!(ladder.rank("gold") > ladder.rank("silver"));
        assert!(ladder.rank("silver") > ladder.rank("bronze"));
        assert!(ladder.rank("platinum") < ladder.rank("bronze"));
        assert_eq!(ladder.tiers()[0].tier, "bronze");
    }

    #[test]
    fn rule_kind_deserializes_from_tagged_json() {
        let rule: PointsRule = serde_json::from_str(
            r#"{"rule_id":"r1","rule_type":"category_multiplier","category_id":"desserts","multiplier":1.5}"#,
        )
        .unwrap();
        assert_eq!(
            rule.kind,
            RuleKind::CategoryMultiplier { category_id: "desserts".into(), multiplier: 1.5 }
        );
        assert!(rule.is_active);
        assert_eq!(rule.kind.type_name(), "category_multiplier");
    }

    #[test]
    fn rule_window_bounds_are_inclusive() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let rule = PointsRule {
            rule_id: "r".into(),
            kind: RuleKind::Base { rate_per_unit: 1.0 },
            is_active: true,
            valid_from: Some(from),
            valid_until: Some(until),
        };
        assert!(rule.applies_at(from));
        assert!(rule.applies_at(until));
        assert!(!rule.applies_at(until + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn remaining_budget_never_negative() {
        let c: Campaign = serde_json::from_str(
            r#"{"campaign_id":"c","name":"x","campaign_type":"double_points",
                "start_at":"2026-01-01T00:00:00Z","end_at":"2026-02-01T00:00:00Z",
                "total_budget":100,"used_budget":150}"#,
        )
        .unwrap();
        assert_eq!(c.remaining_budget(), Some(0));
    }
}
