//! Redemption lifecycle: spend points on a catalog reward.
//!
//! State machine:
//!   pending  → approved | cancelled
//!   approved → delivered | cancelled
//!   delivered, cancelled → terminal
//!
//! Creation checks run in a fixed order (inactive, tier, stock, balance),
//! then stock and balance move through guarded updates. A guard that
//! matches zero rows maps to the same error the pre-check would have
//! raised, so a race lost between check and update looks identical to
//! losing it at the check.

use crate::{
    catalog::TierLadder,
    config::LoyaltyConfig,
    error::{LoyaltyError, LoyaltyResult},
    event::LoyaltyEvent,
    rng::CodeGenerator,
    store::LoyaltyStore,
    types::{EntityId, Points},
    user::{LoyaltyTransaction, TransactionType},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_CODE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Pending,
    Approved,
    Delivered,
    Cancelled,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "delivered" => Some(Self::Delivered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// The transition table. Anything not listed is rejected.
    pub fn can_transition_to(&self, target: RedemptionStatus) -> bool {
        use RedemptionStatus::*;
        matches!(
            (self, target),
            (Pending, Approved) | (Pending, Cancelled) | (Approved, Delivered) | (Approved, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoyaltyRedemption {
    pub redemption_id: EntityId,
    pub user_id: EntityId,
    pub reward_id: EntityId,
    pub status: RedemptionStatus,
    pub points_used: Points,
    pub redemption_code: String,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedemptionReceipt {
    pub redemption_id: EntityId,
    pub redemption_code: String,
    pub points_used: Points,
    pub new_balance: Points,
}

/// Whether a member's tier reaches a reward's minimum. A minimum that is
/// not on the ladder only admits members holding exactly that tier.
pub fn meets_min_tier(ladder: &TierLadder, user_tier: &str, min_tier: &str) -> bool {
    if user_tier == min_tier {
        return true;
    }
    match ladder.get(min_tier) {
        Some(required) => ladder.rank(user_tier) >= required.sort_order,
        None => false,
    }
}

pub struct RedemptionSubsystem<'a> {
    store: &'a LoyaltyStore,
    config: &'a LoyaltyConfig,
}

impl<'a> RedemptionSubsystem<'a> {
    pub fn new(store: &'a LoyaltyStore, config: &'a LoyaltyConfig) -> Self {
        Self { store, config }
    }

    pub fn redeem(
        &self,
        user_id: &str,
        reward_id: &str,
        codes: &mut CodeGenerator,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(RedemptionReceipt, Vec<LoyaltyEvent>)> {
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| LoyaltyError::not_found("user", user_id))?;
        let reward = self
            .store
            .get_reward(reward_id)?
            .ok_or_else(|| LoyaltyError::not_found("reward", reward_id))?;

        if !reward.is_active {
            return Err(LoyaltyError::RewardInactive { reward_id: reward_id.to_string() });
        }
        if let Some(min_tier) = &reward.min_tier {
            let ladder = TierLadder::new(self.store.tiers()?);
            if !meets_min_tier(&ladder, &user.loyalty_tier, min_tier) {
                return Err(LoyaltyError::TierNotEligible {
                    required: min_tier.clone(),
                    actual: user.loyalty_tier.clone(),
                });
            }
        }
        if !reward.in_stock() {
            return Err(LoyaltyError::OutOfStock { reward_id: reward_id.to_string() });
        }
        let cost = reward.points_required;
        if user.points_balance < cost {
            return Err(LoyaltyError::InsufficientPoints {
                required: cost,
                available: user.points_balance,
            });
        }

        if !self.store.take_reward_stock(reward_id)? {
            return Err(LoyaltyError::OutOfStock { reward_id: reward_id.to_string() });
        }
        let new_balance = self
            .store
            .debit_points_guarded(user_id, cost)?
            .ok_or(LoyaltyError::InsufficientPoints {
                required: cost,
                available: user.points_balance,
            })?;

        let redemption_code = self.unique_code(codes)?;
        let redemption = LoyaltyRedemption {
            redemption_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            reward_id: reward_id.to_string(),
            status: RedemptionStatus::Pending,
            points_used: cost,
            redemption_code,
            created_at: now,
            approved_at: None,
            delivered_at: None,
            cancelled_at: None,
        };
        self.store.insert_redemption(&redemption)?;
        self.store.insert_transaction(&LoyaltyTransaction {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            points_change: -cost,
            transaction_type: TransactionType::Redemption,
            order_id: None,
            order_amount: None,
            description: format!("Redeemed {}", reward.name),
            created_at: now,
        })?;

        log::info!(
            "redemption: {} redeemed {} for {cost} points (balance {new_balance})",
            user_id,
            reward_id
        );

        let event = LoyaltyEvent::RedemptionCreated {
            redemption_id: redemption.redemption_id.clone(),
            user_id: user_id.to_string(),
            reward_id: reward_id.to_string(),
            points_used: cost,
        };
        Ok((
            RedemptionReceipt {
                redemption_id: redemption.redemption_id,
                redemption_code: redemption.redemption_code,
                points_used: cost,
                new_balance,
            },
            vec![event],
        ))
    }

    pub fn update_status(
        &self,
        redemption_id: &str,
        target: RedemptionStatus,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(LoyaltyRedemption, Vec<LoyaltyEvent>)> {
        let current = self
            .store
            .get_redemption(redemption_id)?
            .ok_or_else(|| LoyaltyError::not_found("redemption", redemption_id))?;

        let invalid = || LoyaltyError::InvalidTransition {
            from: current.status.as_str().to_string(),
            to: target.as_str().to_string(),
        };
        if !current.status.can_transition_to(target) {
            return Err(invalid());
        }
        if !self
            .store
            .transition_redemption(redemption_id, current.status, target, now)?
        {
            return Err(invalid());
        }

        let mut events = vec![LoyaltyEvent::RedemptionStatusChanged {
            redemption_id: redemption_id.to_string(),
            from: current.status.as_str().to_string(),
            to: target.as_str().to_string(),
        }];

        if target == RedemptionStatus::Cancelled {
            let new_balance = self
                .store
                .credit_points(&current.user_id, current.points_used, false)?;
            self.store.restock_reward(&current.reward_id)?;
            self.store.insert_transaction(&LoyaltyTransaction {
                transaction_id: uuid::Uuid::new_v4().to_string(),
                user_id: current.user_id.clone(),
                points_change: current.points_used,
                transaction_type: TransactionType::Redemption,
                order_id: None,
                order_amount: None,
                description: format!("Refund for cancelled redemption {}", current.redemption_code),
                created_at: now,
            })?;
            events.push(LoyaltyEvent::BalanceAdjusted {
                user_id: current.user_id.clone(),
                delta: current.points_used,
                new_balance,
                reason: "redemption_cancelled".to_string(),
            });
        }

        log::info!(
            "redemption: {redemption_id} {} -> {}",
            current.status.as_str(),
            target.as_str()
        );

        let updated = self
            .store
            .get_redemption(redemption_id)?
            .ok_or_else(|| LoyaltyError::not_found("redemption", redemption_id))?;
        Ok((updated, events))
    }

    fn unique_code(&self, codes: &mut CodeGenerator) -> LoyaltyResult<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = codes.code(&self.config.redemption_code_prefix, self.config.code_length);
            if !self.store.redemption_code_taken(&code)? {
                return Ok(code);
            }
            log::debug!("redemption: code {code} collided, drawing again");
        }
        Err(anyhow::anyhow!(
            "could not draw a free redemption code in {MAX_CODE_ATTEMPTS} attempts"
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TierDefinition;
    use RedemptionStatus::*;

    #[test]
    fn transition_table() {
        let all = [Pending, Approved, Delivered, Cancelled];
        let allowed = [
            (Pending, Approved),
            (Pending, Cancelled),
            (Approved, Delivered),
            (Approved, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from.as_str(),
                    to.as_str()
                );
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(Delivered.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Approved.is_terminal());
    }

    #[test]
    fn status_names_round_trip() {
        for s in [Pending, Approved, Delivered, Cancelled] {
            assert_eq!(RedemptionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RedemptionStatus::parse("shipped"), None);
    }

    #[test]
    fn min_tier_uses_ladder_rank() {
        let tier = |name: &str, order| TierDefinition {
            tier: name.into(),
            sort_order: order,
            min_points_required: 0,
            min_total_spent: 0.0,
            min_orders_count: 0,
            points_multiplier: 1.0,
            benefits: vec![],
        };
        let ladder = TierLadder::new(vec![tier("bronze", 1), tier("silver", 2), tier("gold", 3)]);
        assert!(meets_min_tier(&ladder, "gold", "silver"));
        assert!(meets_min_tier(&ladder, "silver", "silver"));
        assert!(!meets_min_tier(&ladder, "bronze", "silver"));
        assert!(!meets_min_tier(&ladder, "gold", "platinum"));
        assert!(meets_min_tier(&ladder, "platinum", "platinum"));
    }
}
