//! Tier progression, recomputed after every accrual-type balance change.
//!
//! A member qualifies for a tier when lifetime points, lifetime spend and
//! order count all meet its thresholds; the highest qualifying `sort_order`
//! wins. Promotion only: lifetime stats never decrease, and a computed tier
//! below the stored one (after an admin override or a catalog edit) never
//! demotes. Redemptions do not touch lifetime stats and never call in here.

use crate::{
    catalog::{TierDefinition, TierLadder},
    error::{LoyaltyError, LoyaltyResult},
    event::LoyaltyEvent,
    store::LoyaltyStore,
    user::User,
};

/// Highest tier whose thresholds the stats satisfy.
pub fn qualifying_tier<'l>(ladder: &'l TierLadder, user: &User) -> Option<&'l TierDefinition> {
    ladder
        .tiers()
        .iter()
        .filter(|t| {
            user.total_points_earned >= t.min_points_required
                && user.total_spent >= t.min_total_spent
                && user.total_orders >= t.min_orders_count
        })
        .max_by_key(|t| t.sort_order)
}

pub struct TierSubsystem<'a> {
    store: &'a LoyaltyStore,
}

impl<'a> TierSubsystem<'a> {
    pub fn new(store: &'a LoyaltyStore) -> Self {
        Self { store }
    }

    pub fn ladder(&self) -> LoyaltyResult<TierLadder> {
        Ok(TierLadder::new(self.store.tiers()?))
    }

    /// Promote the user if their stats now qualify for a higher tier.
    pub fn recompute(&self, user_id: &str) -> LoyaltyResult<Option<LoyaltyEvent>> {
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| LoyaltyError::not_found("user", user_id))?;
        let ladder = self.ladder()?;

        let Some(target) = qualifying_tier(&ladder, &user) else {
            return Ok(None);
        };
        if target.tier == user.loyalty_tier || target.sort_order <= ladder.rank(&user.loyalty_tier) {
            return Ok(None);
        }

        self.store.set_user_tier(user_id, &target.tier)?;
        log::info!(
            "tier: {user_id} promoted {} -> {} (earned={}, spent={:.2}, orders={})",
            user.loyalty_tier,
            target.tier,
            user.total_points_earned,
            user.total_spent,
            user.total_orders
        );
        Ok(Some(LoyaltyEvent::TierChanged {
            user_id: user_id.to_string(),
            old_tier: user.loyalty_tier,
            new_tier: target.tier.clone(),
        }))
    }

    /// Explicit admin placement. The only path that can lower a tier.
    pub fn set_tier(&self, user_id: &str, tier: &str) -> LoyaltyResult<Option<LoyaltyEvent>> {
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| LoyaltyError::not_found("user", user_id))?;
        let ladder = self.ladder()?;
        if ladder.get(tier).is_none() {
            return Err(LoyaltyError::Validation(format!("unknown tier '{tier}'")));
        }
        if user.loyalty_tier == tier {
            return Ok(None);
        }
        self.store.set_user_tier(user_id, tier)?;
        log::info!("tier: {user_id} set {} -> {tier} by admin", user.loyalty_tier);
        Ok(Some(LoyaltyEvent::TierChanged {
            user_id: user_id.to_string(),
            old_tier: user.loyalty_tier,
            new_tier: tier.to_string(),
        }))
    }
}
