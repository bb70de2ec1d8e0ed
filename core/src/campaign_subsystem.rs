//! Campaign overlay evaluator.
//!
//! Selects the campaigns that apply to one order and settles their shared
//! counters. Dispatch is on `campaign_type`:
//!   - double_points, tier_bonus, seasonal → multiplier overlay
//!   - group_goal                          → shared counter + fan-out
//!
//! COMPOSITION RULE (fixed): multiplier campaigns compose multiplicatively,
//! applied in ascending (priority, points_multiplier, campaign_id) order.
//!
//! BUDGET RULE: budgeted campaigns fund the whole award, base and tier points
//! included. If the smallest remaining budget among applied campaigns cannot
//! cover a boosted award, the award is clamped to that remainder, but never
//! below what the member would have earned without any campaign. Each
//! budgeted campaign then draws `min(award, its remaining)`, so a floored
//! award empties the budget. Campaigns with a multiplier below 1 are never
//! clamped. Exhausted campaigns are not selected.
//!
//! Group goals count orders until the target is crossed. Orders after the
//! crossing neither join the goal nor earn its reward.

use crate::{
    catalog::{Campaign, CampaignType},
    error::{LoyaltyError, LoyaltyResult},
    event::LoyaltyEvent,
    store::LoyaltyStore,
    types::{to_millis, EntityId, Points},
    user::{LoyaltyTransaction, TransactionType},
};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// What the evaluator needs to know about the order being accrued.
#[derive(Debug, Clone)]
pub struct OrderContext<'a> {
    pub user_id: &'a str,
    pub order_id: Option<&'a str>,
    pub amount: f64,
    pub tier: &'a str,
    pub categories: Vec<&'a str>,
}

/// Campaigns selected for one order.
#[derive(Debug, Clone, Default)]
pub struct CampaignOverlay {
    /// Multiplier campaigns in composition order.
    pub multipliers: Vec<Campaign>,
    pub group_goals: Vec<Campaign>,
}

impl CampaignOverlay {
    pub fn multiplier(&self) -> f64 {
        self.multipliers.iter().map(|c| c.points_multiplier).product()
    }

    /// Smallest remaining budget among applied budgeted campaigns.
    pub fn budget_cap(&self) -> Option<Points> {
        self.multipliers.iter().filter_map(Campaign::remaining_budget).min()
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty() && self.group_goals.is_empty()
    }
}

/// Window, activity, tier, category and minimum-amount checks.
/// An order matches a category list when any of its line categories is listed.
pub fn is_eligible(campaign: &Campaign, ctx: &OrderContext<'_>, now: DateTime<Utc>) -> bool {
    if !campaign.is_active || !campaign.in_window(now) {
        return false;
    }
    if !campaign.applicable_tiers.is_empty()
        && !campaign.applicable_tiers.iter().any(|t| t == ctx.tier)
    {
        return false;
    }
    if !campaign.applicable_categories.is_empty()
        && !ctx
            .categories
            .iter()
            .any(|cat| campaign.applicable_categories.iter().any(|c| c == cat))
    {
        return false;
    }
    if let Some(min) = campaign.min_order_amount {
        if ctx.amount < min {
            return false;
        }
    }
    true
}

pub fn composition_order(a: &Campaign, b: &Campaign) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.points_multiplier.partial_cmp(&b.points_multiplier).unwrap_or(Ordering::Equal))
        .then(a.campaign_id.cmp(&b.campaign_id))
}

/// Apply the budget rule to an award.
pub fn clamp_to_budget(uncampaigned: Points, full: Points, cap: Option<Points>) -> Points {
    match cap {
        Some(remaining) if full > uncampaigned => uncampaigned.max(full.min(remaining)),
        _ => full,
    }
}

pub struct CampaignSubsystem<'a> {
    store: &'a LoyaltyStore,
}

impl<'a> CampaignSubsystem<'a> {
    pub fn new(store: &'a LoyaltyStore) -> Self {
        Self { store }
    }

    pub fn select(&self, ctx: &OrderContext<'_>, now: DateTime<Utc>) -> LoyaltyResult<CampaignOverlay> {
        let mut overlay = CampaignOverlay::default();

        for campaign in self.store.live_campaigns(to_millis(now))? {
            if !is_eligible(&campaign, ctx, now) {
                continue;
            }
            match campaign.campaign_type {
                CampaignType::DoublePoints | CampaignType::TierBonus | CampaignType::Seasonal => {
                    if campaign.remaining_budget() == Some(0) {
                        log::debug!("campaign {}: budget exhausted", campaign.campaign_id);
                        continue;
                    }
                    if let Some(cap) = campaign.max_redemptions_per_user {
                        let used = self.store.campaign_usage_count(&campaign.campaign_id, ctx.user_id)?;
                        if used >= cap {
                            log::debug!(
                                "campaign {}: {} reached per-user cap {cap}",
                                campaign.campaign_id,
                                ctx.user_id
                            );
                            continue;
                        }
                    }
                    overlay.multipliers.push(campaign);
                }
                CampaignType::GroupGoal => {
                    if campaign.group_goal_target.is_some() {
                        overlay.group_goals.push(campaign);
                    }
                }
            }
        }

        overlay.multipliers.sort_by(composition_order);
        Ok(overlay)
    }

    /// Record usage and draw down budgets for the applied multiplier campaigns.
    pub fn settle_multipliers(
        &self,
        overlay: &CampaignOverlay,
        ctx: &OrderContext<'_>,
        awarded: Points,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Vec<LoyaltyEvent>> {
        let mut out = Vec::new();
        for campaign in &overlay.multipliers {
            self.store.insert_campaign_usage(
                &campaign.campaign_id,
                ctx.user_id,
                ctx.order_id,
                awarded,
                now,
            )?;

            let Some(remaining) = campaign.remaining_budget() else {
                continue;
            };
            let draw = awarded.min(remaining);
            if draw <= 0 {
                continue;
            }
            let used = self
                .store
                .consume_campaign_budget(&campaign.campaign_id, draw)?
                .ok_or_else(|| LoyaltyError::BudgetConflict {
                    campaign_id: campaign.campaign_id.clone(),
                })?;
            out.push(LoyaltyEvent::CampaignBudgetConsumed {
                campaign_id: campaign.campaign_id.clone(),
                points: draw,
                used_budget: used,
            });
        }
        Ok(out)
    }

    /// Count the order toward each group goal. Returns events and the users
    /// credited by any fan-out this order triggered.
    pub fn advance_group_goals(
        &self,
        overlay: &CampaignOverlay,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(Vec<LoyaltyEvent>, Vec<EntityId>)> {
        let mut events = Vec::new();
        let mut rewarded = Vec::new();

        for campaign in &overlay.group_goals {
            let Some(target) = campaign.group_goal_target else {
                continue;
            };
            let (before, after) = self.store.increment_group_goal(&campaign.campaign_id, 1)?;
            if before >= target {
                log::debug!("campaign {}: goal already reached, {user_id} not joined", campaign.campaign_id);
                continue;
            }
            self.store.add_campaign_participant(&campaign.campaign_id, user_id, now)?;

            // Crossing, not reaching: later orders must not re-trigger.
            if after >= target {
                log::info!(
                    "campaign {}: group goal {target} reached ({before} -> {after})",
                    campaign.campaign_id
                );
                let (fan_events, users) = self.fan_out(campaign, now)?;
                events.push(LoyaltyEvent::GroupGoalReached {
                    campaign_id: campaign.campaign_id.clone(),
                    target,
                    participants_rewarded: users.len(),
                });
                events.extend(fan_events);
                rewarded.extend(users);
            }
        }
        Ok((events, rewarded))
    }

    /// Retry path: credit any participant of a reached goal that has not
    /// been rewarded yet. Safe to call repeatedly.
    pub fn settle_group_goal(
        &self,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(Vec<LoyaltyEvent>, Vec<EntityId>)> {
        let campaign = self
            .store
            .get_campaign(campaign_id)?
            .ok_or_else(|| LoyaltyError::not_found("campaign", campaign_id))?;
        if campaign.campaign_type != CampaignType::GroupGoal {
            return Err(LoyaltyError::Validation(format!(
                "campaign '{campaign_id}' is not a group goal"
            )));
        }
        match campaign.group_goal_target {
            Some(target) if campaign.group_goal_current >= target => self.fan_out(&campaign, now),
            _ => Ok((Vec::new(), Vec::new())),
        }
    }

    /// Credit the goal reward once per participant. The rewarded marker
    /// flips inside the same transaction as the credit.
    fn fan_out(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<(Vec<LoyaltyEvent>, Vec<EntityId>)> {
        let mut events = Vec::new();
        let mut rewarded = Vec::new();

        for user_id in self.store.unrewarded_participants(&campaign.campaign_id)? {
            if !self.store.mark_participant_rewarded(&campaign.campaign_id, &user_id, now)? {
                continue;
            }
            let points = campaign.group_goal_reward.max(0);
            if points > 0 {
                self.store.credit_points(&user_id, points, true)?;
                self.store.insert_transaction(&LoyaltyTransaction {
                    transaction_id: uuid::Uuid::new_v4().to_string(),
                    user_id: user_id.clone(),
                    points_change: points,
                    transaction_type: TransactionType::Adjustment,
                    order_id: None,
                    order_amount: None,
                    description: format!("Group goal reward: {}", campaign.name),
                    created_at: now,
                })?;
            }
            events.push(LoyaltyEvent::GroupGoalRewarded {
                campaign_id: campaign.campaign_id.clone(),
                user_id: user_id.clone(),
                points,
            });
            rewarded.push(user_id);
        }
        Ok((events, rewarded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    fn campaign(id: &str, kind: CampaignType, multiplier: f64) -> Campaign {
        Campaign {
            campaign_id: id.into(),
            name: id.into(),
            campaign_type: kind,
            start_at: now() - Duration::days(1),
            end_at: now() + Duration::days(1),
            points_multiplier: multiplier,
            applicable_categories: vec![],
            applicable_tiers: vec![],
            min_order_amount: None,
            max_redemptions_per_user: None,
            total_budget: None,
            used_budget: 0,
            group_goal_target: None,
            group_goal_current: 0,
            group_goal_reward: 0,
            priority: 0,
            is_active: true,
        }
    }

    fn ctx<'a>(amount: f64, tier: &'a str, categories: Vec<&'a str>) -> OrderContext<'a> {
        OrderContext { user_id: "u1", order_id: Some("o1"), amount, tier, categories }
    }

    #[test]
    fn window_bounds_and_activity() {
        let mut c = campaign("c", CampaignType::DoublePoints, 2.0);
        assert!(is_eligible(&c, &ctx(10.0, "bronze", vec![]), now()));

        c.start_at = now();
        c.end_at = now();
        assert!(is_eligible(&c, &ctx(10.0, "bronze", vec![]), now()));

        c.end_at = now() - Duration::seconds(1);
        assert!(!is_eligible(&c, &ctx(10.0, "bronze", vec![]), now()));

        let mut inactive = campaign("c", CampaignType::DoublePoints, 2.0);
        inactive.is_active = false;
        assert!(!is_eligible(&inactive, &ctx(10.0, "bronze", vec![]), now()));
    }

    #[test]
    fn tier_category_and_minimum_filters() {
        let mut c = campaign("c", CampaignType::TierBonus, 1.5);
        c.applicable_tiers = vec!["gold".into()];
        assert!(!is_eligible(&c, &ctx(10.0, "silver", vec![]), now()));
        assert!(is_eligible(&c, &ctx(10.0, "gold", vec![]), now()));

        let mut c = campaign("c", CampaignType::Seasonal, 1.5);
        c.applicable_categories = vec!["desserts".into()];
        assert!(!is_eligible(&c, &ctx(10.0, "gold", vec!["mains"]), now()));
        assert!(is_eligible(&c, &ctx(10.0, "gold", vec!["mains", "desserts"]), now()));

        let mut c = campaign("c", CampaignType::DoublePoints, 2.0);
        c.min_order_amount = Some(25.0);
        assert!(!is_eligible(&c, &ctx(24.99, "gold", vec![]), now()));
        assert!(is_eligible(&c, &ctx(25.0, "gold", vec![]), now()));
    }

    #[test]
    fn composition_order_is_priority_then_multiplier_then_id() {
        let mut a = campaign("a", CampaignType::DoublePoints, 3.0);
        let mut b = campaign("b", CampaignType::Seasonal, 1.5);
        let c = campaign("c", CampaignType::TierBonus, 1.5);
        a.priority = 1;
        b.priority = 0;

        let mut list = vec![a.clone(), c.clone(), b.clone()];
        list.sort_by(composition_order);
        let ids: Vec<_> = list.iter().map(|c| c.campaign_id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);

        b.priority = 1;
        let mut list = vec![a, b, c];
        list.sort_by(composition_order);
        let ids: Vec<_> = list.iter().map(|c| c.campaign_id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
    }

    #[test]
    fn budget_clamp_keeps_uncampaigned_floor() {
        assert_eq!(clamp_to_budget(50, 100, None), 100);
        assert_eq!(clamp_to_budget(50, 100, Some(1_000)), 100);
        assert_eq!(clamp_to_budget(50, 100, Some(70)), 70);
        assert_eq!(clamp_to_budget(50, 100, Some(10)), 50);
    }

    #[test]
    fn budget_clamp_ignores_reducing_campaigns() {
        assert_eq!(clamp_to_budget(100, 50, Some(10)), 50);
        assert_eq!(clamp_to_budget(100, 50, None), 50);
        assert_eq!(clamp_to_budget(100, 100, Some(0)), 100);
    }

    #[test]
    fn overlay_multiplier_and_cap() {
        let mut a = campaign("a", CampaignType::DoublePoints, 2.0);
        a.total_budget = Some(500);
        a.used_budget = 100;
        let mut b = campaign("b", CampaignType::Seasonal, 1.5);
        b.total_budget = Some(300);
        let overlay = CampaignOverlay { multipliers: vec![a, b], group_goals: vec![] };
        assert!((overlay.multiplier() - 3.0).abs() < 1e-12);
        assert_eq!(overlay.budget_cap(), Some(300));
        assert!(CampaignOverlay::default().budget_cap().is_none());
        assert!((CampaignOverlay::default().multiplier() - 1.0).abs() < 1e-12);
    }
}
