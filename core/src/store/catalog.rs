use super::{bool_to_int, LoyaltyStore};
use crate::{
    catalog::{Campaign, CampaignType, LoyaltyReward, PointsRule, RuleKind, TierDefinition},
    error::{LoyaltyError, LoyaltyResult},
    types::{from_millis, to_millis},
};
use rusqlite::{params, OptionalExtension, Row};

const CAMPAIGN_COLUMNS: &str = "campaign_id, name, campaign_type, start_at, end_at,
    points_multiplier, applicable_categories_json, applicable_tiers_json, min_order_amount,
    max_redemptions_per_user, total_budget, used_budget, group_goal_target,
    group_goal_current, group_goal_reward, priority, is_active";

/// Campaign row before its JSON columns are decoded.
struct CampaignRow {
    campaign: Campaign,
    campaign_type: String,
    categories_json: String,
    tiers_json: String,
}

fn campaign_row(row: &Row<'_>) -> rusqlite::Result<CampaignRow> {
    Ok(CampaignRow {
        campaign: Campaign {
            campaign_id: row.get(0)?,
            name: row.get(1)?,
            campaign_type: CampaignType::Seasonal,
            start_at: from_millis(row.get(3)?),
            end_at: from_millis(row.get(4)?),
            points_multiplier: row.get(5)?,
            applicable_categories: Vec::new(),
            applicable_tiers: Vec::new(),
            min_order_amount: row.get(8)?,
            max_redemptions_per_user: row.get(9)?,
            total_budget: row.get(10)?,
            used_budget: row.get(11)?,
            group_goal_target: row.get(12)?,
            group_goal_current: row.get(13)?,
            group_goal_reward: row.get(14)?,
            priority: row.get(15)?,
            is_active: row.get::<_, i64>(16)? != 0,
        },
        campaign_type: row.get(2)?,
        categories_json: row.get(6)?,
        tiers_json: row.get(7)?,
    })
}

impl CampaignRow {
    fn decode(self) -> LoyaltyResult<Campaign> {
        let mut c = self.campaign;
        c.campaign_type = CampaignType::parse(&self.campaign_type).ok_or_else(|| {
            LoyaltyError::Other(anyhow::anyhow!(
                "campaign '{}' has unknown type '{}'",
                c.campaign_id,
                self.campaign_type
            ))
        })?;
        c.applicable_categories = serde_json::from_str(&self.categories_json)?;
        c.applicable_tiers = serde_json::from_str(&self.tiers_json)?;
        Ok(c)
    }
}

fn reward_from_row(row: &Row<'_>) -> rusqlite::Result<LoyaltyReward> {
    Ok(LoyaltyReward {
        reward_id: row.get(0)?,
        name: row.get(1)?,
        points_required: row.get(2)?,
        category: row.get(3)?,
        stock: row.get(4)?,
        min_tier: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
    })
}

impl LoyaltyStore {
    // ── Points rules ──────────────────────────────────────────────

    pub fn upsert_points_rule(&self, rule: &PointsRule) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO points_rule (rule_id, rule_type, params_json, is_active, valid_from, valid_until)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(rule_id) DO UPDATE SET
                rule_type = excluded.rule_type,
                params_json = excluded.params_json,
                is_active = excluded.is_active,
                valid_from = excluded.valid_from,
                valid_until = excluded.valid_until",
            params![
                rule.rule_id,
                rule.kind.type_name(),
                serde_json::to_string(&rule.kind)?,
                bool_to_int(rule.is_active),
                rule.valid_from.map(to_millis),
                rule.valid_until.map(to_millis),
            ],
        )?;
        Ok(())
    }

    /// Every rule of one type, active or not, ordered by id.
    pub fn points_rules(&self, rule_type: &str) -> LoyaltyResult<Vec<PointsRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT rule_id, params_json, is_active, valid_from, valid_until
             FROM points_rule WHERE rule_type = ?1
             ORDER BY rule_id ASC",
        )?;
        let raw = stmt
            .query_map(params![rule_type], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(rule_id, params_json, is_active, from, until)| -> LoyaltyResult<PointsRule> {
                let kind: RuleKind = serde_json::from_str(&params_json)?;
                Ok(PointsRule {
                    rule_id,
                    kind,
                    is_active,
                    valid_from: from.map(from_millis),
                    valid_until: until.map(from_millis),
                })
            })
            .collect()
    }

    pub fn set_points_rule_active(&self, rule_id: &str, active: bool) -> LoyaltyResult<bool> {
        let n = self.conn.execute(
            "UPDATE points_rule SET is_active = ?1 WHERE rule_id = ?2",
            params![bool_to_int(active), rule_id],
        )?;
        Ok(n > 0)
    }

    // ── Tiers ─────────────────────────────────────────────────────

    pub fn upsert_tier(&self, t: &TierDefinition) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO loyalty_tier (
                tier, sort_order, min_points_required, min_total_spent,
                min_orders_count, points_multiplier, benefits_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(tier) DO UPDATE SET
                sort_order = excluded.sort_order,
                min_points_required = excluded.min_points_required,
                min_total_spent = excluded.min_total_spent,
                min_orders_count = excluded.min_orders_count,
                points_multiplier = excluded.points_multiplier,
                benefits_json = excluded.benefits_json",
            params![
                t.tier,
                t.sort_order,
                t.min_points_required,
                t.min_total_spent,
                t.min_orders_count,
                t.points_multiplier,
                serde_json::to_string(&t.benefits)?,
            ],
        )?;
        Ok(())
    }

    pub fn tiers(&self) -> LoyaltyResult<Vec<TierDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT tier, sort_order, min_points_required, min_total_spent,
                    min_orders_count, points_multiplier, benefits_json
             FROM loyalty_tier ORDER BY sort_order ASC",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    TierDefinition {
                        tier: row.get(0)?,
                        sort_order: row.get(1)?,
                        min_points_required: row.get(2)?,
                        min_total_spent: row.get(3)?,
                        min_orders_count: row.get(4)?,
                        points_multiplier: row.get(5)?,
                        benefits: Vec::new(),
                    },
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(mut tier, benefits_json)| -> LoyaltyResult<TierDefinition> {
                tier.benefits = serde_json::from_str(&benefits_json)?;
                Ok(tier)
            })
            .collect()
    }

    // ── Campaigns ─────────────────────────────────────────────────

    pub fn insert_campaign(&self, c: &Campaign) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO campaign (
                campaign_id, name, campaign_type, start_at, end_at, points_multiplier,
                applicable_categories_json, applicable_tiers_json, min_order_amount,
                max_redemptions_per_user, total_budget, used_budget, group_goal_target,
                group_goal_current, group_goal_reward, priority, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                c.campaign_id,
                c.name,
                c.campaign_type.as_str(),
                to_millis(c.start_at),
                to_millis(c.end_at),
                c.points_multiplier,
                serde_json::to_string(&c.applicable_categories)?,
                serde_json::to_string(&c.applicable_tiers)?,
                c.min_order_amount,
                c.max_redemptions_per_user,
                c.total_budget,
                c.used_budget,
                c.group_goal_target,
                c.group_goal_current,
                c.group_goal_reward,
                c.priority,
                bool_to_int(c.is_active),
            ],
        )?;
        Ok(())
    }

    pub fn get_campaign(&self, campaign_id: &str) -> LoyaltyResult<Option<Campaign>> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaign WHERE campaign_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![campaign_id], campaign_row)
            .optional()?;
        row.map(CampaignRow::decode).transpose()
    }

    /// Active campaigns whose window contains `at_ms`.
    pub fn live_campaigns(&self, at_ms: i64) -> LoyaltyResult<Vec<Campaign>> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaign
             WHERE is_active = 1 AND start_at <= ?1 AND end_at >= ?1
             ORDER BY campaign_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![at_ms], campaign_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(CampaignRow::decode).collect()
    }

    pub fn set_campaign_active(&self, campaign_id: &str, active: bool) -> LoyaltyResult<bool> {
        let n = self.conn.execute(
            "UPDATE campaign SET is_active = ?1 WHERE campaign_id = ?2",
            params![bool_to_int(active), campaign_id],
        )?;
        Ok(n > 0)
    }

    // ── Rewards ───────────────────────────────────────────────────

    pub fn insert_reward(&self, r: &LoyaltyReward) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO loyalty_reward (reward_id, name, points_required, category, stock, min_tier, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                r.reward_id,
                r.name,
                r.points_required,
                r.category,
                r.stock,
                r.min_tier,
                bool_to_int(r.is_active),
            ],
        )?;
        Ok(())
    }

    pub fn get_reward(&self, reward_id: &str) -> LoyaltyResult<Option<LoyaltyReward>> {
        let reward = self
            .conn
            .query_row(
                "SELECT reward_id, name, points_required, category, stock, min_tier, is_active
                 FROM loyalty_reward WHERE reward_id = ?1",
                params![reward_id],
                reward_from_row,
            )
            .optional()?;
        Ok(reward)
    }

    pub fn active_rewards(&self) -> LoyaltyResult<Vec<LoyaltyReward>> {
        let mut stmt = self.conn.prepare(
            "SELECT reward_id, name, points_required, category, stock, min_tier, is_active
             FROM loyalty_reward WHERE is_active = 1
             ORDER BY points_required ASC, reward_id ASC",
        )?;
        let rows = stmt.query_map([], reward_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_reward_active(&self, reward_id: &str, active: bool) -> LoyaltyResult<bool> {
        let n = self.conn.execute(
            "UPDATE loyalty_reward SET is_active = ?1 WHERE reward_id = ?2",
            params![bool_to_int(active), reward_id],
        )?;
        Ok(n > 0)
    }

    /// Take one unit of stock from an active reward. Unlimited stock is left
    /// at -1. `false` when the reward is inactive or sold out.
    pub fn take_reward_stock(&self, reward_id: &str) -> LoyaltyResult<bool> {
        let n = self.conn.execute(
            "UPDATE loyalty_reward
             SET stock = CASE WHEN stock = -1 THEN -1 ELSE stock - 1 END
             WHERE reward_id = ?1 AND is_active = 1 AND (stock = -1 OR stock > 0)",
            params![reward_id],
        )?;
        Ok(n == 1)
    }

    /// Return one unit of stock. No-op for unlimited rewards.
    pub fn restock_reward(&self, reward_id: &str) -> LoyaltyResult<()> {
        self.conn.execute(
            "UPDATE loyalty_reward SET stock = stock + 1 WHERE reward_id = ?1 AND stock <> -1",
            params![reward_id],
        )?;
        Ok(())
    }
}
