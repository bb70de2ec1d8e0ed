use super::LoyaltyStore;
use crate::{
    error::LoyaltyResult,
    types::{to_millis, EntityId, Points},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl LoyaltyStore {
    // ── Per-user caps ─────────────────────────────────────────────

    pub fn campaign_usage_count(&self, campaign_id: &str, user_id: &str) -> LoyaltyResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM campaign_usage WHERE campaign_id = ?1 AND user_id = ?2",
            params![campaign_id, user_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn insert_campaign_usage(
        &self,
        campaign_id: &str,
        user_id: &str,
        order_id: Option<&str>,
        points: Points,
        at: DateTime<Utc>,
    ) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO campaign_usage (campaign_id, user_id, order_id, points, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![campaign_id, user_id, order_id, points, to_millis(at)],
        )?;
        Ok(())
    }

    // ── Shared budget ─────────────────────────────────────────────

    /// Add `points` to `used_budget` only while it stays within
    /// `total_budget`. Returns the new `used_budget`, or `None` when the
    /// guard failed.
    pub fn consume_campaign_budget(&self, campaign_id: &str, points: Points) -> LoyaltyResult<Option<Points>> {
        let used = self
            .conn
            .query_row(
                "UPDATE campaign
                 SET used_budget = used_budget + ?1
                 WHERE campaign_id = ?2
                   AND (total_budget IS NULL OR used_budget + ?1 <= total_budget)
                 RETURNING used_budget",
                params![points, campaign_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(used)
    }

    // ── Group goals ───────────────────────────────────────────────

    /// Atomically bump the goal counter. Returns `(before, after)`.
    pub fn increment_group_goal(&self, campaign_id: &str, by: i64) -> LoyaltyResult<(i64, i64)> {
        let after: i64 = self.conn.query_row(
            "UPDATE campaign
             SET group_goal_current = group_goal_current + ?1
             WHERE campaign_id = ?2
             RETURNING group_goal_current",
            params![by, campaign_id],
            |row| row.get(0),
        )?;
        Ok((after - by, after))
    }

    /// Register a participant. Re-joining is a no-op.
    pub fn add_campaign_participant(
        &self,
        campaign_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO campaign_participant (campaign_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![campaign_id, user_id, to_millis(at)],
        )?;
        Ok(())
    }

    pub fn unrewarded_participants(&self, campaign_id: &str) -> LoyaltyResult<Vec<EntityId>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM campaign_participant
             WHERE campaign_id = ?1 AND rewarded = 0
             ORDER BY joined_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![campaign_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Flip the participant's reward marker. `false` when already rewarded,
    /// which makes the fan-out safe to retry.
    pub fn mark_participant_rewarded(
        &self,
        campaign_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> LoyaltyResult<bool> {
        let n = self.conn.execute(
            "UPDATE campaign_participant SET rewarded = 1, rewarded_at = ?1
             WHERE campaign_id = ?2 AND user_id = ?3 AND rewarded = 0",
            params![to_millis(at), campaign_id, user_id],
        )?;
        Ok(n == 1)
    }

    pub fn participant_count(&self, campaign_id: &str) -> LoyaltyResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM campaign_participant WHERE campaign_id = ?1",
            params![campaign_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
