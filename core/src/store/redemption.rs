use super::LoyaltyStore;
use crate::{
    error::LoyaltyResult,
    redemption_subsystem::{LoyaltyRedemption, RedemptionStatus},
    types::{from_millis, to_millis},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const REDEMPTION_COLUMNS: &str = "redemption_id, user_id, reward_id, status, points_used,
    redemption_code, created_at, approved_at, delivered_at, cancelled_at";

/// Raw row; the status column is decoded by the caller.
fn redemption_row(row: &Row<'_>) -> rusqlite::Result<(LoyaltyRedemption, String)> {
    Ok((
        LoyaltyRedemption {
            redemption_id: row.get(0)?,
            user_id: row.get(1)?,
            reward_id: row.get(2)?,
            status: RedemptionStatus::Pending,
            points_used: row.get(4)?,
            redemption_code: row.get(5)?,
            created_at: from_millis(row.get(6)?),
            approved_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
            delivered_at: row.get::<_, Option<i64>>(8)?.map(from_millis),
            cancelled_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
        },
        row.get(3)?,
    ))
}

fn decode((mut r, status): (LoyaltyRedemption, String)) -> LoyaltyResult<LoyaltyRedemption> {
    r.status = RedemptionStatus::parse(&status).ok_or_else(|| {
        anyhow::anyhow!("redemption '{}' has unknown status '{}'", r.redemption_id, status)
    })?;
    Ok(r)
}

impl LoyaltyStore {
    // ── Redemptions ───────────────────────────────────────────────

    pub fn insert_redemption(&self, r: &LoyaltyRedemption) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO loyalty_redemption (
                redemption_id, user_id, reward_id, status, points_used,
                redemption_code, created_at, approved_at, delivered_at, cancelled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                r.redemption_id,
                r.user_id,
                r.reward_id,
                r.status.as_str(),
                r.points_used,
                r.redemption_code,
                to_millis(r.created_at),
                r.approved_at.map(to_millis),
                r.delivered_at.map(to_millis),
                r.cancelled_at.map(to_millis),
            ],
        )?;
        Ok(())
    }

    pub fn redemption_code_taken(&self, code: &str) -> LoyaltyResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM loyalty_redemption WHERE redemption_code = ?1",
            params![code],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn get_redemption(&self, redemption_id: &str) -> LoyaltyResult<Option<LoyaltyRedemption>> {
        let sql = format!("SELECT {REDEMPTION_COLUMNS} FROM loyalty_redemption WHERE redemption_id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![redemption_id], redemption_row)
            .optional()?;
        raw.map(decode).transpose()
    }

    pub fn redemptions_for_user(&self, user_id: &str) -> LoyaltyResult<Vec<LoyaltyRedemption>> {
        let sql = format!(
            "SELECT {REDEMPTION_COLUMNS} FROM loyalty_redemption
             WHERE user_id = ?1 ORDER BY created_at ASC, redemption_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![user_id], redemption_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(decode).collect()
    }

    /// Move a redemption from `from` to `to`, stamping the matching
    /// timestamp column. `false` when the row is no longer in `from`.
    pub fn transition_redemption(
        &self,
        redemption_id: &str,
        from: RedemptionStatus,
        to: RedemptionStatus,
        at: DateTime<Utc>,
    ) -> LoyaltyResult<bool> {
        let column = match to {
            RedemptionStatus::Approved => "approved_at",
            RedemptionStatus::Delivered => "delivered_at",
            RedemptionStatus::Cancelled => "cancelled_at",
            RedemptionStatus::Pending => "created_at",
        };
        let sql = format!(
            "UPDATE loyalty_redemption SET status = ?1, {column} = ?2
             WHERE redemption_id = ?3 AND status = ?4"
        );
        let n = self.conn.execute(
            &sql,
            params![to.as_str(), to_millis(at), redemption_id, from.as_str()],
        )?;
        Ok(n == 1)
    }
}
