use super::{bool_to_int, LoyaltyStore};
use crate::{
    error::LoyaltyResult,
    fraud_detection_subsystem::ValidationSignals,
    referral_subsystem::{ReferralStatus, ReferralTransaction},
    types::{from_millis, to_millis, EntityId, Points, MILLIS_PER_HOUR, MILLIS_PER_MINUTE},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

/// One persisted fraud evaluation.
#[derive(Debug, Clone)]
pub struct FraudLogRow {
    pub id: Option<i64>,
    pub action_type: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub code: Option<String>,
    pub email: Option<String>,
    pub country: Option<String>,
    pub user_id: Option<EntityId>,
    pub risk_score: u32,
    pub blocked: bool,
    pub signals_json: String,
    pub created_at: DateTime<Utc>,
}

const REFERRAL_COLUMNS: &str = "referral_id, referrer_id, referred_id, code, status,
    points_awarded, created_at, expires_at, completed_at";

fn referral_row(row: &Row<'_>) -> rusqlite::Result<(ReferralTransaction, String)> {
    Ok((
        ReferralTransaction {
            referral_id: row.get(0)?,
            referrer_id: row.get(1)?,
            referred_id: row.get(2)?,
            code: row.get(3)?,
            status: ReferralStatus::Pending,
            points_awarded: row.get(5)?,
            created_at: from_millis(row.get(6)?),
            expires_at: from_millis(row.get(7)?),
            completed_at: row.get::<_, Option<i64>>(8)?.map(from_millis),
        },
        row.get(4)?,
    ))
}

fn decode((mut r, status): (ReferralTransaction, String)) -> LoyaltyResult<ReferralTransaction> {
    r.status = ReferralStatus::parse(&status).ok_or_else(|| {
        anyhow::anyhow!("referral '{}' has unknown status '{}'", r.referral_id, status)
    })?;
    Ok(r)
}

impl LoyaltyStore {
    // ── Referral transactions ─────────────────────────────────────

    pub fn insert_referral(&self, r: &ReferralTransaction) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO referral_transaction (
                referral_id, referrer_id, referred_id, code, status,
                points_awarded, created_at, expires_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                r.referral_id,
                r.referrer_id,
                r.referred_id,
                r.code,
                r.status.as_str(),
                r.points_awarded,
                to_millis(r.created_at),
                to_millis(r.expires_at),
                r.completed_at.map(to_millis),
            ],
        )?;
        Ok(())
    }

    /// The referral that brought `referred_id` in, if any.
    pub fn referral_for_referred(&self, referred_id: &str) -> LoyaltyResult<Option<ReferralTransaction>> {
        let sql = format!("SELECT {REFERRAL_COLUMNS} FROM referral_transaction WHERE referred_id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![referred_id], referral_row)
            .optional()?;
        raw.map(decode).transpose()
    }

    pub fn referrals_by_referrer(&self, referrer_id: &str) -> LoyaltyResult<Vec<ReferralTransaction>> {
        let sql = format!(
            "SELECT {REFERRAL_COLUMNS} FROM referral_transaction
             WHERE referrer_id = ?1 ORDER BY created_at ASC, referral_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![referrer_id], referral_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(decode).collect()
    }

    /// Conditional status move. `false` when the row left `from` already.
    pub fn transition_referral(
        &self,
        referral_id: &str,
        from: ReferralStatus,
        to: ReferralStatus,
        points_awarded: Points,
        completed_at: Option<DateTime<Utc>>,
    ) -> LoyaltyResult<bool> {
        let n = self.conn.execute(
            "UPDATE referral_transaction
             SET status = ?1, points_awarded = points_awarded + ?2,
                 completed_at = COALESCE(?3, completed_at)
             WHERE referral_id = ?4 AND status = ?5",
            params![
                to.as_str(),
                points_awarded,
                completed_at.map(to_millis),
                referral_id,
                from.as_str(),
            ],
        )?;
        Ok(n == 1)
    }

    // ── Live fraud counters ───────────────────────────────────────

    pub fn record_referral_attempt(
        &self,
        ip: &str,
        user_agent: &str,
        code: &str,
        at: DateTime<Utc>,
    ) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO referral_attempt (ip, user_agent, code, attempted_at) VALUES (?1, ?2, ?3, ?4)",
            params![ip, user_agent, code, to_millis(at)],
        )?;
        Ok(())
    }

    pub fn referral_validation_signals(
        &self,
        ip: &str,
        user_agent: &str,
        now: DateTime<Utc>,
        distinct_codes_window_hours: i64,
    ) -> LoyaltyResult<ValidationSignals> {
        let now_ms = to_millis(now);
        let count_ip = |since: i64| -> rusqlite::Result<i64> {
            self.conn.query_row(
                "SELECT COUNT(*) FROM referral_attempt WHERE ip = ?1 AND attempted_at > ?2",
                params![ip, since],
                |row| row.get(0),
            )
        };

        let ip_attempts_last_hour = count_ip(now_ms - MILLIS_PER_HOUR)?;
        let ip_attempts_last_minute = count_ip(now_ms - MILLIS_PER_MINUTE)?;
        let ip_distinct_codes: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT code) FROM referral_attempt WHERE ip = ?1 AND attempted_at > ?2",
            params![ip, now_ms - distinct_codes_window_hours * MILLIS_PER_HOUR],
            |row| row.get(0),
        )?;
        let user_agent_attempts: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM referral_attempt WHERE user_agent = ?1 AND attempted_at > ?2",
            params![user_agent, now_ms - MILLIS_PER_HOUR],
            |row| row.get(0),
        )?;

        Ok(ValidationSignals {
            ip_attempts_last_hour,
            ip_attempts_last_minute,
            ip_distinct_codes,
            user_agent_attempts,
        })
    }

    // ── Fraud log ─────────────────────────────────────────────────

    pub fn insert_fraud_log(&self, row: &FraudLogRow) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO fraud_detection_log (
                action_type, ip, user_agent, code, email, country, user_id,
                risk_score, blocked, signals_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.action_type,
                row.ip,
                row.user_agent,
                row.code,
                row.email,
                row.country,
                row.user_id,
                row.risk_score as i64,
                bool_to_int(row.blocked),
                row.signals_json,
                to_millis(row.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn fraud_logs(&self, action_type: Option<&str>) -> LoyaltyResult<Vec<FraudLogRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, action_type, ip, user_agent, code, email, country, user_id,
                    risk_score, blocked, signals_json, created_at
             FROM fraud_detection_log
             WHERE ?1 IS NULL OR action_type = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![action_type], |row| {
            Ok(FraudLogRow {
                id: Some(row.get(0)?),
                action_type: row.get(1)?,
                ip: row.get(2)?,
                user_agent: row.get(3)?,
                code: row.get(4)?,
                email: row.get(5)?,
                country: row.get(6)?,
                user_id: row.get(7)?,
                risk_score: row.get::<_, i64>(8)? as u32,
                blocked: row.get::<_, i64>(9)? != 0,
                signals_json: row.get(10)?,
                created_at: from_millis(row.get(11)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
