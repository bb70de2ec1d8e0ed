use super::LoyaltyStore;
use crate::{
    error::LoyaltyResult,
    lifecycle_subsystem::CustomerStatus,
    types::{from_millis, to_millis, Points},
    user::User,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const USER_COLUMNS: &str = "user_id, email, name, region, referral_code, points_balance,
    total_points_earned, loyalty_tier, total_spent, total_orders, last_purchase_at,
    customer_status, status_override, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let status: String = row.get(11)?;
    let override_status: Option<String> = row.get(12)?;
    Ok(User {
        user_id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        region: row.get(3)?,
        referral_code: row.get(4)?,
        points_balance: row.get(5)?,
        total_points_earned: row.get(6)?,
        loyalty_tier: row.get(7)?,
        total_spent: row.get(8)?,
        total_orders: row.get(9)?,
        last_purchase_at: row.get::<_, Option<i64>>(10)?.map(from_millis),
        customer_status: CustomerStatus::parse(&status).unwrap_or(CustomerStatus::Active),
        status_override: override_status.as_deref().and_then(CustomerStatus::parse),
        created_at: from_millis(row.get(13)?),
    })
}

impl LoyaltyStore {
    // ── User ──────────────────────────────────────────────────────

    pub fn insert_user(&self, u: &User) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO loyalty_user (
                user_id, email, name, region, referral_code, points_balance,
                total_points_earned, loyalty_tier, total_spent, total_orders,
                last_purchase_at, customer_status, status_override, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                u.user_id,
                u.email,
                u.name,
                u.region,
                u.referral_code,
                u.points_balance,
                u.total_points_earned,
                u.loyalty_tier,
                u.total_spent,
                u.total_orders,
                u.last_purchase_at.map(to_millis),
                u.customer_status.as_str(),
                u.status_override.map(|s| s.as_str()),
                to_millis(u.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> LoyaltyResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM loyalty_user WHERE user_id = ?1");
        let user = self
            .conn
            .query_row(&sql, params![user_id], user_from_row)
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> LoyaltyResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM loyalty_user WHERE email = ?1");
        let user = self
            .conn
            .query_row(&sql, params![email], user_from_row)
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_referral_code(&self, code: &str) -> LoyaltyResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM loyalty_user WHERE referral_code = ?1");
        let user = self
            .conn
            .query_row(&sql, params![code], user_from_row)
            .optional()?;
        Ok(user)
    }

    pub fn referral_code_exists(&self, code: &str) -> LoyaltyResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM loyalty_user WHERE referral_code = ?1",
            params![code],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn all_users(&self) -> LoyaltyResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM loyalty_user ORDER BY user_id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], user_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Credit spendable points; `lifetime` also raises `total_points_earned`.
    /// Returns the new balance.
    pub fn credit_points(&self, user_id: &str, points: Points, lifetime: bool) -> LoyaltyResult<Points> {
        let earned = if lifetime { points } else { 0 };
        let balance: Points = self.conn.query_row(
            "UPDATE loyalty_user
             SET points_balance = points_balance + ?1,
                 total_points_earned = total_points_earned + ?2
             WHERE user_id = ?3
             RETURNING points_balance",
            params![points, earned, user_id],
            |row| row.get(0),
        )?;
        Ok(balance)
    }

    /// Debit only if the balance covers it. `None` when the guard failed.
    pub fn debit_points_guarded(&self, user_id: &str, points: Points) -> LoyaltyResult<Option<Points>> {
        let balance = self
            .conn
            .query_row(
                "UPDATE loyalty_user
                 SET points_balance = points_balance - ?1
                 WHERE user_id = ?2 AND points_balance >= ?1
                 RETURNING points_balance",
                params![points, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance)
    }

    /// Lifetime purchase stats. A purchase also clears any admin status
    /// override and marks the member active.
    pub fn record_purchase(&self, user_id: &str, amount: f64, at: DateTime<Utc>) -> LoyaltyResult<()> {
        self.conn.execute(
            "UPDATE loyalty_user
             SET total_spent = total_spent + ?1,
                 total_orders = total_orders + 1,
                 last_purchase_at = ?2,
                 customer_status = 'active',
                 status_override = NULL
             WHERE user_id = ?3",
            params![amount, to_millis(at), user_id],
        )?;
        Ok(())
    }

    pub fn set_user_tier(&self, user_id: &str, tier: &str) -> LoyaltyResult<()> {
        self.conn.execute(
            "UPDATE loyalty_user SET loyalty_tier = ?1 WHERE user_id = ?2",
            params![tier, user_id],
        )?;
        Ok(())
    }

    pub fn set_customer_status(&self, user_id: &str, status: CustomerStatus) -> LoyaltyResult<()> {
        self.conn.execute(
            "UPDATE loyalty_user SET customer_status = ?1 WHERE user_id = ?2",
            params![status.as_str(), user_id],
        )?;
        Ok(())
    }

    pub fn set_status_override(
        &self,
        user_id: &str,
        status: Option<CustomerStatus>,
    ) -> LoyaltyResult<()> {
        self.conn.execute(
            "UPDATE loyalty_user SET status_override = ?1, customer_status = COALESCE(?1, customer_status)
             WHERE user_id = ?2",
            params![status.map(|s| s.as_str()), user_id],
        )?;
        Ok(())
    }

    pub fn customer_status_counts(&self) -> LoyaltyResult<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT customer_status, COUNT(*) FROM loyalty_user
             GROUP BY customer_status ORDER BY customer_status ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
