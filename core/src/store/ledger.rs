use super::LoyaltyStore;
use crate::{
    error::LoyaltyResult,
    types::{from_millis, to_millis, Points},
    user::{LoyaltyTransaction, TransactionType},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// Dedupe record for an order that has already been accrued.
#[derive(Debug, Clone)]
pub struct ProcessedOrder {
    pub order_id: String,
    pub user_id: String,
    pub points_awarded: Points,
    pub breakdown_json: String,
    pub processed_at: DateTime<Utc>,
}

impl LoyaltyStore {
    // ── Ledger ────────────────────────────────────────────────────

    pub fn insert_transaction(&self, t: &LoyaltyTransaction) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO loyalty_transaction (
                transaction_id, user_id, points_change, transaction_type,
                order_id, order_amount, description, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                t.transaction_id,
                t.user_id,
                t.points_change,
                t.transaction_type.as_str(),
                t.order_id,
                t.order_amount,
                t.description,
                to_millis(t.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn transactions_for_user(&self, user_id: &str) -> LoyaltyResult<Vec<LoyaltyTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, user_id, points_change, transaction_type,
                    order_id, order_amount, description, created_at
             FROM loyalty_transaction
             WHERE user_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let kind: String = row.get(3)?;
            Ok(LoyaltyTransaction {
                transaction_id: row.get(0)?,
                user_id: row.get(1)?,
                points_change: row.get(2)?,
                transaction_type: TransactionType::parse(&kind)
                    .unwrap_or(TransactionType::Adjustment),
                order_id: row.get(4)?,
                order_amount: row.get(5)?,
                description: row.get(6)?,
                created_at: from_millis(row.get(7)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Sum of every ledger delta for a user. Equals the balance when the
    /// ledger and the user row agree.
    pub fn ledger_sum(&self, user_id: &str) -> LoyaltyResult<Points> {
        let sum: Points = self.conn.query_row(
            "SELECT COALESCE(SUM(points_change), 0) FROM loyalty_transaction WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    // ── Accrual dedupe ────────────────────────────────────────────

    pub fn get_processed_order(&self, order_id: &str) -> LoyaltyResult<Option<ProcessedOrder>> {
        let rec = self
            .conn
            .query_row(
                "SELECT order_id, user_id, points_awarded, breakdown_json, processed_at
                 FROM processed_order WHERE order_id = ?1",
                params![order_id],
                |row| {
                    Ok(ProcessedOrder {
                        order_id: row.get(0)?,
                        user_id: row.get(1)?,
                        points_awarded: row.get(2)?,
                        breakdown_json: row.get(3)?,
                        processed_at: from_millis(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(rec)
    }

    pub fn insert_processed_order(&self, rec: &ProcessedOrder) -> LoyaltyResult<()> {
        self.conn.execute(
            "INSERT INTO processed_order (order_id, user_id, points_awarded, breakdown_json, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rec.order_id,
                rec.user_id,
                rec.points_awarded,
                rec.breakdown_json,
                to_millis(rec.processed_at),
            ],
        )?;
        Ok(())
    }
}
