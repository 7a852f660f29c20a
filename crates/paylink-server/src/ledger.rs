//! Record of settled payments and the analytics events derived from them.
//!
//! A settlement that still awaits delivery is opened as `pending` and closed
//! exactly once, as `completed` or `failed`. Rows are never deleted and only
//! completed ones count towards stats.

use rusqlite::types::Value;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use paylink::{parse_amount_units, units_to_usd_cents};

use crate::db::{now_ms, Database};
use crate::error::ServerError;

pub const EVENT_TRANSACTION_COMPLETED: &str = "transaction_completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Completed,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Completed => "completed",
            SettlementStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SettlementStatus::Pending),
            "completed" => Some(SettlementStatus::Completed),
            "failed" => Some(SettlementStatus::Failed),
            _ => None,
        }
    }
}

/// What a settlement paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SettlementMemo {
    ContentAccess {
        short_id: String,
    },
    FileDownload {
        short_id: String,
        file_name: String,
    },
    ProfilePayment {
        slug: String,
        /// Amount the payer asked to send, as entered
        requested_amount: String,
    },
}

/// Analytics payload, one variant per event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TransactionCompleted {
        amount: String,
        network: String,
        payer: String,
        transaction: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::TransactionCompleted { .. } => EVENT_TRANSACTION_COMPLETED,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSettlement {
    pub payer: String,
    pub payee: String,
    /// Account that owns the paid-for resource or profile
    pub payee_account_id: Option<i64>,
    /// Display amount, e.g. `$0.50`
    pub amount: String,
    pub network: String,
    pub transaction_hash: String,
    pub resource_id: Option<i64>,
    pub profile_id: Option<i64>,
    pub memo: SettlementMemo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub id: i64,
    pub payer: String,
    pub payee: String,
    pub payee_account_id: Option<i64>,
    pub amount: String,
    pub network: String,
    pub transaction_hash: String,
    pub resource_id: Option<i64>,
    pub profile_id: Option<i64>,
    pub status: SettlementStatus,
    pub memo: SettlementMemo,
    pub created_at: i64,
    /// Why a settled payment was not delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: i64,
    pub event_type: String,
    pub account_id: Option<i64>,
    pub resource_id: Option<i64>,
    pub profile_id: Option<i64>,
    pub payload: EventPayload,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total_transactions: u64,
    /// Sum rounded to cents, e.g. `$1.60`
    pub total_amount: String,
    /// Exact sum in token units
    pub total_amount_units: String,
}

/// Which settlements a query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementFilter {
    All,
    Payer(String),
    Payee(String),
    /// Settlements whose resource or profile belongs to this account
    Account(i64),
    Resource(i64),
    Profile(i64),
}

impl SettlementFilter {
    fn clause(&self) -> (&'static str, Option<Value>) {
        match self {
            SettlementFilter::All => ("1 = 1", None),
            SettlementFilter::Payer(p) => ("payer = ?1", Some(Value::Text(p.clone()))),
            SettlementFilter::Payee(p) => ("payee = ?1", Some(Value::Text(p.clone()))),
            SettlementFilter::Account(id) => ("payee_account_id = ?1", Some(Value::Integer(*id))),
            SettlementFilter::Resource(id) => ("resource_id = ?1", Some(Value::Integer(*id))),
            SettlementFilter::Profile(id) => ("profile_id = ?1", Some(Value::Integer(*id))),
        }
    }
}

const SETTLEMENT_COLUMNS: &str = "id, payer, payee, payee_account_id, amount, network, \
     transaction_hash, resource_id, profile_id, status, memo, created_at, failure_reason";

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn settlement_from_row(row: &Row<'_>) -> rusqlite::Result<Settlement> {
    let status: String = row.get(9)?;
    Ok(Settlement {
        id: row.get(0)?,
        payer: row.get(1)?,
        payee: row.get(2)?,
        payee_account_id: row.get(3)?,
        amount: row.get(4)?,
        network: row.get(5)?,
        transaction_hash: row.get(6)?,
        resource_id: row.get(7)?,
        profile_id: row.get(8)?,
        status: SettlementStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(9, "status".to_string(), rusqlite::types::Type::Text)
        })?,
        memo: json_column(row, 10)?,
        created_at: row.get(11)?,
        failure_reason: row.get(12)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AnalyticsEvent> {
    Ok(AnalyticsEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        account_id: row.get(2)?,
        resource_id: row.get(3)?,
        profile_id: row.get(4)?,
        payload: json_column(row, 5)?,
        created_at: row.get(6)?,
    })
}

#[derive(Clone)]
pub struct SettlementLedger {
    db: Database,
    token_decimals: u32,
}

impl SettlementLedger {
    pub fn new(db: Database, token_decimals: u32) -> Self {
        Self { db, token_decimals }
    }

    /// Open a settlement for a payment the facilitator has settled but whose
    /// delivery is not decided yet. The transaction hash is UNIQUE, so a
    /// replayed settlement is a `Conflict` here, before anything is admitted.
    pub fn reserve(&self, new: &NewSettlement) -> Result<Settlement, ServerError> {
        let memo = encode_memo(&new.memo)?;
        let now = now_ms();
        self.db.with_connection(|conn| {
            let id = insert_settlement(conn, new, &memo, SettlementStatus::Pending, now)?;
            Ok(settlement_from_new(id, new, SettlementStatus::Pending, now))
        })
    }

    /// Close a pending settlement as delivered and append its
    /// `transaction_completed` event in the same transaction.
    pub fn complete(&self, pending: &Settlement) -> Result<Settlement, ServerError> {
        let settlement = Settlement {
            status: SettlementStatus::Completed,
            ..pending.clone()
        };
        self.db.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;
            close_pending(&tx, settlement.id, SettlementStatus::Completed, None)?;
            append_event(&tx, &settlement, now_ms())?;
            tx.commit()?;
            Ok(())
        })?;
        closed(&settlement);
        Ok(settlement)
    }

    /// Close a pending settlement as paid but not delivered. The row stays
    /// listed with its reason and is left out of stats.
    pub fn fail(&self, pending: &Settlement, reason: &str) -> Result<Settlement, ServerError> {
        self.db.with_connection(|conn| {
            close_pending(conn, pending.id, SettlementStatus::Failed, Some(reason))
        })?;
        let settlement = Settlement {
            status: SettlementStatus::Failed,
            failure_reason: Some(reason.to_string()),
            ..pending.clone()
        };
        closed(&settlement);
        Ok(settlement)
    }

    /// Append a completed settlement and its `transaction_completed` event
    /// in one transaction, for payments with nothing left to admit. A
    /// transaction hash already on the ledger is a `Conflict` and leaves
    /// nothing behind.
    pub fn record(&self, new: &NewSettlement) -> Result<Settlement, ServerError> {
        let memo = encode_memo(&new.memo)?;
        let now = now_ms();
        let settlement = self.db.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;
            let id = insert_settlement(&tx, new, &memo, SettlementStatus::Completed, now)?;
            let settlement = settlement_from_new(id, new, SettlementStatus::Completed, now);
            append_event(&tx, &settlement, now)?;
            tx.commit()?;
            Ok(settlement)
        })?;
        closed(&settlement);
        Ok(settlement)
    }

    /// Settlements matching `filter`, newest first. `limit` is clamped to 1..=500.
    pub fn list(&self, filter: &SettlementFilter, limit: u32) -> Result<Vec<Settlement>, ServerError> {
        let limit = limit.clamp(1, 500);
        let (clause, value) = filter.clause();
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE {clause}
                 ORDER BY created_at DESC, id DESC LIMIT {limit}"
            ))?;
            let rows = match &value {
                Some(v) => stmt
                    .query_map(params![v], settlement_from_row)?
                    .collect::<Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map([], settlement_from_row)?
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
    }

    /// Count and sum of completed settlements matching `filter`. Amounts are
    /// parsed as decimal currency with or without a leading `$`; a stored
    /// amount that does not parse is logged and left out of the sum.
    pub fn stats(&self, filter: &SettlementFilter) -> Result<LedgerStats, ServerError> {
        let (clause, value) = filter.clause();
        let amounts: Vec<String> = self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT amount FROM settlements WHERE {clause} AND status = 'completed'"
            ))?;
            let rows = match &value {
                Some(v) => stmt
                    .query_map(params![v], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })?;

        let mut total: u128 = 0;
        for amount in &amounts {
            match parse_amount_units(amount, self.token_decimals) {
                Ok(units) => total = total.saturating_add(units),
                Err(e) => tracing::warn!(amount = %amount, "skipping unparseable amount: {e}"),
            }
        }

        Ok(LedgerStats {
            total_transactions: amounts.len() as u64,
            total_amount: units_to_usd_cents(total, self.token_decimals),
            total_amount_units: total.to_string(),
        })
    }

    /// Analytics events, newest first, optionally of one type.
    pub fn list_events(
        &self,
        event_type: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AnalyticsEvent>, ServerError> {
        let limit = limit.clamp(1, 500);
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_type, account_id, resource_id, profile_id, payload, created_at
                 FROM analytics_events
                 WHERE ?1 IS NULL OR event_type = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let events = stmt
                .query_map(params![event_type, limit], event_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
    }
}

fn encode_memo(memo: &SettlementMemo) -> Result<String, ServerError> {
    serde_json::to_string(memo)
        .map_err(|e| ServerError::Internal(format!("failed to encode memo: {e}")))
}

fn completed_event(settlement: &Settlement) -> EventPayload {
    EventPayload::TransactionCompleted {
        amount: settlement.amount.clone(),
        network: settlement.network.clone(),
        payer: settlement.payer.clone(),
        transaction: settlement.transaction_hash.clone(),
    }
}

fn settlement_from_new(id: i64, new: &NewSettlement, status: SettlementStatus, now: i64) -> Settlement {
    Settlement {
        id,
        payer: new.payer.clone(),
        payee: new.payee.clone(),
        payee_account_id: new.payee_account_id,
        amount: new.amount.clone(),
        network: new.network.clone(),
        transaction_hash: new.transaction_hash.clone(),
        resource_id: new.resource_id,
        profile_id: new.profile_id,
        status,
        memo: new.memo.clone(),
        created_at: now,
        failure_reason: None,
    }
}

fn insert_settlement(
    conn: &Connection,
    new: &NewSettlement,
    memo: &str,
    status: SettlementStatus,
    now: i64,
) -> Result<i64, ServerError> {
    conn.execute(
        r#"
        INSERT INTO settlements (
            payer, payee, payee_account_id, amount, network, transaction_hash,
            resource_id, profile_id, status, memo, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            new.payer,
            new.payee,
            new.payee_account_id,
            new.amount,
            new.network,
            new.transaction_hash,
            new.resource_id,
            new.profile_id,
            status.as_str(),
            memo,
            now
        ],
    )
    .map_err(|e| match ServerError::from(e) {
        ServerError::Conflict(_) => ServerError::Conflict("Settlement already recorded".to_string()),
        other => other,
    })?;
    Ok(conn.last_insert_rowid())
}

/// Move a pending row to its final status. Closing twice is a `Conflict`.
fn close_pending(
    conn: &Connection,
    id: i64,
    status: SettlementStatus,
    reason: Option<&str>,
) -> Result<(), ServerError> {
    let rows = conn.execute(
        "UPDATE settlements SET status = ?1, failure_reason = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![status.as_str(), reason, id],
    )?;
    if rows == 0 {
        return Err(ServerError::Conflict("Settlement is no longer pending".to_string()));
    }
    Ok(())
}

fn append_event(conn: &Connection, settlement: &Settlement, now: i64) -> Result<(), ServerError> {
    let event = completed_event(settlement);
    let payload = serde_json::to_string(&event)
        .map_err(|e| ServerError::Internal(format!("failed to encode event: {e}")))?;
    conn.execute(
        r#"
        INSERT INTO analytics_events (event_type, account_id, resource_id, profile_id, payload, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            event.event_type(),
            settlement.payee_account_id,
            settlement.resource_id,
            settlement.profile_id,
            payload,
            now
        ],
    )?;
    Ok(())
}

fn closed(settlement: &Settlement) {
    crate::metrics::SETTLEMENTS_RECORDED
        .with_label_values(&[settlement.status.as_str()])
        .inc();
    match settlement.status {
        SettlementStatus::Failed => tracing::warn!(
            payer = %settlement.payer,
            amount = %settlement.amount,
            transaction = %settlement.transaction_hash,
            reason = settlement.failure_reason.as_deref().unwrap_or("unknown"),
            "settled payment recorded as undelivered"
        ),
        _ => tracing::info!(
            payer = %settlement.payer,
            amount = %settlement.amount,
            transaction = %settlement.transaction_hash,
            "settlement recorded"
        ),
    }
}
