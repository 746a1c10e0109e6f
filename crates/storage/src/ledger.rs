use chrono::{NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tally_core::{DateRange, GlobPattern, Money, TransactionRecord, ValidatedTransaction};
use uuid::Uuid;

use crate::db::{open_pool, Backend, DbPool, LedgerLocation, StorageError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Post time written for new transactions; GnuCash uses it to keep the date
/// stable across time zones.
const POST_TIME: &str = "10:59:00";
const SPLIT_DENOM: i64 = 100;

/// Calendar day of `t.post_date` as `YYYYMMDD`, for either timestamp layout and
/// either backend.
const POST_DAY: &str =
    "substr(replace(replace(CAST(t.post_date AS TEXT), '-', ''), ' ', ''), 1, 8)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAccount {
    pub guid: String,
    /// Colon-separated path from the root, root excluded.
    pub fullname: String,
}

/// A GnuCash book stored in SQLite or PostgreSQL.
pub struct Book {
    pool: DbPool,
    backend: Backend,
    writable: bool,
}

impl Book {
    pub async fn open(location: &LedgerLocation, writable: bool) -> Result<Book, StorageError> {
        let pool = open_pool(location, writable).await?;
        Ok(Book {
            pool,
            backend: location.backend(),
            writable,
        })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Every account under the book's root, sorted by full name.
    pub async fn accounts(&self) -> Result<Vec<LedgerAccount>, StorageError> {
        let root: String = sqlx::query_scalar("SELECT root_account_guid FROM books LIMIT 1")
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::MissingRoot)?;

        let rows = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT guid, name, parent_guid FROM accounts",
        )
        .fetch_all(&self.pool)
        .await?;

        let nodes: HashMap<&str, (&str, Option<&str>)> = rows
            .iter()
            .map(|(guid, name, parent)| (guid.as_str(), (name.as_str(), parent.as_deref())))
            .collect();

        let mut accounts: Vec<LedgerAccount> = rows
            .iter()
            .filter(|(guid, _, _)| *guid != root)
            .filter_map(|(guid, _, _)| {
                fullname(&nodes, guid, &root).map(|fullname| LedgerAccount {
                    guid: guid.clone(),
                    fullname,
                })
            })
            .collect();
        accounts.sort_by(|a, b| a.fullname.cmp(&b.fullname));
        Ok(accounts)
    }

    pub async fn matching(&self, pattern: &GlobPattern) -> Result<Vec<LedgerAccount>, StorageError> {
        Ok(self
            .accounts()
            .await?
            .into_iter()
            .filter(|a| pattern.matches(&a.fullname))
            .collect())
    }

    /// Ledger entries posted to any account matching `pattern` within `range`.
    /// Amounts are split quantities, currencies the transaction currency. Each
    /// account's entries are ordered by post date, newest first. Splits whose
    /// transaction has no readable post date are skipped.
    pub async fn fetch(
        &self,
        pattern: &GlobPattern,
        range: DateRange,
    ) -> Result<Vec<TransactionRecord>, StorageError> {
        let accounts = self.matching(pattern).await?;
        tracing::debug!(%pattern, accounts = accounts.len(), %range, "fetching ledger entries");

        let query = format!(
            r#"
            SELECT s.guid, CAST(t.post_date AS TEXT), s.quantity_num, s.quantity_denom,
                   c.mnemonic, t.description
            FROM splits s
            JOIN transactions t ON s.tx_guid = t.guid
            JOIN commodities c ON t.currency_guid = c.guid
            WHERE s.account_guid = $1 AND {POST_DAY} BETWEEN $2 AND $3
            ORDER BY s.guid
            "#
        );
        let from = range.start.format("%Y%m%d").to_string();
        let to = range.end.format("%Y%m%d").to_string();

        let mut records = Vec::new();
        for account in &accounts {
            let rows = sqlx::query_as::<_, (String, Option<String>, i64, i64, String, Option<String>)>(
                &query,
            )
            .bind(&account.guid)
            .bind(&from)
            .bind(&to)
            .fetch_all(&self.pool)
            .await?;

            let mut entries = Vec::with_capacity(rows.len());
            for (guid, post_date, num, denom, currency, description) in rows {
                let Some(date) = post_date.as_deref().and_then(parse_post_date) else {
                    tracing::warn!(
                        split = %guid,
                        post_date = ?post_date,
                        "skipping split with unreadable post date"
                    );
                    continue;
                };
                let amount = Decimal::from(num)
                    .checked_div(Decimal::from(denom))
                    .ok_or_else(|| StorageError::InvalidSplit {
                        guid: guid.clone(),
                        reason: format!("quantity {num}/{denom}"),
                    })?;
                entries.push(TransactionRecord::new(
                    date,
                    Money::new(amount),
                    currency,
                    description.unwrap_or_default(),
                ));
            }
            entries.sort_by(|a, b| b.date.cmp(&a.date));
            records.extend(entries);
        }

        Ok(records)
    }

    /// Write a balanced transaction. Account and currency names are resolved
    /// first; nothing is written unless all of them exist. The transaction row
    /// and its splits are inserted atomically.
    pub async fn commit(&self, tx: &ValidatedTransaction) -> Result<String, StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnly);
        }

        let accounts: HashMap<String, String> = self
            .accounts()
            .await?
            .into_iter()
            .map(|a| (a.fullname, a.guid))
            .collect();

        let mut legs = Vec::with_capacity(tx.splits.len());
        for split in &tx.splits {
            let account_guid = accounts
                .get(&split.account)
                .ok_or_else(|| StorageError::AccountNotFound(split.account.clone()))?;
            let value = split
                .value
                .to_cents()
                .ok_or(StorageError::AmountOutOfRange(split.value))?;
            legs.push((account_guid.as_str(), value));
        }

        let currency_guid: String = sqlx::query_scalar(
            "SELECT guid FROM commodities WHERE namespace = 'CURRENCY' AND mnemonic = $1",
        )
        .bind(&tx.currency)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::CommodityNotFound(tx.currency.clone()))?;

        let tx_guid = new_guid();
        let post_date = format!("{} {POST_TIME}", tx.post_date.format("%Y-%m-%d"));
        let enter_date = Utc::now().format(TIMESTAMP_FORMAT).to_string();

        let insert_transaction = format!(
            "INSERT INTO transactions (guid, currency_guid, num, post_date, enter_date, description) \
             VALUES ($1, $2, '', {}, {}, $5)",
            self.backend.timestamp_param(3),
            self.backend.timestamp_param(4),
        );

        let mut db_tx = self.pool.begin().await?;

        sqlx::query(&insert_transaction)
        .bind(&tx_guid)
        .bind(&currency_guid)
        .bind(&post_date)
        .bind(&enter_date)
        .bind(&tx.description)
        .execute(&mut *db_tx)
        .await?;

        for (account_guid, value) in legs {
            sqlx::query(
                r#"
                INSERT INTO splits (guid, tx_guid, account_guid, memo, action, reconcile_state,
                                    reconcile_date, value_num, value_denom, quantity_num, quantity_denom, lot_guid)
                VALUES ($1, $2, $3, '', '', 'n', NULL, $4, $5, $6, $7, NULL)
                "#,
            )
            .bind(new_guid())
            .bind(&tx_guid)
            .bind(account_guid)
            .bind(value)
            .bind(SPLIT_DENOM)
            .bind(value)
            .bind(SPLIT_DENOM)
            .execute(&mut *db_tx)
            .await?;
        }

        db_tx.commit().await?;

        tracing::info!(
            guid = %tx_guid,
            date = %tx.post_date,
            amount = %tx.balanced_total,
            currency = %tx.currency,
            "recorded transaction"
        );
        Ok(tx_guid)
    }
}

fn new_guid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Path of names from just below `root` down to `guid`. `None` for accounts
/// that hang off another root (scheduled-transaction templates) or a broken
/// parent chain.
fn fullname(nodes: &HashMap<&str, (&str, Option<&str>)>, guid: &str, root: &str) -> Option<String> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut current = guid;

    while current != root {
        if !seen.insert(current) {
            return None;
        }
        let (name, parent) = nodes.get(current)?;
        names.push(*name);
        current = (*parent)?;
    }

    names.reverse();
    Some(names.join(":"))
}

fn parse_post_date(raw: &str) -> Option<NaiveDate> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT))
        .ok()
        .map(|dt| dt.date())
}
