use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::account_for_currency;
use crate::classification::{Classification, ClassifiedRecord};
use crate::money::Money;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Unbalanced transaction: splits sum to {0}")]
    Unbalanced(Money),
    #[error("Transaction must have at least two splits")]
    TooFewSplits,
}

/// One leg of a double-entry transaction. Positive values debit the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub account: String,
    pub value: Money,
}

impl Split {
    pub fn new(account: impl Into<String>, value: Money) -> Self {
        Split {
            account: account.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnvalidatedTransaction {
    pub currency: String,
    pub description: String,
    pub post_date: NaiveDate,
    pub splits: Vec<Split>,
}

impl UnvalidatedTransaction {
    pub fn total(&self) -> Money {
        self.splits
            .iter()
            .map(|s| s.value)
            .fold(Money::zero(), |a, b| a + b)
    }

    pub fn total_debits(&self) -> Money {
        self.splits
            .iter()
            .map(|s| s.value)
            .filter(|v| !v.is_negative())
            .fold(Money::zero(), |a, b| a + b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedTransaction {
    pub currency: String,
    pub description: String,
    pub post_date: NaiveDate,
    pub splits: Vec<Split>,
    pub balanced_total: Money,
}

impl ValidatedTransaction {
    pub fn validate(tx: UnvalidatedTransaction) -> Result<ValidatedTransaction, TransactionError> {
        if tx.splits.len() < 2 {
            return Err(TransactionError::TooFewSplits);
        }

        let total = tx.total();
        if !total.is_zero() {
            return Err(TransactionError::Unbalanced(total));
        }

        let balanced_total = tx.total_debits();
        Ok(ValidatedTransaction {
            currency: tx.currency,
            description: tx.description,
            post_date: tx.post_date,
            splits: tx.splits,
            balanced_total,
        })
    }
}

/// Ledger transactions that would record every statement-only entry.
///
/// `source` and `target` are account templates; `*` is replaced by the entry's
/// currency. The source account receives the statement amount, the target its
/// negation. Entries are planned in the order given.
pub fn plan_imports<'a, I>(entries: I, source: &str, target: &str) -> Vec<UnvalidatedTransaction>
where
    I: IntoIterator<Item = &'a ClassifiedRecord>,
{
    entries
        .into_iter()
        .filter(|e| e.classification == Classification::StatementOnly)
        .map(|e| {
            let r = &e.record;
            let amount = Money::new(r.amount.rounded());
            UnvalidatedTransaction {
                currency: r.currency.clone(),
                description: r.description.clone(),
                post_date: r.date,
                splits: vec![
                    Split::new(account_for_currency(source, &r.currency), amount),
                    Split::new(account_for_currency(target, &r.currency), -amount),
                ],
            }
        })
        .collect()
}
