use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::record::TransactionRecord;

/// Outcome of reconciling one record. Exactly one per emitted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Classification {
    /// Statement key shared by two or more statement records. Informational.
    Duplicate,
    /// Ledger record consumed a statement record with the same date.
    MatchedExact,
    /// Ledger record consumed a statement record dated `target`.
    MatchedShifted { target: NaiveDate },
    /// Ledger record inside the statement span with no statement counterpart.
    LedgerOnly,
    /// Statement record left unconsumed after all ledger records were scanned.
    StatementOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Notice,
    Attention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Statement,
    Ledger,
}

impl Classification {
    pub fn label(&self) -> String {
        match self {
            Classification::Duplicate => "DUPLICATE".to_string(),
            Classification::MatchedExact => "MATCHED".to_string(),
            Classification::MatchedShifted { target } => format!("\u{2192} {target}"),
            Classification::LedgerOnly => "LEDGER".to_string(),
            Classification::StatementOnly => "EXPORT".to_string(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Classification::Duplicate
            | Classification::MatchedExact
            | Classification::MatchedShifted { .. } => Severity::Info,
            Classification::LedgerOnly => Severity::Notice,
            Classification::StatementOnly => Severity::Attention,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(
            self,
            Classification::MatchedExact | Classification::MatchedShifted { .. }
        )
    }
}

/// One line of a reconciliation report.
///
/// For matches `record` is the ledger side and `counterpart` the statement
/// record it consumed; every other classification has no counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub record: TransactionRecord,
    pub source: Source,
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<TransactionRecord>,
}

impl ClassifiedRecord {
    pub fn statement(record: TransactionRecord, classification: Classification) -> Self {
        ClassifiedRecord {
            record,
            source: Source::Statement,
            classification,
            counterpart: None,
        }
    }

    pub fn ledger(record: TransactionRecord, classification: Classification) -> Self {
        ClassifiedRecord {
            record,
            source: Source::Ledger,
            classification,
            counterpart: None,
        }
    }

    pub fn matched(ledger: TransactionRecord, statement: TransactionRecord) -> Self {
        let classification = if ledger.date == statement.date {
            Classification::MatchedExact
        } else {
            Classification::MatchedShifted { target: statement.date }
        };
        ClassifiedRecord {
            record: ledger,
            source: Source::Ledger,
            classification,
            counterpart: Some(statement),
        }
    }

    /// Display order: date, amount as rendered, currency, description, then label.
    pub fn display_cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.record, &other.record);
        a.date
            .cmp(&b.date)
            .then_with(|| a.amount.key().cmp(&b.amount.key()))
            .then_with(|| a.currency.cmp(&b.currency))
            .then_with(|| a.description.cmp(&b.description))
            .then_with(|| self.classification.label().cmp(&other.classification.label()))
    }
}

pub fn sort_for_display(entries: &mut [ClassifiedRecord]) {
    entries.sort_by(|a, b| a.display_cmp(b));
}
