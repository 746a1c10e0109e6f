use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;
use crate::period::shift_date;

/// A normalized `(date, amount, currency, description)` tuple, produced either by
/// a statement reader or by a ledger query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub date: NaiveDate,
    pub amount: Money,
    pub currency: String,
    pub description: String,
}

impl TransactionRecord {
    pub fn new(
        date: NaiveDate,
        amount: Money,
        currency: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        TransactionRecord {
            date,
            amount,
            currency: currency.into(),
            description: description.into(),
        }
    }

    pub fn key(&self) -> MatchKey {
        MatchKey {
            date: self.date,
            amount: self.amount.key(),
            currency: self.currency.clone(),
        }
    }

    /// The key this record would have if it were dated `offset` days later.
    pub fn shifted_key(&self, offset: i64) -> Option<MatchKey> {
        Some(MatchKey {
            date: shift_date(self.date, offset)?,
            amount: self.amount.key(),
            currency: self.currency.clone(),
        })
    }
}

/// Probe key for candidate matches. Several records may share one key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchKey {
    pub date: NaiveDate,
    pub amount: String,
    pub currency: String,
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.date, self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn record(date: (i32, u32, u32), amount: &str, currency: &str) -> TransactionRecord {
        TransactionRecord::new(
            NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            Money::new(Decimal::from_str(amount).unwrap()),
            currency,
            "test",
        )
    }

    #[test]
    fn key_uses_rounded_amount() {
        let a = record((2024, 1, 5), "10", "PLN");
        let b = record((2024, 1, 5), "10.001", "PLN");
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().amount, "10.00");
    }

    #[test]
    fn currency_is_part_of_the_key() {
        let a = record((2024, 1, 5), "10.00", "PLN");
        let b = record((2024, 1, 5), "10.00", "EUR");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn shifted_key_moves_only_the_date() {
        let r = record((2024, 3, 2), "100.00", "PLN");
        let shifted = r.shifted_key(-1).unwrap();
        assert_eq!(shifted.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(shifted.amount, "100.00");
        assert_eq!(shifted.currency, "PLN");
    }

    #[test]
    fn key_display() {
        assert_eq!(record((2024, 1, 5), "-3.5", "USD").key().to_string(), "2024-01-05 -3.50 USD");
    }
}
