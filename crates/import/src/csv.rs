use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tally_core::{Money, TransactionRecord};

use crate::format::ParseError;
use crate::util::transliterate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountColumn {
    pub column: usize,
    /// Use this column only when the given column is non-blank.
    #[serde(default)]
    pub when_present: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CurrencySource {
    Fixed(String),
    Column(usize),
    /// Letters trailing the amount, as in `-12,50PLN`.
    AmountSuffix,
}

/// Column layout of a delimited statement export.
///
/// Rows that do not have the configured width, or whose date column (and guard
/// column, when set) does not start with a date, are treated as headers or
/// footers and skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelimitedProfile {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub columns: Option<usize>,
    #[serde(default)]
    pub min_columns: Option<usize>,
    pub date_column: usize,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Second column that must also start with a date for the row to count.
    #[serde(default)]
    pub date_guard_column: Option<usize>,
    pub amount_columns: Vec<AmountColumn>,
    pub currency: CurrencySource,
    pub description_columns: Vec<usize>,
}

fn default_delimiter() -> char {
    ','
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

impl DelimitedProfile {
    fn accepts_width(&self, width: usize) -> bool {
        self.columns.map_or(true, |n| width == n) && self.min_columns.map_or(true, |n| width >= n)
    }

    fn amount_column(&self, row: &csv::StringRecord) -> Option<usize> {
        self.amount_columns
            .iter()
            .find(|c| match c.when_present {
                Some(col) => row.get(col).is_some_and(|v| !v.trim().is_empty()),
                None => true,
            })
            .map(|c| c.column)
    }
}

pub fn read_delimited(
    text: &str,
    profile: &DelimitedProfile,
) -> Result<Vec<TransactionRecord>, ParseError> {
    let delimiter = u8::try_from(profile.delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or(ParseError::InvalidDelimiter(profile.delimiter))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();

    for result in reader.records() {
        let row = result?;
        let line = row.position().map_or(0, |p| p.line());

        if !profile.accepts_width(row.len()) {
            continue;
        }
        let Some(date) = row
            .get(profile.date_column)
            .and_then(|f| parse_date_prefix(f, &profile.date_format))
        else {
            continue;
        };
        if let Some(guard) = profile.date_guard_column {
            let guarded = row
                .get(guard)
                .and_then(|f| parse_date_prefix(f, &profile.date_format))
                .is_some();
            if !guarded {
                continue;
            }
        }

        let column = profile
            .amount_column(&row)
            .ok_or(ParseError::MissingColumn { line, column: 0 })?;
        let raw = row
            .get(column)
            .ok_or(ParseError::MissingColumn { line, column })?;
        let (amount, suffix) = parse_amount(raw).ok_or_else(|| ParseError::InvalidAmount {
            line,
            value: raw.to_string(),
        })?;

        let currency = match &profile.currency {
            CurrencySource::Fixed(code) => code.clone(),
            CurrencySource::Column(col) => row
                .get(*col)
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or(ParseError::MissingCurrency { line })?
                .to_string(),
            CurrencySource::AmountSuffix => suffix.ok_or(ParseError::MissingCurrency { line })?,
        };

        let description = profile
            .description_columns
            .iter()
            .filter_map(|&col| row.get(col))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        records.push(TransactionRecord::new(
            date,
            Money::new(amount),
            currency,
            transliterate(&description),
        ));
    }

    Ok(records)
}

/// Date at the start of `s`; any remainder (a time of day, say) is ignored.
pub(crate) fn parse_date_prefix(s: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_and_remainder(s.trim(), format)
        .ok()
        .map(|(date, _)| date)
}

/// Parse a bank-formatted amount into an exact decimal plus any trailing
/// currency letters. Accepts decimal commas, space, point or comma thousand
/// separators and accounting parentheses. When both a point and a comma
/// appear, the last one is the decimal separator.
pub(crate) fn parse_amount(s: &str) -> Option<(Decimal, Option<String>)> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();

    let number = compact.trim_end_matches(|c: char| c.is_alphabetic());
    let suffix = &compact[number.len()..];
    let suffix = (!suffix.is_empty()).then(|| suffix.to_uppercase());

    let (negative, number) = match number.strip_prefix('(').and_then(|n| n.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, number),
    };
    let number = number.strip_prefix('+').unwrap_or(number);

    let number = normalize_separators(number)?;
    let value = Decimal::from_str(&number).ok()?;
    Some((if negative { -value } else { value }, suffix))
}

fn normalize_separators(number: &str) -> Option<String> {
    let (Some(point), Some(comma)) = (number.rfind('.'), number.rfind(',')) else {
        if number.matches(',').count() > 1 {
            return None;
        }
        return Some(number.replace(',', "."));
    };

    let (decimal, grouping) = if comma > point { (',', '.') } else { ('.', ',') };
    if number.matches(decimal).count() > 1 {
        return None;
    }
    Some(number.replace(grouping, "").replace(decimal, "."))
}
