use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tally_core::{Money, TransactionRecord};

use crate::csv::{parse_amount, parse_date_prefix};
use crate::format::ParseError;
use crate::util::transliterate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum XmlCurrency {
    Fixed(String),
    Field(String),
}

/// Direction of a record, for exports that carry unsigned amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRule {
    pub field: String,
    /// Value marking a credit. Anything else is a debit.
    pub credit: String,
}

/// Element layout of an XML statement export. Records are matched at any depth;
/// their fields are the direct child elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlProfile {
    pub record: String,
    pub date_field: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    pub amount_field: String,
    pub description_field: String,
    #[serde(default)]
    pub sign: Option<SignRule>,
    pub currency: XmlCurrency,
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

impl XmlProfile {
    fn build(
        &self,
        index: usize,
        fields: &HashMap<String, String>,
    ) -> Result<TransactionRecord, ParseError> {
        let field = |name: &str| {
            fields
                .get(name)
                .map(|v| v.trim())
                .ok_or_else(|| ParseError::MissingField {
                    record: index,
                    field: name.to_string(),
                })
        };

        let raw_date = field(&self.date_field)?;
        let date = parse_date_prefix(raw_date, &self.date_format).ok_or_else(|| {
            ParseError::InvalidDate {
                record: index,
                value: raw_date.to_string(),
            }
        })?;

        let raw_amount = field(&self.amount_field)?;
        let (mut amount, _) = parse_amount(raw_amount).ok_or_else(|| {
            ParseError::InvalidRecordAmount {
                record: index,
                value: raw_amount.to_string(),
            }
        })?;
        if let Some(sign) = &self.sign {
            if field(&sign.field)? != sign.credit {
                amount = -amount;
            }
        }

        let currency = match &self.currency {
            XmlCurrency::Fixed(code) => code.clone(),
            XmlCurrency::Field(name) => field(name)?.to_string(),
        };

        Ok(TransactionRecord::new(
            date,
            Money::new(amount),
            currency,
            transliterate(field(&self.description_field)?),
        ))
    }
}

struct OpenRecord {
    depth: usize,
    fields: HashMap<String, String>,
    field: Option<(String, String)>,
}

pub fn read_xml(text: &str, profile: &XmlProfile) -> Result<Vec<TransactionRecord>, ParseError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut open: Option<OpenRecord> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(rec) = open.as_mut() {
                    if depth == rec.depth + 1 {
                        rec.field = Some((name, String::new()));
                    }
                } else if name == profile.record {
                    open = Some(OpenRecord {
                        depth,
                        fields: HashMap::new(),
                        field: None,
                    });
                }
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match open.as_mut() {
                    Some(rec) if depth == rec.depth => {
                        rec.fields.entry(name).or_default();
                    }
                    None if name == profile.record => {
                        records.push(profile.build(records.len() + 1, &HashMap::new())?);
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some((_, value)) = open
                    .as_mut()
                    .filter(|rec| depth == rec.depth + 1)
                    .and_then(|rec| rec.field.as_mut())
                {
                    value.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some((_, value)) = open
                    .as_mut()
                    .filter(|rec| depth == rec.depth + 1)
                    .and_then(|rec| rec.field.as_mut())
                {
                    value.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                match open.take() {
                    Some(mut rec) if depth == rec.depth + 1 => {
                        if let Some((name, value)) = rec.field.take() {
                            rec.fields.insert(name, value);
                        }
                        open = Some(rec);
                    }
                    Some(rec) if depth == rec.depth => {
                        records.push(profile.build(records.len() + 1, &rec.fields)?);
                    }
                    other => open = other,
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(records)
}
