use serde::{Deserialize, Serialize};
use std::path::Path;
use tally_core::TransactionRecord;
use thiserror::Error;

use crate::csv::DelimitedProfile;
use crate::util::decode_text;
use crate::xml::XmlProfile;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Delimiter {0:?} is not a single ASCII character")]
    InvalidDelimiter(char),
    #[error("Line {line}: missing column {column}")]
    MissingColumn { line: u64, column: usize },
    #[error("Line {line}: invalid amount '{value}'")]
    InvalidAmount { line: u64, value: String },
    #[error("Line {line}: no currency")]
    MissingCurrency { line: u64 },
    #[error("Record {record}: missing field <{field}>")]
    MissingField { record: usize, field: String },
    #[error("Record {record}: invalid amount '{value}'")]
    InvalidRecordAmount { record: usize, value: String },
    #[error("Record {record}: invalid date '{value}'")]
    InvalidDate { record: usize, value: String },
}

/// How a statement file is read. Bank layouts are expressed as profiles of one
/// of these kinds, not as code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StatementFormat {
    Delimited(DelimitedProfile),
    Xml(XmlProfile),
}

impl StatementFormat {
    pub fn parse(&self, path: &Path) -> Result<Vec<TransactionRecord>, ParseError> {
        let bytes = std::fs::read(path)?;
        self.parse_bytes(&bytes)
    }

    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Vec<TransactionRecord>, ParseError> {
        let text = decode_text(bytes);
        match self {
            StatementFormat::Delimited(profile) => crate::csv::read_delimited(&text, profile),
            StatementFormat::Xml(profile) => crate::xml::read_xml(&text, profile),
        }
    }
}
