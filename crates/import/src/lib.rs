pub mod csv;
pub mod detect;
pub mod format;
pub(crate) mod util;
pub mod xml;

pub use csv::{AmountColumn, CurrencySource, DelimitedProfile};
pub use detect::{detect_account_number, detect_importer};
pub use format::{ParseError, StatementFormat};
pub use util::{decode_text, transliterate};
pub use xml::{SignRule, XmlCurrency, XmlProfile};
