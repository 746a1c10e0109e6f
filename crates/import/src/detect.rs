use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

/// Bytes of a statement searched for the account number.
pub const DETECTION_PREFIX: usize = 1024;

fn account_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[0-9]{2} ?[0-9]{4} ?[0-9]{4} ?[0-9]{4} ?[0-9]{4} ?[0-9]{4} ?[0-9]{4}")
            .expect("account number pattern is valid")
    })
}

/// First 26-digit account number (optionally space-grouped) in the leading
/// bytes of a statement, as a bare digit string. Non-ASCII bytes are dropped
/// before searching.
pub fn detect_account_number(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(DETECTION_PREFIX)];
    let ascii: String = head
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| char::from(b))
        .collect();

    account_number_pattern()
        .find(&ascii)
        .map(|m| m.as_str().replace(' ', ""))
}

/// Importer id for the statement at `path`, if its header names an account.
pub fn detect_importer(path: &Path) -> std::io::Result<Option<String>> {
    let mut head = Vec::with_capacity(DETECTION_PREFIX);
    std::fs::File::open(path)?
        .take(DETECTION_PREFIX as u64)
        .read_to_end(&mut head)?;
    Ok(detect_account_number(&head))
}
