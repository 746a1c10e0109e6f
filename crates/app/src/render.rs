use crossterm::style::Stylize;
use serde::Serialize;
use std::io::{self, Write};
use tally_core::{Classification, ClassifiedRecord, Severity};

const DESCRIPTION_WIDTH: usize = 140;
const HEADERS: [&str; 5] = ["Date", "Amount", "Currency", "Description", "Status"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Include exact matches, which are hidden by default.
    pub show_all: bool,
    /// Emphasize rows by severity with terminal styles.
    pub styled: bool,
}

fn visible(entry: &ClassifiedRecord, options: RenderOptions) -> bool {
    options.show_all || entry.classification != Classification::MatchedExact
}

fn truncate(s: &str, width: usize) -> String {
    s.chars().take(width).collect()
}

fn cells(entry: &ClassifiedRecord) -> [String; 5] {
    let r = &entry.record;
    [
        r.date.to_string(),
        r.amount.key(),
        r.currency.clone(),
        truncate(&r.description, DESCRIPTION_WIDTH),
        entry.classification.label(),
    ]
}

/// Plain-text table of `entries`, in the order given. Amounts are right aligned.
pub fn render_table<W: Write>(
    out: &mut W,
    entries: &[ClassifiedRecord],
    options: RenderOptions,
) -> io::Result<()> {
    let rows: Vec<(Severity, [String; 5])> = entries
        .iter()
        .filter(|e| visible(e, options))
        .map(|e| (e.classification.severity(), cells(e)))
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for (_, row) in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |row: &[&str; 5]| -> String {
        let mut line = String::new();
        for (i, (cell, width)) in row.iter().zip(widths).enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            if i == 1 {
                line.push_str(&format!("{cell:>width$}"));
            } else {
                line.push_str(&format!("{cell:<width$}"));
            }
        }
        line.trim_end().to_string()
    };

    writeln!(out, "{}", format_row(&HEADERS))?;
    let rule = widths.map(|w| "-".repeat(w));
    writeln!(out, "{}", format_row(&rule.each_ref().map(String::as_str)))?;

    for (severity, row) in &rows {
        let line = format_row(&row.each_ref().map(String::as_str));
        if options.styled {
            match severity {
                Severity::Info => writeln!(out, "{}", line.dim())?,
                Severity::Notice => writeln!(out, "{}", line.white())?,
                Severity::Attention => writeln!(out, "{}", line.bold())?,
            }
        } else {
            writeln!(out, "{line}")?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    statement: &'a str,
    label: String,
    #[serde(flatten)]
    entry: &'a ClassifiedRecord,
}

/// One JSON object per entry, exact matches included.
pub fn render_json<W: Write>(
    out: &mut W,
    statement: &str,
    entries: &[ClassifiedRecord],
) -> io::Result<()> {
    for entry in entries {
        let line = JsonEntry {
            statement,
            label: entry.classification.label(),
            entry,
        };
        serde_json::to_writer(&mut *out, &line)?;
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tally_core::{Money, TransactionRecord};

    fn record(day: u32, cents: i64, description: &str) -> TransactionRecord {
        let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        TransactionRecord::new(date, Money::from_cents(cents), "PLN", description)
    }

    fn entries() -> Vec<ClassifiedRecord> {
        vec![
            ClassifiedRecord::matched(record(1, -150000, "CZYNSZ"), record(1, -150000, "CZYNSZ")),
            ClassifiedRecord::matched(record(3, -1250, "KAWA"), record(2, -1250, "KAWA")),
            ClassifiedRecord::ledger(record(4, 999, "ZWROT"), Classification::LedgerOnly),
            ClassifiedRecord::statement(record(5, -5, "OPLATA"), Classification::StatementOnly),
        ]
    }

    fn table(entries: &[ClassifiedRecord], options: RenderOptions) -> String {
        let mut out = Vec::new();
        render_table(&mut out, entries, options).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn exact_matches_are_hidden_by_default() {
        let text = table(&entries(), RenderOptions::default());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Date        Amount  Currency  Description  Status",
                "----------  ------  --------  -----------  ------------",
                "2024-03-03  -12.50  PLN       KAWA         \u{2192} 2024-03-02",
                "2024-03-04    9.99  PLN       ZWROT        LEDGER",
                "2024-03-05   -0.05  PLN       OPLATA       EXPORT",
            ]
        );
    }

    #[test]
    fn show_all_includes_exact_matches() {
        let options = RenderOptions {
            show_all: true,
            styled: false,
        };
        let text = table(&entries(), options);
        assert_eq!(text.lines().count(), 6);
        assert!(text.contains("-1500.00  PLN       CZYNSZ       MATCHED"));
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let long = "X".repeat(200);
        let entries = vec![ClassifiedRecord::statement(
            record(1, 100, &long),
            Classification::StatementOnly,
        )];
        let text = table(&entries, RenderOptions::default());
        let row = text.lines().nth(2).unwrap();
        assert!(row.contains(&"X".repeat(DESCRIPTION_WIDTH)));
        assert!(!row.contains(&"X".repeat(DESCRIPTION_WIDTH + 1)));
    }

    #[test]
    fn styled_rows_carry_escape_codes() {
        let options = RenderOptions {
            show_all: false,
            styled: true,
        };
        let text = table(&entries(), options);
        assert!(text.lines().nth(4).unwrap().contains('\u{1b}'));
        assert!(!text.lines().next().unwrap().contains('\u{1b}'));
    }

    #[test]
    fn json_lines_include_every_entry() {
        let mut out = Vec::new();
        render_json(&mut out, "march.csv", &entries()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let values: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(values.len(), 4);
        assert_eq!(values[0]["statement"], "march.csv");
        assert_eq!(values[0]["label"], "MATCHED");
        assert_eq!(values[1]["classification"]["status"], "matched_shifted");
        assert_eq!(values[1]["classification"]["target"], "2024-03-02");
        assert_eq!(values[3]["label"], "EXPORT");
        assert_eq!(values[3]["source"], "statement");
    }
}
