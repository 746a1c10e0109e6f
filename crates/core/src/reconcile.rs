//! Statement/ledger reconciliation.
//!
//! Statement records are indexed by [`MatchKey`]. Each ledger record then looks up
//! the index at its own date and at increasingly distant shifts
//! (`0, +1, -1, +2, -2, ...`) and consumes the first pending statement record it
//! finds. The scan is greedy and follows ledger order, so the result is
//! deterministic for a given input order.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::classification::{Classification, ClassifiedRecord};
use crate::period::DateRange;
use crate::record::{MatchKey, TransactionRecord};

pub const DEFAULT_EPSILON: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("statement batch contains no records")]
pub struct EmptyBatchError;

#[derive(Debug, Error)]
pub enum ReconcileError<E> {
    #[error(transparent)]
    EmptyBatch(#[from] EmptyBatchError),
    #[error(transparent)]
    Ledger(E),
}

/// Date offsets tried for a ledger record, nearest first, later date first on ties.
pub fn shift_offsets(epsilon: u32) -> impl Iterator<Item = i64> {
    std::iter::once(0).chain((1..=i64::from(epsilon)).flat_map(|k| [k, -k]))
}

// ── Statement index ───────────────────────────────────────────────────────────

/// Arena of statement records plus a stack of pending arena indices per key.
#[derive(Debug, Clone, Default)]
pub struct StatementIndex {
    records: Vec<TransactionRecord>,
    pending: BTreeMap<MatchKey, Vec<usize>>,
}

impl StatementIndex {
    pub fn build<I>(records: I) -> Self
    where
        I: IntoIterator<Item = TransactionRecord>,
    {
        let mut index = StatementIndex::default();
        for record in records {
            let slot = index.records.len();
            index.pending.entry(record.key()).or_default().push(slot);
            index.records.push(record);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn span(&self) -> Option<DateRange> {
        DateRange::spanning(self.records.iter().map(|r| r.date))
    }

    /// Records whose key is shared with at least one other record, grouped by key
    /// in file order.
    pub fn duplicates(&self) -> impl Iterator<Item = &TransactionRecord> + '_ {
        self.pending
            .values()
            .filter(|slots| slots.len() > 1)
            .flatten()
            .map(|&slot| &self.records[slot])
    }

    pub fn has_pending(&self, key: &MatchKey) -> bool {
        self.pending.get(key).is_some_and(|slots| !slots.is_empty())
    }

    /// Consume the most recently indexed pending record for `key`.
    pub fn take(&mut self, key: &MatchKey) -> Option<&TransactionRecord> {
        let slots = self.pending.get_mut(key)?;
        let slot = slots.pop()?;
        if slots.is_empty() {
            self.pending.remove(key);
        }
        Some(&self.records[slot])
    }

    /// Remaining records in key order, file order within a key.
    pub fn into_pending(self) -> Vec<TransactionRecord> {
        let mut slots: Vec<Option<TransactionRecord>> =
            self.records.into_iter().map(Some).collect();
        self.pending
            .into_values()
            .flatten()
            .filter_map(|slot| slots[slot].take())
            .collect()
    }
}

// ── Reconciler ────────────────────────────────────────────────────────────────

/// Dates governing one batch: the statement's own span and the span widened by
/// epsilon, which is what the ledger is queried for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationWindow {
    pub span: DateRange,
    pub padded: DateRange,
    pub epsilon: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciler {
    epsilon: u32,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl Reconciler {
    pub fn new(epsilon: u32) -> Self {
        Self { epsilon }
    }

    pub fn epsilon(&self) -> u32 {
        self.epsilon
    }

    /// Index a statement batch and flag duplicate keys. Fails before any ledger
    /// access when the batch is empty.
    pub fn prepare(&self, statement: Vec<TransactionRecord>) -> Result<PendingBatch, EmptyBatchError> {
        let index = StatementIndex::build(statement);
        let span = index.span().ok_or(EmptyBatchError)?;

        let entries = index
            .duplicates()
            .cloned()
            .map(|record| ClassifiedRecord::statement(record, Classification::Duplicate))
            .collect();

        Ok(PendingBatch {
            index,
            window: ReconciliationWindow {
                span,
                padded: span.padded(self.epsilon),
                epsilon: self.epsilon,
            },
            entries,
        })
    }

    /// Reconcile `statement` against the ledger records `fetch` returns for the
    /// padded window.
    pub fn reconcile<F, E>(
        &self,
        statement: Vec<TransactionRecord>,
        fetch: F,
    ) -> Result<Reconciliation, ReconcileError<E>>
    where
        F: FnOnce(DateRange) -> Result<Vec<TransactionRecord>, E>,
    {
        let batch = self.prepare(statement)?;
        let ledger = fetch(batch.window.padded).map_err(ReconcileError::Ledger)?;
        Ok(batch.settle(ledger))
    }
}

/// A statement batch that has been indexed and is waiting for ledger records.
#[derive(Debug, Clone)]
pub struct PendingBatch {
    index: StatementIndex,
    window: ReconciliationWindow,
    entries: Vec<ClassifiedRecord>,
}

impl PendingBatch {
    pub fn window(&self) -> ReconciliationWindow {
        self.window
    }

    pub fn statement_count(&self) -> usize {
        self.index.len()
    }

    pub fn settle<I>(mut self, ledger: I) -> Reconciliation
    where
        I: IntoIterator<Item = TransactionRecord>,
    {
        for record in ledger {
            match self.find_counterpart(&record) {
                Some(key) => {
                    if let Some(statement) = self.index.take(&key) {
                        let statement = statement.clone();
                        self.entries.push(ClassifiedRecord::matched(record, statement));
                    }
                }
                None if self.window.span.contains(record.date) => {
                    self.entries
                        .push(ClassifiedRecord::ledger(record, Classification::LedgerOnly));
                }
                // Only present because of the padding; nothing to reconcile against.
                None => {}
            }
        }

        let PendingBatch {
            index,
            window,
            mut entries,
        } = self;
        entries.extend(
            index
                .into_pending()
                .into_iter()
                .map(|record| ClassifiedRecord::statement(record, Classification::StatementOnly)),
        );

        Reconciliation { window, entries }
    }

    fn find_counterpart(&self, record: &TransactionRecord) -> Option<MatchKey> {
        shift_offsets(self.window.epsilon)
            .filter_map(|offset| record.shifted_key(offset))
            .find(|key| self.index.has_pending(key))
    }
}

// ── Result ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub duplicates: usize,
    pub matched_exact: usize,
    pub matched_shifted: usize,
    pub ledger_only: usize,
    pub statement_only: usize,
}

/// Classified entries of one batch, in emission order: duplicates, then ledger
/// outcomes in ledger order, then leftover statement records.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub window: ReconciliationWindow,
    pub entries: Vec<ClassifiedRecord>,
}

impl Reconciliation {
    pub fn span(&self) -> DateRange {
        self.window.span
    }

    pub fn statement_only(&self) -> impl Iterator<Item = &ClassifiedRecord> + '_ {
        self.entries
            .iter()
            .filter(|e| e.classification == Classification::StatementOnly)
    }

    pub fn summary(&self) -> Summary {
        self.entries
            .iter()
            .fold(Summary::default(), |mut s, e| {
                match e.classification {
                    Classification::Duplicate => s.duplicates += 1,
                    Classification::MatchedExact => s.matched_exact += 1,
                    Classification::MatchedShifted { .. } => s.matched_shifted += 1,
                    Classification::LedgerOnly => s.ledger_only += 1,
                    Classification::StatementOnly => s.statement_only += 1,
                }
                s
            })
    }

    /// Entries sorted for display.
    pub fn into_sorted(mut self) -> Vec<ClassifiedRecord> {
        crate::classification::sort_for_display(&mut self.entries);
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use chrono::NaiveDate;
    use std::cell::Cell;
    use std::convert::Infallible;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rec(d: NaiveDate, cents: i64, currency: &str, desc: &str) -> TransactionRecord {
        TransactionRecord::new(d, Money::from_cents(cents), currency, desc)
    }

    fn run(
        epsilon: u32,
        statement: Vec<TransactionRecord>,
        ledger: Vec<TransactionRecord>,
    ) -> Reconciliation {
        Reconciler::new(epsilon)
            .reconcile(statement, |_| Ok::<_, Infallible>(ledger))
            .unwrap()
    }

    fn classes(r: &Reconciliation) -> Vec<Classification> {
        r.entries.iter().map(|e| e.classification).collect()
    }

    #[test]
    fn shift_offsets_center_outward_later_first() {
        let offsets: Vec<i64> = shift_offsets(3).collect();
        assert_eq!(offsets, vec![0, 1, -1, 2, -2, 3, -3]);
        assert_eq!(shift_offsets(0).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn index_take_pops_last_inserted() {
        let d = date(2024, 1, 5);
        let mut index = StatementIndex::build(vec![
            rec(d, 1000, "PLN", "X"),
            rec(d, 1000, "PLN", "Y"),
        ]);
        let key = rec(d, 1000, "PLN", "").key();
        assert_eq!(index.take(&key).unwrap().description, "Y");
        assert_eq!(index.pending_count(), 1);
        assert_eq!(index.take(&key).unwrap().description, "X");
        assert!(index.take(&key).is_none());
        assert!(!index.has_pending(&key));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn rent_scenario_matches_with_shift() {
        let mut fetched = None;
        let result = Reconciler::new(7)
            .reconcile(vec![rec(date(2024, 3, 1), 10000, "PLN", "Rent")], |range| {
                fetched = Some(range);
                Ok::<_, Infallible>(vec![rec(date(2024, 3, 2), 10000, "PLN", "RENT PAYMENT")])
            })
            .unwrap();

        assert_eq!(fetched, Some(DateRange::new(date(2024, 2, 23), date(2024, 3, 8))));
        assert_eq!(
            classes(&result),
            vec![Classification::MatchedShifted { target: date(2024, 3, 1) }]
        );
        let entry = &result.entries[0];
        assert_eq!(entry.record.description, "RENT PAYMENT");
        assert_eq!(entry.counterpart.as_ref().unwrap().description, "Rent");
    }

    #[test]
    fn coffee_scenario_is_statement_only() {
        let result = run(7, vec![rec(date(2024, 3, 1), 5000, "PLN", "Coffee")], vec![]);
        assert_eq!(classes(&result), vec![Classification::StatementOnly]);
        assert_eq!(result.entries[0].record.description, "Coffee");
    }

    #[test]
    fn empty_statement_fails_without_fetching() {
        let called = Cell::new(false);
        let result = Reconciler::default().reconcile(vec![], |_| {
            called.set(true);
            Ok::<_, Infallible>(vec![])
        });
        assert!(matches!(result, Err(ReconcileError::EmptyBatch(EmptyBatchError))));
        assert!(!called.get());
    }

    #[test]
    fn ledger_errors_propagate_unchanged() {
        #[derive(Debug, PartialEq)]
        struct Boom;
        let result = Reconciler::default()
            .reconcile(vec![rec(date(2024, 1, 1), 1, "PLN", "a")], |_| Err(Boom));
        assert!(matches!(result, Err(ReconcileError::Ledger(Boom))));
    }

    #[test]
    fn exact_match_preferred_over_shift() {
        let d = date(2024, 5, 10);
        let result = run(
            2,
            vec![rec(d.succ_opt().unwrap(), 700, "PLN", "later"), rec(d, 700, "PLN", "same")],
            vec![rec(d, 700, "PLN", "ledger")],
        );
        let matched = &result.entries[0];
        assert_eq!(matched.classification, Classification::MatchedExact);
        assert_eq!(matched.counterpart.as_ref().unwrap().description, "same");
        assert_eq!(result.summary().statement_only, 1);
    }

    #[test]
    fn tie_break_prefers_later_date() {
        let d = date(2024, 5, 10);
        let result = run(
            2,
            vec![
                rec(date(2024, 5, 9), 2500, "PLN", "before"),
                rec(date(2024, 5, 11), 2500, "PLN", "after"),
            ],
            vec![rec(d, 2500, "PLN", "ledger")],
        );
        assert_eq!(
            result.entries[0].classification,
            Classification::MatchedShifted { target: date(2024, 5, 11) }
        );
        let leftover: Vec<&str> = result
            .statement_only()
            .map(|e| e.record.description.as_str())
            .collect();
        assert_eq!(leftover, vec!["before"]);
    }

    #[test]
    fn nearer_shift_beats_farther_later_date() {
        let d = date(2024, 5, 10);
        let result = run(
            3,
            vec![
                rec(date(2024, 5, 12), 100, "PLN", "plus two"),
                rec(date(2024, 5, 9), 100, "PLN", "minus one"),
            ],
            vec![rec(d, 100, "PLN", "ledger")],
        );
        assert_eq!(
            result.entries[0].classification,
            Classification::MatchedShifted { target: date(2024, 5, 9) }
        );
    }

    #[test]
    fn shift_beyond_epsilon_does_not_match() {
        let result = run(
            2,
            vec![rec(date(2024, 5, 10), 100, "PLN", "stmt")],
            vec![rec(date(2024, 5, 13), 100, "PLN", "ledger")],
        );
        // 2024-05-13 lies outside the statement span, so it is dropped silently.
        assert_eq!(classes(&result), vec![Classification::StatementOnly]);
    }

    #[test]
    fn window_boundary_records_are_eligible() {
        let from = date(2024, 3, 1);
        let to = date(2024, 3, 10);
        let statement = vec![rec(from, 100, "PLN", "first"), rec(to, 200, "PLN", "last")];
        let result = Reconciler::new(7)
            .reconcile(statement, |range| {
                assert_eq!(range.start, date(2024, 2, 23));
                assert_eq!(range.end, date(2024, 3, 17));
                Ok::<_, Infallible>(vec![
                    rec(range.start, 100, "PLN", "edge low"),
                    rec(range.end, 200, "PLN", "edge high"),
                ])
            })
            .unwrap();
        assert_eq!(
            classes(&result),
            vec![
                Classification::MatchedShifted { target: from },
                Classification::MatchedShifted { target: to },
            ]
        );
    }

    #[test]
    fn records_outside_the_padded_window_cannot_match() {
        let from = date(2024, 3, 1);
        let result = run(
            7,
            vec![rec(from, 100, "PLN", "first")],
            vec![rec(date(2024, 2, 22), 100, "PLN", "too early")],
        );
        assert_eq!(classes(&result), vec![Classification::StatementOnly]);
    }

    #[test]
    fn ledger_only_inside_span_dropped_outside() {
        let result = run(
            1,
            vec![
                rec(date(2024, 1, 1), 100, "PLN", "a"),
                rec(date(2024, 1, 31), 100, "PLN", "b"),
            ],
            vec![
                rec(date(2024, 1, 15), 999, "PLN", "inside"),
                rec(date(2024, 2, 1), 999, "PLN", "padding"),
            ],
        );
        let ledger_only: Vec<&str> = result
            .entries
            .iter()
            .filter(|e| e.classification == Classification::LedgerOnly)
            .map(|e| e.record.description.as_str())
            .collect();
        assert_eq!(ledger_only, vec!["inside"]);
        assert_eq!(result.summary().statement_only, 2);
    }

    #[test]
    fn duplicates_flagged_and_still_matchable() {
        let d = date(2024, 1, 5);
        let result = run(
            7,
            vec![rec(d, 1000, "PLN", "X"), rec(d, 1000, "PLN", "Y")],
            vec![rec(d, 1000, "PLN", "ledger")],
        );
        let summary = result.summary();
        assert_eq!(summary.duplicates, 2);
        assert_eq!(summary.matched_exact, 1);
        assert_eq!(summary.statement_only, 1);

        let dup: Vec<&str> = result
            .entries
            .iter()
            .filter(|e| e.classification == Classification::Duplicate)
            .map(|e| e.record.description.as_str())
            .collect();
        assert_eq!(dup, vec!["X", "Y"]);

        // The last-appended record is consumed first.
        let matched = result.entries.iter().find(|e| e.classification.is_match()).unwrap();
        assert_eq!(matched.counterpart.as_ref().unwrap().description, "Y");
        assert_eq!(result.statement_only().next().unwrap().record.description, "X");
    }

    #[test]
    fn currencies_never_coalesce() {
        let d = date(2024, 1, 5);
        let result = run(
            7,
            vec![rec(d, 1000, "PLN", "pln"), rec(d, 1000, "EUR", "eur")],
            vec![rec(d, 1000, "EUR", "ledger eur")],
        );
        assert_eq!(result.summary().duplicates, 0);
        let matched = result.entries.iter().find(|e| e.classification.is_match()).unwrap();
        assert_eq!(matched.counterpart.as_ref().unwrap().currency, "EUR");
        assert_eq!(result.statement_only().next().unwrap().record.currency, "PLN");
    }

    #[test]
    fn ledger_duplicates_are_not_collapsed() {
        let d = date(2024, 1, 5);
        let result = run(
            7,
            vec![rec(d, 1000, "PLN", "once")],
            vec![rec(d, 1000, "PLN", "first"), rec(d, 1000, "PLN", "second")],
        );
        assert_eq!(
            classes(&result),
            vec![Classification::MatchedExact, Classification::LedgerOnly]
        );
        assert_eq!(result.entries[1].record.description, "second");
    }

    #[test]
    fn consumed_statement_record_is_never_reused() {
        let d = date(2024, 1, 5);
        let result = run(
            3,
            vec![rec(d, 1000, "PLN", "only")],
            vec![
                rec(d.succ_opt().unwrap(), 1000, "PLN", "shifted"),
                rec(d, 1000, "PLN", "exact but late"),
            ],
        );
        assert_eq!(result.summary().matched_shifted, 1);
        assert_eq!(result.summary().matched_exact, 0);
        assert_eq!(result.summary().ledger_only, 1);
    }

    #[test]
    fn conservation_of_statement_records() {
        let statement = vec![
            rec(date(2024, 2, 1), 100, "PLN", "a"),
            rec(date(2024, 2, 1), 100, "PLN", "b"),
            rec(date(2024, 2, 3), -4599, "PLN", "c"),
            rec(date(2024, 2, 7), 250, "EUR", "d"),
            rec(date(2024, 2, 9), 100, "PLN", "e"),
        ];
        let ledger = vec![
            rec(date(2024, 2, 2), 100, "PLN", "l1"),
            rec(date(2024, 2, 3), -4599, "PLN", "l2"),
            rec(date(2024, 2, 5), 777, "PLN", "l3"),
        ];
        let result = run(7, statement.clone(), ledger);

        let mut seen: Vec<&TransactionRecord> = result
            .entries
            .iter()
            .filter_map(|e| match e.classification {
                Classification::MatchedExact | Classification::MatchedShifted { .. } => {
                    e.counterpart.as_ref()
                }
                Classification::StatementOnly => Some(&e.record),
                _ => None,
            })
            .collect();
        seen.sort_by(|a, b| a.description.cmp(&b.description));
        let expected: Vec<&TransactionRecord> = statement.iter().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let statement = vec![
            rec(date(2024, 2, 1), 100, "PLN", "a"),
            rec(date(2024, 2, 1), 100, "PLN", "b"),
            rec(date(2024, 2, 4), 300, "PLN", "c"),
            rec(date(2024, 2, 6), 300, "PLN", "d"),
        ];
        let ledger = vec![
            rec(date(2024, 2, 5), 300, "PLN", "l1"),
            rec(date(2024, 2, 2), 100, "PLN", "l2"),
            rec(date(2024, 2, 3), 900, "PLN", "l3"),
        ];
        let first = run(7, statement.clone(), ledger.clone());
        let second = run(7, statement, ledger);
        assert_eq!(first.entries, second.entries);
    }

    #[test]
    fn two_phase_matches_callback_form() {
        let statement = vec![rec(date(2024, 4, 1), 100, "PLN", "a")];
        let ledger = vec![rec(date(2024, 4, 2), 100, "PLN", "l")];

        let batch = Reconciler::new(3).prepare(statement.clone()).unwrap();
        assert_eq!(batch.statement_count(), 1);
        assert_eq!(
            batch.window().padded,
            DateRange::new(date(2024, 3, 29), date(2024, 4, 4))
        );
        let two_phase = batch.settle(ledger.clone());

        assert_eq!(two_phase.entries, run(3, statement, ledger).entries);
    }

    #[test]
    fn sorted_output_keeps_every_entry() {
        let d = date(2024, 1, 5);
        let result = run(
            7,
            vec![rec(d, 1000, "PLN", "X"), rec(d, 1000, "PLN", "Y")],
            vec![rec(d, 1000, "PLN", "ledger")],
        );
        let total = result.entries.len();
        let sorted = result.into_sorted();
        assert_eq!(sorted.len(), total);
        assert!(sorted.windows(2).all(|w| w[0].display_cmp(&w[1]).is_le()));
    }
}
