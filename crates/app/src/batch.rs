use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tally_core::{plan_imports, GlobPattern, Reconciler, Summary, ValidatedTransaction};
use tally_import::detect_importer;
use tally_storage::{Book, Credentials, LedgerLocation, StorageError};

use crate::config::Config;
use crate::render::{render_json, render_table, RenderOptions};

/// Ledger books by connection name, opened on first use.
pub struct Ledgers {
    locations: BTreeMap<String, String>,
    writable: bool,
    credentials: Option<Credentials>,
    open: HashMap<String, Book>,
}

impl Ledgers {
    pub fn new(locations: BTreeMap<String, String>, writable: bool) -> Self {
        Ledgers {
            locations,
            writable,
            credentials: None,
            open: HashMap::new(),
        }
    }

    /// Log in to server books as `credentials`.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn location(&self, name: &str) -> Result<LedgerLocation> {
        let raw = self
            .locations
            .get(name)
            .with_context(|| format!("Unknown connection '{name}'"))?;
        let location = LedgerLocation::parse(raw)?;
        Ok(match &self.credentials {
            Some(credentials) => location.with_credentials(credentials),
            None => location,
        })
    }

    pub async fn get(&mut self, name: &str) -> Result<&Book> {
        if !self.open.contains_key(name) {
            let location = self.location(name)?;
            let book = Book::open(&location, self.writable)
                .await
                .with_context(|| format!("Failed to open ledger '{name}'"))?;
            self.open.insert(name.to_string(), book);
        }
        self.open
            .get(name)
            .with_context(|| format!("Unknown connection '{name}'"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Importer id to use instead of detecting one from each file.
    pub target: Option<String>,
    pub update: bool,
    pub json: bool,
    pub render: RenderOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub importer: String,
    pub summary: Summary,
    pub written: usize,
    pub skipped: usize,
}

/// Reconcile one statement file: detect its importer, normalize it, compare it
/// with the ledger, print the report and, on update, record what the ledger is
/// missing.
pub async fn process_statement<W: Write>(
    path: &Path,
    config: &Config,
    ledgers: &mut Ledgers,
    reconciler: &Reconciler,
    options: &BatchOptions,
    out: &mut W,
) -> Result<BatchReport> {
    let importer_id = match &options.target {
        Some(id) => id.clone(),
        None => detect_importer(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .ok_or_else(|| {
                anyhow!("No account number found in the statement header; pass --target")
            })?,
    };
    let importer = config
        .importer(&importer_id)
        .with_context(|| format!("No importer configured for {importer_id}"))?;
    let format = config
        .format(&importer.format)
        .with_context(|| format!("Unknown format '{}'", importer.format))?;

    let statement = format
        .parse(path)
        .with_context(|| format!("Failed to parse {} as {}", path.display(), importer.format))?;
    tracing::info!(
        path = %path.display(),
        importer = %importer_id,
        records = statement.len(),
        "parsed statement"
    );

    let batch = reconciler.prepare(statement)?;
    let window = batch.window();

    let pattern = GlobPattern::new(&importer.account)?;
    let book = ledgers.get(&importer.connection).await?;
    let ledger = book
        .fetch(&pattern, window.padded)
        .await
        .with_context(|| format!("Failed to read ledger accounts {pattern}"))?;
    tracing::debug!(span = %window.span, fetched = %window.padded, records = ledger.len(), "read ledger");

    let reconciliation = batch.settle(ledger);
    let summary = reconciliation.summary();
    let entries = reconciliation.into_sorted();

    let label = path.display().to_string();
    if options.json {
        render_json(out, &label, &entries)?;
    } else {
        writeln!(out, "{label} ({importer_id})")?;
        render_table(out, &entries, options.render)?;
        writeln!(out)?;
    }

    let mut report = BatchReport {
        importer: importer_id.clone(),
        summary,
        ..BatchReport::default()
    };

    if options.update {
        let counter = importer
            .update
            .as_deref()
            .with_context(|| format!("Importer {importer_id} has no `update` account"))?;

        for planned in plan_imports(&entries, &importer.account, counter) {
            let tx = ValidatedTransaction::validate(planned)?;
            match book.commit(&tx).await {
                Ok(_) => report.written += 1,
                Err(e @ (StorageError::AccountNotFound(_) | StorageError::CommodityNotFound(_))) => {
                    tracing::debug!(date = %tx.post_date, description = %tx.description, "skipping: {e}");
                    eprintln!("{}: skipped {} {}: {e}", label, tx.post_date, tx.description);
                    report.skipped += 1;
                }
                Err(e) => return Err(e).context("Failed to record transaction"),
            }
        }
    }

    Ok(report)
}

/// Files matching a shell-style pattern, sorted. Wildcards may appear in any
/// path component; hidden entries only match patterns that start with a dot.
pub fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut candidates = vec![PathBuf::new()];

    for component in Path::new(pattern).components() {
        let Component::Normal(part) = component else {
            for candidate in &mut candidates {
                candidate.push(component.as_os_str());
            }
            continue;
        };

        let part = part.to_string_lossy();
        if GlobPattern::is_literal(&part) {
            for candidate in &mut candidates {
                candidate.push(&*part);
            }
            continue;
        }

        let glob = GlobPattern::new(&part)?;
        let mut expanded = Vec::new();
        for base in &candidates {
            let dir = if base.as_os_str().is_empty() {
                Path::new(".")
            } else {
                base.as_path()
            };
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries {
                let name = entry?.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') && !part.starts_with('.') {
                    continue;
                }
                if glob.matches(&name) {
                    expanded.push(base.join(&*name));
                }
            }
        }
        candidates = expanded;
    }

    candidates.retain(|p| p.is_file());
    candidates.sort();
    Ok(candidates)
}
