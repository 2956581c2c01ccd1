// 📂 Snapshot Loader
// Reads each tabular source, stamps it with its ingestion sequence and a
// YYYY/MM/DD label, and prepends Seq + Snapshot_Date ahead of the source columns.

use crate::config::{SEQ_COLUMN, SNAPSHOT_DATE_COLUMN};
use crate::error::{ReconcileError, Result};
use anyhow::{anyhow, bail, Context};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Label format for snapshot dates.
pub const DATE_LABEL_FORMAT: &str = "%Y/%m/%d";

/// A single cell. `None` is a true-missing value (empty cell in the source).
pub type Cell = Option<String>;

// ============================================================================
// SNAPSHOT SOURCE
// ============================================================================

/// A declared input table. `id` is the identifier exactly as the caller
/// declared it; date overrides are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSource {
    pub id: String,
    pub path: PathBuf,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        SnapshotSource {
            id: path.to_string_lossy().into_owned(),
            path,
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// One loaded table. Immutable once built: columns always start with
/// `Seq`, `Snapshot_Date`, followed by the source columns in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    sequence: usize,
    snapshot_date: String,
    source: String,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Snapshot {
    /// Build a snapshot from a raw header and rows, prepending the two
    /// bookkeeping columns to the header and to every row.
    pub fn new(
        sequence: usize,
        snapshot_date: impl Into<String>,
        source: impl Into<String>,
        header: Vec<String>,
        rows: Vec<Vec<Cell>>,
    ) -> anyhow::Result<Self> {
        let snapshot_date = snapshot_date.into();
        let source = source.into();

        if let Some(reserved) = header
            .iter()
            .find(|c| c.as_str() == SEQ_COLUMN || c.as_str() == SNAPSHOT_DATE_COLUMN)
        {
            bail!("{}: column '{}' is reserved", source, reserved);
        }

        let mut columns = Vec::with_capacity(header.len() + 2);
        columns.push(SEQ_COLUMN.to_string());
        columns.push(SNAPSHOT_DATE_COLUMN.to_string());
        columns.extend(header);

        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| {
                if row.len() + 2 != columns.len() {
                    bail!(
                        "{}: row {} has {} cells, header has {}",
                        source,
                        idx + 1,
                        row.len(),
                        columns.len() - 2
                    );
                }
                let mut full = Vec::with_capacity(columns.len());
                full.push(Some(sequence.to_string()));
                full.push(Some(snapshot_date.clone()));
                full.extend(row);
                Ok(full)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Snapshot {
            sequence,
            snapshot_date,
            source,
            columns,
            rows,
        })
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn snapshot_date(&self) -> &str {
        &self.snapshot_date
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Full schema, bookkeeping columns first.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

// ============================================================================
// SNAPSHOT LOADER
// ============================================================================

#[derive(Debug, Default)]
pub struct SnapshotLoader {
    /// Source id -> canonical YYYY/MM/DD label
    date_overrides: HashMap<String, String>,
}

impl SnapshotLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach explicit per-source date labels. Labels are validated and
    /// zero-padded so that string order matches calendar order.
    pub fn with_date_overrides(overrides: &HashMap<String, String>) -> Result<Self> {
        let date_overrides = overrides
            .iter()
            .map(|(id, label)| {
                let canonical = normalize_date_label(label)
                    .with_context(|| format!("Invalid date override for {}", id))?;
                Ok((id.clone(), canonical))
            })
            .collect::<anyhow::Result<HashMap<_, _>>>()?;

        Ok(SnapshotLoader { date_overrides })
    }

    /// Load every source in caller order. Sequence numbers are 1-based
    /// positions in `sources`.
    pub fn load_all(&self, sources: &[SnapshotSource]) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::with_capacity(sources.len());

        for (idx, source) in sources.iter().enumerate() {
            let snapshot = self.load_one(idx + 1, source)?;
            info!(
                sequence = snapshot.sequence(),
                source = %source.id,
                date = %snapshot.snapshot_date(),
                rows = snapshot.rows().len(),
                "snapshot loaded"
            );
            snapshots.push(snapshot);
        }

        Ok(snapshots)
    }

    fn load_one(&self, sequence: usize, source: &SnapshotSource) -> Result<Snapshot> {
        if !source.path.exists() {
            return Err(ReconcileError::SourceNotFound {
                path: source.path.clone(),
            });
        }

        let snapshot_date = self.resolve_date(source)?;
        let (header, rows) = read_table(&source.path)?;
        let snapshot = Snapshot::new(sequence, snapshot_date, source.id.clone(), header, rows)?;

        Ok(snapshot)
    }

    /// Explicit override first, file modification time otherwise.
    fn resolve_date(&self, source: &SnapshotSource) -> Result<String> {
        if let Some(label) = self.date_overrides.get(&source.id) {
            debug!(source = %source.id, date = %label, "using date override");
            return Ok(label.clone());
        }

        let modified = std::fs::metadata(&source.path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to read modification time of {}", source.id))?;
        let local: DateTime<Local> = modified.into();
        Ok(local.format(DATE_LABEL_FORMAT).to_string())
    }
}

/// Parse a `YYYY/MM/DD` label and re-emit it zero-padded.
pub fn normalize_date_label(label: &str) -> anyhow::Result<String> {
    let date = NaiveDate::parse_from_str(label.trim(), DATE_LABEL_FORMAT)
        .map_err(|e| anyhow!("'{}' is not a YYYY/MM/DD date: {}", label, e))?;
    Ok(date.format(DATE_LABEL_FORMAT).to_string())
}

/// Extensions read as workbooks; everything else is delimited text.
const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Read a table: header row plus data rows. Empty cells become `None`.
/// Workbooks are read from their first worksheet.
pub fn read_table(path: &Path) -> anyhow::Result<(Vec<String>, Vec<Vec<Cell>>)> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if WORKBOOK_EXTENSIONS.contains(&extension.as_str()) {
        read_workbook(path)
    } else if extension == "tsv" {
        read_delimited(path, b'\t')
    } else {
        read_delimited(path, b',')
    }
}

fn read_delimited(path: &Path, delimiter: u8) -> anyhow::Result<(Vec<String>, Vec<Vec<Cell>>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open table {}", path.display()))?;

    let header = rdr
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.with_context(|| format!("Failed to read row in {}", path.display()))?;
        let row = record
            .iter()
            .map(|value| {
                if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            })
            .collect();
        rows.push(row);
    }

    Ok((header, rows))
}

fn read_workbook(path: &Path) -> anyhow::Result<(Vec<String>, Vec<Vec<Cell>>)> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("{} has no worksheets", path.display()))?
        .with_context(|| format!("Failed to read first worksheet of {}", path.display()))?;

    let mut cells = range.rows();
    let header = match cells.next() {
        Some(first) => first
            .iter()
            .map(|value| workbook_cell(value).unwrap_or_default())
            .collect(),
        None => Vec::new(),
    };
    let rows = cells
        .map(|row| row.iter().map(workbook_cell).collect())
        .collect();

    Ok((header, rows))
}

fn workbook_cell(value: &Data) -> Cell {
    match value {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        other => Some(other.to_string()),
    }
}

// ============================================================================
// TESTS
// ============================================================================
