// ⚖️ Reconciliation Engine - Match entities across snapshots
// Merges every snapshot's rows, groups them by normalized identity and
// compares the two most recent records of each identity field by field.
//
// Two rules hold for every run:
//   1. Only the latest transition (previous -> latest) is evaluated per identity.
//   2. An inconsistent structure disables all field comparison; the run falls
//      back to "latest snapshot only, fully flagged".

use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, Result};
use crate::snapshot::{Cell, Snapshot};
use crate::structure::StructureVerdict;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info};

// ============================================================================
// MERGED RECORD
// ============================================================================

/// Columns of the latest record whose value differs from the previous record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changed_columns: Vec<String>,
}

/// A snapshot row carried through reconciliation. `values` is aligned with
/// the owning collection's `columns` (so `Seq` and `Snapshot_Date` included).
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub sequence: usize,
    pub snapshot_date: String,
    pub values: Vec<Cell>,
    pub normalized_key: String,
    /// Set on at most one record per identity group: its latest one.
    pub change: Option<ChangeSet>,
}

impl MergedRecord {
    pub fn has_change(&self) -> bool {
        self.change.is_some()
    }

    pub fn changed_columns(&self) -> &[String] {
        self.change
            .as_ref()
            .map(|c| c.changed_columns.as_slice())
            .unwrap_or(&[])
    }
}

// ============================================================================
// IDENTITY GROUP
// ============================================================================

/// A contiguous run of records sharing one non-empty normalized key,
/// ordered oldest to newest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityGroup {
    pub key: String,
    pub range: Range<usize>,
}

impl IdentityGroup {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Index of the newest record in the group.
    pub fn latest(&self) -> usize {
        self.range.end - 1
    }

    /// Index of the record before the newest one, if any.
    pub fn previous(&self) -> Option<usize> {
        (self.len() >= 2).then(|| self.range.end - 2)
    }
}

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

/// Normal mode: every snapshot merged and sorted by (key, date, sequence).
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCollection {
    pub columns: Vec<String>,
    pub identity_column: String,
    pub records: Vec<MergedRecord>,
}

impl MergedCollection {
    /// Identity groups over the sorted records. Records with an empty key
    /// belong to no group.
    pub fn groups(&self) -> Vec<IdentityGroup> {
        let mut groups = Vec::new();
        let mut start = 0;

        while start < self.records.len() {
            let key = &self.records[start].normalized_key;
            let end = self.records[start..]
                .iter()
                .position(|r| &r.normalized_key != key)
                .map_or(self.records.len(), |offset| start + offset);

            if !key.is_empty() {
                groups.push(IdentityGroup {
                    key: key.clone(),
                    range: start..end,
                });
            }
            start = end;
        }

        groups
    }

    pub fn changed_count(&self) -> usize {
        self.records.iter().filter(|r| r.has_change()).count()
    }
}

/// Degraded mode: only the most recently loaded snapshot, every row flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradedCollection {
    pub columns: Vec<String>,
    /// Identity column if the latest snapshot has one; keys are empty otherwise.
    pub identity_column: Option<String>,
    /// Sequence of the snapshot the records came from.
    pub source_sequence: usize,
    pub records: Vec<MergedRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Normal(MergedCollection),
    Degraded(DegradedCollection),
}

impl Reconciliation {
    pub fn columns(&self) -> &[String] {
        match self {
            Reconciliation::Normal(c) => &c.columns,
            Reconciliation::Degraded(c) => &c.columns,
        }
    }

    pub fn records(&self) -> &[MergedRecord] {
        match self {
            Reconciliation::Normal(c) => &c.records,
            Reconciliation::Degraded(c) => &c.records,
        }
    }

    pub fn identity_column(&self) -> Option<&str> {
        match self {
            Reconciliation::Normal(c) => Some(&c.identity_column),
            Reconciliation::Degraded(c) => c.identity_column.as_deref(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Reconciliation::Degraded(_))
    }

    pub fn changed_count(&self) -> usize {
        match self {
            Reconciliation::Normal(c) => c.changed_count(),
            Reconciliation::Degraded(_) => 0,
        }
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler<'a> {
    config: &'a ReconcileConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a ReconcileConfig) -> Self {
        Reconciler { config }
    }

    /// Reconcile loaded snapshots under the given structure verdict.
    ///
    /// Fails with `MissingIdentityColumn` only in normal mode; degraded mode
    /// never fails on schema.
    pub fn reconcile(
        &self,
        snapshots: &[Snapshot],
        verdict: &StructureVerdict,
    ) -> Result<Reconciliation> {
        if verdict.is_consistent() {
            let mut merged = self.merge(snapshots)?;
            self.detect_changes(&mut merged);
            info!(
                records = merged.records.len(),
                identity_column = %merged.identity_column,
                changed = merged.changed_count(),
                "reconciliation complete"
            );
            Ok(Reconciliation::Normal(merged))
        } else {
            let degraded = self.degrade(snapshots)?;
            info!(
                records = degraded.records.len(),
                source_sequence = degraded.source_sequence,
                "structure inconsistent, flagging latest snapshot only"
            );
            Ok(Reconciliation::Degraded(degraded))
        }
    }

    fn degrade(&self, snapshots: &[Snapshot]) -> Result<DegradedCollection> {
        // Latest by load order, not by date
        let latest = snapshots
            .last()
            .ok_or_else(|| anyhow!("no snapshots to reconcile"))?;

        let columns = latest.columns().to_vec();
        let identity_column = self
            .config
            .resolve_identity_column(&columns)
            .map(str::to_string);
        let key_idx = identity_column
            .as_deref()
            .and_then(|name| latest.column_index(name));

        let records = latest
            .rows()
            .iter()
            .map(|row| MergedRecord {
                sequence: latest.sequence(),
                snapshot_date: latest.snapshot_date().to_string(),
                normalized_key: key_idx.map(|i| normalize_key(&row[i])).unwrap_or_default(),
                values: row.clone(),
                change: None,
            })
            .collect();

        Ok(DegradedCollection {
            columns,
            identity_column,
            source_sequence: latest.sequence(),
            records,
        })
    }

    fn merge(&self, snapshots: &[Snapshot]) -> Result<MergedCollection> {
        let first = snapshots
            .first()
            .ok_or_else(|| anyhow!("no snapshots to reconcile"))?;

        // Structure is consistent here, so every snapshot shares this schema
        let columns = first.columns().to_vec();

        let identity_column = self
            .config
            .resolve_identity_column(&columns)
            .ok_or_else(|| ReconcileError::MissingIdentityColumn {
                candidates: self.config.identity_columns.clone(),
            })?
            .to_string();
        let key_idx = columns
            .iter()
            .position(|c| c == &identity_column)
            .ok_or_else(|| anyhow!("identity column '{}' vanished", identity_column))?;

        let mut records: Vec<MergedRecord> = snapshots
            .iter()
            .flat_map(|snapshot| {
                snapshot.rows().iter().map(move |row| MergedRecord {
                    sequence: snapshot.sequence(),
                    snapshot_date: snapshot.snapshot_date().to_string(),
                    normalized_key: normalize_key(&row[key_idx]),
                    values: row.clone(),
                    change: None,
                })
            })
            .collect();

        // Stable: rows tied on all three keys keep load order
        records.sort_by(|a, b| {
            a.normalized_key
                .cmp(&b.normalized_key)
                .then_with(|| a.snapshot_date.cmp(&b.snapshot_date))
                .then_with(|| a.sequence.cmp(&b.sequence))
        });

        Ok(MergedCollection {
            columns,
            identity_column,
            records,
        })
    }

    fn detect_changes(&self, merged: &mut MergedCollection) {
        let compared: Vec<usize> = merged
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| self.config.is_compared(name))
            .map(|(idx, _)| idx)
            .collect();

        for group in merged.groups() {
            let Some(previous) = group.previous() else {
                continue; // brand-new identity
            };
            let latest = group.latest();

            let changed_columns = compare_records(
                &merged.columns,
                &compared,
                &merged.records[latest],
                &merged.records[previous],
            );

            if !changed_columns.is_empty() {
                debug!(key = %group.key, columns = ?changed_columns, "identity changed");
                merged.records[latest].change = Some(ChangeSet { changed_columns });
            }
        }
    }
}

/// Case-folded, trimmed identity key. Missing values map to the empty key.
pub fn normalize_key(value: &Cell) -> String {
    match value {
        Some(v) => v.trim().to_lowercase(),
        None => String::new(),
    }
}

/// Whether two cells differ: both missing is equal, one missing differs,
/// otherwise trimmed strings are compared.
pub fn cells_differ(latest: &Cell, previous: &Cell) -> bool {
    match (latest, previous) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(a), Some(b)) => a.trim() != b.trim(),
    }
}

/// Names of compared columns whose values differ, in column order.
pub fn compare_records(
    columns: &[String],
    compared: &[usize],
    latest: &MergedRecord,
    previous: &MergedRecord,
) -> Vec<String> {
    compared
        .iter()
        .filter(|&&idx| match (latest.values.get(idx), previous.values.get(idx)) {
            (Some(a), Some(b)) => cells_differ(a, b),
            _ => false,
        })
        .map(|&idx| columns[idx].clone())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
