// 🎨 Annotator - Cell-level marks over the reconciled rows
// Marks are styling, never data: the emitted values are exactly the
// snapshot values, in the reconciler's final row order.

use crate::config::{MarkColors, ReconcileConfig, SEQ_COLUMN, SNAPSHOT_DATE_COLUMN};
use crate::reconcile::{MergedRecord, Reconciliation};
use crate::snapshot::Cell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

// ============================================================================
// MARKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mark {
    /// Latest record of an identity whose field values changed
    Changed,
    /// Snapshot structures disagree; nothing was compared
    Inconsistent,
}

impl Mark {
    pub fn color<'a>(&self, colors: &'a MarkColors) -> &'a str {
        match self {
            Mark::Changed => &colors.changed,
            Mark::Inconsistent => &colors.inconsistent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMark {
    /// 0-based data row (header excluded)
    pub row: usize,
    pub column: String,
    pub mark: Mark,
}

// ============================================================================
// ANNOTATED TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    /// (row, column index) -> mark
    marks: BTreeMap<(usize, usize), Mark>,
}

impl AnnotatedTable {
    pub fn mark_at(&self, row: usize, column: usize) -> Option<Mark> {
        self.marks.get(&(row, column)).copied()
    }

    /// Mark of a cell addressed by column name.
    pub fn mark_of(&self, row: usize, column: &str) -> Option<Mark> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.mark_at(row, idx)
    }

    pub fn marked_cell_count(&self) -> usize {
        self.marks.len()
    }

    pub fn count_marks(&self, mark: Mark) -> usize {
        self.marks.values().filter(|m| **m == mark).count()
    }

    /// Marks in row-major order.
    pub fn cell_marks(&self) -> Vec<CellMark> {
        self.marks
            .iter()
            .map(|(&(row, col), &mark)| CellMark {
                row,
                column: self.columns[col].clone(),
                mark,
            })
            .collect()
    }

    fn mark(&mut self, row: usize, column: usize, mark: Mark) {
        self.marks.insert((row, column), mark);
    }
}

// ============================================================================
// ANNOTATE
// ============================================================================

/// Materialize the reconciled rows and apply marks.
///
/// Internal columns are dropped first. Degraded runs get every emitted cell
/// marked inconsistent. Normal runs mark, on each changed latest record, the
/// differing cells plus `Seq`, `Snapshot_Date` and the identity cell.
pub fn annotate(reconciliation: &Reconciliation, config: &ReconcileConfig) -> AnnotatedTable {
    let source_columns = reconciliation.columns();
    let kept: Vec<usize> = (0..source_columns.len())
        .filter(|&idx| !config.is_internal(&source_columns[idx]))
        .collect();

    if kept.len() < source_columns.len() {
        debug!(
            stripped = source_columns.len() - kept.len(),
            "internal columns dropped from output"
        );
    }

    let mut table = AnnotatedTable {
        columns: kept.iter().map(|&idx| source_columns[idx].clone()).collect(),
        rows: reconciliation
            .records()
            .iter()
            .map(|record| kept.iter().map(|&idx| record.values[idx].clone()).collect())
            .collect(),
        marks: BTreeMap::new(),
    };

    match reconciliation {
        Reconciliation::Degraded(_) => {
            let width = table.columns.len();
            for row in 0..table.rows.len() {
                for col in 0..width {
                    table.mark(row, col, Mark::Inconsistent);
                }
            }
        }
        Reconciliation::Normal(merged) => {
            for (row, record) in merged.records.iter().enumerate() {
                if record.has_change() {
                    mark_changed_row(&mut table, row, record, &merged.identity_column);
                }
            }
        }
    }

    info!(
        rows = table.rows.len(),
        changed_cells = table.count_marks(Mark::Changed),
        inconsistent_cells = table.count_marks(Mark::Inconsistent),
        "annotation complete"
    );

    table
}

fn mark_changed_row(
    table: &mut AnnotatedTable,
    row: usize,
    record: &MergedRecord,
    identity_column: &str,
) {
    let targets = record
        .changed_columns()
        .iter()
        .map(String::as_str)
        .chain([SEQ_COLUMN, SNAPSHOT_DATE_COLUMN, identity_column]);

    for name in targets {
        if let Some(col) = table.columns.iter().position(|c| c == name) {
            table.mark(row, col, Mark::Changed);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Reconciler;
    use crate::snapshot::Snapshot;
    use crate::structure::validate_structure;

    fn create_test_snapshot(sequence: usize, header: &[&str], rows: &[&[&str]]) -> Snapshot {
        Snapshot::new(
            sequence,
            format!("2024/0{}/01", sequence),
            format!("s{}.csv", sequence),
            header.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| Some(v.to_string())).collect())
                .collect(),
        )
        .unwrap()
    }

    fn run(snapshots: &[Snapshot]) -> AnnotatedTable {
        let config = ReconcileConfig::default();
        let verdict = validate_structure(snapshots);
        let reconciliation = Reconciler::new(&config)
            .reconcile(snapshots, &verdict)
            .unwrap();
        annotate(&reconciliation, &config)
    }

    #[test]
    fn test_changed_row_marks() {
        let header = &["Project Name", "Budget", "Status"];
        let snapshots = vec![
            create_test_snapshot(1, header, &[&["Acme", "100", "open"], &["Beta", "1", "open"]]),
            create_test_snapshot(2, header, &[&["Acme", "250", "open"], &["Beta", "1", "open"]]),
        ];

        let table = run(&snapshots);

        // Rows: acme(1), acme(2), beta(1), beta(2)
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.mark_of(1, "Budget"), Some(Mark::Changed));
        assert_eq!(table.mark_of(1, "Seq"), Some(Mark::Changed));
        assert_eq!(table.mark_of(1, "Snapshot_Date"), Some(Mark::Changed));
        assert_eq!(table.mark_of(1, "Project Name"), Some(Mark::Changed));
        assert_eq!(table.mark_of(1, "Status"), None);
        assert_eq!(table.marked_cell_count(), 4);

        let marks = table.cell_marks();
        assert!(marks.iter().all(|m| m.row == 1));
    }

    #[test]
    fn test_inconsistent_structure_marks_every_cell() {
        let snapshots = vec![
            create_test_snapshot(1, &["Project Name", "Budget"], &[&["Acme", "100"]]),
            create_test_snapshot(2, &["Budget", "Project Name"], &[&["100", "Acme"], &["5", "Beta"]]),
        ];

        let table = run(&snapshots);

        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.columns, vec!["Seq", "Snapshot_Date", "Budget", "Project Name"]);
        assert_eq!(table.count_marks(Mark::Inconsistent), 2 * 4);
        assert_eq!(table.count_marks(Mark::Changed), 0);
    }

    #[test]
    fn test_no_shared_rows_no_marks() {
        let header = &["Project Name", "Budget"];
        let snapshots = vec![
            create_test_snapshot(1, header, &[&["Acme", "100"]]),
            create_test_snapshot(2, header, &[&["Beta", "100"]]),
        ];

        let table = run(&snapshots);
        assert_eq!(table.marked_cell_count(), 0);
    }

    #[test]
    fn test_internal_columns_are_not_emitted() {
        let header = &["Project Name", "__row_id", "Budget"];
        let snapshots = vec![
            create_test_snapshot(1, header, &[&["Acme", "r1", "100"]]),
            create_test_snapshot(2, header, &[&["Acme", "r9", "250"]]),
        ];

        let table = run(&snapshots);

        assert_eq!(table.columns, vec!["Seq", "Snapshot_Date", "Project Name", "Budget"]);
        assert!(table.rows.iter().all(|row| row.len() == 4));
        assert_eq!(table.rows[1][3], Some("250".to_string()));
        assert_eq!(table.mark_of(1, "Budget"), Some(Mark::Changed));
        assert_eq!(table.marked_cell_count(), 4);
    }

    #[test]
    fn test_internal_columns_dropped_in_degraded_mode() {
        let snapshots = vec![
            create_test_snapshot(1, &["Project Name"], &[&["Acme"]]),
            create_test_snapshot(2, &["Project Name", "__hash"], &[&["Acme", "x"]]),
        ];

        let table = run(&snapshots);

        assert_eq!(table.columns, vec!["Seq", "Snapshot_Date", "Project Name"]);
        assert_eq!(table.count_marks(Mark::Inconsistent), 3);
    }

    #[test]
    fn test_mark_colors() {
        let colors = MarkColors::default();
        assert_eq!(Mark::Changed.color(&colors), "FFFF00");
        assert_eq!(Mark::Inconsistent.color(&colors), "FF0000");
    }
}
