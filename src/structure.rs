// 📐 Structure Validator
// One verdict for the whole run: every snapshot must carry exactly the
// first snapshot's columns, same names, same order.

use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

// ============================================================================
// MISMATCH KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MismatchKind {
    /// Different number of columns
    ColumnCount,
    /// Same count, different set of names
    ColumnNames,
    /// Same names, different order
    ColumnOrder,
}

impl MismatchKind {
    pub fn describe(&self) -> &'static str {
        match self {
            MismatchKind::ColumnCount => "column count differs",
            MismatchKind::ColumnNames => "column names differ",
            MismatchKind::ColumnOrder => "column order differs",
        }
    }
}

// ============================================================================
// STRUCTURE VERDICT
// ============================================================================

/// System-wide structure verdict. When inconsistent, only the first
/// disagreement found is reported; one disagreement taints the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StructureVerdict {
    Consistent,
    Inconsistent {
        /// Sequence of the first snapshot that disagreed with the baseline
        sequence: usize,
        kind: MismatchKind,
    },
}

impl StructureVerdict {
    pub fn is_consistent(&self) -> bool {
        matches!(self, StructureVerdict::Consistent)
    }

    pub fn summary(&self) -> String {
        match self {
            StructureVerdict::Consistent => "structure consistent".to_string(),
            StructureVerdict::Inconsistent { sequence, kind } => {
                format!("structure inconsistent: snapshot {} {}", sequence, kind.describe())
            }
        }
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Compare every snapshot against the first one. Fewer than two snapshots
/// are trivially consistent.
pub fn validate_structure(snapshots: &[Snapshot]) -> StructureVerdict {
    let Some((baseline, rest)) = snapshots.split_first() else {
        return StructureVerdict::Consistent;
    };

    let base_columns = baseline.columns();
    let base_set: HashSet<&String> = base_columns.iter().collect();

    for snapshot in rest {
        if let Some(kind) = compare_columns(base_columns, &base_set, snapshot.columns()) {
            let verdict = StructureVerdict::Inconsistent {
                sequence: snapshot.sequence(),
                kind,
            };
            warn!(
                sequence = snapshot.sequence(),
                source = %snapshot.source(),
                reason = kind.describe(),
                "snapshot structure disagrees with baseline"
            );
            return verdict;
        }
    }

    info!(snapshots = snapshots.len(), "structure consistent");
    StructureVerdict::Consistent
}

fn compare_columns(
    base: &[String],
    base_set: &HashSet<&String>,
    current: &[String],
) -> Option<MismatchKind> {
    if current.len() != base.len() {
        return Some(MismatchKind::ColumnCount);
    }

    let current_set: HashSet<&String> = current.iter().collect();
    if &current_set != base_set {
        return Some(MismatchKind::ColumnNames);
    }

    if current != base {
        return Some(MismatchKind::ColumnOrder);
    }

    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(sequence: usize, header: &[&str]) -> Snapshot {
        Snapshot::new(
            sequence,
            "2024/01/01",
            format!("s{}.csv", sequence),
            header.iter().map(|s| s.to_string()).collect(),
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_identical_schemas_are_consistent() {
        let snapshots = vec![
            snapshot(1, &["Project Name", "Budget"]),
            snapshot(2, &["Project Name", "Budget"]),
            snapshot(3, &["Project Name", "Budget"]),
        ];

        let verdict = validate_structure(&snapshots);
        assert!(verdict.is_consistent());
    }

    #[test]
    fn test_added_column_is_count_mismatch() {
        let snapshots = vec![
            snapshot(1, &["Project Name", "Budget"]),
            snapshot(2, &["Project Name", "Budget", "Owner"]),
        ];

        assert_eq!(
            validate_structure(&snapshots),
            StructureVerdict::Inconsistent {
                sequence: 2,
                kind: MismatchKind::ColumnCount
            }
        );
    }

    #[test]
    fn test_renamed_column_is_names_mismatch() {
        let snapshots = vec![
            snapshot(1, &["Project Name", "Budget"]),
            snapshot(2, &["Project Name", "Cost"]),
        ];

        let verdict = validate_structure(&snapshots);
        assert!(matches!(
            verdict,
            StructureVerdict::Inconsistent {
                kind: MismatchKind::ColumnNames,
                ..
            }
        ));
    }

    #[test]
    fn test_reorder_alone_is_inconsistent() {
        let snapshots = vec![
            snapshot(1, &["Project Name", "Budget"]),
            snapshot(2, &["Budget", "Project Name"]),
        ];

        let verdict = validate_structure(&snapshots);
        assert!(!verdict.is_consistent());
        assert!(verdict.summary().contains("column order differs"));
    }

    #[test]
    fn test_first_mismatch_short_circuits() {
        let snapshots = vec![
            snapshot(1, &["Project Name", "Budget"]),
            snapshot(2, &["Project Name", "Budget"]),
            snapshot(3, &["Budget", "Project Name"]),
            snapshot(4, &["Project Name"]),
        ];

        assert_eq!(
            validate_structure(&snapshots),
            StructureVerdict::Inconsistent {
                sequence: 3,
                kind: MismatchKind::ColumnOrder
            }
        );
    }

    #[test]
    fn test_single_snapshot_is_consistent() {
        assert!(validate_structure(&[snapshot(1, &["A"])]).is_consistent());
        assert!(validate_structure(&[]).is_consistent());
    }
}
