// ⚙️ Reconciliation Config
// Every list the engine matches against lives here instead of in constants,
// so schema variants (localized headers, extra notes columns) are a config change.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bookkeeping column carrying the 1-based ingestion position.
pub const SEQ_COLUMN: &str = "Seq";

/// Bookkeeping column carrying the `YYYY/MM/DD` snapshot label.
pub const SNAPSHOT_DATE_COLUMN: &str = "Snapshot_Date";

// ============================================================================
// MARK COLORS
// ============================================================================

/// RGB hex colors (no leading `#`) for the two mark categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkColors {
    /// Fill for cells of an entity whose latest transition changed.
    pub changed: String,

    /// Fill for every cell when snapshot structures disagree.
    pub inconsistent: String,
}

impl Default for MarkColors {
    fn default() -> Self {
        MarkColors {
            changed: "FFFF00".to_string(),
            inconsistent: "FF0000".to_string(),
        }
    }
}

// ============================================================================
// RECONCILE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Identity column candidates in priority order. The first one present
    /// in the merged schema is used for the whole run.
    pub identity_columns: Vec<String>,

    /// Columns never compared, even when their values differ.
    pub excluded_columns: Vec<String>,

    /// Columns whose name starts with this prefix are never compared and
    /// never emitted.
    pub internal_column_prefix: String,

    pub colors: MarkColors,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            identity_columns: vec![
                "Project Name".to_string(),
                "Applicant Name".to_string(),
                "專案名稱".to_string(),
                "申請人名稱".to_string(),
            ],
            excluded_columns: vec![
                SEQ_COLUMN.to_string(),
                SNAPSHOT_DATE_COLUMN.to_string(),
                "Comments".to_string(),
                "Notes".to_string(),
                "備註".to_string(),
                "註記".to_string(),
            ],
            internal_column_prefix: "__".to_string(),
            colors: MarkColors::default(),
        }
    }
}

impl ReconcileConfig {
    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Whether a column takes part in field comparison.
    pub fn is_compared(&self, column: &str) -> bool {
        !self.excluded_columns.iter().any(|c| c == column) && !self.is_internal(column)
    }

    /// Internal columns are dropped from the emitted table.
    pub fn is_internal(&self, column: &str) -> bool {
        !self.internal_column_prefix.is_empty() && column.starts_with(&self.internal_column_prefix)
    }

    /// First identity candidate present in `columns`.
    pub fn resolve_identity_column<'a>(&'a self, columns: &[String]) -> Option<&'a str> {
        self.identity_columns
            .iter()
            .find(|candidate| columns.iter().any(|c| c == *candidate))
            .map(String::as_str)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_comparison_exclusions() {
        let config = ReconcileConfig::default();

        assert!(!config.is_compared("Seq"));
        assert!(!config.is_compared("Snapshot_Date"));
        assert!(!config.is_compared("Notes"));
        assert!(!config.is_compared("備註"));
        assert!(!config.is_compared("__row_id"));
        assert!(config.is_compared("Budget"));
        assert!(config.is_compared("Project Name"));
    }

    #[test]
    fn test_internal_columns() {
        let mut config = ReconcileConfig::default();
        assert!(config.is_internal("__row_id"));
        assert!(!config.is_internal("Notes"));
        assert!(!config.is_internal("_single"));

        config.internal_column_prefix.clear();
        assert!(!config.is_internal("__row_id"));
        assert!(config.is_compared("__row_id"));
    }

    #[test]
    fn test_identity_column_priority() {
        let config = ReconcileConfig::default();

        let both = cols(&["Seq", "Applicant Name", "Project Name"]);
        assert_eq!(config.resolve_identity_column(&both), Some("Project Name"));

        let localized = cols(&["Seq", "申請人名稱", "Budget"]);
        assert_eq!(config.resolve_identity_column(&localized), Some("申請人名稱"));

        let none = cols(&["Seq", "Budget"]);
        assert_eq!(config.resolve_identity_column(&none), None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"identity_columns": ["Site"], "colors": {{"changed": "00FF00"}}}}"#)
            .unwrap();

        let config = ReconcileConfig::from_json_file(file.path()).unwrap();

        assert_eq!(config.identity_columns, vec!["Site".to_string()]);
        assert_eq!(config.colors.changed, "00FF00");
        assert_eq!(config.colors.inconsistent, "FF0000");
        assert_eq!(config.excluded_columns, ReconcileConfig::default().excluded_columns);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let result = ReconcileConfig::from_json_file(Path::new("/definitely/not/here.json"));
        assert!(result.is_err());
    }
}
