// 💾 Artifact Export
// Persists an annotated table. The annotator never knows about files; this
// module owns formats, cell styles and atomic writes.

use crate::annotate::{AnnotatedTable, Mark};
use crate::config::MarkColors;
use anyhow::{anyhow, Context, Result};
use rust_xlsxwriter::{Color, Format, FormatPattern, Workbook};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

/// Worksheet name used for xlsx output.
pub const XLSX_SHEET_NAME: &str = "Reconciled";

// ============================================================================
// FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Data as CSV plus a `<output>.marks.json` sidecar with the styles
    Csv,
    /// Standalone HTML table with inline fills
    Html,
    /// Single JSON document with data and marks
    Json,
    /// Excel workbook, marks as solid cell fills
    Xlsx,
}

impl ArtifactFormat {
    /// Pick a format from the output extension. Unknown extensions get CSV.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("html") | Some("htm") => ArtifactFormat::Html,
            Some("json") => ArtifactFormat::Json,
            Some("xlsx") => ArtifactFormat::Xlsx,
            _ => ArtifactFormat::Csv,
        }
    }
}

/// What was written, and a digest over every byte written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub format: ArtifactFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<PathBuf>,
    pub sha256: String,
}

// ============================================================================
// SERIALIZED SHAPES
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StyledMark {
    row: usize,
    column: String,
    mark: Mark,
    color: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonArtifact {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    marks: Vec<StyledMark>,
}

fn styled_marks(table: &AnnotatedTable, colors: &MarkColors) -> Vec<StyledMark> {
    table
        .cell_marks()
        .into_iter()
        .map(|m| StyledMark {
            color: m.mark.color(colors).to_string(),
            row: m.row,
            column: m.column,
            mark: m.mark,
        })
        .collect()
}

fn rendered_rows(table: &AnnotatedTable) -> Vec<Vec<String>> {
    table
        .rows
        .iter()
        .map(|row| row.iter().map(|c| c.clone().unwrap_or_default()).collect())
        .collect()
}

// ============================================================================
// RENDERERS
// ============================================================================

pub fn render_csv(table: &AnnotatedTable) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(&table.columns)
        .context("Failed to write CSV header")?;
    for row in rendered_rows(table) {
        wtr.write_record(&row).context("Failed to write CSV row")?;
    }
    wtr.into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV output: {}", e.error()))
}

pub fn render_marks_json(table: &AnnotatedTable, colors: &MarkColors) -> Result<Vec<u8>> {
    let marks = styled_marks(table, colors);
    serde_json::to_vec_pretty(&marks).context("Failed to serialize marks")
}

pub fn render_json(table: &AnnotatedTable, colors: &MarkColors) -> Result<Vec<u8>> {
    let artifact = JsonArtifact {
        columns: table.columns.clone(),
        rows: rendered_rows(table),
        marks: styled_marks(table, colors),
    };
    serde_json::to_vec_pretty(&artifact).context("Failed to serialize artifact")
}

pub fn render_html(table: &AnnotatedTable, colors: &MarkColors) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Snapshot reconciliation</title></head>\n<body>\n<table border=\"1\">\n<thead><tr>");
    for column in &table.columns {
        out.push_str("<th>");
        out.push_str(&escape_html(column));
        out.push_str("</th>");
    }
    out.push_str("</tr></thead>\n<tbody>\n");

    for (row_idx, row) in table.rows.iter().enumerate() {
        out.push_str("<tr>");
        for (col_idx, cell) in row.iter().enumerate() {
            match table.mark_at(row_idx, col_idx) {
                Some(mark) => {
                    out.push_str(&format!(
                        "<td style=\"background-color:#{}\">",
                        mark.color(colors)
                    ));
                }
                None => out.push_str("<td>"),
            }
            out.push_str(&escape_html(cell.as_deref().unwrap_or("")));
            out.push_str("</td>");
        }
        out.push_str("</tr>\n");
    }

    out.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    out.into_bytes()
}

pub fn render_xlsx(table: &AnnotatedTable, colors: &MarkColors) -> Result<Vec<u8>> {
    let changed = fill_format(&colors.changed)?;
    let inconsistent = fill_format(&colors.inconsistent)?;

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(XLSX_SHEET_NAME)?;

    for (col_idx, name) in table.columns.iter().enumerate() {
        sheet.write_string(0, column_number(col_idx)?, name)?;
    }

    for (row_idx, row) in table.rows.iter().enumerate() {
        let xl_row = u32::try_from(row_idx + 1).context("Too many rows for a worksheet")?;
        for (col_idx, cell) in row.iter().enumerate() {
            let xl_col = column_number(col_idx)?;
            let fill = match table.mark_at(row_idx, col_idx) {
                Some(Mark::Changed) => Some(&changed),
                Some(Mark::Inconsistent) => Some(&inconsistent),
                None => None,
            };
            match (cell, fill) {
                (Some(value), Some(format)) => {
                    sheet.write_string_with_format(xl_row, xl_col, value, format)?;
                }
                (Some(value), None) => {
                    sheet.write_string(xl_row, xl_col, value)?;
                }
                (None, Some(format)) => {
                    sheet.write_blank(xl_row, xl_col, format)?;
                }
                (None, None) => {}
            }
        }
    }

    workbook
        .save_to_buffer()
        .context("Failed to build xlsx workbook")
}

fn column_number(idx: usize) -> Result<u16> {
    u16::try_from(idx).context("Too many columns for a worksheet")
}

/// Solid fill from an `RRGGBB` hex string.
fn fill_format(hex: &str) -> Result<Format> {
    let digits = hex.trim_start_matches('#');
    let rgb = u32::from_str_radix(digits, 16)
        .ok()
        .filter(|_| digits.len() == 6)
        .ok_or_else(|| anyhow!("'{}' is not an RRGGBB color", hex))?;

    Ok(Format::new()
        .set_pattern(FormatPattern::Solid)
        .set_background_color(Color::RGB(rgb)))
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

// ============================================================================
// WRITE
// ============================================================================

/// Sidecar path for CSV output: `report.csv` -> `report.csv.marks.json`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".marks.json");
    PathBuf::from(name)
}

/// Render and persist the table at `path` in the format its extension picks.
/// Either every file of the artifact lands on disk or none does.
pub fn write_artifact(
    table: &AnnotatedTable,
    path: &Path,
    colors: &MarkColors,
) -> Result<ExportSummary> {
    let format = ArtifactFormat::from_path(path);

    let (data, marks) = match format {
        ArtifactFormat::Csv => (
            render_csv(table)?,
            Some((sidecar_path(path), render_marks_json(table, colors)?)),
        ),
        ArtifactFormat::Html => (render_html(table, colors), None),
        ArtifactFormat::Json => (render_json(table, colors)?, None),
        ArtifactFormat::Xlsx => (render_xlsx(table, colors)?, None),
    };

    let mut hasher = Sha256::new();
    hasher.update(&data);
    let mut staged = vec![stage(path, &data)?];
    if let Some((sidecar, bytes)) = &marks {
        hasher.update(bytes);
        staged.push(stage(sidecar, bytes)?);
    }
    commit(staged)?;

    Ok(ExportSummary {
        path: path.to_path_buf(),
        format,
        sidecar: marks.map(|(sidecar, _)| sidecar),
        sha256: format!("{:x}", hasher.finalize()),
    })
}

/// Fully written temp file waiting to be renamed onto `path`.
struct StagedFile {
    tmp: NamedTempFile,
    path: PathBuf,
}

/// Write to a temp file next to `path`.
fn stage(path: &Path, bytes: &[u8]) -> Result<StagedFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(StagedFile {
        tmp,
        path: path.to_path_buf(),
    })
}

/// Rename every staged file into place. If one rename fails, files already
/// renamed by this call are removed again.
fn commit(staged: Vec<StagedFile>) -> Result<()> {
    let mut persisted: Vec<PathBuf> = Vec::with_capacity(staged.len());

    for StagedFile { tmp, path } in staged {
        if let Err(err) = tmp.persist(&path) {
            for done in &persisted {
                if let Err(cleanup) = fs::remove_file(done) {
                    warn!(path = %done.display(), error = %cleanup, "failed to remove partial artifact");
                }
            }
            return Err(anyhow::Error::new(err.error)
                .context(format!("Failed to persist {}", path.display())));
        }
        persisted.push(path);
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
