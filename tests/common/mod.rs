#![allow(dead_code)]

use snapshot_reconcile::{Pipeline, RunReport, RunRequest, SnapshotSource};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const HEADER: &str = "Project Name,Budget,Status,Notes";

/// Scratch directory holding snapshot fixtures and outputs.
pub struct Fixture {
    tmp: TempDir,
    sources: Vec<(SnapshotSource, String)>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().expect("create temp dir"),
            sources: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        self.tmp.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }

    /// Add a snapshot file with an explicit date label.
    pub fn snapshot(&mut self, name: &str, date: &str, content: &str) -> &mut Self {
        let path = self.path(name);
        fs::write(&path, content).expect("write snapshot fixture");
        self.sources.push((SnapshotSource::new(path), date.to_string()));
        self
    }

    /// Add a snapshot workbook with an explicit date label. `lines` are
    /// comma-separated like `table()` output; empty fields stay blank.
    pub fn workbook(&mut self, name: &str, date: &str, content: &str) -> &mut Self {
        let path = self.path(name);
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        for (row, line) in content.lines().enumerate() {
            for (col, value) in line.split(',').enumerate() {
                if !value.is_empty() {
                    sheet
                        .write_string(row as u32, col as u16, value)
                        .expect("write workbook cell");
                }
            }
        }
        workbook.save(&path).expect("write workbook fixture");
        self.sources.push((SnapshotSource::new(path), date.to_string()));
        self
    }

    pub fn request(&self, output: &str) -> RunRequest {
        let sources = self.sources.iter().map(|(s, _)| s.clone()).collect();
        self.sources
            .iter()
            .fold(RunRequest::new(sources, self.path(output)), |req, (s, date)| {
                req.with_date(s.id.clone(), date.clone())
            })
    }

    pub fn run(&self, output: &str) -> RunReport {
        Pipeline::new().run(&self.request(output)).expect("run succeeds")
    }

    pub fn read_json(&self, name: &str) -> serde_json::Value {
        let raw = fs::read_to_string(self.path(name)).expect("read json output");
        serde_json::from_str(&raw).expect("valid json")
    }
}

/// Build CSV content from the standard header and data lines.
pub fn table(lines: &[&str]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// (row, column) pairs marked with `mark` in a JSON artifact.
pub fn marked(artifact: &serde_json::Value, mark: &str) -> Vec<(u64, String)> {
    artifact["marks"]
        .as_array()
        .expect("marks array")
        .iter()
        .filter(|m| m["mark"] == mark)
        .map(|m| {
            (
                m["row"].as_u64().expect("row index"),
                m["column"].as_str().expect("column name").to_string(),
            )
        })
        .collect()
}
