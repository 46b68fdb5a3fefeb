//! Accumulated per-batch failure reports.

use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A failure captured while one processor handled one batch.
#[derive(Debug)]
pub struct ErrorReport {
    pub processor: String,
    pub batch_index: usize,
    pub error: Error,
}

impl ErrorReport {
    pub fn new(processor: impl Into<String>, batch_index: usize, error: Error) -> Self {
        Self {
            processor: processor.into(),
            batch_index,
            error,
        }
    }

    pub fn error_type(&self) -> &'static str {
        self.error.type_name()
    }

    pub fn message(&self) -> String {
        // alternate form expands anyhow context chains
        format!("{:#}", self.error)
    }
}

/// Append-only log of error reports for one run.
#[derive(Debug, Default)]
pub struct ErrorStack {
    reports: Vec<ErrorReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub processor: String,
    pub batch_index: usize,
    pub error_type: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_processor: BTreeMap<String, usize>,
    pub reports: Vec<ReportSummary>,
}

impl ErrorStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, report: ErrorReport) {
        tracing::error!(
            processor = %report.processor,
            batch = report.batch_index,
            "{}",
            report.message()
        );
        self.reports.push(report);
    }

    pub fn extend(&mut self, other: ErrorStack) {
        self.reports.extend(other.reports);
    }

    pub fn reports(&self) -> &[ErrorReport] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<ErrorReport> {
        self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn first_error(&self) -> Option<&Error> {
        self.reports.first().map(|report| &report.error)
    }

    pub fn summary(&self) -> ErrorSummary {
        let mut by_processor = BTreeMap::new();
        for report in &self.reports {
            *by_processor.entry(report.processor.clone()).or_insert(0) += 1;
        }

        ErrorSummary {
            total: self.reports.len(),
            by_processor,
            reports: self
                .reports
                .iter()
                .map(|report| ReportSummary {
                    processor: report.processor.clone(),
                    batch_index: report.batch_index,
                    error_type: report.error_type().to_string(),
                    message: report.message(),
                })
                .collect(),
        }
    }

    /// Logs the summary and, if `output_path` is given, writes it as YAML or
    /// JSON depending on the file extension.
    pub fn summarise(&self, output_path: Option<&Path>) -> Result<ErrorSummary> {
        let summary = self.summary();

        if summary.total == 0 {
            tracing::info!("Reduction finished without errors");
        } else {
            tracing::warn!(
                "Reduction finished with {} error(s) across {} processor(s)",
                summary.total,
                summary.by_processor.len()
            );
        }

        if let Some(path) = output_path {
            common::serde::save_to_file(&summary, path).map_err(|e| Error::codec(path, e))?;
            tracing::info!(path = %path.display(), "Error summary written");
        }

        Ok(summary)
    }
}

impl AddAssign for ErrorStack {
    fn add_assign(&mut self, other: ErrorStack) {
        self.extend(other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(processor: &str, batch_index: usize) -> ErrorReport {
        ErrorReport::new(
            processor,
            batch_index,
            anyhow::anyhow!("bad frame {batch_index}").into(),
        )
    }

    #[test]
    fn test_add_assign_appends_in_order() {
        let mut stack = ErrorStack::new();
        stack.push(report("dark", 0));

        let mut other = ErrorStack::new();
        other.push(report("flat", 2));
        other.push(report("flat", 3));

        stack += other;

        let indices: Vec<_> = stack.reports().iter().map(|r| r.batch_index).collect();
        assert_eq!(indices, vec![0, 2, 3]);
        assert_eq!(stack.first_error().unwrap().to_string(), "bad frame 0");
    }

    #[test]
    fn test_summary_counts_by_processor() {
        let mut stack = ErrorStack::new();
        stack.push(report("flat", 0));
        stack.push(report("flat", 1));
        stack.push(report("dark", 1));

        let summary = stack.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_processor["flat"], 2);
        assert_eq!(summary.by_processor["dark"], 1);
        assert_eq!(summary.reports[2].error_type, "ProcessingError");
    }

    #[test]
    fn test_summarise_writes_yaml_even_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("night/errors.yaml");

        let summary = ErrorStack::new().summarise(Some(&path)).unwrap();
        assert_eq!(summary.total, 0);

        let written: ErrorSummary = common::serde::load_from_file(&path).unwrap();
        assert_eq!(written, summary);
    }

    #[test]
    fn test_summarise_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.txt");
        assert!(ErrorStack::new().summarise(Some(&path)).is_err());
    }

    #[test]
    fn test_message_includes_source_chain() {
        let err = Error::io(
            "/data/cal",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let report = ErrorReport::new("save", 0, err);
        assert!(report.message().contains("denied"));
    }
}
