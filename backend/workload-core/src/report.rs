// src/report.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Row-level warnings ---

/// A locally recovered, row-level problem. Every default the pipeline applies
/// leaves one of these behind so it can be counted in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowWarning {
    /// The activity date could not be parsed; the row keeps a null date and no week.
    UnparsableDate { row: usize, raw: String },
    /// The duration could not be parsed; the row counts as zero hours.
    UnparsableDuration { row: usize, raw: String },
    /// A numeric roster/budget cell could not be parsed; the value defaults to zero.
    UnparsableNumber {
        source_name: String,
        row: usize,
        column: String,
        raw: String,
    },
    /// An employee in the timesheet has no roster record; enrichment columns stay null.
    RosterMismatch { employee_name: String, rows: usize },
    /// A budget code matched no timesheet row; its actual cost is zero.
    BudgetMismatch { project_code: String },
    /// A timesheet row matched several budget codes and was summed into each.
    AmbiguousBudgetMatch {
        row: usize,
        client: String,
        codes: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WarningKind {
    UnparsableDate,
    UnparsableDuration,
    UnparsableNumber,
    RosterMismatch,
    BudgetMismatch,
    AmbiguousBudgetMatch,
}

impl WarningKind {
    pub fn label(&self) -> &'static str {
        match self {
            WarningKind::UnparsableDate => "Unparsable dates",
            WarningKind::UnparsableDuration => "Unparsable durations",
            WarningKind::UnparsableNumber => "Unparsable numbers",
            WarningKind::RosterMismatch => "Rows without roster match",
            WarningKind::BudgetMismatch => "Budget codes without entries",
            WarningKind::AmbiguousBudgetMatch => "Rows matching several budget codes",
        }
    }
}

impl RowWarning {
    pub fn kind(&self) -> WarningKind {
        match self {
            RowWarning::UnparsableDate { .. } => WarningKind::UnparsableDate,
            RowWarning::UnparsableDuration { .. } => WarningKind::UnparsableDuration,
            RowWarning::UnparsableNumber { .. } => WarningKind::UnparsableNumber,
            RowWarning::RosterMismatch { .. } => WarningKind::RosterMismatch,
            RowWarning::BudgetMismatch { .. } => WarningKind::BudgetMismatch,
            RowWarning::AmbiguousBudgetMatch { .. } => WarningKind::AmbiguousBudgetMatch,
        }
    }

    /// Number of fact rows this warning stands for.
    fn weight(&self) -> usize {
        match self {
            RowWarning::RosterMismatch { rows, .. } => *rows,
            _ => 1,
        }
    }
}

// --- Run report ---

/// An input file whose processing aborted while the rest of the run continued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source_name: String,
    pub data_rows: usize,
}

/// Audit trail of a single pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub sources: Vec<SourceSummary>,
    pub group_header_rows: usize,
    pub skipped_summary_rows: usize,
    pub duplicates_removed: usize,
    /// Entries dropped by the missing-values cleaning pass.
    #[serde(default)]
    pub incomplete_rows_dropped: usize,
    pub warnings: Vec<RowWarning>,
    pub aborted_sources: Vec<SourceFailure>,
}

impl RunReport {
    pub fn warn(&mut self, warning: RowWarning) {
        self.warnings.push(warning);
    }

    pub fn record_source(&mut self, source_name: &str, data_rows: usize) {
        self.sources.push(SourceSummary {
            source_name: source_name.to_string(),
            data_rows,
        });
    }

    pub fn record_failure(&mut self, source_name: &str, message: String) {
        self.aborted_sources.push(SourceFailure {
            source_name: source_name.to_string(),
            message,
        });
    }

    /// Number of rows affected by warnings of the given kind.
    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings
            .iter()
            .filter(|w| w.kind() == kind)
            .map(RowWarning::weight)
            .sum()
    }

    pub fn counts(&self) -> BTreeMap<WarningKind, usize> {
        let mut counts = BTreeMap::new();
        for warning in &self.warnings {
            *counts.entry(warning.kind()).or_insert(0) += warning.weight();
        }
        counts
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.aborted_sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_mismatch_counts_every_affected_row() {
        let mut report = RunReport::default();
        report.warn(RowWarning::RosterMismatch {
            employee_name: "John Doe".into(),
            rows: 3,
        });
        report.warn(RowWarning::UnparsableDuration {
            row: 7,
            raw: "n/a".into(),
        });

        assert_eq!(report.count(WarningKind::RosterMismatch), 3);
        assert_eq!(report.count(WarningKind::UnparsableDuration), 1);
        assert_eq!(report.count(WarningKind::UnparsableDate), 0);
        assert_eq!(report.counts().get(&WarningKind::RosterMismatch), Some(&3));
        assert!(!report.is_clean());
    }
}
