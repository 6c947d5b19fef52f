// src/pipeline.rs
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::budget::{reconcile, BudgetComparison};
use crate::config::{AmbiguousMatchPolicy, PipelineConfig};
use crate::enrich::{ambiguous_matches, build_fact_table, match_budget, Roster};
use crate::error::PipelineError;
use crate::loader::{load_budget, load_roster, load_timesheet, SourceFile};
use crate::metrics::{
    self, BreakdownPeriod, BreakdownRow, CategoryEngagement, DistributionKey, DistributionRow,
    EmployeeSummary, ShortfallRow, TeamSummary, TeamWeekTrend, TimeOffRow, TopPerformer, WeekScope,
    WeeklySummary,
};
use crate::model::{BudgetRecord, FactRow, RosterRecord, TimeEntry};
use crate::report::{RowWarning, RunReport};
use crate::temporal::WeekIndex;

/// The inputs of one run. Roster and budget register are optional.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub timesheet: SourceFile,
    pub roster: Option<SourceFile>,
    pub budget: Option<SourceFile>,
}

/// Treatment of entries with missing values: a blank client or category,
/// an unparsable date or an unparsable duration. Fills also cover a blank
/// description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingValues {
    /// Keep entries as loaded. Unparsable durations already count as 0 hours.
    #[default]
    Keep,
    /// Fill blank client, category and description text with "Unknown".
    FillUnknown,
    /// Fill blank text with "0". Durations already default to 0 hours.
    FillZero,
    /// Drop every entry with a missing value. A blank description alone keeps the entry.
    DropRows,
}

/// Optional passes applied to the time entries before enrichment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningOptions {
    /// Collapse runs of inner whitespace in client and description text.
    pub trim_text: bool,
    /// Drop entries identical to an earlier one in every source field.
    pub drop_duplicates: bool,
    pub missing_values: MissingValues,
}

pub const UNKNOWN_FILL: &str = "Unknown";

/// Everything a run produced. Summaries are not stored; they are computed
/// from the fact table on demand by the methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub facts: Vec<FactRow>,
    pub roster: Option<Vec<RosterRecord>>,
    pub budget: Option<Vec<BudgetRecord>>,
    pub report: RunReport,
    pub config: PipelineConfig,
}

/// Runs the full pipeline.
///
/// A structural failure of the timesheet aborts the run. A structural failure
/// of the roster or budget register is recorded in the report and the run
/// continues without that input.
pub fn run(
    inputs: &PipelineInputs,
    config: &PipelineConfig,
    options: CleaningOptions,
) -> Result<PipelineResult, PipelineError> {
    config.validate()?;
    let mut report = RunReport::default();

    info!("Processing timesheet '{}'", inputs.timesheet.name);
    let entries = load_timesheet(&inputs.timesheet, config, &mut report).map_err(|e| {
        error!("Timesheet '{}' could not be processed: {}", inputs.timesheet.name, e);
        e
    })?;
    let entries = clean_entries(entries, options, &mut report);

    let roster = match &inputs.roster {
        Some(source) => optional_source(source, &mut report, |s, r| load_roster(s, config, r))?,
        None => {
            info!("No roster supplied");
            None
        }
    };
    let budget = match &inputs.budget {
        Some(source) => optional_source(source, &mut report, |s, r| load_budget(s, config, r))?,
        None => None,
    };

    let roster_index = roster.clone().map(Roster::new);
    let facts = build_fact_table(entries, roster_index.as_ref(), config.roster_join, &mut report);

    if let Some(records) = &budget {
        audit_budget_matches(records, &facts, config.ambiguous_budget_policy, &mut report)?;
    }

    info!(
        "Pipeline finished: {} fact rows, {} warning(s), {} aborted source(s)",
        facts.len(),
        report.warnings.len(),
        report.aborted_sources.len()
    );

    Ok(PipelineResult {
        facts,
        roster,
        budget,
        report,
        config: config.clone(),
    })
}

// Structural failures of an optional input abort only that input.
fn optional_source<T>(
    source: &SourceFile,
    report: &mut RunReport,
    load: impl FnOnce(&SourceFile, &mut RunReport) -> Result<T, PipelineError>,
) -> Result<Option<T>, PipelineError> {
    match load(source, report) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_malformed_source() => {
            error!("Skipping '{}': {}", source.name, e);
            report.record_failure(&source.name, e.to_string());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn audit_budget_matches(
    records: &[BudgetRecord],
    facts: &[FactRow],
    policy: AmbiguousMatchPolicy,
    report: &mut RunReport,
) -> Result<(), PipelineError> {
    for record in records {
        if match_budget(record, facts).is_empty() {
            warn!("Budget code '{}' matches no timesheet row", record.project_code);
            report.warn(RowWarning::BudgetMismatch {
                project_code: record.project_code.clone(),
            });
        }
    }

    let ambiguous = ambiguous_matches(records, facts);
    if let (AmbiguousMatchPolicy::Reject, Some(first)) = (policy, ambiguous.first()) {
        return Err(PipelineError::AmbiguousBudgetMatch {
            client: first.client.clone(),
            codes: first.codes.clone(),
        });
    }
    for m in ambiguous {
        warn!(
            "Row {} (client '{}') matches budget codes {:?}; summed into each",
            m.row_number, m.client, m.codes
        );
        report.warn(RowWarning::AmbiguousBudgetMatch {
            row: m.row_number,
            client: m.client,
            codes: m.codes,
        });
    }
    Ok(())
}

// --- Cleaning passes ---

fn clean_entries(
    mut entries: Vec<TimeEntry>,
    options: CleaningOptions,
    report: &mut RunReport,
) -> Vec<TimeEntry> {
    if options.trim_text {
        for entry in &mut entries {
            entry.client = collapse_whitespace(&entry.client);
            entry.description = entry
                .description
                .as_deref()
                .map(collapse_whitespace)
                .filter(|d| !d.is_empty());
        }
    }

    match options.missing_values {
        MissingValues::Keep => {}
        MissingValues::FillUnknown => fill_missing_text(&mut entries, UNKNOWN_FILL),
        MissingValues::FillZero => fill_missing_text(&mut entries, "0"),
        MissingValues::DropRows => {
            let before = entries.len();
            entries.retain(|e| !has_missing_value(e));
            report.incomplete_rows_dropped = before - entries.len();
            if report.incomplete_rows_dropped > 0 {
                info!("Dropped {} entries with missing values", report.incomplete_rows_dropped);
            }
        }
    }

    if options.drop_duplicates {
        let before = entries.len();
        let mut seen = HashSet::new();
        entries.retain(|e| {
            seen.insert((
                e.employee_name.clone(),
                e.raw_activity_date.clone(),
                e.client.clone(),
                e.raw_category.clone(),
                e.raw_duration.clone(),
                e.description.clone(),
            ))
        });
        report.duplicates_removed = before - entries.len();
        if report.duplicates_removed > 0 {
            info!("Removed {} duplicate entries", report.duplicates_removed);
        }
    }

    entries
}

fn has_missing_value(entry: &TimeEntry) -> bool {
    entry.client.trim().is_empty()
        || entry.service_category.trim().is_empty()
        || entry.activity_date.is_none()
        || entry.duration_defaulted
}

fn fill_missing_text(entries: &mut [TimeEntry], fill: &str) {
    for entry in entries {
        if entry.client.trim().is_empty() {
            entry.client = fill.to_string();
        }
        if entry.service_category.trim().is_empty() {
            entry.service_category = fill.to_string();
        }
        if entry.description.is_none() {
            entry.description = Some(fill.to_string());
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// --- Views ---

impl PipelineResult {
    pub fn roster_index(&self) -> Option<Roster> {
        self.roster.clone().map(Roster::new)
    }

    pub fn weekly_summaries(&self) -> Vec<WeeklySummary> {
        metrics::weekly_summaries(&self.facts, &self.config)
    }

    pub fn employee_summaries(&self) -> Vec<EmployeeSummary> {
        metrics::employee_summaries(&self.facts, &self.config)
    }

    /// Team targets need the roster; without it no row has a team.
    pub fn team_report(&self) -> Result<Vec<TeamSummary>, PipelineError> {
        self.require_roster("team report")?;
        Ok(metrics::team_report(&self.facts, &self.config))
    }

    pub fn team_weekly_trend(&self) -> Result<Vec<TeamWeekTrend>, PipelineError> {
        self.require_roster("team trend")?;
        Ok(metrics::team_weekly_trend(&self.facts, &self.config))
    }

    pub fn category_engagement(&self, scope: WeekScope) -> Result<Vec<CategoryEngagement>, PipelineError> {
        let roster = self.require_roster_index("category engagement")?;
        Ok(metrics::category_engagement(&self.facts, &roster, &self.config, scope))
    }

    /// Time off by position and employee for the given week, or the latest week.
    pub fn time_off_breakdown(&self, week: Option<WeekIndex>) -> Result<Vec<TimeOffRow>, PipelineError> {
        let roster = self.require_roster_index("time off breakdown")?;
        let Some(week) = week.or_else(|| self.latest_week()) else {
            return Ok(Vec::new());
        };
        Ok(metrics::time_off_breakdown(&self.facts, &roster, &self.config, week))
    }

    pub fn employee_breakdown(&self, employee_name: &str, period: BreakdownPeriod) -> Vec<BreakdownRow> {
        metrics::employee_breakdown(&self.facts, &self.config, employee_name, period)
    }

    /// Distribution for the given week, or the latest week when `None`.
    pub fn workload_distribution(
        &self,
        week: Option<WeekIndex>,
        key: DistributionKey,
    ) -> Result<Vec<DistributionRow>, PipelineError> {
        self.require_roster("workload distribution")?;
        let Some(week) = week.or_else(|| self.latest_week()) else {
            return Ok(Vec::new());
        };
        Ok(metrics::workload_distribution(&self.facts, &self.config, week, key))
    }

    pub fn capacity_shortfall(&self) -> Result<Vec<ShortfallRow>, PipelineError> {
        let roster = self.require_roster_index("capacity shortfall check")?;
        Ok(metrics::capacity_shortfall(&self.facts, &roster, &self.config))
    }

    pub fn top_performers(&self, limit: Option<usize>) -> Result<Vec<TopPerformer>, PipelineError> {
        self.require_roster("top performers")?;
        Ok(metrics::top_performers(&self.facts, &self.config, limit))
    }

    pub fn budget_comparison(&self) -> Result<Vec<BudgetComparison>, PipelineError> {
        self.require_roster("budget comparison")?;
        let records = self.budget.as_ref().ok_or(PipelineError::MissingInput {
            stage: "budget comparison",
            input: "budget register",
        })?;
        reconcile(records, &self.facts, self.config.ambiguous_budget_policy)
    }

    pub fn latest_week(&self) -> Option<WeekIndex> {
        metrics::latest_week(&self.facts)
    }

    fn require_roster_index(&self, stage: &'static str) -> Result<Roster, PipelineError> {
        self.roster_index().ok_or(PipelineError::MissingInput {
            stage,
            input: "roster",
        })
    }

    fn require_roster(&self, stage: &'static str) -> Result<(), PipelineError> {
        match self.roster {
            Some(_) => Ok(()),
            None => Err(PipelineError::MissingInput {
                stage,
                input: "roster",
            }),
        }
    }
}
