// src/enrich.rs
use rust_decimal::{prelude::FromPrimitive, Decimal};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

use crate::config::JoinKind;
use crate::model::{BudgetRecord, EmployeeKeyed, FactRow, RosterRecord, TimeEntry};
use crate::report::{RowWarning, RunReport};

// --- Roster index ---

/// Roster records indexed by employee name. Names are unique (checked on load).
#[derive(Debug, Clone, Default)]
pub struct Roster {
    records: Vec<RosterRecord>,
    index: HashMap<String, usize>,
}

impl Roster {
    pub fn new(records: Vec<RosterRecord>) -> Self {
        let mut index = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            index.entry(record.employee_name.trim().to_string()).or_insert(i);
        }
        Self { records, index }
    }

    pub fn get(&self, employee_name: &str) -> Option<&RosterRecord> {
        self.index
            .get(employee_name.trim())
            .map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[RosterRecord] {
        &self.records
    }
}

// --- Roster join ---

/// One joined pair. Either side may be absent depending on the join kind.
#[derive(Debug, Clone, Copy)]
pub struct JoinedRow<'a, T> {
    pub entry: Option<&'a T>,
    pub roster: Option<&'a RosterRecord>,
}

/// Joins rows to the roster on trimmed employee name.
///
/// `Left` keeps every row, `Inner` only matched rows. `Right` keeps every
/// roster record in roster order, paired with each of its rows or with none.
pub fn join_roster<'a, T: EmployeeKeyed>(
    rows: &'a [T],
    roster: &'a Roster,
    kind: JoinKind,
) -> Vec<JoinedRow<'a, T>> {
    match kind {
        JoinKind::Left => rows
            .iter()
            .map(|row| JoinedRow {
                entry: Some(row),
                roster: roster.get(row.employee_name()),
            })
            .collect(),
        JoinKind::Inner => rows
            .iter()
            .filter_map(|row| {
                roster.get(row.employee_name()).map(|record| JoinedRow {
                    entry: Some(row),
                    roster: Some(record),
                })
            })
            .collect(),
        JoinKind::Right => {
            let mut by_employee: HashMap<&str, Vec<&T>> = HashMap::new();
            for row in rows {
                by_employee
                    .entry(row.employee_name().trim())
                    .or_default()
                    .push(row);
            }
            let mut joined = Vec::new();
            for record in roster.records() {
                match by_employee.get(record.employee_name.trim()) {
                    Some(matches) => joined.extend(matches.iter().map(|row| JoinedRow {
                        entry: Some(*row),
                        roster: Some(record),
                    })),
                    None => joined.push(JoinedRow {
                        entry: None,
                        roster: Some(record),
                    }),
                }
            }
            joined
        }
    }
}

/// Builds the fact table from time entries and an optional roster.
///
/// Each employee without a roster record leaves one `RosterMismatch` warning
/// carrying the number of affected rows. Without a roster at all, every row
/// keeps null enrichment and no mismatch is recorded.
pub fn build_fact_table(
    entries: Vec<TimeEntry>,
    roster: Option<&Roster>,
    kind: JoinKind,
    report: &mut RunReport,
) -> Vec<FactRow> {
    let Some(roster) = roster else {
        info!("No roster supplied; fact table keeps {} unenriched rows", entries.len());
        return entries.into_iter().map(|entry| enrich_row(entry, None)).collect();
    };

    let mut unmatched: BTreeMap<String, usize> = BTreeMap::new();
    for entry in entries.iter().filter(|e| roster.get(&e.employee_name).is_none()) {
        *unmatched.entry(entry.employee_name.clone()).or_insert(0) += 1;
    }

    // Roster-only pairs of a right join carry no entry and make no fact row.
    let facts: Vec<FactRow> = join_roster(&entries, roster, kind)
        .into_iter()
        .filter_map(|joined| joined.entry.map(|entry| enrich_row(entry.clone(), joined.roster)))
        .collect();

    for (employee_name, rows) in unmatched {
        warn!(
            "Employee '{}' has no roster record ({} row(s) {})",
            employee_name,
            rows,
            if kind == JoinKind::Inner { "dropped" } else { "kept without enrichment" }
        );
        report.warn(RowWarning::RosterMismatch { employee_name, rows });
    }

    info!("Fact table built with {} rows", facts.len());
    facts
}

fn enrich_row(entry: TimeEntry, record: Option<&RosterRecord>) -> FactRow {
    let project_revenue = match record {
        Some(r) if entry.is_projects() => row_cost(r.hourly_rate, entry.duration_hours).round_dp(2),
        _ => Decimal::ZERO,
    };
    FactRow {
        team_name: record.map(|r| r.team_name.clone()),
        position: record.map(|r| r.position.clone()),
        hourly_rate: record.map(|r| r.hourly_rate),
        project_revenue,
        entry,
    }
}

/// `rate * hours`, unrounded.
pub fn row_cost(rate: Decimal, hours: f64) -> Decimal {
    rate * Decimal::from_f64(hours).unwrap_or(Decimal::ZERO)
}

// --- Budget join ---

/// Rows whose client contains the project code (case-sensitive, unanchored).
pub fn match_budget<'a>(record: &BudgetRecord, facts: &'a [FactRow]) -> Vec<&'a FactRow> {
    if record.project_code.is_empty() {
        return Vec::new();
    }
    facts
        .iter()
        .filter(|f| f.entry.client.contains(record.project_code.as_str()))
        .collect()
}

/// A fact row whose client matches more than one budget code.
#[derive(Debug, Clone, PartialEq)]
pub struct AmbiguousMatch {
    pub row_number: usize,
    pub client: String,
    pub codes: Vec<String>,
}

/// Every fact row matching two or more distinct budget codes, in row order.
pub fn ambiguous_matches(records: &[BudgetRecord], facts: &[FactRow]) -> Vec<AmbiguousMatch> {
    let codes: Vec<&str> = {
        let mut seen = HashSet::new();
        records
            .iter()
            .map(|r| r.project_code.as_str())
            .filter(|c| !c.is_empty() && seen.insert(*c))
            .collect()
    };

    facts
        .iter()
        .filter_map(|fact| {
            let matched: Vec<String> = codes
                .iter()
                .filter(|code| fact.entry.client.contains(**code))
                .map(|code| code.to_string())
                .collect();
            (matched.len() > 1).then(|| AmbiguousMatch {
                row_number: fact.entry.row_number,
                client: fact.entry.client.clone(),
                codes: matched,
            })
        })
        .collect()
}
