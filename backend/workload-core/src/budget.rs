// src/budget.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::config::AmbiguousMatchPolicy;
use crate::enrich::{ambiguous_matches, match_budget, row_cost};
use crate::error::PipelineError;
use crate::model::{BudgetRecord, FactRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetStatus {
    #[serde(rename = "Within Budget")]
    WithinBudget,
    Exceeded,
}

impl fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetStatus::WithinBudget => write!(f, "Within Budget"),
            BudgetStatus::Exceeded => write!(f, "Exceeded"),
        }
    }
}

/// Exceeded only when cost is strictly greater than the budget.
pub fn status_for(total_cost: Decimal, budgeted_amount: Decimal) -> BudgetStatus {
    if total_cost > budgeted_amount {
        BudgetStatus::Exceeded
    } else {
        BudgetStatus::WithinBudget
    }
}

/// One row of the budget comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetComparison {
    pub project_code: String,
    /// Distinct matched client strings in first-seen order.
    pub clients: Vec<String>,
    pub manager: String,
    pub total_cost: Decimal,
    pub budgeted_amount: Decimal,
    pub status: BudgetStatus,
    pub matched_rows: usize,
    /// Matched rows without an hourly rate; they add nothing to the cost.
    pub unrated_rows: usize,
    /// Other codes sharing at least one matched row with this one.
    pub overlapping_codes: Vec<String>,
}

impl BudgetComparison {
    pub fn client_list(&self) -> String {
        if self.clients.is_empty() {
            "N/A".to_string()
        } else {
            self.clients.join(", ")
        }
    }
}

/// Compares the accumulated cost of each budget record's matched rows with its amount.
///
/// A row matching several codes is summed into each of them under
/// `SumIntoEach`; under `Reject` the first such row fails the comparison.
pub fn reconcile(
    records: &[BudgetRecord],
    facts: &[FactRow],
    policy: AmbiguousMatchPolicy,
) -> Result<Vec<BudgetComparison>, PipelineError> {
    let ambiguous = ambiguous_matches(records, facts);
    if policy == AmbiguousMatchPolicy::Reject {
        if let Some(first) = ambiguous.first() {
            return Err(PipelineError::AmbiguousBudgetMatch {
                client: first.client.clone(),
                codes: first.codes.clone(),
            });
        }
    }

    let comparisons: Vec<BudgetComparison> = records
        .iter()
        .map(|record| {
            let matched = match_budget(record, facts);

            let mut clients: Vec<String> = Vec::new();
            let mut total_cost = Decimal::ZERO;
            let mut unrated_rows = 0;
            for fact in &matched {
                if !clients.contains(&fact.entry.client) {
                    clients.push(fact.entry.client.clone());
                }
                match fact.hourly_rate {
                    Some(rate) => total_cost += row_cost(rate, fact.entry.duration_hours),
                    None => unrated_rows += 1,
                }
            }
            let status = status_for(total_cost, record.budgeted_amount);

            let mut overlapping_codes: Vec<String> = Vec::new();
            for m in &ambiguous {
                if m.codes.contains(&record.project_code) {
                    for code in &m.codes {
                        if code != &record.project_code && !overlapping_codes.contains(code) {
                            overlapping_codes.push(code.clone());
                        }
                    }
                }
            }

            if unrated_rows > 0 {
                warn!(
                    "Budget {}: {} matched row(s) have no hourly rate and add no cost",
                    record.project_code, unrated_rows
                );
            }

            BudgetComparison {
                project_code: record.project_code.clone(),
                clients,
                manager: record.manager.clone(),
                status,
                total_cost: total_cost.round_dp(2),
                budgeted_amount: record.budgeted_amount,
                matched_rows: matched.len(),
                unrated_rows,
                overlapping_codes,
            }
        })
        .collect();

    let exceeded = comparisons
        .iter()
        .filter(|c| c.status == BudgetStatus::Exceeded)
        .count();
    info!(
        "Budget comparison: {} record(s), {} exceeded",
        comparisons.len(),
        exceeded
    );
    Ok(comparisons)
}
