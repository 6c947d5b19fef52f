// src/model.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::normalizer::{PROJECTS, TIME_OFF};
use crate::temporal::WeekIndex;

// --- Source records ---

/// One logged activity from the timesheet export, after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    /// 1-based row number in the source file, for audit messages.
    pub row_number: usize,
    pub employee_name: String,
    pub activity_date: Option<NaiveDate>,
    pub raw_activity_date: String,
    pub week: Option<WeekIndex>,
    pub client: String,
    pub raw_category: String,
    pub service_category: String,
    pub duration_hours: f64,
    pub raw_duration: String,
    pub duration_defaulted: bool,
    pub description: Option<String>,
}

impl TimeEntry {
    pub fn is_projects(&self) -> bool {
        self.service_category == PROJECTS
    }

    pub fn is_time_off(&self) -> bool {
        self.service_category == TIME_OFF
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRecord {
    pub employee_name: String,
    pub team_name: String,
    pub position: String,
    pub hourly_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub project_code: String,
    pub budgeted_amount: Decimal,
    pub manager: String,
}

// --- Fact table ---

/// A time entry with its roster enrichment attached.
/// Enrichment fields are `None` when the employee has no roster record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    #[serde(flatten)]
    pub entry: TimeEntry,
    pub team_name: Option<String>,
    pub position: Option<String>,
    pub hourly_rate: Option<Decimal>,
    /// `hourly_rate * duration_hours` for project rows, rounded to cents; zero otherwise.
    pub project_revenue: Decimal,
}

/// Anything that can be joined to the roster by employee name.
pub trait EmployeeKeyed {
    fn employee_name(&self) -> &str;
}

impl EmployeeKeyed for TimeEntry {
    fn employee_name(&self) -> &str {
        &self.employee_name
    }
}

impl EmployeeKeyed for FactRow {
    fn employee_name(&self) -> &str {
        &self.entry.employee_name
    }
}
