// src/config.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::error::{io_context, PipelineError};

// --- Deployment defaults ---

pub const DEFAULT_SKIP_ROWS: usize = 4;
pub const DEFAULT_WEEKLY_CAPACITY_HOURS: f64 = 40.0;
pub const DEFAULT_UTILIZATION_TARGET_PCT: f64 = 75.0;
pub const DEFAULT_ARTIFACT_DIR: &str = "./workload_artifacts";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

const DEFAULT_PROJECT_RATE_CODES: [&str; 11] = [
    "Rates:Application Engineer I",
    "Rates:Senior Engineer I",
    "Rates:Application Engineer II",
    "Rates:Principal Engineer I",
    "Rates:Senior Director",
    "Rates:Intern",
    "Rates:Director/Principal Engineer- II",
    "Rates:Admin Assistant",
    "Rates:Senior Engineer II",
    "Rates:Assistant Application Engineer",
    "Rates:CAD Designer",
];

fn default_anchor_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 30).unwrap_or_default()
}

fn aliases(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

// --- Join / matching policies ---

/// How time entries are joined to roster records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Every entry is kept; unmatched entries get null enrichment.
    #[default]
    Left,
    /// Only entries with a roster record are kept.
    Inner,
    /// Every roster record is kept, with or without entries.
    Right,
}

/// Roster join used by each view that reads the roster. The fact table has
/// its own `roster_join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewJoins {
    /// Category engagement. `Right` behaves like `Inner`: roster records
    /// without entries add no hours.
    pub engagement: JoinKind,
    /// Capacity shortfall. `Right` lists rostered employees with no entries.
    pub shortfall: JoinKind,
    /// Latest-week time off breakdown.
    pub time_off: JoinKind,
}

impl Default for ViewJoins {
    fn default() -> Self {
        Self {
            engagement: JoinKind::Inner,
            shortfall: JoinKind::Right,
            time_off: JoinKind::Inner,
        }
    }
}

/// What to do when a client string contains more than one budget code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguousMatchPolicy {
    /// Sum the entry into every matching budget and record a warning.
    #[default]
    SumIntoEach,
    /// Fail the budget stage.
    Reject,
}

// --- Column aliases ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimesheetColumns {
    pub client: Vec<String>,
    pub category: Vec<String>,
    pub activity_date: Vec<String>,
    pub duration: Vec<String>,
    pub description: Vec<String>,
}

impl Default for TimesheetColumns {
    fn default() -> Self {
        Self {
            client: aliases(&["Client full name", "Client", "Customer full name"]),
            category: aliases(&["Product/Service full name", "Product/Service"]),
            activity_date: aliases(&["Activity date", "Date"]),
            duration: aliases(&["Duration"]),
            description: aliases(&["Memo/Description", "Description", "Memo"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterColumns {
    pub employee_name: Vec<String>,
    pub team_name: Vec<String>,
    pub position: Vec<String>,
    pub hourly_rate: Vec<String>,
}

impl Default for RosterColumns {
    fn default() -> Self {
        Self {
            employee_name: aliases(&["Employee Name"]),
            team_name: aliases(&["Team Name"]),
            position: aliases(&["Position", "Designation"]),
            hourly_rate: aliases(&["USD/Hr", "USD per Hour", "Hourly Rate"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetColumns {
    pub project_code: Vec<String>,
    pub amount: Vec<String>,
    pub manager: Vec<String>,
}

impl Default for BudgetColumns {
    fn default() -> Self {
        Self {
            project_code: aliases(&["Num"]),
            amount: aliases(&["Amount"]),
            manager: aliases(&["Project Manager"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamTarget {
    pub team: String,
    pub target: Decimal,
}

// --- Pipeline configuration ---

/// Deployment-specific policy data, loaded from a JSON document at startup.
/// Every field falls back to the built-in default when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub skip_rows: usize,
    pub roster_skip_rows: usize,
    pub budget_skip_rows: usize,
    pub anchor_date: NaiveDate,
    pub weekly_capacity_hours: f64,
    pub utilization_target_pct: f64,
    pub employee_marker_prefix: String,
    pub summary_row_prefix: Option<String>,
    pub internal_namespace_prefix: String,
    pub time_off_prefix: String,
    pub internal_billing_prefix: String,
    pub project_rate_codes: Vec<String>,
    pub date_formats: Vec<String>,
    pub team_targets: Vec<TeamTarget>,
    pub organization_label: String,
    pub roster_join: JoinKind,
    pub view_joins: ViewJoins,
    pub ambiguous_budget_policy: AmbiguousMatchPolicy,
    pub timesheet_columns: TimesheetColumns,
    pub roster_columns: RosterColumns,
    pub budget_columns: BudgetColumns,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_rows: DEFAULT_SKIP_ROWS,
            roster_skip_rows: 0,
            budget_skip_rows: 0,
            anchor_date: default_anchor_date(),
            weekly_capacity_hours: DEFAULT_WEEKLY_CAPACITY_HOURS,
            utilization_target_pct: DEFAULT_UTILIZATION_TARGET_PCT,
            employee_marker_prefix: "*".to_string(),
            summary_row_prefix: Some("Total for ".to_string()),
            internal_namespace_prefix: "Internal:".to_string(),
            time_off_prefix: "Time off:".to_string(),
            internal_billing_prefix: "Enerzinx LLC:".to_string(),
            project_rate_codes: aliases(&DEFAULT_PROJECT_RATE_CODES),
            // The export tool writes US dates; day-first and ISO forms are accepted as fallbacks.
            date_formats: aliases(&["%m/%d/%Y", "%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"]),
            team_targets: vec![
                TeamTarget { team: "Sagar & Team".into(), target: dec!(1794808.38) },
                TeamTarget { team: "Vinoth & Team".into(), target: dec!(1513014.32) },
                TeamTarget { team: "Dr. Suresh & Team".into(), target: dec!(1711218.09) },
                TeamTarget { team: "Praveen & Team".into(), target: dec!(2783710.62) },
                TeamTarget { team: "Jigar & Team".into(), target: dec!(695927.66) },
                TeamTarget { team: "Dr. Amritpal Singh & Team".into(), target: dec!(759192) },
            ],
            organization_label: "EZX Team".to_string(),
            roster_join: JoinKind::Left,
            view_joins: ViewJoins::default(),
            ambiguous_budget_policy: AmbiguousMatchPolicy::SumIntoEach,
            timesheet_columns: TimesheetColumns::default(),
            roster_columns: RosterColumns::default(),
            budget_columns: BudgetColumns::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let json_string = fs::read_to_string(path)
            .map_err(|e| io_context(e, format!("Failed to read config file: {:?}", path)))?;
        let config: PipelineConfig = serde_json::from_str(&json_string)?;
        config.validate()?;
        info!("Pipeline configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Loads the file if one is given, otherwise the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, PipelineError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                info!("No pipeline config file given, using built-in defaults.");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.weekly_capacity_hours > 0.0) {
            return Err(PipelineError::Config(format!(
                "weekly_capacity_hours must be positive, got {}",
                self.weekly_capacity_hours
            )));
        }
        if self.date_formats.is_empty() {
            return Err(PipelineError::Config(
                "date_formats must list at least one format".into(),
            ));
        }
        // Fact rows are one-per-entry; roster-only rows exist only in per-view joins.
        if self.roster_join == JoinKind::Right {
            return Err(PipelineError::Config(
                "roster_join for the fact table must be 'left' or 'inner'".into(),
            ));
        }
        if let Some(dup) = self
            .team_targets
            .iter()
            .enumerate()
            .find(|(i, t)| self.team_targets[..*i].iter().any(|o| o.team == t.team))
        {
            return Err(PipelineError::Config(format!(
                "team '{}' has more than one target",
                dup.1.team
            )));
        }
        Ok(())
    }

    pub fn team_target(&self, team: &str) -> Option<Decimal> {
        self.team_targets
            .iter()
            .find(|t| t.team == team)
            .map(|t| t.target)
    }
}

// --- Process configuration ---

/// Process-level settings read from `WORKLOAD_*` environment variables (or `.env`).
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline_config: Option<PathBuf>,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ARTIFACT_DIR)
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        envy::prefixed("WORKLOAD_").from_env::<AppConfig>()
    }

    /// TLS is enabled only when both the certificate and key paths are set.
    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }
}
