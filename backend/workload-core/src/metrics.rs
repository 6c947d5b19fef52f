// src/metrics.rs
use chrono::Datelike;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::enrich::{join_roster, Roster};
use crate::model::FactRow;
use crate::temporal::WeekIndex;

// --- Utilization ---

/// `billable / available * 100`, or 0 when nothing is available.
pub fn utilization_pct(billable_hours: f64, available_hours: f64) -> f64 {
    if available_hours > 0.0 && billable_hours.is_finite() {
        (billable_hours / available_hours * 100.0).max(0.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Utilization {
    pub capacity_hours: f64,
    pub time_off_hours: f64,
    /// Capacity minus time off. May be negative when time off exceeds capacity.
    pub available_hours: f64,
    pub billable_hours: f64,
    pub utilization_pct: f64,
}

impl Utilization {
    /// Whether utilization reaches the configured target line.
    pub fn meets_target(&self, target_pct: f64) -> bool {
        self.utilization_pct >= target_pct
    }

    pub fn compute(billable_hours: f64, time_off_hours: f64, capacity_hours: f64) -> Self {
        let available_hours = capacity_hours - time_off_hours;
        Self {
            capacity_hours,
            time_off_hours,
            available_hours,
            billable_hours,
            utilization_pct: utilization_pct(billable_hours, available_hours),
        }
    }
}

// Running totals for one group. Capacity is one week per distinct (employee, week).
#[derive(Debug, Default)]
struct Tally<'a> {
    billable_hours: f64,
    time_off_hours: f64,
    total_hours: f64,
    revenue: Decimal,
    slots: HashSet<(&'a str, WeekIndex)>,
}

impl<'a> Tally<'a> {
    fn add(&mut self, fact: &'a FactRow, week: WeekIndex) {
        let hours = fact.entry.duration_hours;
        self.total_hours += hours;
        if fact.entry.is_projects() {
            self.billable_hours += hours;
        }
        if fact.entry.is_time_off() {
            self.time_off_hours += hours;
        }
        self.revenue += fact.project_revenue;
        self.slots.insert((fact.entry.employee_name.as_str(), week));
    }

    fn utilization(&self, weekly_capacity: f64) -> Utilization {
        Utilization::compute(
            self.billable_hours,
            self.time_off_hours,
            self.slots.len() as f64 * weekly_capacity,
        )
    }

    fn employees(&self) -> usize {
        self.slots
            .iter()
            .map(|(name, _)| *name)
            .collect::<HashSet<_>>()
            .len()
    }
}

// Rows with a resolved week. Undated rows take part in no metric.
fn dated(facts: &[FactRow]) -> impl Iterator<Item = (&FactRow, WeekIndex)> {
    facts.iter().filter_map(|f| f.entry.week.map(|w| (f, w)))
}

/// The greatest numbered week present; the sentinel never counts as latest.
pub fn latest_week(facts: &[FactRow]) -> Option<WeekIndex> {
    facts
        .iter()
        .filter_map(|f| f.entry.week)
        .filter(WeekIndex::is_numbered)
        .max()
}

// --- Employee views ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySummary {
    pub employee_name: String,
    pub team_name: Option<String>,
    pub position: Option<String>,
    pub week: WeekIndex,
    pub total_hours: f64,
    #[serde(flatten)]
    pub utilization: Utilization,
    pub revenue_achieved: Decimal,
}

/// One row per employee and week, ordered by week then employee.
pub fn weekly_summaries(facts: &[FactRow], config: &PipelineConfig) -> Vec<WeeklySummary> {
    let mut groups: BTreeMap<(WeekIndex, &str), (Tally, &FactRow)> = BTreeMap::new();
    for (fact, week) in dated(facts) {
        let (tally, _) = groups
            .entry((week, fact.entry.employee_name.as_str()))
            .or_insert_with(|| (Tally::default(), fact));
        tally.add(fact, week);
    }

    groups
        .into_iter()
        .map(|((week, employee_name), (tally, first))| WeeklySummary {
            employee_name: employee_name.to_string(),
            team_name: first.team_name.clone(),
            position: first.position.clone(),
            week,
            total_hours: tally.total_hours,
            utilization: tally.utilization(config.weekly_capacity_hours),
            revenue_achieved: tally.revenue,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeSummary {
    pub employee_name: String,
    pub team_name: Option<String>,
    pub position: Option<String>,
    pub weeks_active: usize,
    pub total_hours: f64,
    #[serde(flatten)]
    pub utilization: Utilization,
    pub revenue_achieved: Decimal,
}

/// Per-employee totals across every dated week, ordered by name.
pub fn employee_summaries(facts: &[FactRow], config: &PipelineConfig) -> Vec<EmployeeSummary> {
    let mut groups: BTreeMap<&str, (Tally, &FactRow)> = BTreeMap::new();
    for (fact, week) in dated(facts) {
        let (tally, _) = groups
            .entry(fact.entry.employee_name.as_str())
            .or_insert_with(|| (Tally::default(), fact));
        tally.add(fact, week);
    }

    groups
        .into_iter()
        .map(|(employee_name, (tally, first))| EmployeeSummary {
            employee_name: employee_name.to_string(),
            team_name: first.team_name.clone(),
            position: first.position.clone(),
            weeks_active: tally.slots.len(),
            total_hours: tally.total_hours,
            utilization: tally.utilization(config.weekly_capacity_hours),
            revenue_achieved: tally.revenue,
        })
        .collect()
}

// --- Team targets ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub team_name: String,
    pub is_organization: bool,
    pub employees: usize,
    #[serde(flatten)]
    pub utilization: Utilization,
    pub target_achieved: Decimal,
    pub team_target: Decimal,
    /// `team_target - target_achieved`; negative once the target is passed.
    pub remaining_target: Decimal,
    /// Target achieved as a percentage of the team target.
    pub target_achieved_pct: f64,
    pub meets_utilization_target: bool,
}

impl TeamSummary {
    /// Remaining target as reported: never below zero.
    pub fn remaining_for_display(&self) -> Decimal {
        self.remaining_target.max(Decimal::ZERO)
    }
}

fn achieved_pct(achieved: Decimal, target: Decimal) -> f64 {
    utilization_pct(
        achieved.to_f64().unwrap_or(0.0),
        target.to_f64().unwrap_or(0.0),
    )
}

/// One row per configured team, followed by the organization row.
///
/// Team rows roll up the weekly summaries of their members. The organization
/// row is the sum of the team rows, so the whole always equals its parts.
pub fn team_report(facts: &[FactRow], config: &PipelineConfig) -> Vec<TeamSummary> {
    let weekly = weekly_summaries(facts, config);

    let configured: HashSet<&str> = config.team_targets.iter().map(|t| t.team.as_str()).collect();
    let unconfigured: BTreeSet<&str> = weekly
        .iter()
        .filter_map(|w| w.team_name.as_deref())
        .filter(|team| !configured.contains(team))
        .collect();
    if !unconfigured.is_empty() {
        warn!(
            "Teams without a configured target are left out of the team report: {:?}",
            unconfigured
        );
    }

    let mut rows: Vec<TeamSummary> = config
        .team_targets
        .iter()
        .map(|target| {
            let members: Vec<&WeeklySummary> = weekly
                .iter()
                .filter(|w| w.team_name.as_deref() == Some(target.team.as_str()))
                .collect();
            let employees = members
                .iter()
                .map(|w| w.employee_name.as_str())
                .collect::<HashSet<_>>()
                .len();
            let billable: f64 = members.iter().map(|w| w.utilization.billable_hours).sum();
            let time_off: f64 = members.iter().map(|w| w.utilization.time_off_hours).sum();
            let capacity: f64 = members.iter().map(|w| w.utilization.capacity_hours).sum();
            let achieved: Decimal = members.iter().map(|w| w.revenue_achieved).sum();
            debug!("Team '{}': {} employee(s), achieved {}", target.team, employees, achieved);

            let utilization = Utilization::compute(billable, time_off, capacity);
            TeamSummary {
                team_name: target.team.clone(),
                is_organization: false,
                employees,
                meets_utilization_target: utilization.meets_target(config.utilization_target_pct),
                utilization,
                target_achieved: achieved,
                team_target: target.target,
                remaining_target: target.target - achieved,
                target_achieved_pct: achieved_pct(achieved, target.target),
            }
        })
        .collect();

    rows.push(organization_row(&rows, config));
    rows
}

fn organization_row(teams: &[TeamSummary], config: &PipelineConfig) -> TeamSummary {
    let billable: f64 = teams.iter().map(|t| t.utilization.billable_hours).sum();
    let time_off: f64 = teams.iter().map(|t| t.utilization.time_off_hours).sum();
    let capacity: f64 = teams.iter().map(|t| t.utilization.capacity_hours).sum();
    let achieved: Decimal = teams.iter().map(|t| t.target_achieved).sum();
    let target: Decimal = teams.iter().map(|t| t.team_target).sum();

    let utilization = Utilization::compute(billable, time_off, capacity);
    TeamSummary {
        team_name: config.organization_label.clone(),
        is_organization: true,
        employees: teams.iter().map(|t| t.employees).sum(),
        meets_utilization_target: utilization.meets_target(config.utilization_target_pct),
        utilization,
        target_achieved: achieved,
        team_target: target,
        remaining_target: target - achieved,
        target_achieved_pct: achieved_pct(achieved, target),
    }
}

// --- Team trend ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamWeekTrend {
    pub team_name: String,
    pub week: WeekIndex,
    pub active_employees: usize,
    #[serde(flatten)]
    pub utilization: Utilization,
    pub meets_utilization_target: bool,
}

/// Weekly utilization per team. Configured teams come first in their
/// configured order, then any other team by name; weeks ascend within a team.
pub fn team_weekly_trend(facts: &[FactRow], config: &PipelineConfig) -> Vec<TeamWeekTrend> {
    let order = |team: &str| {
        config
            .team_targets
            .iter()
            .position(|t| t.team == team)
            .unwrap_or(usize::MAX)
    };

    let mut groups: BTreeMap<(usize, &str, WeekIndex), Tally> = BTreeMap::new();
    for (fact, week) in dated(facts) {
        if let Some(team) = fact.team_name.as_deref() {
            groups
                .entry((order(team), team, week))
                .or_default()
                .add(fact, week);
        }
    }

    groups
        .into_iter()
        .map(|((_, team, week), tally)| {
            let utilization = tally.utilization(config.weekly_capacity_hours);
            TeamWeekTrend {
                team_name: team.to_string(),
                week,
                active_employees: tally.employees(),
                meets_utilization_target: utilization.meets_target(config.utilization_target_pct),
                utilization,
            }
        })
        .collect()
}

// --- Category engagement ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekScope {
    AllWeeks,
    Latest,
    Week(WeekIndex),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEngagement {
    pub category: String,
    pub hours: f64,
    /// Hours as a percentage of the available hours of the rostered population.
    pub share_pct: f64,
}

/// Hours per category (time off excluded) for the employees the engagement
/// join selects, largest first.
pub fn category_engagement(
    facts: &[FactRow],
    roster: &Roster,
    config: &PipelineConfig,
    scope: WeekScope,
) -> Vec<CategoryEngagement> {
    let only_week = match scope {
        WeekScope::AllWeeks => None,
        WeekScope::Week(week) => Some(week),
        WeekScope::Latest => match latest_week(facts) {
            Some(week) => Some(week),
            None => return Vec::new(),
        },
    };

    let mut tally = Tally::default();
    let mut hours_by_category: BTreeMap<&str, f64> = BTreeMap::new();
    for joined in join_roster(facts, roster, config.view_joins.engagement) {
        let Some((fact, week)) = joined.entry.and_then(|f| f.entry.week.map(|w| (f, w))) else {
            continue;
        };
        if only_week.is_some_and(|w| w != week) {
            continue;
        }
        tally.add(fact, week);
        if !fact.entry.is_time_off() {
            *hours_by_category
                .entry(fact.entry.service_category.as_str())
                .or_insert(0.0) += fact.entry.duration_hours;
        }
    }

    let available = tally.utilization(config.weekly_capacity_hours).available_hours;
    let mut rows: Vec<CategoryEngagement> = hours_by_category
        .into_iter()
        .map(|(category, hours)| CategoryEngagement {
            category: category.to_string(),
            hours,
            share_pct: utilization_pct(hours, available),
        })
        .collect();
    rows.sort_by(|a, b| b.hours.total_cmp(&a.hours).then_with(|| a.category.cmp(&b.category)));
    rows
}

// --- Workload distribution ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKey {
    Position,
    Team,
    TeamPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRow {
    pub group: String,
    /// Position within the team, for `TeamPosition` only.
    pub subgroup: Option<String>,
    pub category: String,
    pub hours: f64,
    pub employees: usize,
    pub capacity_hours: f64,
    pub share_pct: f64,
}

/// Category hours of one week as a share of each group's capacity.
/// Rows lacking the grouping field are left out.
pub fn workload_distribution(
    facts: &[FactRow],
    config: &PipelineConfig,
    week: WeekIndex,
    key: DistributionKey,
) -> Vec<DistributionRow> {
    type GroupKey<'a> = (&'a str, Option<&'a str>);

    let mut employees: BTreeMap<GroupKey, HashSet<&str>> = BTreeMap::new();
    let mut hours: BTreeMap<(GroupKey, &str), f64> = BTreeMap::new();
    for (fact, fact_week) in dated(facts) {
        if fact_week != week {
            continue;
        }
        let group: Option<GroupKey> = match key {
            DistributionKey::Position => fact.position.as_deref().map(|p| (p, None)),
            DistributionKey::Team => fact.team_name.as_deref().map(|t| (t, None)),
            DistributionKey::TeamPosition => fact
                .team_name
                .as_deref()
                .zip(fact.position.as_deref())
                .map(|(t, p)| (t, Some(p))),
        };
        let Some(group) = group else { continue };
        employees
            .entry(group)
            .or_default()
            .insert(fact.entry.employee_name.as_str());
        *hours
            .entry((group, fact.entry.service_category.as_str()))
            .or_insert(0.0) += fact.entry.duration_hours;
    }

    hours
        .into_iter()
        .map(|((group, category), hours)| {
            let headcount = employees.get(&group).map(HashSet::len).unwrap_or(0);
            let capacity_hours = headcount as f64 * config.weekly_capacity_hours;
            DistributionRow {
                group: group.0.to_string(),
                subgroup: group.1.map(str::to_string),
                category: category.to_string(),
                hours,
                employees: headcount,
                capacity_hours,
                share_pct: utilization_pct(hours, capacity_hours),
            }
        })
        .collect()
}

// --- Capacity shortfall ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortfallRow {
    pub employee_name: String,
    pub team_name: String,
    pub position: String,
    pub week: WeekIndex,
    pub logged_hours: f64,
    pub missing_hours: f64,
}

/// Rostered employees with a position who logged less than capacity in a
/// numbered week. Under the default right join employees with no entries at
/// all are listed too. Ordered by week then roster order.
pub fn capacity_shortfall(
    facts: &[FactRow],
    roster: &Roster,
    config: &PipelineConfig,
) -> Vec<ShortfallRow> {
    let weeks: BTreeSet<WeekIndex> = facts
        .iter()
        .filter_map(|f| f.entry.week)
        .filter(WeekIndex::is_numbered)
        .collect();

    // Unrostered rows of a left join have no position and never qualify.
    let mut present: HashSet<&str> = HashSet::new();
    let mut logged: HashMap<(&str, WeekIndex), f64> = HashMap::new();
    for joined in join_roster(facts, roster, config.view_joins.shortfall) {
        let Some(record) = joined.roster else { continue };
        present.insert(record.employee_name.as_str());
        if let Some((fact, week)) = joined.entry.and_then(|f| f.entry.week.map(|w| (f, w))) {
            *logged
                .entry((record.employee_name.as_str(), week))
                .or_insert(0.0) += fact.entry.duration_hours;
        }
    }

    let mut rows = Vec::new();
    for week in weeks {
        for record in roster.records() {
            if record.position.trim().is_empty() || !present.contains(record.employee_name.as_str()) {
                continue;
            }
            let hours = logged
                .get(&(record.employee_name.as_str(), week))
                .copied()
                .unwrap_or(0.0);
            if hours < config.weekly_capacity_hours {
                rows.push(ShortfallRow {
                    employee_name: record.employee_name.clone(),
                    team_name: record.team_name.clone(),
                    position: record.position.clone(),
                    week,
                    logged_hours: hours,
                    missing_hours: config.weekly_capacity_hours - hours,
                });
            }
        }
    }
    rows
}

// --- Time off breakdown ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOffRow {
    /// `None` for employees a left join keeps without a roster record.
    pub position: Option<String>,
    pub employee_name: String,
    pub hours: f64,
}

/// Time off hours of one week by position and employee.
pub fn time_off_breakdown(
    facts: &[FactRow],
    roster: &Roster,
    config: &PipelineConfig,
    week: WeekIndex,
) -> Vec<TimeOffRow> {
    let mut hours: BTreeMap<(Option<&str>, &str), f64> = BTreeMap::new();
    for joined in join_roster(facts, roster, config.view_joins.time_off) {
        let Some(fact) = joined.entry else { continue };
        if fact.entry.week != Some(week) || !fact.entry.is_time_off() {
            continue;
        }
        let position = joined.roster.map(|r| r.position.as_str());
        *hours
            .entry((position, fact.entry.employee_name.as_str()))
            .or_insert(0.0) += fact.entry.duration_hours;
    }

    hours
        .into_iter()
        .map(|((position, employee_name), hours)| TimeOffRow {
            position: position.map(str::to_string),
            employee_name: employee_name.to_string(),
            hours,
        })
        .collect()
}

// --- Employee breakdown ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownPeriod {
    Overall,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PeriodKey {
    Overall,
    Week(WeekIndex),
    Month(i32, u32),
}

impl PeriodKey {
    fn label(&self) -> String {
        match self {
            PeriodKey::Overall => "All Weeks".to_string(),
            PeriodKey::Week(week) => week.to_string(),
            PeriodKey::Month(year, month) => chrono::NaiveDate::from_ymd_opt(*year, *month, 1)
                .map(|d| d.format("%B %Y").to_string())
                .unwrap_or_else(|| format!("{}-{:02}", year, month)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
    /// "All Weeks", "Week N" or a month such as "January 2025".
    pub period: String,
    pub category: String,
    pub hours: f64,
    pub available_hours: f64,
    pub share_pct: f64,
}

/// One employee's non-time-off hours per category, overall or per week or
/// month, as a share of the hours available in that period.
pub fn employee_breakdown(
    facts: &[FactRow],
    config: &PipelineConfig,
    employee_name: &str,
    period: BreakdownPeriod,
) -> Vec<BreakdownRow> {
    let mut tallies: BTreeMap<PeriodKey, Tally> = BTreeMap::new();
    let mut hours: BTreeMap<(PeriodKey, &str), f64> = BTreeMap::new();
    for (fact, week) in dated(facts) {
        if fact.entry.employee_name.trim() != employee_name.trim() {
            continue;
        }
        let key = match period {
            BreakdownPeriod::Overall => PeriodKey::Overall,
            BreakdownPeriod::Weekly => PeriodKey::Week(week),
            BreakdownPeriod::Monthly => match fact.entry.activity_date {
                Some(date) => PeriodKey::Month(date.year(), date.month()),
                None => continue,
            },
        };
        tallies.entry(key).or_default().add(fact, week);
        if !fact.entry.is_time_off() {
            *hours
                .entry((key, fact.entry.service_category.as_str()))
                .or_insert(0.0) += fact.entry.duration_hours;
        }
    }

    hours
        .into_iter()
        .map(|((key, category), hours)| {
            let available_hours = tallies
                .get(&key)
                .map(|t| t.utilization(config.weekly_capacity_hours).available_hours)
                .unwrap_or(0.0);
            BreakdownRow {
                period: key.label(),
                category: category.to_string(),
                hours,
                available_hours,
                share_pct: utilization_pct(hours, available_hours),
            }
        })
        .collect()
}

// --- Top performers ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPerformer {
    pub team_name: String,
    pub rank: usize,
    pub employee_name: String,
    pub billable_hours: f64,
    pub available_hours: f64,
    pub utilization_pct: f64,
}

/// Employees of each team ranked by utilization across all weeks.
pub fn top_performers(
    facts: &[FactRow],
    config: &PipelineConfig,
    limit: Option<usize>,
) -> Vec<TopPerformer> {
    let mut by_team: BTreeMap<String, Vec<EmployeeSummary>> = BTreeMap::new();
    for summary in employee_summaries(facts, config) {
        if let Some(team) = summary.team_name.clone() {
            by_team.entry(team).or_default().push(summary);
        }
    }

    let mut rows = Vec::new();
    for (team, mut members) in by_team {
        members.sort_by(|a, b| {
            b.utilization
                .utilization_pct
                .total_cmp(&a.utilization.utilization_pct)
                .then_with(|| a.employee_name.cmp(&b.employee_name))
        });
        let take = limit.unwrap_or(members.len());
        for (i, member) in members.into_iter().take(take).enumerate() {
            rows.push(TopPerformer {
                team_name: team.clone(),
                rank: i + 1,
                employee_name: member.employee_name,
                billable_hours: member.utilization.billable_hours,
                available_hours: member.utilization.available_hours,
                utilization_pct: member.utilization.utilization_pct,
            });
        }
    }
    rows
}
