// src/export.rs
use rust_decimal::{prelude::ToPrimitive, Decimal};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook};
use std::{fs, path::Path};
use tracing::info;

use crate::error::{io_context, PipelineError};
use crate::pipeline::PipelineResult;
use crate::store::{write_file, ArtifactMetadata, ArtifactStore};
use crate::temporal::format_canonical;

pub const MASTER_DATA_SHEET: &str = "Master Data";
pub const WEEKLY_SUMMARY_SHEET: &str = "Weekly Summary";
pub const TEAM_SUMMARY_SHEET: &str = "Team Summary";
pub const TEAM_TREND_SHEET: &str = "Team Trend";
pub const BUDGET_SHEET: &str = "Budget Comparison";
pub const SHORTFALL_SHEET: &str = "Capacity Shortfall";
pub const TIME_OFF_SHEET: &str = "Time Off";
pub const RUN_REPORT_SHEET: &str = "Run Report";

enum Cell {
    Text(String),
    Number(f64),
    Money(Decimal),
    Empty,
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    fn opt_text(value: Option<&str>) -> Self {
        value.map(Cell::text).unwrap_or(Cell::Empty)
    }
}

struct SheetFormats {
    header: Format,
    text: Format,
    number: Format,
    money: Format,
}

impl SheetFormats {
    fn new() -> Self {
        Self {
            header: Format::new()
                .set_bold()
                .set_align(FormatAlign::Center)
                .set_background_color(0x4472C4)
                .set_font_color(0xFFFFFF)
                .set_border(FormatBorder::Thin),
            text: Format::new().set_border(FormatBorder::Thin),
            number: Format::new()
                .set_num_format("#,##0.00")
                .set_border(FormatBorder::Thin),
            money: Format::new()
                .set_num_format("#,##0.00 \"USD\"")
                .set_border(FormatBorder::Thin),
        }
    }
}

fn add_sheet(
    workbook: &mut Workbook,
    formats: &SheetFormats,
    name: &str,
    headers: &[&str],
    rows: Vec<Vec<Cell>>,
) -> Result<(), PipelineError> {
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(name)?;

    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &formats.header)?;
        worksheet.set_column_width(col as u16, (header.len() as f64 + 4.0).max(12.0))?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let c = col as u16;
            match cell {
                Cell::Text(s) => {
                    worksheet.write_string_with_format(r, c, s.as_str(), &formats.text)?;
                }
                Cell::Number(n) => {
                    worksheet.write_number_with_format(r, c, *n, &formats.number)?;
                }
                Cell::Money(d) => {
                    worksheet.write_number_with_format(
                        r,
                        c,
                        d.to_f64().unwrap_or(0.0),
                        &formats.money,
                    )?;
                }
                Cell::Empty => {}
            }
        }
    }

    info!("Sheet '{}': {} row(s)", name, rows.len());
    Ok(())
}

// Views that need a missing optional input produce no sheet.
fn optional_view<T>(view: Result<T, PipelineError>, sheet: &str) -> Result<Option<T>, PipelineError> {
    match view {
        Ok(rows) => Ok(Some(rows)),
        Err(PipelineError::MissingInput { stage, input }) => {
            info!("Skipping sheet '{}': {} needs the {}", sheet, stage, input);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Renders every available view of the result as a workbook.
pub fn workbook_bytes(result: &PipelineResult) -> Result<Vec<u8>, PipelineError> {
    let mut workbook = Workbook::new();
    let formats = SheetFormats::new();

    let master: Vec<Vec<Cell>> = result
        .facts
        .iter()
        .map(|f| {
            vec![
                Cell::text(&f.entry.employee_name),
                f.entry
                    .activity_date
                    .map(|d| Cell::Text(format_canonical(d)))
                    .unwrap_or(Cell::Empty),
                f.entry.week.map(|w| Cell::Text(w.to_string())).unwrap_or(Cell::Empty),
                Cell::text(&f.entry.client),
                Cell::text(&f.entry.raw_category),
                Cell::text(&f.entry.service_category),
                Cell::text(&f.entry.raw_duration),
                Cell::Number(f.entry.duration_hours),
                Cell::opt_text(f.entry.description.as_deref()),
                Cell::opt_text(f.team_name.as_deref()),
                Cell::opt_text(f.position.as_deref()),
                f.hourly_rate.map(Cell::Money).unwrap_or(Cell::Empty),
                Cell::Money(f.project_revenue),
            ]
        })
        .collect();
    add_sheet(
        &mut workbook,
        &formats,
        MASTER_DATA_SHEET,
        &[
            "Employee Name",
            "Activity Date",
            "Week",
            "Client",
            "Product/Service",
            "Service Category",
            "Duration",
            "Hours",
            "Description",
            "Team Name",
            "Position",
            "USD/Hr",
            "Projects USD",
        ],
        master,
    )?;

    let weekly: Vec<Vec<Cell>> = result
        .weekly_summaries()
        .into_iter()
        .map(|w| {
            vec![
                Cell::Text(w.employee_name),
                Cell::opt_text(w.team_name.as_deref()),
                Cell::opt_text(w.position.as_deref()),
                Cell::Text(w.week.to_string()),
                Cell::Number(w.utilization.billable_hours),
                Cell::Number(w.utilization.time_off_hours),
                Cell::Number(w.total_hours),
                Cell::Number(w.utilization.available_hours),
                Cell::Number(w.utilization.utilization_pct),
                Cell::Money(w.revenue_achieved),
            ]
        })
        .collect();
    add_sheet(
        &mut workbook,
        &formats,
        WEEKLY_SUMMARY_SHEET,
        &[
            "Employee Name",
            "Team Name",
            "Position",
            "Week",
            "Project Hours",
            "Time Off Hours",
            "Total Hours",
            "Available Hours",
            "Utilization %",
            "Revenue Achieved",
        ],
        weekly,
    )?;

    if let Some(teams) = optional_view(result.team_report(), TEAM_SUMMARY_SHEET)? {
        let rows = teams
            .into_iter()
            .map(|t| {
                let remaining = t.remaining_for_display();
                vec![
                    Cell::Text(t.team_name),
                    Cell::Number(t.employees as f64),
                    Cell::Number(t.utilization.billable_hours),
                    Cell::Number(t.utilization.time_off_hours),
                    Cell::Number(t.utilization.available_hours),
                    Cell::Number(t.utilization.utilization_pct),
                    Cell::Money(t.target_achieved),
                    Cell::Money(t.team_target),
                    Cell::Money(remaining),
                    Cell::Number(t.target_achieved_pct),
                    Cell::text(target_flag(t.meets_utilization_target)),
                ]
            })
            .collect();
        add_sheet(
            &mut workbook,
            &formats,
            TEAM_SUMMARY_SHEET,
            &[
                "Team",
                "Employees",
                "Project Hours",
                "Time Off Hours",
                "Available Hours",
                "Utilization %",
                "Target Achieved",
                "Team Target",
                "Remaining Target",
                "Target Achieved %",
                "Utilization Target",
            ],
            rows,
        )?;
    }

    if let Some(trend) = optional_view(result.team_weekly_trend(), TEAM_TREND_SHEET)? {
        let rows = trend
            .into_iter()
            .map(|t| {
                vec![
                    Cell::Text(t.team_name),
                    Cell::Text(t.week.to_string()),
                    Cell::Number(t.active_employees as f64),
                    Cell::Number(t.utilization.capacity_hours),
                    Cell::Number(t.utilization.time_off_hours),
                    Cell::Number(t.utilization.billable_hours),
                    Cell::Number(t.utilization.available_hours),
                    Cell::Number(t.utilization.utilization_pct),
                    Cell::text(target_flag(t.meets_utilization_target)),
                ]
            })
            .collect();
        add_sheet(
            &mut workbook,
            &formats,
            TEAM_TREND_SHEET,
            &[
                "Team",
                "Week",
                "Active Employees",
                "Capacity",
                "Time Off Hours",
                "Project Hours",
                "Available Hours",
                "Utilization %",
                "Utilization Target",
            ],
            rows,
        )?;
    }

    if let Some(budget) = optional_view(result.budget_comparison(), BUDGET_SHEET)? {
        let rows = budget
            .into_iter()
            .map(|b| {
                let clients = b.client_list();
                vec![
                    Cell::Text(b.project_code),
                    Cell::Text(clients),
                    Cell::Text(b.manager),
                    Cell::Money(b.total_cost),
                    Cell::Money(b.budgeted_amount),
                    Cell::Text(b.status.to_string()),
                ]
            })
            .collect();
        add_sheet(
            &mut workbook,
            &formats,
            BUDGET_SHEET,
            &[
                "Num",
                "Client",
                "Project Manager",
                "Total Calculated Cost",
                "Budgeted Amount",
                "Status",
            ],
            rows,
        )?;
    }

    if let Some(shortfall) = optional_view(result.capacity_shortfall(), SHORTFALL_SHEET)? {
        let rows = shortfall
            .into_iter()
            .map(|s| {
                vec![
                    Cell::Text(s.employee_name),
                    Cell::Text(s.team_name),
                    Cell::Text(s.position),
                    Cell::Text(s.week.to_string()),
                    Cell::Number(s.logged_hours),
                    Cell::Number(s.missing_hours),
                ]
            })
            .collect();
        add_sheet(
            &mut workbook,
            &formats,
            SHORTFALL_SHEET,
            &[
                "Employee Name",
                "Team Name",
                "Position",
                "Week",
                "Logged Hours",
                "Missing Hours",
            ],
            rows,
        )?;
    }

    if let Some(time_off) = optional_view(result.time_off_breakdown(None), TIME_OFF_SHEET)? {
        let rows = time_off
            .into_iter()
            .map(|t| {
                vec![
                    Cell::opt_text(t.position.as_deref()),
                    Cell::Text(t.employee_name),
                    Cell::Number(t.hours),
                ]
            })
            .collect();
        add_sheet(
            &mut workbook,
            &formats,
            TIME_OFF_SHEET,
            &["Position", "Employee Name", "Time Off Hours"],
            rows,
        )?;
    }

    add_sheet(
        &mut workbook,
        &formats,
        RUN_REPORT_SHEET,
        &["Item", "Count", "Detail"],
        run_report_rows(result),
    )?;

    Ok(workbook.save_to_buffer()?)
}

fn target_flag(meets_target: bool) -> &'static str {
    if meets_target {
        "At or above target"
    } else {
        "Below target"
    }
}

fn run_report_rows(result: &PipelineResult) -> Vec<Vec<Cell>> {
    let report = &result.report;
    let mut rows = Vec::new();
    for source in &report.sources {
        rows.push(vec![
            Cell::text("Rows loaded"),
            Cell::Number(source.data_rows as f64),
            Cell::text(&source.source_name),
        ]);
    }
    rows.push(vec![
        Cell::text("Group header rows"),
        Cell::Number(report.group_header_rows as f64),
        Cell::Empty,
    ]);
    rows.push(vec![
        Cell::text("Summary rows skipped"),
        Cell::Number(report.skipped_summary_rows as f64),
        Cell::Empty,
    ]);
    rows.push(vec![
        Cell::text("Duplicates removed"),
        Cell::Number(report.duplicates_removed as f64),
        Cell::Empty,
    ]);
    rows.push(vec![
        Cell::text("Rows with missing values dropped"),
        Cell::Number(report.incomplete_rows_dropped as f64),
        Cell::Empty,
    ]);
    for (kind, count) in report.counts() {
        rows.push(vec![
            Cell::text(kind.label()),
            Cell::Number(count as f64),
            Cell::Empty,
        ]);
    }
    for failure in &report.aborted_sources {
        rows.push(vec![
            Cell::text(format!("Aborted: {}", failure.source_name)),
            Cell::Empty,
            Cell::text(&failure.message),
        ]);
    }
    rows
}

/// Writes the workbook next to `path` and renames it into place.
pub fn write_workbook(result: &PipelineResult, path: &Path) -> Result<(), PipelineError> {
    let bytes = workbook_bytes(result)?;
    place_workbook(&bytes, path)
}

/// Publishes a run: renders the workbook, saves the artifact, then moves the
/// workbook into place. When any step fails no new workbook is published.
pub fn publish(
    result: &PipelineResult,
    store: &ArtifactStore,
    workbook_path: &Path,
) -> Result<ArtifactMetadata, PipelineError> {
    let bytes = workbook_bytes(result)?;
    let metadata = store.save(result)?;
    place_workbook(&bytes, workbook_path)?;
    Ok(metadata)
}

fn place_workbook(bytes: &[u8], path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| io_context(e, format!("Failed to create output directory: {:?}", parent)))?;
    }
    let tmp_path = path.with_extension("xlsx.tmp");
    write_file(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)
        .map_err(|e| io_context(e, format!("Failed to move workbook into place: {:?}", path)))?;
    info!("Workbook written to {:?}", path);
    Ok(())
}
