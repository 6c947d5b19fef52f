// src/loader.rs
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use std::{
    collections::HashSet,
    fs,
    io::Cursor,
    path::Path,
    str::FromStr,
};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::duration::parse_duration;
use crate::error::{io_context, PipelineError};
use crate::model::{BudgetRecord, RosterRecord, TimeEntry};
use crate::normalizer::CategoryRules;
use crate::report::{RowWarning, RunReport};
use crate::temporal::{parse_activity_date, week_index};

// --- Source files ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Spreadsheet,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" | "txt" => Ok(SourceFormat::Csv),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(SourceFormat::Spreadsheet),
            other => Err(PipelineError::UnsupportedFormat(format!(
                "{} (extension '{}')",
                path.display(),
                other
            ))),
        }
    }
}

/// An input blob with its display name and format hint.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub format: SourceFormat,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let format = SourceFormat::from_path(path)?;
        let bytes = fs::read(path)
            .map_err(|e| io_context(e, format!("Failed to read input file: {:?}", path)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, format, bytes })
    }

    pub fn from_bytes(name: impl Into<String>, format: SourceFormat, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            format,
            bytes,
        }
    }
}

// --- Raw tables ---

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based row number in the source file.
    pub row_number: usize,
    pub cells: Vec<String>,
}

impl RawRow {
    pub fn cell(&self, index: usize) -> &str {
        self.cells.get(index).map(|c| c.trim()).unwrap_or("")
    }
}

/// Header row plus the data rows below it, every cell rendered as text.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub source_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    /// Case-insensitive lookup of the first header matching any alias.
    pub fn column_index(&self, aliases: &[String]) -> Option<usize> {
        aliases.iter().find_map(|alias| {
            let alias = alias.trim();
            self.headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(alias))
        })
    }

    /// Resolves every required column, reporting all missing ones at once.
    pub fn require_columns(&self, columns: &[&[String]]) -> Result<Vec<usize>, PipelineError> {
        let mut indices = Vec::with_capacity(columns.len());
        let mut missing = Vec::new();
        for aliases in columns {
            match self.column_index(aliases) {
                Some(index) => indices.push(index),
                None => missing.push(
                    aliases
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "<unnamed>".to_string()),
                ),
            }
        }
        if missing.is_empty() {
            Ok(indices)
        } else {
            Err(PipelineError::MalformedSource {
                source_name: self.source_name.clone(),
                missing_columns: missing,
            })
        }
    }
}

/// Reads a source, skipping a fixed banner. The first non-blank row after the
/// banner is the header; blank rows are dropped.
pub fn read_table(source: &SourceFile, skip_rows: usize) -> Result<RawTable, PipelineError> {
    let raw_rows = match source.format {
        SourceFormat::Csv => read_csv_rows(&source.bytes, skip_rows)?,
        SourceFormat::Spreadsheet => read_spreadsheet_rows(&source.bytes, skip_rows)?,
    };

    let mut rows = raw_rows
        .into_iter()
        .filter(|row| row.cells.iter().any(|c| !c.trim().is_empty()));

    let header = rows.next().ok_or_else(|| PipelineError::HeaderNotFound {
        source_name: source.name.clone(),
        skip_rows,
    })?;
    let headers: Vec<String> = header.cells.iter().map(|h| h.trim().to_string()).collect();
    let width = headers.len();

    let rows: Vec<RawRow> = rows
        .map(|mut row| {
            if row.cells.len() < width {
                row.cells.resize(width, String::new());
            }
            row
        })
        .collect();

    debug!(
        "{}: header at row {} with {} column(s), {} data row(s)",
        source.name,
        header.row_number,
        width,
        rows.len()
    );

    Ok(RawTable {
        source_name: source.name.clone(),
        headers,
        rows,
    })
}

fn read_csv_rows(bytes: &[u8], skip_rows: usize) -> Result<Vec<RawRow>, PipelineError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    // The csv reader drops blank lines, so the banner is skipped on raw lines.
    let mut offset = 0;
    let mut skipped = 0;
    while skipped < skip_rows && offset < bytes.len() {
        match bytes[offset..].iter().position(|b| *b == b'\n') {
            Some(pos) => offset += pos + 1,
            None => offset = bytes.len(),
        }
        skipped += 1;
    }

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(&bytes[offset..]);

    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(i + 1);
        rows.push(RawRow {
            row_number: skipped + line,
            cells: record.iter().map(str::to_string).collect(),
        });
    }
    Ok(rows)
}

fn read_spreadsheet_rows(bytes: &[u8], skip_rows: usize) -> Result<Vec<RawRow>, PipelineError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Ok(Vec::new()),
    };

    // Ranges start at the first used cell; keep absolute row and column positions.
    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut rows = Vec::new();
    for (i, row) in range.rows().enumerate() {
        let absolute = row_offset + i;
        if absolute < skip_rows {
            continue;
        }
        let mut cells = vec![String::new(); col_offset];
        cells.extend(row.iter().map(cell_to_string));
        rows.push(RawRow {
            row_number: absolute + 1,
            cells,
        });
    }
    Ok(rows)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => format_float(*f),
        Data::Bool(b) => b.to_string(),
        Data::Error(_) => String::new(),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            if dt.is_duration() || (0.0..1.0).contains(&serial) {
                format_clock(serial)
            } else {
                match dt.as_datetime() {
                    Some(datetime) => datetime.date().format("%Y-%m-%d").to_string(),
                    None => format_float(serial),
                }
            }
        }
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

// Fraction of a day as H:MM.
fn format_clock(days: f64) -> String {
    let minutes = (days * 24.0 * 60.0).round().max(0.0) as i64;
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

/// Parses a money cell such as "$1,250.50". `None` for blank or unreadable values.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

// --- Timesheet ---

/// Loads the timesheet export into normalized time entries.
///
/// The first column holds the employee name only on group header rows; it is
/// forward-filled to the activity rows beneath and stripped of its marker
/// prefix. Header and total rows do not produce entries but are counted.
pub fn load_timesheet(
    source: &SourceFile,
    config: &PipelineConfig,
    report: &mut RunReport,
) -> Result<Vec<TimeEntry>, PipelineError> {
    let table = read_table(source, config.skip_rows)?;
    let columns = &config.timesheet_columns;
    let indices = table.require_columns(&[
        &columns.client,
        &columns.category,
        &columns.activity_date,
        &columns.duration,
    ])?;
    let (client_idx, category_idx, date_idx, duration_idx) =
        (indices[0], indices[1], indices[2], indices[3]);
    let description_idx = table.column_index(&columns.description);

    let rules = CategoryRules::from_config(config);
    let mut entries = Vec::new();
    let mut current_employee: Option<String> = None;

    for row in &table.rows {
        let employee_cell = row.cell(0);
        if !employee_cell.is_empty() {
            let name = strip_marker(employee_cell, &config.employee_marker_prefix);
            let is_summary = config
                .summary_row_prefix
                .as_deref()
                .is_some_and(|prefix| !prefix.is_empty() && name.starts_with(prefix));
            if is_summary {
                report.skipped_summary_rows += 1;
                continue;
            }
            current_employee = Some(name);
        }

        let client = row.cell(client_idx);
        let raw_category = row.cell(category_idx);
        let raw_date = row.cell(date_idx);
        let raw_duration = row.cell(duration_idx);

        // Only the configured prefix marks a summary row; a bare duration is kept
        // and surfaces through its missing date.
        if client.is_empty() && raw_category.is_empty() && raw_date.is_empty() && raw_duration.is_empty() {
            report.group_header_rows += 1;
            continue;
        }

        let employee_name = match &current_employee {
            Some(name) => name.clone(),
            None => {
                warn!(
                    "{}: row {} has no employee above it; keeping it with a blank name",
                    source.name, row.row_number
                );
                String::new()
            }
        };

        let activity_date = parse_activity_date(raw_date, &config.date_formats);
        if activity_date.is_none() {
            warn!(
                "{}: row {} has unparsable activity date '{}'",
                source.name, row.row_number, raw_date
            );
            report.warn(RowWarning::UnparsableDate {
                row: row.row_number,
                raw: raw_date.to_string(),
            });
        }

        let duration = parse_duration(raw_duration);
        if duration.defaulted {
            warn!(
                "{}: row {} has unparsable duration '{}', counted as 0 hours",
                source.name, row.row_number, raw_duration
            );
            report.warn(RowWarning::UnparsableDuration {
                row: row.row_number,
                raw: raw_duration.to_string(),
            });
        }

        let description = description_idx
            .map(|idx| row.cell(idx))
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        entries.push(TimeEntry {
            row_number: row.row_number,
            employee_name,
            activity_date,
            raw_activity_date: raw_date.to_string(),
            week: activity_date.map(|d| week_index(d, config.anchor_date)),
            client: client.to_string(),
            raw_category: raw_category.to_string(),
            service_category: rules.apply(raw_category, client),
            duration_hours: duration.hours,
            raw_duration: duration.raw,
            duration_defaulted: duration.defaulted,
            description,
        });
    }

    info!(
        "{}: loaded {} time entries ({} group header rows, {} summary rows skipped)",
        source.name,
        entries.len(),
        report.group_header_rows,
        report.skipped_summary_rows
    );
    report.record_source(&source.name, entries.len());
    Ok(entries)
}

fn strip_marker(cell: &str, marker: &str) -> String {
    let trimmed = cell.trim();
    if marker.is_empty() {
        return trimmed.to_string();
    }
    trimmed.strip_prefix(marker).unwrap_or(trimmed).trim().to_string()
}

// --- Roster ---

pub fn load_roster(
    source: &SourceFile,
    config: &PipelineConfig,
    report: &mut RunReport,
) -> Result<Vec<RosterRecord>, PipelineError> {
    let table = read_table(source, config.roster_skip_rows)?;
    let columns = &config.roster_columns;
    let indices = table.require_columns(&[
        &columns.employee_name,
        &columns.team_name,
        &columns.position,
        &columns.hourly_rate,
    ])?;
    let rate_header = table.headers[indices[3]].clone();

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for row in &table.rows {
        let employee_name = row.cell(indices[0]);
        if employee_name.is_empty() {
            continue;
        }
        if !seen.insert(employee_name.to_string()) {
            return Err(PipelineError::DuplicateRosterEntry {
                source_name: source.name.clone(),
                employee_name: employee_name.to_string(),
            });
        }

        let raw_rate = row.cell(indices[3]);
        let hourly_rate = match parse_money(raw_rate).filter(|r| !r.is_sign_negative()) {
            Some(rate) => rate,
            None => {
                warn!(
                    "{}: row {} has unreadable hourly rate '{}' for {}, using 0",
                    source.name, row.row_number, raw_rate, employee_name
                );
                report.warn(RowWarning::UnparsableNumber {
                    source_name: source.name.clone(),
                    row: row.row_number,
                    column: rate_header.clone(),
                    raw: raw_rate.to_string(),
                });
                Decimal::ZERO
            }
        };

        records.push(RosterRecord {
            employee_name: employee_name.to_string(),
            team_name: row.cell(indices[1]).to_string(),
            position: row.cell(indices[2]).to_string(),
            hourly_rate,
        });
    }

    info!("{}: loaded {} roster records", source.name, records.len());
    report.record_source(&source.name, records.len());
    Ok(records)
}

// --- Budget register ---

pub fn load_budget(
    source: &SourceFile,
    config: &PipelineConfig,
    report: &mut RunReport,
) -> Result<Vec<BudgetRecord>, PipelineError> {
    let table = read_table(source, config.budget_skip_rows)?;
    let columns = &config.budget_columns;
    let indices = table.require_columns(&[&columns.project_code, &columns.amount, &columns.manager])?;
    let amount_header = table.headers[indices[1]].clone();

    let mut records = Vec::new();
    for row in &table.rows {
        let project_code = row.cell(indices[0]);
        if project_code.is_empty() {
            continue;
        }

        let raw_amount = row.cell(indices[1]);
        let budgeted_amount = match parse_money(raw_amount) {
            Some(amount) => amount,
            None => {
                warn!(
                    "{}: row {} has unreadable amount '{}' for {}, using 0",
                    source.name, row.row_number, raw_amount, project_code
                );
                report.warn(RowWarning::UnparsableNumber {
                    source_name: source.name.clone(),
                    row: row.row_number,
                    column: amount_header.clone(),
                    raw: raw_amount.to_string(),
                });
                Decimal::ZERO
            }
        };

        records.push(BudgetRecord {
            project_code: project_code.to_string(),
            budgeted_amount,
            manager: row.cell(indices[2]).to_string(),
        });
    }

    info!("{}: loaded {} budget records", source.name, records.len());
    report.record_source(&source.name, records.len());
    Ok(records)
}
