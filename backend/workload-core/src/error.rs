// src/error.rs
use thiserror::Error;

/// Errors that abort a file or a whole pipeline run.
///
/// Row-level problems (a bad date, a bad duration, an employee missing from the
/// roster) are not errors; they are recorded as `RowWarning`s in the run report.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{source_name}: missing required column(s): {}", .missing_columns.join(", "))]
    MalformedSource {
        source_name: String,
        missing_columns: Vec<String>,
    },

    #[error("{source_name}: no header row found after skipping {skip_rows} row(s)")]
    HeaderNotFound {
        source_name: String,
        skip_rows: usize,
    },

    #[error("{source_name}: employee '{employee_name}' appears more than once in the roster")]
    DuplicateRosterEntry {
        source_name: String,
        employee_name: String,
    },

    #[error("{stage} requires the {input}, which was not supplied")]
    MissingInput {
        stage: &'static str,
        input: &'static str,
    },

    #[error("Client '{client}' matches more than one budget code: {}", .codes.join(", "))]
    AmbiguousBudgetMatch { client: String, codes: Vec<String> },

    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error ({context}): {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet parsing failed: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Workbook export failed: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// True for the structural failures that abort processing of one input file.
    pub fn is_malformed_source(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedSource { .. }
                | PipelineError::HeaderNotFound { .. }
                | PipelineError::DuplicateRosterEntry { .. }
        )
    }
}

// Helper to create context-aware IO errors
pub fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> PipelineError {
    PipelineError::Io {
        source,
        context: context.into(),
    }
}
