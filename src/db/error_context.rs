//! Rich error reports for SQL that fails while a migration is running.

use sqlx::postgres::{PgDatabaseError, PgErrorPosition};

/// Error details extracted from a failed statement
#[derive(Debug, Clone, Default)]
pub struct SqlErrorContext {
    pub message: String,
    /// Line in the migration file, when PostgreSQL reported a position
    pub line_number: Option<usize>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// PL/pgSQL or other `WHERE` context
    pub context: Option<String>,
    /// SQLSTATE, e.g. "42P01" for undefined_table
    pub code: Option<String>,
}

impl SqlErrorContext {
    /// Extract error context from a sqlx error raised by `statement`
    ///
    /// `first_line` is the line of the migration file on which the statement
    /// starts, so positions inside the statement map back onto the file.
    pub fn from_sqlx_error(error: &sqlx::Error, statement: &str, first_line: usize) -> Self {
        let Some(pg_error) = error
            .as_database_error()
            .and_then(|db_error| db_error.try_downcast_ref::<PgDatabaseError>())
        else {
            return Self {
                message: error.to_string(),
                ..Default::default()
            };
        };

        let line_number = pg_error
            .position()
            .map(|pos| match pos {
                PgErrorPosition::Original(p) => p,
                PgErrorPosition::Internal { position, .. } => position,
            })
            .map(|p| first_line + position_to_line(statement, p) - 1);

        Self {
            message: pg_error.message().to_string(),
            line_number,
            detail: pg_error.detail().map(str::to_string),
            hint: pg_error.hint().map(str::to_string),
            context: pg_error.r#where().map(str::to_string),
            code: Some(pg_error.code().to_string()),
        }
    }

    /// Render the error against the full migration file
    pub fn format(&self, source: &str, file_contents: &str) -> String {
        let mut msg = format!("SQL error in '{}'", source);

        if let Some(line) = self.line_number {
            msg.push_str(&format!(" at line {}", line));
        }
        msg.push_str(":\n\n");
        msg.push_str(&format!("  {}", self.message));

        if let Some(code) = &self.code {
            msg.push_str(&format!(" (SQLSTATE {})", code));
        }
        if let Some(detail) = &self.detail {
            msg.push_str(&format!("\n  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            msg.push_str(&format!("\n  Hint: {}", hint));
        }
        if let Some(ctx) = &self.context {
            msg.push_str(&format!("\n  Context: {}", ctx));
        }

        if let Some(line) = self.line_number {
            msg.push_str(&format!("\n\n{}", format_line_context(file_contents, line)));
        }

        msg
    }
}

/// Convert a 1-indexed character position to a 1-indexed line number
pub fn position_to_line(content: &str, position: usize) -> usize {
    content
        .chars()
        .take(position.saturating_sub(1))
        .filter(|c| *c == '\n')
        .count()
        + 1
}

/// Show a few lines either side of `error_line`
pub fn format_line_context(content: &str, error_line: usize) -> String {
    const CONTEXT_LINES: usize = 2;

    let lines: Vec<&str> = content.lines().collect();
    let error_idx = error_line.saturating_sub(1);
    let start_idx = error_idx.saturating_sub(CONTEXT_LINES).min(lines.len());
    let end_idx = (error_idx + CONTEXT_LINES + 1).min(lines.len());

    lines[start_idx..end_idx]
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let line_num = start_idx + idx + 1;
            let marker = if line_num == error_line { ">" } else { " " };
            format!("  {} {:4} | {}", marker, line_num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
