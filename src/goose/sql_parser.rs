//! Parser for goose-annotated SQL migration files.
//!
//! A file is split into `Up` and `Down` statements using `-- +goose`
//! annotations. Outside a `StatementBegin`/`StatementEnd` block a statement
//! ends on a line ending in `;`; inside a block everything up to
//! `StatementEnd` is one statement, which is how function bodies containing
//! semicolons are written.

use anyhow::{Result, bail};

/// One executable statement and the file line it starts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub line: usize,
}

/// Statements of a migration file, split by direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    pub up: Vec<Statement>,
    pub down: Vec<Statement>,
    /// False when the file is annotated `-- +goose NO TRANSACTION`
    pub use_tx: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Annotation {
    Up,
    Down,
    StatementBegin,
    StatementEnd,
    NoTransaction,
    EnvSubOn,
    EnvSubOff,
}

/// Parse a migration file, substituting from the process environment
pub fn parse_sql(contents: &str) -> Result<ParsedSql> {
    parse_sql_with_env(contents, |name| std::env::var(name).ok())
}

pub fn parse_sql_with_env<F>(contents: &str, lookup: F) -> Result<ParsedSql>
where
    F: Fn(&str) -> Option<String>,
{
    let mut parsed = ParsedSql {
        up: Vec::new(),
        down: Vec::new(),
        use_tx: true,
    };

    let mut section = Section::Preamble;
    let mut envsub = false;
    // Line of the active StatementBegin
    let mut block_start: Option<usize> = None;
    let mut buffer = String::new();
    let mut buffer_line = 0;

    for (idx, raw_line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();

        if let Some(annotation) = parse_annotation(trimmed, line_no)? {
            match annotation {
                Annotation::Up => {
                    if section != Section::Preamble {
                        bail!("line {}: duplicate '-- +goose Up' annotation", line_no);
                    }
                    section = Section::Up;
                }
                Annotation::Down => {
                    match section {
                        Section::Preamble => {
                            bail!("line {}: '-- +goose Down' before '-- +goose Up'", line_no)
                        }
                        Section::Down => {
                            bail!("line {}: duplicate '-- +goose Down' annotation", line_no)
                        }
                        Section::Up => {}
                    }
                    if let Some(start) = block_start {
                        bail!(
                            "line {}: '-- +goose Down' inside the StatementBegin block opened on line {}",
                            line_no,
                            start
                        );
                    }
                    ensure_flushed(&buffer, buffer_line)?;
                    section = Section::Down;
                }
                Annotation::StatementBegin => {
                    if section == Section::Preamble {
                        bail!(
                            "line {}: '-- +goose StatementBegin' before '-- +goose Up'",
                            line_no
                        );
                    }
                    if let Some(start) = block_start {
                        bail!(
                            "line {}: nested StatementBegin (block already opened on line {})",
                            line_no,
                            start
                        );
                    }
                    ensure_flushed(&buffer, buffer_line)?;
                    buffer.clear();
                    block_start = Some(line_no);
                    buffer_line = line_no + 1;
                }
                Annotation::StatementEnd => {
                    if block_start.take().is_none() {
                        bail!(
                            "line {}: '-- +goose StatementEnd' without a matching StatementBegin",
                            line_no
                        );
                    }
                    push_statement(&mut parsed, section, &buffer, buffer_line);
                    buffer.clear();
                }
                Annotation::NoTransaction => parsed.use_tx = false,
                Annotation::EnvSubOn => envsub = true,
                Annotation::EnvSubOff => envsub = false,
            }
            continue;
        }

        if section == Section::Preamble {
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            bail!(
                "line {}: SQL found before '-- +goose Up' annotation",
                line_no
            );
        }

        let line = if envsub {
            substitute_env(raw_line, &lookup)
        } else {
            raw_line.to_string()
        };

        if block_start.is_some() {
            buffer.push_str(&line);
            buffer.push('\n');
            continue;
        }

        // Comments and blank lines between statements are dropped
        if buffer.trim().is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        if buffer.is_empty() {
            buffer_line = line_no;
        }
        buffer.push_str(&line);
        buffer.push('\n');

        if ends_with_semicolon(&line) {
            push_statement(&mut parsed, section, &buffer, buffer_line);
            buffer.clear();
        }
    }

    if let Some(start) = block_start {
        bail!(
            "StatementBegin on line {} is never closed with '-- +goose StatementEnd'",
            start
        );
    }
    ensure_flushed(&buffer, buffer_line)?;

    if section == Section::Preamble {
        bail!("missing '-- +goose Up' annotation");
    }

    Ok(parsed)
}

fn parse_annotation(trimmed: &str, line_no: usize) -> Result<Option<Annotation>> {
    let Some(comment) = trimmed.strip_prefix("--") else {
        return Ok(None);
    };
    let Some(command) = comment.trim_start().strip_prefix("+goose") else {
        return Ok(None);
    };

    let normalized = command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();

    let annotation = match normalized.as_str() {
        "up" => Annotation::Up,
        "down" => Annotation::Down,
        "statementbegin" => Annotation::StatementBegin,
        "statementend" => Annotation::StatementEnd,
        "no transaction" => Annotation::NoTransaction,
        "envsub on" => Annotation::EnvSubOn,
        "envsub off" => Annotation::EnvSubOff,
        _ => bail!(
            "line {}: unknown goose annotation '{}'",
            line_no,
            trimmed
        ),
    };

    Ok(Some(annotation))
}

fn push_statement(parsed: &mut ParsedSql, section: Section, buffer: &str, line: usize) {
    if buffer.trim().is_empty() {
        return;
    }

    let statement = Statement {
        sql: buffer.trim_end().to_string(),
        line,
    };
    match section {
        Section::Up => parsed.up.push(statement),
        Section::Down => parsed.down.push(statement),
        Section::Preamble => {}
    }
}

fn ensure_flushed(buffer: &str, buffer_line: usize) -> Result<()> {
    if !buffer.trim().is_empty() {
        bail!(
            "unterminated statement starting on line {} (missing semicolon?)",
            buffer_line
        );
    }
    Ok(())
}

/// True if the line, ignoring a trailing `--` comment, ends in `;`
fn ends_with_semicolon(line: &str) -> bool {
    line.split_whitespace()
        .take_while(|word| !word.starts_with("--"))
        .last()
        .is_some_and(|word| word.ends_with(';'))
}

/// Expand `${NAME}` and `${NAME:-default}`; `$$` and `$1` are left alone
fn substitute_env<F>(line: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let expr = &after[..end];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };

        if is_env_name(name) {
            let value = lookup(name)
                .or_else(|| default.map(str::to_string))
                .unwrap_or_default();
            out.push_str(&value);
        } else {
            out.push_str(&rest[start..start + 2 + end + 1]);
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
