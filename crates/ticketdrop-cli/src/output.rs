//! Shared output layer for pretty/text/JSON parity across all `td` commands.
//!
//! Every command handler receives an [`OutputMode`] and formats its output
//! accordingly: pretty output for dispatchers, compact text for scripts and
//! pipes, or stable JSON.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--format` / hidden `--json` flag
//! 2. `FORMAT` env var → `"pretty"` | `"text"` | `"json"`
//! 3. Default: [`OutputMode::Pretty`] if stdout is a TTY; [`OutputMode::Text`] if piped.

use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::io::{self, IsTerminal, Write};
use ticketdrop_core::error::ErrorCode;
use ticketdrop_core::lifecycle::Rejection;
use ticketdrop_core::validate::Issue;

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

/// Write a horizontal separator used by pretty human output.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<20} {}", format!("{key}:"), value.as_ref())
}

/// The three output modes supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-optimized output (sections, visual framing).
    Pretty,
    /// Token-efficient plain text for scripts and pipes.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    /// Returns `true` if JSON output was requested.
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Core resolution logic, separated from I/O for testability.
fn resolve_output_mode_inner(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    format_env: Option<&str>,
    is_tty: bool,
) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }

    if json_flag {
        return OutputMode::Json;
    }

    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }

    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

/// Resolve the output mode from CLI flags, environment, and TTY defaults.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env_val = std::env::var("FORMAT").ok();
    let is_tty = io::stdout().is_terminal();
    resolve_output_mode_inner(format_flag, json_flag, env_val.as_deref(), is_tty)
}

/// Trait implemented by list rows that can be rendered in all modes.
///
/// `render_table` doubles as the text-mode row.
pub trait Renderable {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()>;

    /// Render as a self-contained JSON object.
    fn render_json(&self, w: &mut dyn Write) -> io::Result<()>;

    /// Render as a single text row, columns in [`table_headers`] order.
    ///
    /// [`table_headers`]: Renderable::table_headers
    fn render_table(&self, w: &mut dyn Write) -> io::Result<()>;

    fn table_headers() -> &'static [&'static str]
    where
        Self: Sized,
    {
        &[]
    }
}

/// Render a list of [`Renderable`] items to stdout.
///
/// - In JSON mode, wraps items in a JSON array.
/// - In pretty/text mode, renders items sequentially.
pub fn render_list<R: Renderable>(items: &[R], mode: OutputMode) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Pretty => {
            for item in items {
                item.render_human(&mut out)?;
            }
        }
        OutputMode::Text => {
            let headers = if items.is_empty() {
                &[] as &[&str]
            } else {
                R::table_headers()
            };
            if !headers.is_empty() {
                writeln!(out, "{}", headers.join("  "))?;
            }
            for item in items {
                item.render_table(&mut out)?;
            }
        }
        OutputMode::Json => {
            write!(out, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(out, ",")?;
                }
                writeln!(out)?;
                let mut buf = Vec::new();
                item.render_json(&mut buf)?;
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                out.write_all(&buf)?;
            }
            writeln!(out, "\n]")?;
        }
    }
    Ok(())
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// A structured error with optional suggestion, error code and field issues.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Human-readable error message.
    pub message: String,
    /// Optional suggestion for how to fix the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Machine-readable error code (`E####`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Field-scoped reasons, one per rejected field.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

impl CliError {
    /// Create a simple error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            error_code: None,
            issues: Vec::new(),
        }
    }

    /// An error carrying `code` with its hint as the suggestion.
    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: code.hint().map(str::to_string),
            error_code: Some(code.code().to_string()),
            issues: Vec::new(),
        }
    }
}

impl From<ErrorCode> for CliError {
    fn from(code: ErrorCode) -> Self {
        Self::coded(code, code.message())
    }
}

impl From<&Rejection> for CliError {
    fn from(rejection: &Rejection) -> Self {
        let code = rejection.code();
        Self {
            issues: rejection.issues(),
            ..Self::coded(code, code.message())
        }
    }
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({
                "error": error,
            });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            for issue in &error.issues {
                writeln!(out, "  {}: {}", issue.field, issue.message)?;
            }
            if let Some(ref suggestion) = error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

/// An error that was already written to stderr; `main` only sets the exit
/// status for it.
#[derive(Debug)]
pub struct Reported;

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("error already reported")
    }
}

impl std::error::Error for Reported {}

/// Render `error` and fail the command.
pub fn fail<T>(mode: OutputMode, error: &CliError) -> anyhow::Result<T> {
    render_error(mode, error)?;
    Err(Reported.into())
}

/// Report an error nothing has rendered yet, once, in the requested format.
pub fn report_unrendered(mode: OutputMode, err: &anyhow::Error) {
    if err.is::<Reported>() {
        return;
    }
    let error = CliError::new(format!("{err:#}"));
    if render_error(mode, &error).is_err() {
        eprintln!("error: {err:#}");
    }
}

/// Print non-blocking warnings to stderr; JSON callers read them from the
/// result body instead.
pub fn render_warnings(mode: OutputMode, warnings: &[Issue]) -> io::Result<()> {
    if mode.is_json() || warnings.is_empty() {
        return Ok(());
    }
    let stderr = io::stderr();
    let mut out = stderr.lock();
    for warning in warnings {
        writeln!(out, "warning: {}: {}", warning.field, warning.message)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketdrop_core::model::TimestampField;

    #[test]
    fn fail_marks_the_error_as_reported() {
        let err = fail::<()>(OutputMode::Json, &CliError::from(ErrorCode::NotInitialized)).unwrap_err();
        assert!(err.is::<Reported>());

        let plain = anyhow::anyhow!("disk full");
        assert!(!plain.is::<Reported>());
    }

    #[test]
    fn output_mode_is_json() {
        assert!(OutputMode::Json.is_json());
        assert!(!OutputMode::Pretty.is_json());
        assert!(!OutputMode::Text.is_json());
    }

    #[test]
    fn resolve_format_flag_wins_over_json_and_env() {
        let mode = resolve_output_mode_inner(Some(OutputMode::Text), true, Some("pretty"), true);
        assert_eq!(mode, OutputMode::Text);
    }

    #[test]
    fn resolve_json_flag_wins_over_env() {
        let mode = resolve_output_mode_inner(None, true, Some("pretty"), true);
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn resolve_format_env_case_insensitive() {
        let mode = resolve_output_mode_inner(None, false, Some("JSON"), true);
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn resolve_format_env_unknown_falls_through_to_tty() {
        let mode_tty = resolve_output_mode_inner(None, false, Some("fancy"), true);
        assert_eq!(mode_tty, OutputMode::Pretty);
        let mode_pipe = resolve_output_mode_inner(None, false, Some("fancy"), false);
        assert_eq!(mode_pipe, OutputMode::Text);
    }

    #[test]
    fn error_code_fills_suggestion_and_code() {
        let err = CliError::from(ErrorCode::NotInitialized);
        assert_eq!(err.error_code.as_deref(), Some(ErrorCode::NotInitialized.code()));
        assert!(err.suggestion.as_deref().is_some_and(|s| s.contains("td init")));
        assert!(err.issues.is_empty());
    }

    #[test]
    fn rejection_carries_field_issues() {
        let rejection = Rejection::DuplicateTimestamp {
            field: TimestampField::ArriveOrigin,
        };
        let err = CliError::from(&rejection);
        assert_eq!(err.error_code.as_deref(), Some(ErrorCode::DuplicateTimestamp.code()));
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].field, "arrive_origin");

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["issues"][0]["field"], "arrive_origin");
    }

    #[test]
    fn empty_issue_list_is_omitted_from_json() {
        let json = serde_json::to_value(CliError::new("boom")).unwrap();
        assert!(json.get("issues").is_none());
        assert!(json.get("error_code").is_none());
    }
}
