//! Import and export of task collections.
//!
//! JSON export is lossless and re-importable. The text report is one line per
//! task for reading or pasting elsewhere; there is no importer for it.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::fields::ExportFormat;
use crate::task::Task;

pub const DONE_GLYPH: &str = "✅";
pub const OPEN_GLYPH: &str = "⏳";
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors from reading an import document.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The file was read but is not a JSON array of task objects.
    #[error("not a valid JSON file")]
    MalformedDocument(#[source] serde_json::Error),

    /// The file could not be read at all.
    #[error("could not read the file: {0}")]
    UnreadableSource(#[source] io::Error),
}

/// Pretty-printed JSON array of tasks.
pub fn export_json(tasks: &[Task]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(tasks)
}

/// Parse an exported document. Individual records are not validated; fields
/// that do not make sense are read as unset.
pub fn import_json(contents: &str) -> Result<Vec<Task>, ImportError> {
    serde_json::from_str(contents).map_err(ImportError::MalformedDocument)
}

/// Read and parse an import file.
pub async fn import_file(path: impl AsRef<Path>) -> Result<Vec<Task>, ImportError> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(ImportError::UnreadableSource)?;
    let tasks = import_json(&contents)?;
    tracing::debug!(path = %path.display(), count = tasks.len(), "parsed import file");
    Ok(tasks)
}

/// Format `date` with a user-supplied strftime pattern, or `None` if the
/// pattern cannot be applied to a calendar date.
pub fn format_date(date: NaiveDate, pattern: &str) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", date.format(pattern)).ok()?;
    Some(out)
}

fn format_due(date: NaiveDate, pattern: &str) -> String {
    format_date(date, pattern).unwrap_or_else(|| {
        tracing::warn!(pattern, "unusable date format, using the default");
        date.format(DEFAULT_DATE_FORMAT).to_string()
    })
}

/// Render one report line (without the trailing newline).
pub fn format_text_line(index: usize, task: &Task, date_format: &str) -> String {
    let glyph = if task.completed { DONE_GLYPH } else { OPEN_GLYPH };
    let mut line = format!("{}. {} {}", index + 1, glyph, task.text);
    if let Some(p) = task.priority {
        line.push_str(&format!(" [{}]", p.as_str()));
    }
    if let Some(c) = task.category.as_deref().filter(|c| !c.is_empty()) {
        line.push_str(&format!(" ({c})"));
    }
    if let Some(d) = task.due_date {
        line.push_str(&format!(" - {}", format_due(d, date_format)));
    }
    line
}

/// Human-readable report in collection order.
pub fn export_text(tasks: &[Task], date_format: &str) -> String {
    tasks
        .iter()
        .enumerate()
        .map(|(i, t)| format_text_line(i, t, date_format))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `todos-YYYY-MM-DD.json` or `.txt`.
pub fn export_file_name(format: ExportFormat, date: NaiveDate) -> String {
    format!("todos-{}.{}", date.format("%Y-%m-%d"), format.extension())
}

/// Write an export artifact into `dir` and return its path.
pub fn write_export(
    dir: &Path,
    format: ExportFormat,
    tasks: &[Task],
    date: NaiveDate,
    date_format: &str,
) -> io::Result<PathBuf> {
    let body = match format {
        ExportFormat::Json => export_json(tasks).map_err(io::Error::other)?,
        ExportFormat::Text => export_text(tasks, date_format),
    };
    std::fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(format, date));
    std::fs::write(&path, body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Priority;

    fn task(text: &str) -> Task {
        serde_json::from_value(serde_json::json!({ "id": text, "text": text })).unwrap()
    }

    #[test]
    fn test_malformed_document() {
        let err = import_json("{not json").unwrap_err();
        assert!(matches!(err, ImportError::MalformedDocument(_)));
        assert_eq!(err.to_string(), "not a valid JSON file");
    }

    #[test]
    fn test_non_array_is_malformed() {
        assert!(matches!(
            import_json(r#"{"text":"x"}"#),
            Err(ImportError::MalformedDocument(_))
        ));
        assert!(matches!(import_json("[1, 2]"), Err(ImportError::MalformedDocument(_))));
    }

    #[test]
    fn test_import_tolerates_odd_records() {
        let tasks = import_json(r#"[{"text":"a","priority":"extreme"},{}]"#).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, None);
        assert!(tasks[1].text.is_empty());
    }

    #[test]
    fn test_export_json_is_indented() {
        let out = export_json(&[task("a")]).unwrap();
        assert!(out.starts_with("[\n  {"));
        assert_eq!(export_json(&[]).unwrap(), "[]");
    }

    #[test]
    fn test_text_report() {
        let mut a = task("Write report");
        a.completed = true;
        a.priority = Some(Priority::High);
        a.category = Some("work".into());
        a.due_date = NaiveDate::from_ymd_opt(2024, 5, 3);
        let b = task("Call mum");
        let out = export_text(&[a, b], "%Y-%m-%d");
        assert_eq!(
            out,
            "1. ✅ Write report [high] (work) - 2024-05-03\n2. ⏳ Call mum"
        );
    }

    #[test]
    fn test_text_report_custom_date_format() {
        let mut a = task("Pay rent");
        a.due_date = NaiveDate::from_ymd_opt(2024, 5, 3);
        assert_eq!(export_text(&[a], "%d/%m/%Y"), "1. ⏳ Pay rent - 03/05/2024");
    }

    #[test]
    fn test_text_report_bad_date_format_falls_back() {
        let mut a = task("Pay rent");
        a.due_date = NaiveDate::from_ymd_opt(2024, 5, 3);
        assert_eq!(export_text(&[a.clone()], "%Q"), "1. ⏳ Pay rent - 2024-05-03");
        // A time specifier has nothing to read from a bare date.
        assert_eq!(export_text(&[a], "%H:%M"), "1. ⏳ Pay rent - 2024-05-03");
    }

    #[test]
    fn test_format_date() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(format_date(d, "%b %e").as_deref(), Some("Jan  9"));
        assert_eq!(format_date(d, "%Q"), None);
    }

    #[test]
    fn test_export_file_names() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(export_file_name(ExportFormat::Json, d), "todos-2024-01-09.json");
        assert_eq!(export_file_name(ExportFormat::Text, d), "todos-2024-01-09.txt");
    }

    #[test]
    fn test_write_export() {
        let dir = tempfile::tempdir().unwrap();
        let d = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        let path = write_export(dir.path(), ExportFormat::Json, &[task("a")], d, "%Y-%m-%d").unwrap();
        let back = import_json(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, vec![task("a")]);
    }

    #[tokio::test]
    async fn test_import_file_missing_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = import_file(dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, ImportError::UnreadableSource(_)));
    }

    #[tokio::test]
    async fn test_import_file_reads_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.json");
        std::fs::write(&path, r#"[{"id":"1","text":"hello"}]"#).unwrap();
        let tasks = import_file(&path).await.unwrap();
        assert_eq!(tasks[0].text, "hello");
    }
}
