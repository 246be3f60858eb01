//! Collection operations and utility functions for task management.
//!
//! The collection is treated as an immutable value: every operation here takes
//! the current tasks and returns the next collection, replacing a task by id
//! rather than editing it in place. This keeps "write the whole collection
//! back" persistence correct. Also home to input validation, identifier
//! resolution, date parsing and table formatting used by the command line.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::clock::Clock;
use crate::fields::Priority;
use crate::task::{dedup_tags, Task, TaskDraft};

/// Maximum task text length, in characters.
pub const MAX_TEXT_LEN: usize = 200;

/// A single rule a submitted task breaks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("task text cannot be empty")]
    EmptyText,
    #[error("task text is {len} characters, the limit is {MAX_TEXT_LEN}")]
    TextTooLong { len: usize },
    #[error("due date {due} is before today")]
    DueInPast { due: NaiveDate },
}

/// Every rule a submitted task breaks, in check order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_errors(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Check a draft before it becomes a task: non-empty text, at most
/// [`MAX_TEXT_LEN`] characters, no due date before `today`.
pub fn validate_draft(draft: &TaskDraft, today: NaiveDate) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();
    let text = draft.text.trim();
    if text.is_empty() {
        errors.push(ValidationError::EmptyText);
    }
    let len = text.chars().count();
    if len > MAX_TEXT_LEN {
        errors.push(ValidationError::TextTooLong { len });
    }
    if let Some(due) = draft.due_date {
        if due < today {
            errors.push(ValidationError::DueInPast { due });
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// As [`validate_draft`], but an unchanged due date may stay in the past.
pub fn validate_edit(
    draft: &TaskDraft,
    previous: &Task,
    today: NaiveDate,
) -> Result<(), ValidationErrors> {
    match validate_draft(draft, today) {
        Ok(()) => Ok(()),
        Err(ValidationErrors(errors)) => {
            let errors: Vec<_> = errors
                .into_iter()
                .filter(|e| !matches!(e, ValidationError::DueInPast { due } if Some(*due) == previous.due_date))
                .collect();
            if errors.is_empty() {
                Ok(())
            } else {
                Err(ValidationErrors(errors))
            }
        }
    }
}

fn fresh_id(used: &HashSet<String>, now: DateTime<Utc>) -> String {
    let mut candidate = now.timestamp_millis();
    while used.contains(&candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

/// Generate an id not used in `tasks`: the creation time in epoch
/// milliseconds, bumped until unique.
pub fn next_id(tasks: &[Task], now: DateTime<Utc>) -> String {
    let used: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
    fresh_id(&used, now)
}

/// Turn a validated draft into a task with a fresh id and creation stamp.
pub fn new_task(draft: TaskDraft, existing: &[Task], clock: &dyn Clock) -> Task {
    let now = clock.now();
    // Stored stamps carry millisecond precision.
    let created_at = DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
    Task {
        id: next_id(existing, now),
        text: draft.text.trim().to_string(),
        completed: false,
        priority: draft.priority,
        category: draft.category.filter(|c| !c.trim().is_empty()),
        due_date: draft.due_date,
        tags: dedup_tags(draft.tags),
        created_at: Some(created_at),
    }
}

/// New tasks go to the front.
pub fn add(tasks: &[Task], task: Task) -> Vec<Task> {
    let mut next = Vec::with_capacity(tasks.len() + 1);
    next.push(task);
    next.extend_from_slice(tasks);
    next
}

fn map_task(tasks: &[Task], id: &str, f: impl Fn(&Task) -> Task) -> Vec<Task> {
    tasks
        .iter()
        .map(|t| if t.id == id { f(t) } else { t.clone() })
        .collect()
}

/// Substitute the task carrying `task.id`.
pub fn replace(tasks: &[Task], task: Task) -> Vec<Task> {
    let id = task.id.clone();
    map_task(tasks, &id, |_| task.clone())
}

/// Apply an edited draft, keeping id, completion and creation stamp.
pub fn update_from_draft(tasks: &[Task], id: &str, draft: &TaskDraft) -> Vec<Task> {
    map_task(tasks, id, |t| Task {
        text: draft.text.trim().to_string(),
        priority: draft.priority,
        category: draft.category.clone().filter(|c| !c.trim().is_empty()),
        due_date: draft.due_date,
        tags: dedup_tags(draft.tags.clone()),
        ..t.clone()
    })
}

pub fn toggle(tasks: &[Task], id: &str) -> Vec<Task> {
    map_task(tasks, id, |t| Task {
        completed: !t.completed,
        ..t.clone()
    })
}

pub fn mark_completed(tasks: &[Task], id: &str) -> Vec<Task> {
    map_task(tasks, id, |t| Task {
        completed: true,
        ..t.clone()
    })
}

pub fn set_priority(tasks: &[Task], id: &str, priority: Option<Priority>) -> Vec<Task> {
    map_task(tasks, id, |t| Task {
        priority,
        ..t.clone()
    })
}

pub fn remove(tasks: &[Task], id: &str) -> Vec<Task> {
    tasks.iter().filter(|t| t.id != id).cloned().collect()
}

pub fn clear_completed(tasks: &[Task]) -> Vec<Task> {
    tasks.iter().filter(|t| !t.completed).cloned().collect()
}

pub fn clear_all(_tasks: &[Task]) -> Vec<Task> {
    Vec::new()
}

/// What happened to an imported batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    /// Rows dropped for having no text.
    pub dropped: usize,
    /// Rows whose id was missing or already taken.
    pub reassigned: usize,
}

/// Put imported tasks in front of the existing ones, repairing what would
/// break collection invariants: text is trimmed, empty-text rows are dropped,
/// missing or clashing ids are replaced and tags are de-duplicated.
pub fn merge_imported(
    existing: &[Task],
    imported: Vec<Task>,
    clock: &dyn Clock,
) -> (Vec<Task>, MergeReport) {
    let now = clock.now();
    let mut used: HashSet<String> = existing.iter().map(|t| t.id.clone()).collect();
    let mut report = MergeReport::default();
    let mut merged = Vec::with_capacity(imported.len() + existing.len());

    for mut task in imported {
        task.text = task.text.trim().to_string();
        if task.text.is_empty() {
            tracing::warn!(id = %task.id, "dropping imported task without text");
            report.dropped += 1;
            continue;
        }
        if task.id.is_empty() || used.contains(&task.id) {
            task.id = fresh_id(&used, now);
            report.reassigned += 1;
        }
        task.tags = dedup_tags(std::mem::take(&mut task.tags));
        used.insert(task.id.clone());
        merged.push(task);
        report.added += 1;
    }
    merged.extend_from_slice(existing);
    (merged, report)
}

/// Identifier lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no task found with id or text '{0}'")]
    NotFound(String),
    #[error("{}", ambiguous_message(.ident, .matches))]
    Ambiguous {
        ident: String,
        matches: Vec<(String, String)>,
    },
}

fn ambiguous_message(ident: &str, matches: &[(String, String)]) -> String {
    let mut msg = format!("multiple tasks found with text '{ident}':\n");
    for (id, text) in matches {
        msg.push_str(&format!("  {id}: {text}\n"));
    }
    msg.push_str("please use the id instead");
    msg
}

/// Resolve a task by exact id, falling back to case-insensitive exact text.
pub fn resolve_task<'a>(tasks: &'a [Task], ident: &str) -> Result<&'a Task, ResolveError> {
    let ident = ident.trim();
    if let Some(task) = tasks.iter().find(|t| t.id == ident) {
        return Ok(task);
    }

    let wanted = ident.to_lowercase();
    let matches: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.text.to_lowercase() == wanted)
        .collect();

    match matches.as_slice() {
        [] => Err(ResolveError::NotFound(ident.to_string())),
        [task] => Ok(*task),
        many => Err(ResolveError::Ambiguous {
            ident: ident.to_string(),
            matches: many.iter().map(|t| (t.id.clone(), t.text.clone())).collect(),
        }),
    }
}

/// Split comma-separated tag arguments, trim them and drop duplicates.
pub fn split_tags(inputs: &[String]) -> Vec<String> {
    dedup_tags(
        inputs
            .iter()
            .flat_map(|raw| raw.split(','))
            .map(str::to_string),
    )
}

/// Parse human-readable due date input relative to `today`.
///
/// Supports:
/// - "today", "tomorrow"
/// - "monday" .. "sunday" (and "mon" .. "sun"), optionally prefixed by "next"
/// - "end of week" / "eow", "end of month" / "eom"
/// - "in 3d", "in 2w"
/// - "YYYY-MM-DD"
pub fn parse_due_input(s: &str, today: NaiveDate) -> Option<NaiveDate> {
    let s = s.trim().to_lowercase();

    match s.as_str() {
        "today" => return Some(today),
        "tomorrow" => return today.succ_opt(),
        "end of week" | "eow" => {
            return start_end_of_week(today).map(|(_, end)| end);
        }
        "end of month" | "eom" => {
            let (year, month) = if today.month() == 12 {
                (today.year() + 1, 1)
            } else {
                (today.year(), today.month() + 1)
            };
            let first_of_next = NaiveDate::from_ymd_opt(year, month, 1)?;
            return first_of_next.pred_opt();
        }
        _ => {}
    }

    if let Some(rest) = s.strip_prefix("in ") {
        if let Some(n) = rest.strip_suffix('d').and_then(|n| n.trim().parse::<i64>().ok()) {
            return Duration::try_days(n).and_then(|d| today.checked_add_signed(d));
        }
        if let Some(n) = rest.strip_suffix('w').and_then(|n| n.trim().parse::<i64>().ok()) {
            return Duration::try_weeks(n).and_then(|d| today.checked_add_signed(d));
        }
    }

    let (next_week, day_name) = match s.strip_prefix("next ") {
        Some(rest) => (true, rest),
        None => (false, s.as_str()),
    };
    let weekdays = [
        ("monday", "mon"),
        ("tuesday", "tue"),
        ("wednesday", "wed"),
        ("thursday", "thu"),
        ("friday", "fri"),
        ("saturday", "sat"),
        ("sunday", "sun"),
    ];
    if let Some(target) = weekdays
        .iter()
        .position(|(long, short)| day_name == *long || day_name == *short)
    {
        let current = today.weekday().num_days_from_monday() as i64;
        let mut ahead = (target as i64 + 7 - current) % 7;
        if next_week {
            ahead += 7;
        }
        return today.checked_add_signed(Duration::days(ahead));
    }

    crate::task::parse_due_date(&s)
}

/// Monday and Sunday of the ISO week containing `today`, if both are representable.
pub fn start_end_of_week(today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let weekday = today.weekday().num_days_from_monday() as i64;
    let start = today.checked_sub_signed(Duration::days(weekday))?;
    Some((start, start.checked_add_signed(Duration::days(6))?))
}

/// Format a due date relative to today ("today", "tomorrow", "in 3d", "2d late").
pub fn format_due_relative(due: Option<NaiveDate>, today: NaiveDate) -> String {
    match due {
        None => "-".into(),
        Some(d) => {
            let days = (d - today).num_days();
            match days {
                0 => "today".into(),
                1 => "tomorrow".into(),
                n if n > 1 => format!("in {n}d"),
                n => format!("{}d late", -n),
            }
        }
    }
}

pub fn format_priority(p: Option<Priority>) -> &'static str {
    p.map(Priority::as_str).unwrap_or("-")
}

/// Print tasks as a table.
pub fn print_table(tasks: &[&Task], today: NaiveDate) {
    println!(
        "{:<14} {:<4} {:<7} {:<10} {:<12} {}",
        "ID", "Done", "Pri", "Due", "Category", "Text [tags]"
    );
    for t in tasks {
        let tags = if t.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", t.tags.join(","))
        };
        let category = t.category.as_deref().filter(|c| !c.is_empty()).unwrap_or("-");
        println!(
            "{:<14} {:<4} {:<7} {:<10} {:<12} {}{}",
            truncate(&t.id, 14),
            if t.completed { "x" } else { "" },
            format_priority(t.priority),
            format_due_relative(t.due_date, today),
            truncate(category, 12),
            t.text,
            tags
        );
    }
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    fn clock() -> FixedClock {
        FixedClock::at(Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap())
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn draft(text: &str) -> TaskDraft {
        TaskDraft {
            text: text.into(),
            ..TaskDraft::default()
        }
    }

    #[test]
    fn test_validate_draft() {
        let today = day(2024, 5, 10);
        assert!(validate_draft(&draft("ok"), today).is_ok());
        assert_eq!(
            validate_draft(&draft("   "), today).unwrap_err().0,
            vec![ValidationError::EmptyText]
        );
        let long = "x".repeat(MAX_TEXT_LEN + 1);
        assert_eq!(
            validate_draft(&draft(&long), today).unwrap_err().0,
            vec![ValidationError::TextTooLong { len: 201 }]
        );
        assert!(validate_draft(&draft(&"x".repeat(MAX_TEXT_LEN)), today).is_ok());

        let mut past = draft("late");
        past.due_date = Some(day(2024, 5, 9));
        assert_eq!(
            validate_draft(&past, today).unwrap_err().0,
            vec![ValidationError::DueInPast { due: day(2024, 5, 9) }]
        );
        past.due_date = Some(today);
        assert!(validate_draft(&past, today).is_ok());
    }

    #[test]
    fn test_validate_edit_allows_unchanged_past_due() {
        let today = day(2024, 5, 10);
        let mut existing = new_task(draft("old"), &[], &clock());
        existing.due_date = Some(day(2024, 5, 1));
        let mut edit = draft("old, renamed");
        edit.due_date = Some(day(2024, 5, 1));
        assert!(validate_edit(&edit, &existing, today).is_ok());
        edit.due_date = Some(day(2024, 5, 2));
        assert!(validate_edit(&edit, &existing, today).is_err());
    }

    #[test]
    fn test_new_task_assigns_id_and_stamp() {
        let clock = clock();
        let mut d = draft("  Buy milk  ");
        d.tags = vec!["home".into(), "home".into()];
        let a = new_task(d, &[], &clock);
        assert_eq!(a.text, "Buy milk");
        assert_eq!(a.id, clock.now.timestamp_millis().to_string());
        assert_eq!(a.created_at, Some(clock.now));
        assert_eq!(a.tags, vec!["home"]);

        let b = new_task(draft("Second"), &[a.clone()], &clock);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_collection_operations_by_id() {
        let clock = clock();
        let a = new_task(draft("a"), &[], &clock);
        let tasks = add(&[], a.clone());
        let b = new_task(draft("b"), &tasks, &clock);
        let tasks = add(&tasks, b.clone());
        assert_eq!(tasks[0].id, b.id);

        let tasks = toggle(&tasks, &a.id);
        assert!(tasks[1].completed);
        let tasks = set_priority(&tasks, &b.id, Some(Priority::High));
        assert_eq!(tasks[0].priority, Some(Priority::High));
        let tasks = mark_completed(&tasks, &b.id);
        assert!(tasks[0].completed);

        let mut edit = draft("b edited");
        edit.category = Some("work".into());
        let tasks = update_from_draft(&tasks, &b.id, &edit);
        assert_eq!(tasks[0].text, "b edited");
        assert_eq!(tasks[0].created_at, b.created_at);
        assert!(tasks[0].completed);

        let tasks = toggle(&tasks, &b.id);
        let remaining = clear_completed(&tasks);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);

        assert!(remove(&tasks, &a.id).iter().all(|t| t.id != a.id));
        assert!(clear_all(&tasks).is_empty());
    }

    #[test]
    fn test_replace_keeps_position() {
        let clock = clock();
        let a = new_task(draft("a"), &[], &clock);
        let b = new_task(draft("b"), &[a.clone()], &clock);
        let tasks = vec![a.clone(), b.clone()];
        let mut changed = a.clone();
        changed.text = "A".into();
        let next = replace(&tasks, changed);
        assert_eq!(next[0].text, "A");
        assert_eq!(next[1], b);
        assert_eq!(tasks[0].text, "a");
    }

    #[test]
    fn test_merge_imported() {
        let clock = clock();
        let existing = vec![new_task(draft("mine"), &[], &clock)];
        let imported: Vec<Task> = crate::codec::import_json(&format!(
            r#"[{{"id":"{}","text":"clash"}},{{"text":"  no id  "}},{{"id":"x","text":"   "}},{{"id":"keep","text":"fine","tags":["a"]}}]"#,
            existing[0].id
        ))
        .unwrap();

        let (merged, report) = merge_imported(&existing, imported, &clock);
        assert_eq!(
            report,
            MergeReport {
                added: 3,
                dropped: 1,
                reassigned: 2
            }
        );
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[1].text, "no id");
        assert_eq!(merged[2].id, "keep");
        assert_eq!(merged[3].text, "mine");
        let ids: HashSet<&str> = merged.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), merged.len());
    }

    #[test]
    fn test_resolve_task() {
        let clock = clock();
        let a = new_task(draft("Water plants"), &[], &clock);
        let b = new_task(draft("water plants"), &[a.clone()], &clock);
        let c = new_task(draft("Pay rent"), &[a.clone(), b.clone()], &clock);
        let tasks = vec![a.clone(), b, c.clone()];

        assert_eq!(resolve_task(&tasks, &a.id).unwrap().id, a.id);
        assert_eq!(resolve_task(&tasks, "PAY RENT").unwrap().id, c.id);
        assert!(matches!(resolve_task(&tasks, "water plants"), Err(ResolveError::Ambiguous { .. })));
        assert!(matches!(resolve_task(&tasks, "nothing"), Err(ResolveError::NotFound(_))));
    }

    #[test]
    fn test_split_tags() {
        let tags = split_tags(&["work, urgent".to_string(), "work".to_string(), ",".to_string()]);
        assert_eq!(tags, vec!["work", "urgent"]);
    }

    #[test]
    fn test_parse_due_input() {
        // 2024-05-10 is a Friday.
        let today = day(2024, 5, 10);
        assert_eq!(parse_due_input("today", today), Some(today));
        assert_eq!(parse_due_input("Tomorrow", today), Some(day(2024, 5, 11)));
        assert_eq!(parse_due_input("in 3d", today), Some(day(2024, 5, 13)));
        assert_eq!(parse_due_input("in 2w", today), Some(day(2024, 5, 24)));
        assert_eq!(parse_due_input("monday", today), Some(day(2024, 5, 13)));
        assert_eq!(parse_due_input("fri", today), Some(today));
        assert_eq!(parse_due_input("next fri", today), Some(day(2024, 5, 17)));
        assert_eq!(parse_due_input("eow", today), Some(day(2024, 5, 12)));
        assert_eq!(parse_due_input("eom", today), Some(day(2024, 5, 31)));
        assert_eq!(parse_due_input("2024-12-25", today), Some(day(2024, 12, 25)));
        assert_eq!(parse_due_input("someday", today), None);
    }

    #[test]
    fn test_parse_due_input_out_of_range() {
        let today = day(2024, 5, 10);
        assert_eq!(parse_due_input("in 999999999d", today), None);
        assert_eq!(parse_due_input("in -999999999d", today), None);
        assert_eq!(parse_due_input("in 9223372036854775807w", today), None);
        assert_eq!(parse_due_input("tomorrow", NaiveDate::MAX), None);
        assert_eq!(parse_due_input("next sunday", NaiveDate::MAX), None);
        assert_eq!(parse_due_input("eom", NaiveDate::MAX), None);
        assert_eq!(
            start_end_of_week(today),
            Some((day(2024, 5, 6), day(2024, 5, 12)))
        );
    }

    #[test]
    fn test_format_due_relative() {
        let today = day(2024, 5, 10);
        assert_eq!(format_due_relative(None, today), "-");
        assert_eq!(format_due_relative(Some(today), today), "today");
        assert_eq!(format_due_relative(Some(day(2024, 5, 11)), today), "tomorrow");
        assert_eq!(format_due_relative(Some(day(2024, 5, 15)), today), "in 5d");
        assert_eq!(format_due_relative(Some(day(2024, 5, 8)), today), "2d late");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
