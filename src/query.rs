//! Filtering, searching and sorting of task collections.
//!
//! Everything here is pure: functions borrow the collection and return new
//! vectors of references in collection order (filters) or in sorted order
//! (`sort_tasks`). The three filter axes are independent predicates, so they
//! can be applied in any order and always select the same set.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use icu_collator::{Collator, CollatorOptions, Strength};

use crate::fields::{priority_rank, FilterMode, Priority, SortKey};
use crate::task::Task;

/// Case-insensitive substring match. A blank term matches everything.
pub fn matches_search(task: &Task, term: &str) -> bool {
    if term.trim().is_empty() {
        return true;
    }
    task.text.to_lowercase().contains(&term.to_lowercase())
}

/// Whether `task` satisfies the named filter mode on `today`.
pub fn matches_mode(task: &Task, mode: FilterMode, today: NaiveDate) -> bool {
    match mode {
        FilterMode::All => true,
        FilterMode::Active => !task.completed,
        FilterMode::Completed => task.completed,
        FilterMode::High => task.priority == Some(Priority::High),
        FilterMode::Overdue => task.is_overdue(today),
    }
}

/// Match-any tag filter: an empty selection matches every task, otherwise a
/// task needs at least one of the selected tags.
pub fn matches_tags(task: &Task, selected: &[String]) -> bool {
    selected.is_empty() || selected.iter().any(|tag| task.has_tag(tag))
}

pub fn filter_by_search<'a>(tasks: &[&'a Task], term: &str) -> Vec<&'a Task> {
    tasks.iter().copied().filter(|t| matches_search(t, term)).collect()
}

pub fn filter_by_mode<'a>(tasks: &[&'a Task], mode: FilterMode, today: NaiveDate) -> Vec<&'a Task> {
    tasks
        .iter()
        .copied()
        .filter(|t| matches_mode(t, mode, today))
        .collect()
}

pub fn filter_by_tags<'a>(tasks: &[&'a Task], selected: &[String]) -> Vec<&'a Task> {
    tasks
        .iter()
        .copied()
        .filter(|t| matches_tags(t, selected))
        .collect()
}

/// Narrow a collection by search term, then filter mode, then tag selection.
/// The result keeps collection order.
pub fn apply_filters<'a>(
    tasks: &'a [Task],
    mode: FilterMode,
    search: &str,
    selected_tags: &[String],
    today: NaiveDate,
) -> Vec<&'a Task> {
    let all: Vec<&Task> = tasks.iter().collect();
    let searched = filter_by_search(&all, search);
    let moded = filter_by_mode(&searched, mode, today);
    filter_by_tags(&moded, selected_tags)
}

fn created_millis(task: &Task) -> i64 {
    task.created_at.map(|t| t.timestamp_millis()).unwrap_or(0)
}

thread_local! {
    static COLLATOR: Option<Collator> = {
        let mut options = CollatorOptions::new();
        options.strength = Some(Strength::Tertiary);
        match Collator::try_new(&Default::default(), options) {
            Ok(collator) => Some(collator),
            Err(e) => {
                tracing::warn!(error = %e, "collation data unavailable, sorting by code point");
                None
            }
        }
    };
}

/// Locale-aware text ordering (Unicode root collation).
///
/// Base letters decide first, so accented letters sort next to their plain
/// form; then accents; then case, with lowercase first.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    COLLATOR.with(|collator| match collator {
        Some(collator) => collator.compare(a, b),
        None => a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| b.cmp(a)),
    })
}

fn due_order(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn as_task<T: Borrow<Task>>(item: &T) -> &Task {
    item.borrow()
}

/// Return a new, stably sorted copy of `tasks`.
///
/// - `Created`: newest first; a missing timestamp counts as the epoch.
/// - `Priority`: high, medium, low, then unset.
/// - `DueDate`: earliest first; tasks without a due date go last.
/// - `Alphabetical`: by text, see [`locale_compare`].
pub fn sort_tasks<T>(tasks: &[T], key: SortKey) -> Vec<T>
where
    T: Borrow<Task> + Clone,
{
    let mut sorted = tasks.to_vec();
    match key {
        SortKey::Created => sorted
            .sort_by(|a, b| created_millis(as_task(b)).cmp(&created_millis(as_task(a)))),
        SortKey::Priority => sorted.sort_by(|a, b| {
            priority_rank(as_task(b).priority).cmp(&priority_rank(as_task(a).priority))
        }),
        SortKey::DueDate => {
            sorted.sort_by(|a, b| due_order(as_task(a).due_date, as_task(b).due_date))
        }
        SortKey::Alphabetical => {
            sorted.sort_by(|a, b| locale_compare(&as_task(a).text, &as_task(b).text))
        }
    }
    sorted
}

/// The four list axes bundled together, as a list view holds them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filter: FilterMode,
    pub search: String,
    pub tags: Vec<String>,
    pub sort: SortKey,
}

impl Query {
    /// Filter, then sort.
    pub fn run<'a>(&self, tasks: &'a [Task], today: NaiveDate) -> Vec<&'a Task> {
        let filtered = apply_filters(tasks, self.filter, &self.search, &self.tags, today);
        sort_tasks(&filtered, self.sort)
    }
}

/// Tasks whose due date falls on `date`, in collection order.
pub fn tasks_due_on(tasks: &[Task], date: NaiveDate) -> Vec<&Task> {
    tasks.iter().filter(|t| t.due_date == Some(date)).collect()
}

/// Every distinct tag in the collection, sorted.
pub fn all_tags(tasks: &[Task]) -> Vec<String> {
    let set: BTreeSet<&str> = tasks
        .iter()
        .flat_map(|t| t.tags.iter().map(String::as_str))
        .collect();
    set.into_iter().map(str::to_string).collect()
}

/// Add `tag` to the selection, or remove it if already selected.
pub fn toggle_tag(selected: &[String], tag: &str) -> Vec<String> {
    if selected.iter().any(|t| t == tag) {
        selected.iter().filter(|t| *t != tag).cloned().collect()
    } else {
        let mut next = selected.to_vec();
        next.push(tag.to_string());
        next
    }
}
