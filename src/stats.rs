//! Derived counts over a task collection.
//!
//! Statistics are recomputed from the collection on every call; nothing is cached.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::fields::Priority;
use crate::task::Task;

/// Label used for tasks without a category.
pub const FALLBACK_CATEGORY: &str = "other";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriorityBreakdown {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub none: usize,
}

impl PriorityBreakdown {
    pub fn sum(&self) -> usize {
        self.high + self.medium + self.low + self.none
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

/// Snapshot of collection metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    /// Whole percent, rounded half up; 0 for an empty collection.
    pub completion_rate: u32,
    pub priority_breakdown: PriorityBreakdown,
    /// In order of first appearance.
    pub category_breakdown: Vec<CategoryCount>,
    pub overdue_count: usize,
    pub due_today_count: usize,
}

/// `round(part / whole * 100)`, 0 when `whole` is 0.
pub fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((200 * part as u64 + whole as u64) / (2 * whole as u64)) as u32
}

pub fn compute_stats(tasks: &[Task], today: NaiveDate) -> Stats {
    let mut stats = Stats {
        total: tasks.len(),
        ..Stats::default()
    };

    for task in tasks {
        if task.completed {
            stats.completed += 1;
        }
        match task.priority {
            Some(Priority::High) => stats.priority_breakdown.high += 1,
            Some(Priority::Medium) => stats.priority_breakdown.medium += 1,
            Some(Priority::Low) => stats.priority_breakdown.low += 1,
            None => stats.priority_breakdown.none += 1,
        }

        let label = task
            .category
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(FALLBACK_CATEGORY);
        match stats
            .category_breakdown
            .iter_mut()
            .find(|c| c.category == label)
        {
            Some(entry) => entry.count += 1,
            None => stats.category_breakdown.push(CategoryCount {
                category: label.to_string(),
                count: 1,
            }),
        }

        if task.is_overdue(today) {
            stats.overdue_count += 1;
        }
        if task.is_due_today(today) {
            stats.due_today_count += 1;
        }
    }

    stats.active = stats.total - stats.completed;
    stats.completion_rate = percent(stats.completed, stats.total);
    stats
}

/// Usage of one tag across the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub total: usize,
    pub completed: usize,
}

/// Per-tag totals, sorted by tag.
pub fn tag_summary(tasks: &[Task]) -> Vec<TagCount> {
    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for task in tasks {
        for tag in &task.tags {
            let entry = counts.entry(tag.as_str()).or_default();
            entry.0 += 1;
            if task.completed {
                entry.1 += 1;
            }
        }
    }
    counts
        .into_iter()
        .map(|(tag, (total, completed))| TagCount {
            tag: tag.to_string(),
            total,
            completed,
        })
        .collect()
}

/// Tasks due on a single day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayLoad {
    pub total: usize,
    pub completed: usize,
}

/// Due-task counts for every day of `year`-`month` that has at least one task due.
pub fn month_load(tasks: &[Task], year: i32, month: u32) -> BTreeMap<NaiveDate, DayLoad> {
    let mut days: BTreeMap<NaiveDate, DayLoad> = BTreeMap::new();
    for task in tasks {
        let Some(due) = task.due_date else { continue };
        if due.year() != year || due.month() != month {
            continue;
        }
        let load = days.entry(due).or_default();
        load.total += 1;
        if task.completed {
            load.completed += 1;
        }
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn task(text: &str) -> Task {
        serde_json::from_value(serde_json::json!({ "id": text, "text": text })).unwrap()
    }

    #[test]
    fn test_empty_collection() {
        let stats = compute_stats(&[], day(2024, 1, 1));
        assert_eq!(stats.total, 0);
        assert_eq!(stats.completion_rate, 0);
        assert!(stats.category_breakdown.is_empty());
    }

    #[test]
    fn test_counts_and_rate() {
        let mut a = task("a");
        a.completed = true;
        a.priority = Some(Priority::High);
        a.category = Some("work".into());
        let mut b = task("b");
        b.category = Some("home".into());
        let mut c = task("c");
        c.category = Some("work".into());
        c.priority = Some(Priority::Low);

        let stats = compute_stats(&[a, b, c], day(2024, 1, 1));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.completion_rate, 33);
        assert_eq!(stats.priority_breakdown.high, 1);
        assert_eq!(stats.priority_breakdown.low, 1);
        assert_eq!(stats.priority_breakdown.none, 1);
        assert_eq!(
            stats.category_breakdown,
            vec![
                CategoryCount { category: "work".into(), count: 2 },
                CategoryCount { category: "home".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_missing_category_uses_fallback() {
        let stats = compute_stats(&[task("a")], day(2024, 1, 1));
        assert_eq!(stats.category_breakdown[0].category, FALLBACK_CATEGORY);

        let mut blank = task("b");
        blank.category = Some(String::new());
        let stats = compute_stats(&[task("a"), blank], day(2024, 1, 1));
        assert_eq!(
            stats.category_breakdown,
            vec![CategoryCount { category: FALLBACK_CATEGORY.into(), count: 2 }]
        );
    }

    #[test]
    fn test_percent_rounds_half_up() {
        assert_eq!(percent(1, 2), 50);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(1, 200), 1);
        assert_eq!(percent(0, 0), 0);
    }

    #[test]
    fn test_overdue_boundaries() {
        let today = day(2024, 5, 10);
        let mut yesterday = task("y");
        yesterday.due_date = Some(day(2024, 5, 9));
        let mut due_today = task("t");
        due_today.due_date = Some(today);
        let mut done_yesterday = task("d");
        done_yesterday.due_date = Some(day(2024, 5, 9));
        done_yesterday.completed = true;

        let stats = compute_stats(&[yesterday, due_today, done_yesterday], today);
        assert_eq!(stats.overdue_count, 1);
        assert_eq!(stats.due_today_count, 1);
    }

    #[test]
    fn test_tag_summary() {
        let mut a = task("a");
        a.tags = vec!["work".into(), "urgent".into()];
        a.completed = true;
        let mut b = task("b");
        b.tags = vec!["work".into()];
        let summary = tag_summary(&[a, b]);
        assert_eq!(
            summary,
            vec![
                TagCount { tag: "urgent".into(), total: 1, completed: 1 },
                TagCount { tag: "work".into(), total: 2, completed: 1 },
            ]
        );
    }

    #[test]
    fn test_month_load() {
        let mut a = task("a");
        a.due_date = Some(day(2024, 2, 29));
        let mut b = task("b");
        b.due_date = Some(day(2024, 2, 29));
        b.completed = true;
        let mut c = task("c");
        c.due_date = Some(day(2024, 3, 1));
        let load = month_load(&[a, b, c], 2024, 2);
        assert_eq!(load.len(), 1);
        assert_eq!(load[&day(2024, 2, 29)], DayLoad { total: 2, completed: 1 });
    }
}
