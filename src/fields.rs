//! Enumerations and field types for task management.
//!
//! This module defines the structured values a task or a list view can take:
//! priorities, the named filter modes, sort keys and export formats. Every
//! enum that arrives as free text (config files, imported documents) has a
//! total `from_name` parser that falls back to a safe default instead of failing.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Priority classification for task importance.
///
/// A task without a priority is represented by `Option::None`; the string
/// `"none"` used by older documents maps to the same thing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Parse a priority name, case-insensitively. `"none"` and unknown names yield `None`.
    pub fn from_name(s: &str) -> Option<Priority> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// Sort rank of an optional priority: high 3, medium 2, low 1, unset 0.
pub fn priority_rank(p: Option<Priority>) -> u8 {
    match p {
        Some(Priority::High) => 3,
        Some(Priority::Medium) => 2,
        Some(Priority::Low) => 1,
        None => 0,
    }
}

/// Priority as typed on the command line, where clearing is spelled `none`.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum PriorityLevel {
    High,
    Medium,
    Low,
    None,
}

impl PriorityLevel {
    pub fn into_priority(self) -> Option<Priority> {
        match self {
            PriorityLevel::High => Some(Priority::High),
            PriorityLevel::Medium => Some(Priority::Medium),
            PriorityLevel::Low => Some(Priority::Low),
            PriorityLevel::None => None,
        }
    }
}

/// Named predicates narrowing the displayed collection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    All,
    Active,
    Completed,
    High,
    Overdue,
}

impl FilterMode {
    /// Total parser: unknown names select `All`.
    pub fn from_name(s: &str) -> FilterMode {
        match s.trim().to_lowercase().as_str() {
            "all" => FilterMode::All,
            "active" => FilterMode::Active,
            "completed" => FilterMode::Completed,
            "high" => FilterMode::High,
            "overdue" => FilterMode::Overdue,
            other => {
                tracing::debug!(filter = other, "unknown filter mode, showing all tasks");
                FilterMode::All
            }
        }
    }
}

/// Available orderings for task lists.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    #[default]
    Created,
    Priority,
    DueDate,
    Alphabetical,
}

impl SortKey {
    /// Total parser: unknown names select `Created`. Accepts `dueDate`, `due-date` and `due`.
    pub fn from_name(s: &str) -> SortKey {
        match s.trim().to_lowercase().as_str() {
            "created" => SortKey::Created,
            "priority" => SortKey::Priority,
            "duedate" | "due-date" | "due_date" | "due" => SortKey::DueDate,
            "alphabetical" | "alpha" => SortKey::Alphabetical,
            other => {
                tracing::debug!(sort = other, "unknown sort key, sorting by creation time");
                SortKey::Created
            }
        }
    }
}

/// Export document flavours.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
        }
    }
}
