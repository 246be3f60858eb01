//! Command implementations for the CLI interface.
//!
//! Each handler reads the collection from the persisted state, derives the
//! next collection with the pure operations in [`crate::db`], and writes it
//! back through [`PersistedState::update`].

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use clap::Subcommand;
use clap_complete::{generate, Shell};

use crate::clock::{Clock, SystemClock};
use crate::codec::{import_file, write_export};
use crate::config::Config;
use crate::db::*;
use crate::fields::{ExportFormat, FilterMode, Priority, PriorityLevel, SortKey};
use crate::persist::PersistedState;
use crate::query::{tasks_due_on, Query};
use crate::stats::{compute_stats, month_load, tag_summary};
use crate::storage::FileStore;
use crate::task::{Task, TaskDraft};

#[derive(Subcommand)]
pub enum Commands {
    /// Add a new task.
    Add {
        /// What needs doing (at most 200 characters).
        text: String,
        #[arg(long, value_enum)]
        priority: Option<Priority>,
        #[arg(long)]
        category: Option<String>,
        /// Due date: YYYY-MM-DD, "today", "tomorrow", "friday", "in 3d", "eom".
        #[arg(long)]
        due: Option<String>,
        /// Comma-separated tags. May be repeated.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// List tasks.
    List {
        /// Filter mode (defaults to the configured one).
        #[arg(long, value_enum)]
        filter: Option<FilterMode>,
        /// Case-insensitive text search.
        #[arg(long)]
        search: Option<String>,
        /// Show tasks carrying any of these tags. May be repeated.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Sort key (defaults to the configured one).
        #[arg(long, value_enum)]
        sort: Option<SortKey>,
        /// Limit number of rows printed.
        #[arg(long)]
        limit: Option<usize>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Edit fields on a task.
    Edit {
        /// Task id or text.
        id: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long, value_enum)]
        priority: Option<PriorityLevel>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        clear_category: bool,
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        clear_due: bool,
        /// Add tags. May be repeated and comma-separated.
        #[arg(long = "add-tag")]
        add_tags: Vec<String>,
        /// Remove tags. May be repeated and comma-separated.
        #[arg(long = "rm-tag")]
        rm_tags: Vec<String>,
    },

    /// Flip a task between open and completed.
    Toggle {
        /// Task id or text.
        id: String,
    },

    /// Set or clear a task's priority.
    Priority {
        /// Task id or text.
        id: String,
        #[arg(value_enum)]
        level: PriorityLevel,
    },

    /// Delete a task.
    Delete {
        /// Task id or text.
        id: String,
    },

    /// Remove completed tasks, or every task with --all.
    Clear {
        #[arg(long)]
        all: bool,
        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Show collection statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// List tags with usage counts.
    Tags,

    /// Show due tasks per day of a month, or the tasks due on one date.
    Calendar {
        /// Month as YYYY-MM (defaults to the current month).
        #[arg(long)]
        month: Option<String>,
        /// A single date; accepts the same forms as --due.
        #[arg(long, conflicts_with = "month")]
        date: Option<String>,
    },

    /// Export all tasks to todos-YYYY-MM-DD.json or .txt.
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Directory to write into (defaults to the configured one).
        #[arg(long, short)]
        output_dir: Option<PathBuf>,
    },

    /// Import tasks from an exported JSON file, placing them first.
    Import {
        input: PathBuf,
        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
        /// Skip creating a backup before import.
        #[arg(long)]
        no_backup: bool,
    },

    /// Print the list again whenever another process changes the store.
    Watch,

    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Everything a command needs: the store, the mirrored collection, config and a clock.
pub struct App {
    pub config: Config,
    pub store: FileStore,
    pub state: PersistedState<Vec<Task>>,
    pub clock: SystemClock,
}

impl App {
    pub fn open(config: Config) -> Self {
        let store = FileStore::new(&config.data_dir);
        let state = PersistedState::open(
            Arc::new(store.clone()),
            config.storage_key.clone(),
            Vec::new(),
        );
        App {
            config,
            store,
            state,
            clock: SystemClock,
        }
    }

    fn commit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Vec<Task>) -> Vec<Task>,
    {
        self.state
            .update(f)
            .map(|_| ())
            .context("change could not be saved")
    }

    fn resolve_id(&self, ident: &str) -> Result<String> {
        let tasks = self.state.get();
        Ok(resolve_task(&tasks, ident)?.id.clone())
    }
}

fn parse_due(raw: &str, today: NaiveDate) -> Result<NaiveDate> {
    parse_due_input(raw, today).with_context(|| format!("could not understand date '{raw}'"))
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} (y/N): ");
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase().starts_with('y'))
}

/// Add a new task.
pub fn cmd_add(
    app: &App,
    text: String,
    priority: Option<Priority>,
    category: Option<String>,
    due: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let today = app.clock.today();
    let due_date = due.as_deref().map(|raw| parse_due(raw, today)).transpose()?;
    let draft = TaskDraft {
        text,
        priority,
        category,
        due_date,
        tags: split_tags(&tags),
    };
    validate_draft(&draft, today)?;

    let mut added = String::new();
    app.commit(|tasks| {
        let task = new_task(draft, tasks, &app.clock);
        added = task.id.clone();
        add(tasks, task)
    })?;
    println!("Added task {added}");
    Ok(())
}

/// List tasks with optional filtering and sorting.
pub fn cmd_list(
    app: &App,
    filter: Option<FilterMode>,
    search: Option<String>,
    tags: Vec<String>,
    sort: Option<SortKey>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let today = app.clock.today();
    let tasks = app.state.get();
    let query = Query {
        filter: filter.unwrap_or_else(|| app.config.list.filter()),
        search: search.unwrap_or_default(),
        tags: split_tags(&tags),
        sort: sort.unwrap_or_else(|| app.config.list.sort()),
    };
    let mut rows = query.run(&tasks, today);
    if let Some(n) = limit {
        rows.truncate(n);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        if tasks.is_empty() {
            println!("No tasks yet. Add one with `todo add`.");
        } else {
            println!("No tasks match.");
        }
    } else {
        print_table(&rows, today);
    }
    Ok(())
}

/// Update fields on a task.
#[allow(clippy::too_many_arguments)]
pub fn cmd_edit(
    app: &App,
    id: String,
    text: Option<String>,
    priority: Option<PriorityLevel>,
    category: Option<String>,
    clear_category: bool,
    due: Option<String>,
    clear_due: bool,
    add_tags: Vec<String>,
    rm_tags: Vec<String>,
) -> Result<()> {
    let today = app.clock.today();
    let tasks = app.state.get();
    let current = resolve_task(&tasks, &id)?.clone();

    let due_date = if clear_due {
        None
    } else {
        match due {
            Some(raw) => Some(parse_due(&raw, today)?),
            None => current.due_date,
        }
    };
    let rm = split_tags(&rm_tags);
    let mut tags: Vec<String> = current
        .tags
        .iter()
        .filter(|t| !rm.contains(t))
        .cloned()
        .collect();
    tags.extend(split_tags(&add_tags));

    let draft = TaskDraft {
        text: text.unwrap_or_else(|| current.text.clone()),
        priority: priority.map_or(current.priority, PriorityLevel::into_priority),
        category: if clear_category {
            None
        } else {
            category.or_else(|| current.category.clone())
        },
        due_date,
        tags,
    };
    validate_edit(&draft, &current, today)?;

    app.commit(|tasks| update_from_draft(tasks, &current.id, &draft))?;
    println!("Updated task {}", current.id);
    Ok(())
}

/// Flip completion.
pub fn cmd_toggle(app: &App, id: String) -> Result<()> {
    let id = app.resolve_id(&id)?;
    app.commit(|tasks| toggle(tasks, &id))?;
    let done = app.state.get().iter().any(|t| t.id == id && t.completed);
    println!("Task {id} is now {}", if done { "completed" } else { "open" });
    Ok(())
}

/// Set or clear priority.
pub fn cmd_priority(app: &App, id: String, level: PriorityLevel) -> Result<()> {
    let id = app.resolve_id(&id)?;
    let priority = level.into_priority();
    app.commit(|tasks| set_priority(tasks, &id, priority))?;
    println!("Task {id} priority: {}", format_priority(priority));
    Ok(())
}

/// Delete a task.
pub fn cmd_delete(app: &App, id: String) -> Result<()> {
    let id = app.resolve_id(&id)?;
    app.commit(|tasks| remove(tasks, &id))?;
    println!("Deleted task {id}");
    Ok(())
}

/// Remove completed tasks, or everything.
pub fn cmd_clear(app: &App, all: bool, yes: bool) -> Result<()> {
    let before = app.state.get().len();
    if all {
        if before == 0 {
            println!("Nothing to clear.");
            return Ok(());
        }
        if !yes && !confirm(&format!("Delete all {before} task(s)?"))? {
            println!("Cancelled.");
            return Ok(());
        }
        app.commit(|tasks| clear_all(tasks))?;
    } else {
        app.commit(|tasks| clear_completed(tasks))?;
    }
    let removed = before - app.state.get().len();
    println!("Removed {removed} task(s)");
    Ok(())
}

/// Print collection statistics.
pub fn cmd_stats(app: &App, json: bool) -> Result<()> {
    let stats = compute_stats(&app.state.get(), app.clock.today());
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!(
        "Total {}  Completed {}  Active {}  ({}% done)",
        stats.total, stats.completed, stats.active, stats.completion_rate
    );
    println!(
        "Overdue {}  Due today {}",
        stats.overdue_count, stats.due_today_count
    );
    let p = &stats.priority_breakdown;
    println!(
        "Priority  high {}  medium {}  low {}  none {}",
        p.high, p.medium, p.low, p.none
    );
    if !stats.category_breakdown.is_empty() {
        println!("{:<16} {}", "Category", "Count");
        for c in &stats.category_breakdown {
            println!("{:<16} {}", truncate(&c.category, 16), c.count);
        }
    }
    Ok(())
}

/// List all distinct tags with their usage counts.
pub fn cmd_tags(app: &App) -> Result<()> {
    let summary = tag_summary(&app.state.get());
    if summary.is_empty() {
        println!("No tags in use.");
        return Ok(());
    }
    println!("{:<16} {:<6} {}", "Tag", "Count", "Done");
    for t in summary {
        println!("{:<16} {:<6} {}", truncate(&t.tag, 16), t.total, t.completed);
    }
    Ok(())
}

/// Due tasks per day of a month, or the tasks due on one date.
pub fn cmd_calendar(app: &App, month: Option<String>, date: Option<String>) -> Result<()> {
    let today = app.clock.today();
    let tasks = app.state.get();

    if let Some(raw) = date {
        let day = parse_due(&raw, today)?;
        let rows = tasks_due_on(&tasks, day);
        if rows.is_empty() {
            println!("Nothing due on {day}.");
        } else {
            print_table(&rows, today);
        }
        return Ok(());
    }

    let first = match month {
        Some(raw) => NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
            .with_context(|| format!("month must look like YYYY-MM, got '{raw}'"))?,
        None => today.with_day(1).unwrap_or(today),
    };
    let load = month_load(&tasks, first.year(), first.month());
    println!("{}", first.format("%B %Y"));
    if load.is_empty() {
        println!("Nothing due this month.");
    }
    for (day, l) in load {
        let marker = if day == today { " <- today" } else { "" };
        println!("{}  {} due, {} done{}", day.format("%a %d"), l.total, l.completed, marker);
    }
    Ok(())
}

/// Write an export file.
pub fn cmd_export(app: &App, format: ExportFormat, output_dir: Option<PathBuf>) -> Result<()> {
    let tasks = app.state.get();
    let dir = output_dir.unwrap_or_else(|| app.config.export.dir.clone());
    let path = write_export(
        &dir,
        format,
        &tasks,
        app.clock.today(),
        &app.config.export.text_date_format,
    )
    .with_context(|| format!("failed to write export into {}", dir.display()))?;
    println!("Exported {} task(s) to {}", tasks.len(), path.display());
    Ok(())
}

/// Import tasks from an exported JSON file with automatic backup.
pub async fn cmd_import(app: &App, input: PathBuf, yes: bool, no_backup: bool) -> Result<()> {
    let imported = import_file(&input)
        .await
        .with_context(|| format!("failed to import {}", input.display()))?;
    if imported.is_empty() {
        println!("{} contains no tasks.", input.display());
        return Ok(());
    }
    if !yes && !confirm(&format!("Import {} task(s)?", imported.len()))? {
        println!("Import cancelled.");
        return Ok(());
    }

    if !no_backup && !app.state.get().is_empty() {
        match app.store.backup(app.state.key()) {
            Ok(path) => println!("Created backup: {}", path.display()),
            Err(e) => {
                eprintln!("Warning: failed to create backup: {e}");
                if !yes && !confirm("Continue without backup?")? {
                    println!("Import cancelled.");
                    return Ok(());
                }
            }
        }
    }

    let mut report = MergeReport::default();
    app.commit(|tasks| {
        let (merged, r) = merge_imported(tasks, imported, &app.clock);
        report = r;
        merged
    })?;
    println!("Imported {} task(s)", report.added);
    if report.dropped > 0 {
        println!("Skipped {} task(s) without text", report.dropped);
    }
    if report.reassigned > 0 {
        println!("Gave {} task(s) a new id", report.reassigned);
    }
    Ok(())
}

/// Follow changes made by other processes until interrupted.
pub async fn cmd_watch(app: &App) -> Result<()> {
    if !app.state.is_watching() {
        bail!("cannot watch {}", app.store.dir().display());
    }
    let query = Query {
        filter: app.config.list.filter(),
        sort: app.config.list.sort(),
        ..Query::default()
    };
    let clock = app.clock;
    let show = move |tasks: &Vec<Task>| {
        let today = clock.today();
        let rows = query.run(tasks, today);
        println!("-- {} task(s) --", rows.len());
        print_table(&rows, today);
    };
    show(&app.state.get());
    app.state.on_change(show);
    println!("Watching {} (Ctrl-C to stop)", app.store.dir().display());
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Generate shell completion scripts.
pub fn cmd_completions(shell: Shell) {
    use crate::cli::Cli;
    use clap::CommandFactory;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut io::stdout());
}
